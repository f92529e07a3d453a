use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tensorhub_dtype::SchemaNode;
use tensorhub_error::{HubResult, hub_bail, hub_err};
use tensorhub_io::{ByteStore, ByteStoreRef, CacheConfig, TieredCache};
use tensorhub_metrics::HubMetrics;
use tensorhub_tensor::TensorMeta;

/// Key of the metadata document under a dataset root.
pub const META_KEY: &str = "meta.json";

/// Version written into every metadata document.
pub const FORMAT_VERSION: u32 = 1;

/// The dataset metadata document stored at `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaDocument {
    /// The dataset shape; its single axis is the sample count
    pub shape: Vec<usize>,
    /// The serialized schema tree
    pub schema: serde_json::Value,
    /// Format version
    pub version: u32,
    /// Free-form user metadata
    #[serde(default)]
    pub meta_info: serde_json::Map<String, serde_json::Value>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Metadata of every flattened tensor, keyed by leaf path
    #[serde(default)]
    pub tensors: BTreeMap<String, TensorMeta>,
}

impl MetaDocument {
    /// The number of samples
    pub fn sample_count(&self) -> HubResult<usize> {
        match self.shape.as_slice() {
            [len] => Ok(*len),
            other => hub_bail!(
                CorruptChunk: "dataset shape must have exactly one axis, found {}",
                other.len()
            ),
        }
    }

    /// Parse the stored schema.
    pub fn schema(&self) -> HubResult<SchemaNode> {
        SchemaNode::from_document(self.schema.clone())
    }
}

/// Reads and writes the metadata document of one dataset root.
#[derive(Debug)]
pub struct MetadataStore {
    cache: TieredCache,
}

impl MetadataStore {
    /// Persist metadata into `durable`. The document bypasses the local cache tier.
    pub fn try_new(durable: ByteStoreRef, config: &CacheConfig, metrics: &HubMetrics) -> HubResult<Self> {
        let config = config.clone().with_local_capacity(0).with_lock(false);
        Ok(Self {
            cache: TieredCache::try_new(durable, config, metrics)?,
        })
    }

    /// Whether a document exists.
    pub fn exists(&self) -> HubResult<bool> {
        self.cache.exists(META_KEY)
    }

    /// Load the document, or `None` if the root holds no dataset.
    pub fn load(&self) -> HubResult<Option<MetaDocument>> {
        self.cache
            .get(META_KEY)?
            .map(|bytes| {
                serde_json::from_slice::<MetaDocument>(&bytes)
                    .map_err(|e| hub_err!(CorruptChunk: "malformed {META_KEY}: {e}"))
            })
            .transpose()
    }

    /// Write `document` through to durable storage.
    pub fn save(&self, document: &MetaDocument) -> HubResult<()> {
        let bytes = serde_json::to_vec(document)?;
        self.cache.put(META_KEY, Bytes::from(bytes))?;
        self.cache.flush()
    }

    /// Forget cached state without writing it.
    pub fn discard(&self) -> HubResult<()> {
        self.cache.discard()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tensorhub_dtype::{CompositeSchema, PType, TensorSchema};
    use tensorhub_io::InMemoryStore;

    use super::*;

    #[test]
    fn document_roundtrip() {
        let durable = Arc::new(InMemoryStore::default());
        let store = MetadataStore::try_new(durable.clone(), &CacheConfig::default(), &HubMetrics::default()).unwrap();
        assert!(store.load().unwrap().is_none());

        let schema = SchemaNode::from(
            CompositeSchema::new().with_field("image", TensorSchema::fixed(PType::U8, vec![4, 4])),
        );
        let document = MetaDocument {
            shape: vec![3],
            schema: schema.to_document().unwrap(),
            version: FORMAT_VERSION,
            meta_info: serde_json::Map::new(),
            name: Some("mnist".into()),
            tensors: BTreeMap::new(),
        };
        store.save(&document).unwrap();

        assert!(durable.get(META_KEY).unwrap().is_some());
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, document);
        assert_eq!(loaded.sample_count().unwrap(), 3);
        assert_eq!(loaded.schema().unwrap(), schema);
    }

    #[test]
    fn malformed_document() {
        let durable = Arc::new(InMemoryStore::default());
        durable.put(META_KEY, Bytes::from_static(b"{not json")).unwrap();
        let store = MetadataStore::try_new(durable, &CacheConfig::default(), &HubMetrics::default()).unwrap();
        assert!(matches!(
            store.load().unwrap_err(),
            tensorhub_error::HubError::CorruptChunk(..)
        ));
    }
}
