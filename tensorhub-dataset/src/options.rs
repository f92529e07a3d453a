use std::sync::Arc;

use tensorhub_dtype::SchemaNode;
use tensorhub_error::HubResult;
use tensorhub_io::{ByteStoreRef, CacheConfig, open_store};
use tensorhub_metrics::HubMetrics;
use tensorhub_tensor::TensorOptions;

use crate::{Dataset, DatasetRegistry, NoopRegistry};

/// Options for creating and opening a [`Dataset`].
///
/// ```no_run
/// use tensorhub_dataset::DatasetOptions;
/// use tensorhub_dtype::{CompositeSchema, PType, TensorSchema};
/// use tensorhub_io::CacheConfig;
///
/// let schema = CompositeSchema::new().with_field(
///     "image",
///     TensorSchema::new(PType::U8, vec![None, None, Some(3)], vec![32, 32, 3]).unwrap(),
/// );
/// let dataset = DatasetOptions::default()
///     .with_cache(CacheConfig::default().with_lock(false))
///     .with_name("tiny-images")
///     .create_at("/tmp/tiny-images", schema, 0)
///     .unwrap();
/// dataset.append_shape(5).unwrap();
/// dataset.close().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub(crate) cache: CacheConfig,
    pub(crate) lazy: bool,
    pub(crate) name: Option<String>,
    pub(crate) meta_info: serde_json::Map<String, serde_json::Value>,
    pub(crate) registry: Arc<dyn DatasetRegistry>,
    pub(crate) metrics: HubMetrics,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            lazy: true,
            name: None,
            meta_info: serde_json::Map::new(),
            registry: Arc::new(NoopRegistry),
            metrics: HubMetrics::default(),
        }
    }
}

impl DatasetOptions {
    /// Set the cache configuration used by every tensor.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Whether indexing builds views (`true`) or reads immediately (`false`).
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Set the display name of a new dataset.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the free-form metadata of a new dataset.
    pub fn with_meta_info(mut self, meta_info: serde_json::Map<String, serde_json::Value>) -> Self {
        self.meta_info = meta_info;
        self
    }

    /// Notify `registry` of lifecycle events.
    pub fn with_registry(mut self, registry: Arc<dyn DatasetRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Record cache and storage metrics into `metrics`.
    pub fn with_metrics(mut self, metrics: HubMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn tensor_options(&self) -> TensorOptions {
        TensorOptions::default()
            .with_cache(self.cache.clone())
            .with_metrics(self.metrics.clone())
    }

    /// Create a dataset of `sample_count` empty samples in `store`.
    ///
    /// Fails if `store` already holds a dataset, and with `NotADataset` if it holds anything
    /// else. If creation fails partway, the metadata and tensor subtrees it wrote are removed
    /// before the error is returned.
    pub fn create(
        self,
        store: ByteStoreRef,
        schema: impl Into<SchemaNode>,
        sample_count: usize,
    ) -> HubResult<Dataset> {
        Dataset::create(store, None, schema.into(), sample_count, self)
    }

    /// Like [`DatasetOptions::create`], opening the store `url` points at.
    pub fn create_at(self, url: &str, schema: impl Into<SchemaNode>, sample_count: usize) -> HubResult<Dataset> {
        Dataset::create(open_store(url)?, Some(url), schema.into(), sample_count, self)
    }

    /// Open the dataset stored in `store`.
    pub fn open(self, store: ByteStoreRef) -> HubResult<Dataset> {
        Dataset::open(store, None, self)
    }

    /// Like [`DatasetOptions::open`], opening the store `url` points at.
    pub fn open_at(self, url: &str) -> HubResult<Dataset> {
        Dataset::open(open_store(url)?, Some(url), self)
    }

    /// Open the dataset in `store`, creating it if the root is empty.
    ///
    /// An existing dataset must have the same leaf paths as `schema` (`SchemaMismatch`) and
    /// exactly `sample_count` samples (`ShapeMismatch`).
    pub fn open_with(
        self,
        store: ByteStoreRef,
        schema: impl Into<SchemaNode>,
        sample_count: usize,
    ) -> HubResult<Dataset> {
        Dataset::open_with(store, None, schema.into(), sample_count, self)
    }

    /// Like [`DatasetOptions::open_with`], opening the store `url` points at.
    pub fn open_with_at(self, url: &str, schema: impl Into<SchemaNode>, sample_count: usize) -> HubResult<Dataset> {
        Dataset::open_with(open_store(url)?, Some(url), schema.into(), sample_count, self)
    }
}
