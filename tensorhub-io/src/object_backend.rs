use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use tensorhub_error::{HubError, HubResult};
use tokio::runtime::{Builder, Runtime};

use crate::store::{ByteStore, join_key, validate_key};

/// A [`ByteStore`] over any [`ObjectStore`] (S3, GCS, Azure, HTTP, ...).
///
/// Calls block the current thread on a private single-threaded runtime.
pub struct ObjectStoreBackend {
    object_store: Arc<dyn ObjectStore>,
    prefix: String,
    runtime: Arc<Runtime>,
}

impl ObjectStoreBackend {
    /// Wrap `object_store`, placing every key below `prefix`.
    pub fn new(object_store: Arc<dyn ObjectStore>, prefix: &str) -> HubResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            object_store,
            prefix: prefix.trim_matches('/').to_string(),
            runtime: Arc::new(runtime),
        })
    }

    fn location(&self, key: &str) -> Path {
        Path::from(join_key(&self.prefix, key))
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn relative(&self, location: &Path) -> String {
        let full = location.as_ref();
        if self.prefix.is_empty() {
            return full.to_string();
        }
        full.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(full)
            .to_string()
    }
}

impl Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("object_store", &self.object_store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ByteStore for ObjectStoreBackend {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn get(&self, key: &str) -> HubResult<Option<Bytes>> {
        let location = self.location(key);
        self.block_on(async {
            match self.object_store.get(&location).await {
                Ok(result) => Ok(Some(result.bytes().await?)),
                Err(object_store::Error::NotFound { .. }) => Ok(None),
                Err(err) => Err(err.into()),
            }
        })
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, value)))]
    fn put(&self, key: &str, value: Bytes) -> HubResult<()> {
        validate_key(key)?;
        let location = self.location(key);
        self.block_on(self.object_store.put(&location, PutPayload::from(value)))?;
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: Bytes) -> HubResult<bool> {
        validate_key(key)?;
        let location = self.location(key);
        let opts = PutOptions::from(PutMode::Create);
        match self.block_on(
            self.object_store
                .put_opts(&location, PutPayload::from(value), opts),
        ) {
            Ok(_) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, key: &str) -> HubResult<()> {
        let location = self.location(key);
        match self.block_on(self.object_store.delete(&location)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> HubResult<()> {
        for key in self.list(prefix)? {
            self.delete(&key)?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> HubResult<Vec<String>> {
        let full = join_key(&self.prefix, prefix);
        let location = (!full.is_empty()).then(|| Path::from(full.as_str()));
        let metas = self.block_on(
            self.object_store
                .list(location.as_ref())
                .try_collect::<Vec<_>>(),
        )?;
        let mut keys = metas
            .iter()
            .map(|meta| self.relative(&meta.location))
            .collect::<Vec<_>>();
        // a prefix naming a single object lists that object
        if keys.is_empty() && !prefix.trim_matches('/').is_empty() && self.exists(prefix)? {
            keys.push(prefix.trim_matches('/').to_string());
        }
        keys.sort();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> HubResult<bool> {
        let location = self.location(key);
        match self.block_on(self.object_store.head(&location)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(HubError::from(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    #[test]
    fn backend_roundtrip() {
        let backend = ObjectStoreBackend::new(Arc::new(InMemory::new()), "datasets/mnist").unwrap();
        backend.put("image/0", Bytes::from_static(b"chunk")).unwrap();
        backend.put("meta.json", Bytes::from_static(b"{}")).unwrap();

        assert_eq!(backend.get("image/0").unwrap().unwrap(), Bytes::from_static(b"chunk"));
        assert!(backend.get("image/1").unwrap().is_none());
        assert_eq!(backend.list("").unwrap(), ["image/0", "meta.json"]);
        assert_eq!(backend.list("image").unwrap(), ["image/0"]);

        assert!(backend.put_if_absent("image/0.lock", Bytes::new()).unwrap());
        assert!(!backend.put_if_absent("image/0.lock", Bytes::new()).unwrap());

        backend.delete_prefix("").unwrap();
        assert!(backend.list("").unwrap().is_empty());
    }
}
