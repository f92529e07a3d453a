use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;
use tensorhub_error::HubResult;

use crate::store::{ByteStore, key_in_prefix, validate_key};

/// A [`ByteStore`] held entirely in memory.
///
/// Backs the memory cache tier, and serves as a durable store for tests and scratch datasets.
#[derive(Debug, Default)]
pub struct InMemoryStore(RwLock<BTreeMap<String, Bytes>>);

impl InMemoryStore {
    /// Total bytes held
    pub fn nbytes(&self) -> usize {
        self.0.read().values().map(Bytes::len).sum()
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Whether nothing is held
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl ByteStore for InMemoryStore {
    fn get(&self, key: &str) -> HubResult<Option<Bytes>> {
        Ok(self.0.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Bytes) -> HubResult<()> {
        validate_key(key)?;
        self.0.write().insert(key.to_string(), value);
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: Bytes) -> HubResult<bool> {
        validate_key(key)?;
        let mut guard = self.0.write();
        if guard.contains_key(key) {
            return Ok(false);
        }
        guard.insert(key.to_string(), value);
        Ok(true)
    }

    fn delete(&self, key: &str) -> HubResult<()> {
        self.0.write().remove(key);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> HubResult<()> {
        self.0.write().retain(|key, _| !key_in_prefix(key, prefix));
        Ok(())
    }

    fn list(&self, prefix: &str) -> HubResult<Vec<String>> {
        Ok(self
            .0
            .read()
            .keys()
            .filter(|key| key_in_prefix(key, prefix))
            .cloned()
            .collect())
    }

    fn exists(&self, key: &str) -> HubResult<bool> {
        Ok(self.0.read().contains_key(key))
    }
}
