use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use tensorhub_error::{HubResult, hub_bail};

/// A path-keyed byte map: the durable bottom tier of every cache.
///
/// Keys are relative, `/`-separated paths without a leading slash. A prefix names a subtree:
/// `"image"` covers `"image"` itself and every key below `"image/"`, but not `"images/0"`.
/// An absent key is a normal outcome (`Ok(None)`), never an error.
pub trait ByteStore: Debug + Send + Sync {
    /// Read the value at `key`.
    fn get(&self, key: &str) -> HubResult<Option<Bytes>>;

    /// Write `value` at `key`, replacing any previous value.
    fn put(&self, key: &str, value: Bytes) -> HubResult<()>;

    /// Atomically write `value` at `key` only if nothing is stored there.
    ///
    /// Returns whether the value was written. This is the primitive advisory locks are built on.
    fn put_if_absent(&self, key: &str, value: Bytes) -> HubResult<bool>;

    /// Remove `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> HubResult<()>;

    /// Remove every key under `prefix`. The empty prefix removes everything.
    fn delete_prefix(&self, prefix: &str) -> HubResult<()>;

    /// Every key under `prefix`, sorted.
    fn list(&self, prefix: &str) -> HubResult<Vec<String>>;

    /// Whether a value is stored at `key`.
    fn exists(&self, key: &str) -> HubResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// A shared reference to a byte store
pub type ByteStoreRef = Arc<dyn ByteStore>;

/// Join two key fragments with a single `/`, ignoring empty fragments.
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let key = key.trim_start_matches('/');
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{key}"),
    }
}

/// Whether `key` lies in the subtree named by `prefix`.
pub fn key_in_prefix(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    prefix.is_empty()
        || key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Reject keys that would escape the store root.
pub(crate) fn validate_key(key: &str) -> HubResult<()> {
    if key.is_empty() {
        hub_bail!("empty storage key");
    }
    if key.starts_with('/') || key.split('/').any(|segment| segment == ".." || segment == ".") {
        hub_bail!("invalid storage key {key}");
    }
    Ok(())
}

/// A store whose keys all live under `prefix` of another store.
///
/// Used to give each flattened tensor its own storage subtree of the dataset root.
#[derive(Debug, Clone)]
pub struct PrefixedStore {
    inner: ByteStoreRef,
    prefix: String,
}

impl PrefixedStore {
    /// Scope `inner` to the subtree at `prefix`.
    pub fn new(inner: ByteStoreRef, prefix: &str) -> Self {
        Self {
            inner,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// The subtree this store is scoped to
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn strip<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return key;
        }
        key.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(key)
    }
}

impl ByteStore for PrefixedStore {
    fn get(&self, key: &str) -> HubResult<Option<Bytes>> {
        self.inner.get(&join_key(&self.prefix, key))
    }

    fn put(&self, key: &str, value: Bytes) -> HubResult<()> {
        self.inner.put(&join_key(&self.prefix, key), value)
    }

    fn put_if_absent(&self, key: &str, value: Bytes) -> HubResult<bool> {
        self.inner.put_if_absent(&join_key(&self.prefix, key), value)
    }

    fn delete(&self, key: &str) -> HubResult<()> {
        self.inner.delete(&join_key(&self.prefix, key))
    }

    fn delete_prefix(&self, prefix: &str) -> HubResult<()> {
        self.inner.delete_prefix(&join_key(&self.prefix, prefix))
    }

    fn list(&self, prefix: &str) -> HubResult<Vec<String>> {
        Ok(self
            .inner
            .list(&join_key(&self.prefix, prefix))?
            .iter()
            .map(|key| self.strip(key).to_string())
            .collect())
    }

    fn exists(&self, key: &str) -> HubResult<bool> {
        self.inner.exists(&join_key(&self.prefix, key))
    }
}
