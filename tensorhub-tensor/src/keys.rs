use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tensorhub_error::HubResult;
use tensorhub_io::{ByteStore, TieredCache};

const STRIPES: usize = 64;

/// The key space of one tensor, with read-modify-write cycles serialized per key.
///
/// Within a process, cycles on the same key are serialized by striped mutexes. When the cache
/// has locking enabled, each cycle also holds the advisory `<key>.lock` of the durable store and
/// starts from the durable value unless this cache holds an unflushed write. The new value is
/// written back on flush like any other.
#[derive(Debug)]
pub(crate) struct KeySpace {
    cache: Arc<TieredCache>,
    stripes: Box<[Mutex<()>]>,
}

impl KeySpace {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self {
            cache,
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn get(&self, key: &str) -> HubResult<Option<Bytes>> {
        self.cache.get(key)
    }

    /// Replace the value at `key` with `f(current)`.
    pub fn modify<F>(&self, key: &str, f: F) -> HubResult<()>
    where
        F: FnOnce(Option<Bytes>) -> HubResult<Bytes>,
    {
        let _stripe = self.stripes[stripe_of(key)].lock();
        let lock = self.cache.lock(key)?;
        let current = if lock.is_some() {
            self.cache.get_fresh(key)?
        } else {
            self.cache.get(key)?
        };
        let result = self.cache.put(key, f(current)?);
        drop(lock);
        result
    }
}

fn stripe_of(key: &str) -> usize {
    key.bytes()
        .fold(0usize, |h, b| h.wrapping_mul(31).wrapping_add(usize::from(b)))
        % STRIPES
}
