use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tensorhub_error::{HubResult, hub_bail};

use crate::ByteStoreRef;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// An advisory lock on one key of a durable store, held as a sibling `<key>.lock` object.
///
/// Acquisition relies only on the store's create-if-absent primitive, so it works across
/// processes sharing a directory or bucket. The lock is released when the guard drops.
#[derive(Debug)]
pub struct KeyLock {
    store: ByteStoreRef,
    lock_key: String,
}

impl KeyLock {
    /// Take the lock on `key`, retrying with exponential backoff until `timeout` elapses.
    pub fn acquire(store: ByteStoreRef, key: &str, timeout: Duration) -> HubResult<Self> {
        let lock_key = format!("{key}.lock");
        let deadline = Instant::now() + timeout;
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if store.put_if_absent(&lock_key, Bytes::from_static(b"locked"))? {
                log::trace!("acquired {lock_key}");
                return Ok(Self { store, lock_key });
            }
            let now = Instant::now();
            if now >= deadline {
                hub_bail!(
                    ConcurrentWriteConflict: "timed out after {:?} waiting for {lock_key}",
                    timeout
                );
            }
            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Key of the lock object
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        if let Err(err) = self.store.delete(&self.lock_key) {
            log::warn!("failed to release {}: {err}", self.lock_key);
        }
    }
}
