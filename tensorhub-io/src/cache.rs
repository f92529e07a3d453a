use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use linked_hash_set::LinkedHashSet;
use parking_lot::Mutex;
use tempfile::TempDir;
use tensorhub_error::{HubResult, ResultExt};
use tensorhub_metrics::{Counter, HubMetrics, MetricId};

use crate::store::key_in_prefix;
use crate::{ByteStore, ByteStoreRef, CacheConfig, InMemoryStore, KeyLock, LocalStore};

/// One bounded cache level with LRU eviction and dirty tracking.
struct Tier {
    name: &'static str,
    store: ByteStoreRef,
    capacity: usize,
    size: usize,
    lru: LinkedHashSet<String>,
    sizes: HashMap<String, usize>,
    dirty: HashSet<String>,

    hits: Arc<Counter>,
    misses: Arc<Counter>,
    evictions: Arc<Counter>,
    writebacks: Arc<Counter>,
}

impl Tier {
    fn new(name: &'static str, store: ByteStoreRef, capacity: usize, metrics: &HubMetrics) -> Self {
        let counter = |what: &str| metrics.counter(MetricId::new(format!("tensorhub.cache.{name}.{what}")));
        Self {
            name,
            store,
            capacity,
            size: 0,
            lru: LinkedHashSet::new(),
            sizes: HashMap::new(),
            dirty: HashSet::new(),
            hits: counter("hits"),
            misses: counter("misses"),
            evictions: counter("evictions"),
            writebacks: counter("writebacks"),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.sizes.contains_key(key)
    }

    fn touch(&mut self, key: &str) {
        self.lru.refresh(key);
    }

    /// Drop `key` from this tier without writing it anywhere.
    fn forget(&mut self, key: &str) -> HubResult<()> {
        if let Some(size) = self.sizes.remove(key) {
            self.size -= size;
            self.lru.remove(key);
            self.dirty.remove(key);
            self.store.delete(key)?;
        }
        Ok(())
    }

    fn forget_all(&mut self) -> HubResult<()> {
        self.store.delete_prefix("")?;
        self.lru.clear();
        self.sizes.clear();
        self.dirty.clear();
        self.size = 0;
        Ok(())
    }
}

struct Tiers {
    tiers: Vec<Tier>,
    durable: ByteStoreRef,
    reads: Arc<Counter>,
    writes: Arc<Counter>,
}

impl Tiers {
    fn new(tiers: Vec<Tier>, durable: ByteStoreRef, metrics: &HubMetrics) -> Self {
        Self {
            tiers,
            durable,
            reads: metrics.counter("tensorhub.store.reads"),
            writes: metrics.counter("tensorhub.store.writes"),
        }
    }

    fn read_durable(&self, key: &str) -> HubResult<Option<Bytes>> {
        self.reads.inc();
        self.durable.get(key)
    }

    fn write_durable(&self, key: &str, value: Bytes) -> HubResult<()> {
        self.writes.inc();
        self.durable.put(key, value)
    }

    fn get(&mut self, key: &str) -> HubResult<Option<Bytes>> {
        for level in 0..self.tiers.len() {
            let tier = &mut self.tiers[level];
            if !tier.contains(key) {
                tier.misses.inc();
                continue;
            }
            match tier.store.get(key)? {
                Some(bytes) => {
                    tier.hits.inc();
                    tier.touch(key);
                    // the hit entry keeps its place and its dirty flag
                    self.promote(level, key, &bytes)?;
                    return Ok(Some(bytes));
                }
                None => {
                    log::warn!("{} cache lost {key}, refetching", tier.name);
                    tier.misses.inc();
                    tier.forget(key)?;
                }
            }
        }

        let bytes = self.read_durable(key)?;
        if let Some(bytes) = &bytes {
            self.promote(self.tiers.len(), key, bytes)?;
        }
        Ok(bytes)
    }

    fn set(&mut self, key: &str, value: Bytes) -> HubResult<()> {
        self.forget(key)?;
        if self.tiers.is_empty() {
            self.write_durable(key, value)
        } else {
            self.admit(0, key, value, true)
        }
    }

    /// Copy a clean `value` into every tier above `level` that can hold it.
    fn promote(&mut self, level: usize, key: &str, value: &Bytes) -> HubResult<()> {
        for upper in 0..level.min(self.tiers.len()) {
            let tier = &self.tiers[upper];
            if value.len() <= tier.capacity && !tier.contains(key) {
                self.insert(upper, key, value.clone(), false)?;
            }
        }
        Ok(())
    }

    /// Insert `value` at `level`, or the first level below it with room for it.
    ///
    /// Dirty entries leaving a tier are written to the next tier down, or to the durable store
    /// from the last tier.
    fn admit(&mut self, level: usize, key: &str, value: Bytes, dirty: bool) -> HubResult<()> {
        if level >= self.tiers.len() {
            if dirty {
                self.write_durable(key, value)?;
            }
            return Ok(());
        }

        let tier = &mut self.tiers[level];
        if value.len() > tier.capacity {
            tier.forget(key)?;
            log::debug!(
                "{key} ({} bytes) exceeds the {} cache capacity of {}",
                value.len(),
                tier.name,
                tier.capacity
            );
            return self.admit(level + 1, key, value, dirty);
        }
        self.insert(level, key, value, dirty)
    }

    /// Store `value` in the tier at `level`, evicting least recently used entries as needed.
    fn insert(&mut self, level: usize, key: &str, value: Bytes, dirty: bool) -> HubResult<()> {
        self.tiers[level].forget(key)?;
        while self.tiers[level].size + value.len() > self.tiers[level].capacity {
            let tier = &mut self.tiers[level];
            let Some(victim) = tier.lru.pop_front() else {
                break;
            };
            let victim_dirty = tier.dirty.remove(&victim);
            let victim_bytes = if victim_dirty {
                tier.store.get(&victim)?
            } else {
                None
            };
            if let Some(size) = tier.sizes.remove(&victim) {
                tier.size -= size;
            }
            tier.store.delete(&victim)?;
            tier.evictions.inc();

            if let Some(bytes) = victim_bytes {
                tier.writebacks.inc();
                log::trace!("writing back {victim} from the {} cache", tier.name);
                self.admit(level + 1, &victim, bytes, true)?;
            }
        }

        let tier = &mut self.tiers[level];
        tier.store.put(key, value.clone())?;
        tier.size += value.len();
        tier.sizes.insert(key.to_string(), value.len());
        tier.lru.insert(key.to_string());
        if dirty {
            tier.dirty.insert(key.to_string());
        }
        Ok(())
    }

    fn forget(&mut self, key: &str) -> HubResult<()> {
        self.tiers.iter_mut().try_for_each(|tier| tier.forget(key))
    }

    fn dirty_copy(&mut self, key: &str) -> HubResult<Option<Bytes>> {
        for tier in self.tiers.iter_mut() {
            if tier.dirty.contains(key) {
                tier.hits.inc();
                tier.touch(key);
                return tier.store.get(key);
            }
        }
        Ok(None)
    }

    fn flush(&mut self) -> HubResult<()> {
        for tier in self.tiers.iter_mut() {
            let mut dirty = tier.dirty.iter().cloned().collect::<Vec<_>>();
            dirty.sort();
            for key in dirty {
                if let Some(bytes) = tier.store.get(&key)? {
                    self.writes.inc();
                    self.durable
                        .put(&key, bytes)
                        .context(|| format!("flushing {key} from the {} cache", tier.name))?;
                }
                tier.dirty.remove(&key);
            }
        }
        Ok(())
    }
}

/// A layered key to bytes cache in front of a durable [`ByteStore`].
///
/// Lookups try the memory tier, then the local persistent tier, then the durable store, and
/// copy what they find into every tier above the hit that can hold it. Writes land dirty in the memory tier and reach
/// the durable store on eviction or [`TieredCache::flush`]. Reads always observe the most
/// recent write through the same cache.
pub struct TieredCache {
    inner: Mutex<Tiers>,
    durable: ByteStoreRef,
    config: CacheConfig,
    // removed with the cache
    _local_dir: Option<TempDir>,
}

impl TieredCache {
    /// Create a cache over `durable`. The local tier starts empty in a fresh directory.
    pub fn try_new(durable: ByteStoreRef, config: CacheConfig, metrics: &HubMetrics) -> HubResult<Self> {
        let mut tiers = Vec::new();
        let mut local_dir = None;
        if config.memory_capacity() > 0 {
            tiers.push(Tier::new(
                "memory",
                Arc::new(InMemoryStore::default()),
                config.memory_capacity(),
                metrics,
            ));
            if config.local_capacity() > 0 {
                let builder = {
                    let mut builder = tempfile::Builder::new();
                    builder.prefix("tensorhub-cache");
                    builder
                };
                let dir = match config.local_dir() {
                    Some(parent) => {
                        std::fs::create_dir_all(parent)?;
                        builder.tempdir_in(parent)?
                    }
                    None => builder.tempdir()?,
                };
                log::debug!("local cache tier at {}", dir.path().display());
                tiers.push(Tier::new(
                    "local",
                    Arc::new(LocalStore::new(dir.path())?),
                    config.local_capacity(),
                    metrics,
                ));
                local_dir = Some(dir);
            }
        }

        Ok(Self {
            inner: Mutex::new(Tiers::new(tiers, durable.clone(), metrics)),
            durable,
            config,
            _local_dir: local_dir,
        })
    }

    /// A cache with no tiers: every operation goes straight to `durable`.
    pub fn uncached(durable: ByteStoreRef) -> Self {
        Self {
            inner: Mutex::new(Tiers::new(Vec::new(), durable.clone(), &HubMetrics::default())),
            durable,
            config: CacheConfig::uncached(),
            _local_dir: None,
        }
    }

    /// The authoritative store behind the cache
    pub fn durable(&self) -> &ByteStoreRef {
        &self.durable
    }

    /// The configuration the cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Write every dirty entry of every tier to the durable store.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub fn flush(&self) -> HubResult<()> {
        self.inner.lock().flush()
    }

    /// Drop every cached entry, dirty or not, without writing anything.
    pub fn discard(&self) -> HubResult<()> {
        self.inner
            .lock()
            .tiers
            .iter_mut()
            .try_for_each(Tier::forget_all)
    }

    /// Take the advisory lock on `key` if locking is enabled.
    pub fn lock(&self, key: &str) -> HubResult<Option<KeyLock>> {
        if !self.config.lock() {
            return Ok(None);
        }
        KeyLock::acquire(self.durable.clone(), key, self.config.lock_timeout()).map(Some)
    }

    /// Read `key` bypassing clean cached copies, which another writer may have superseded.
    ///
    /// Unflushed writes made through this cache still take precedence.
    pub fn get_fresh(&self, key: &str) -> HubResult<Option<Bytes>> {
        let mut inner = self.inner.lock();
        if let Some(bytes) = inner.dirty_copy(key)? {
            return Ok(Some(bytes));
        }
        inner.forget(key)?;
        inner.get(key)
    }

    /// Bytes currently held by each tier, top first.
    pub fn tier_sizes(&self) -> Vec<(&'static str, usize)> {
        self.inner
            .lock()
            .tiers
            .iter()
            .map(|tier| (tier.name, tier.size))
            .collect()
    }
}

impl ByteStore for TieredCache {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn get(&self, key: &str) -> HubResult<Option<Bytes>> {
        self.inner.lock().get(key)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, value)))]
    fn put(&self, key: &str, value: Bytes) -> HubResult<()> {
        self.inner.lock().set(key, value)
    }

    fn put_if_absent(&self, key: &str, value: Bytes) -> HubResult<bool> {
        let mut inner = self.inner.lock();
        if inner.get(key)?.is_some() {
            return Ok(false);
        }
        inner.forget(key)?;
        self.durable.put_if_absent(key, value)
    }

    fn delete(&self, key: &str) -> HubResult<()> {
        let mut inner = self.inner.lock();
        inner.forget(key)?;
        self.durable.delete(key)
    }

    fn delete_prefix(&self, prefix: &str) -> HubResult<()> {
        let mut inner = self.inner.lock();
        for tier in inner.tiers.iter_mut() {
            let keys = tier
                .lru
                .iter()
                .filter(|key| key_in_prefix(key, prefix))
                .cloned()
                .collect::<Vec<_>>();
            for key in keys {
                tier.forget(&key)?;
            }
        }
        self.durable.delete_prefix(prefix)
    }

    fn list(&self, prefix: &str) -> HubResult<Vec<String>> {
        let inner = self.inner.lock();
        let mut keys = self.durable.list(prefix)?;
        for tier in inner.tiers.iter() {
            keys.extend(
                tier.dirty
                    .iter()
                    .filter(|key| key_in_prefix(key, prefix))
                    .cloned(),
            );
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> HubResult<bool> {
        let inner = self.inner.lock();
        if inner.tiers.iter().any(|tier| tier.contains(key)) {
            return Ok(true);
        }
        self.durable.exists(key)
    }
}

impl Debug for TieredCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("durable", &self.durable)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Err(err) = self.inner.get_mut().flush() {
            log::warn!("failed to flush cache on drop: {err}");
        }
    }
}
