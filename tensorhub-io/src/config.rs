use std::path::PathBuf;
use std::time::Duration;

/// Default byte budget of the memory tier (64 MiB)
pub const DEFAULT_MEMORY_CAPACITY: usize = 1 << 26;
/// Default byte budget of the local persistent tier (256 MiB)
pub const DEFAULT_LOCAL_CAPACITY: usize = 1 << 28;
/// Default time to wait for an advisory chunk lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Sizing and locking options of a [`TieredCache`](crate::TieredCache).
///
/// A memory capacity of zero disables caching entirely: every access goes straight to the
/// durable store, and the local tier is not created either.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    memory_capacity: usize,
    local_capacity: usize,
    local_dir: Option<PathBuf>,
    lock: bool,
    lock_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            local_capacity: DEFAULT_LOCAL_CAPACITY,
            local_dir: None,
            lock: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl CacheConfig {
    /// A configuration that bypasses both cache tiers.
    pub fn uncached() -> Self {
        Self::default().with_memory_capacity(0)
    }

    /// Set the byte budget of the memory tier.
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    /// Set the byte budget of the local tier. Zero disables the local tier.
    pub fn with_local_capacity(mut self, capacity: usize) -> Self {
        self.local_capacity = capacity;
        self
    }

    /// Place the local tier below `dir` instead of the system temporary directory.
    pub fn with_local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = Some(dir.into());
        self
    }

    /// Enable or disable advisory per-chunk locks for read-modify-write cycles.
    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// How long to wait for a held lock before giving up with `ConcurrentWriteConflict`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Byte budget of the memory tier
    pub fn memory_capacity(&self) -> usize {
        self.memory_capacity
    }

    /// Byte budget of the local tier, zero when it is disabled
    pub fn local_capacity(&self) -> usize {
        if self.memory_capacity == 0 {
            0
        } else {
            self.local_capacity
        }
    }

    /// Directory the local tier lives under
    pub fn local_dir(&self) -> Option<&PathBuf> {
        self.local_dir.as_ref()
    }

    /// Whether advisory chunk locks are taken
    pub fn lock(&self) -> bool {
        self.lock
    }

    /// Lock acquisition timeout
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_memory_disables_local() {
        let config = CacheConfig::default().with_memory_capacity(0).with_local_capacity(1024);
        assert_eq!(config.local_capacity(), 0);
        assert_eq!(CacheConfig::default().local_capacity(), DEFAULT_LOCAL_CAPACITY);
    }
}
