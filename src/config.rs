//! Cache configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default freshness window before an entry is reported stale (24 hours).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Default overall deadline for a single mutating operation (10 minutes).
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default wait for the per-entry lock before reporting `Busy` (60 seconds).
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether mutating operations may run concurrently across entries.
///
/// Mutations for the same entry name are always serialized regardless of
/// mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    /// One mutation at a time across the whole cache.
    Serial,
    /// Per-entry-name exclusion only; distinct entries run in parallel.
    Concurrent,
}

/// Validated settings for a [`crate::CacheManager`]. Immutable once the
/// manager is constructed.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    cache_root: PathBuf,
    default_timeout: Duration,
    op_timeout: Duration,
    lock_timeout: Duration,
    max_cache_size: u64,
    concurrency: ConcurrencyMode,
}

impl CacheConfig {
    /// Create a configuration rooted at the given directory. The directory is
    /// created by the manager if it does not exist.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            default_timeout: DEFAULT_TIMEOUT,
            op_timeout: DEFAULT_OP_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_cache_size: 0,
            concurrency: ConcurrencyMode::Concurrent,
        }
    }

    /// Set the freshness window after which an entry reads as stale.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the overall deadline for each mutating operation.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Set how long a caller waits on a contended entry before `Busy`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the byte ceiling for aggregate cached content. `0` means
    /// unlimited.
    pub fn with_max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size = bytes;
        self
    }

    /// Set the concurrency mode for mutating operations.
    pub fn with_concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency = mode;
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn max_cache_size(&self) -> u64 {
        self.max_cache_size
    }

    pub fn concurrency(&self) -> ConcurrencyMode {
        self.concurrency
    }
}

impl Default for CacheConfig {
    /// Creates a configuration rooted at the system cache directory +
    /// "repocache".
    ///
    /// Uses `dirs::cache_dir()` which resolves to:
    /// - Linux: `~/.cache`
    /// - macOS: `~/Library/Caches`
    /// - Windows: `C:\Users\<user>\AppData\Local`
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
        Self::new(cache_dir.join("repocache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_root() {
        let config = CacheConfig::new("tmp-cache");
        assert_eq!(config.cache_root(), Path::new("tmp-cache"));
    }

    #[test]
    fn default_ends_with_repocache() {
        let config = CacheConfig::default();
        assert!(config.cache_root().ends_with("repocache"));
    }

    #[test]
    fn defaults_are_sane() {
        let config = CacheConfig::new("x");
        assert_eq!(config.default_timeout(), Duration::from_secs(86400));
        assert_eq!(config.max_cache_size(), 0);
        assert_eq!(config.concurrency(), ConcurrencyMode::Concurrent);
    }

    #[test]
    fn builders_override_defaults() {
        let config = CacheConfig::new("x")
            .with_default_timeout(Duration::from_secs(60))
            .with_op_timeout(Duration::from_secs(5))
            .with_lock_timeout(Duration::from_secs(1))
            .with_max_cache_size(1024)
            .with_concurrency(ConcurrencyMode::Serial);
        assert_eq!(config.default_timeout(), Duration::from_secs(60));
        assert_eq!(config.op_timeout(), Duration::from_secs(5));
        assert_eq!(config.lock_timeout(), Duration::from_secs(1));
        assert_eq!(config.max_cache_size(), 1024);
        assert_eq!(config.concurrency(), ConcurrencyMode::Serial);
    }
}
