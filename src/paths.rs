//! Cache directory path management
//!
//! This module provides the `CachePaths` struct which manages all filesystem
//! paths for the cache directory layout:
//!
//! ```text
//! <cache_root>/
//! ├── mirrors/
//! │   └── <name>/              # Mirror working copy for one entry
//! ├── locks/
//! │   └── <name>.lock          # flock-based advisory locking
//! └── entries.json             # Sidecar metadata store (atomic replace)
//! ```

use std::path::{Path, PathBuf};

/// Manages all filesystem paths for the cache directory layout
#[derive(Debug, Clone)]
pub struct CachePaths {
    root: PathBuf,
}

impl CachePaths {
    /// Creates a new CachePaths with the specified root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root cache directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the mirrors directory path: `{root}/mirrors`
    pub fn mirrors_dir(&self) -> PathBuf {
        self.root.join("mirrors")
    }

    /// Returns the locks directory path: `{root}/locks`
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Returns the sidecar metadata store path: `{root}/entries.json`
    pub fn store_path(&self) -> PathBuf {
        self.root.join("entries.json")
    }

    /// Returns the mirror directory for an entry: `{root}/mirrors/{name}`
    pub fn mirror_dir(&self, name: &str) -> PathBuf {
        self.mirrors_dir().join(name)
    }

    /// Returns the lock file path for an entry: `{root}/locks/{name}.lock`
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_root_path() -> PathBuf {
        PathBuf::from("cache-root")
    }

    fn test_paths() -> CachePaths {
        CachePaths::new(test_root_path())
    }

    #[test]
    fn test_new() {
        let paths = CachePaths::new("tmp-cache");
        assert_eq!(paths.root(), Path::new("tmp-cache"));
    }

    #[test]
    fn test_mirrors_dir() {
        let paths = test_paths();
        assert_eq!(paths.mirrors_dir(), test_root_path().join("mirrors"));
    }

    #[test]
    fn test_locks_dir() {
        let paths = test_paths();
        assert_eq!(paths.locks_dir(), test_root_path().join("locks"));
    }

    #[test]
    fn test_store_path() {
        let paths = test_paths();
        assert_eq!(paths.store_path(), test_root_path().join("entries.json"));
    }

    #[test]
    fn test_mirror_dir() {
        let paths = test_paths();
        assert_eq!(
            paths.mirror_dir("my-repo"),
            test_root_path().join("mirrors").join("my-repo")
        );
    }

    #[test]
    fn test_lock_path() {
        let paths = test_paths();
        assert_eq!(
            paths.lock_path("my-repo"),
            test_root_path().join("locks").join("my-repo.lock")
        );
    }
}
