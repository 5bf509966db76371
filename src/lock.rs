//! Per-entry-name mutual exclusion.
//!
//! Exclusion is backed by advisory `flock`-style file locks under the cache
//! root's `locks/` directory. Each acquisition opens its own file handle, so
//! the lock excludes both other threads in this process and other processes
//! mutating the same cache root. An in-memory in-flight table mirrors the
//! held locks so read-side consumers (the quota enforcer) can cheaply skip
//! entries with a mutation in progress.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use fs2::FileExt;

/// Keyed lock table for entry mutations.
#[derive(Debug)]
pub struct EntryLocks {
    dir: PathBuf,
    inflight: Arc<DashMap<String, ()>>,
}

/// A guard that holds an exclusive lock on one entry name.
/// Lock is released when dropped.
#[derive(Debug)]
pub struct EntryGuard {
    name: String,
    file: File,
    inflight: Arc<DashMap<String, ()>>,
}

impl EntryLocks {
    /// Create a lock table whose lock files live in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Acquire the lock for an entry name, waiting up to `timeout`.
    ///
    /// Polls with exponential backoff; returns an error with
    /// `ErrorKind::TimedOut` if the lock cannot be acquired within the
    /// timeout (the manager surfaces that as `Busy`).
    pub fn acquire(&self, name: &str, timeout: Duration) -> io::Result<EntryGuard> {
        std::fs::create_dir_all(&self.dir)?;
        let lock_path = self.dir.join(format!("{}.lock", name));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let start = Instant::now();
        let mut sleep_duration = Duration::from_millis(10);
        let max_sleep = Duration::from_millis(200);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    self.inflight.insert(name.to_string(), ());
                    return Ok(EntryGuard {
                        name: name.to_string(),
                        file,
                        inflight: Arc::clone(&self.inflight),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("lock for '{}' held by another operation", name),
                        ));
                    }
                    std::thread::sleep(sleep_duration);
                    sleep_duration = (sleep_duration * 2).min(max_sleep);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// True when a mutation for this name is in flight in this process.
    pub fn is_busy(&self, name: &str) -> bool {
        self.inflight.contains_key(name)
    }
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.inflight.remove(&self.name);
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
