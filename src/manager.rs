//! The cache manager façade.
//!
//! `CacheManager` ties together the version-control backend, the difference
//! engine, the entry store, and the quota enforcer. It is the sole entry
//! point for callers: every mutation is serialized per entry name, persisted
//! to the sidecar store before returning success, and followed by a quota
//! check.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::config::{CacheConfig, ConcurrencyMode};
use crate::diff;
use crate::entry::{CacheEntry, CacheStats};
use crate::error::CacheError;
use crate::fsutil;
use crate::git::{self, GitCli, GitError};
use crate::lock::{EntryGuard, EntryLocks};
use crate::paths::CachePaths;
use crate::quota;
use crate::store::EntryStore;
use crate::types::{CacheStatus, CacheType, EntryName};

/// Result of a best-effort `clear()`.
#[derive(Debug, Default)]
pub struct ClearReport {
    /// Entries whose mirror and record were removed.
    pub removed: usize,
    /// Entries that could not be removed, with the failure for each.
    pub failures: Vec<(String, CacheError)>,
}

impl ClearReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Orchestrating façade over the repository cache.
///
/// One manager instance exclusively owns the filesystem under its cache
/// root; no other component writes there. Construct with
/// [`CacheManager::new`] and share behind an `Arc` for concurrent callers.
pub struct CacheManager {
    config: CacheConfig,
    paths: CachePaths,
    git: GitCli,
    store: Mutex<EntryStore>,
    locks: EntryLocks,
    serial: Mutex<()>,
}

impl CacheManager {
    /// Create a manager, creating the cache directory layout if absent and
    /// loading the persisted entry store.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let paths = CachePaths::new(config.cache_root());
        fs::create_dir_all(paths.root())?;
        fs::create_dir_all(paths.mirrors_dir())?;
        fs::create_dir_all(paths.locks_dir())?;

        let store = EntryStore::load(paths.store_path())?;
        if store.quarantined() > 0 {
            log::warn!(
                "cache: {} metadata record(s) quarantined during load",
                store.quarantined()
            );
        }

        Ok(Self {
            config,
            locks: EntryLocks::new(paths.locks_dir()),
            paths,
            git: GitCli::new(),
            store: Mutex::new(store),
            serial: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    /// Mirror a source into the cache, or re-sync it if an entry already
    /// exists for the name.
    ///
    /// With no `name`, one is derived from the final path segment of the
    /// source (any `.git` suffix stripped). A new source is classified as
    /// `git` when it is a URL or a local directory containing a repository,
    /// and `local` (plain copy) otherwise. For an existing entry this is an
    /// implicit refresh against the entry's recorded source; a differing
    /// `source` argument is ignored.
    pub fn cache(&self, source: &str, name: Option<&str>) -> Result<CacheEntry, CacheError> {
        let name = match name {
            Some(raw) => raw.parse::<EntryName>().map_err(|e| {
                CacheError::InvalidSource(format!("invalid entry name '{}': {}", raw, e))
            })?,
            None => derive_name(source)?,
        };

        let _serial = self.serial_guard();
        let _guard = self.lock_entry(name.as_str())?;
        let deadline = Instant::now() + self.config.op_timeout();

        let existing = self.store.lock().unwrap().get(name.as_str()).cloned();
        match existing {
            Some(entry) => {
                if entry.source != source {
                    log::debug!(
                        "cache('{}'): entry tracks '{}', refreshing from it",
                        name,
                        entry.source
                    );
                }
                self.sync_entry(entry, deadline)
            }
            None => self.create_entry(source, &name, deadline),
        }
    }

    /// Force a remote-state re-check and mirror update regardless of the
    /// entry's current status.
    pub fn refresh(&self, name: &str) -> Result<CacheEntry, CacheError> {
        let _serial = self.serial_guard();
        let _guard = self.lock_entry(name)?;
        let deadline = Instant::now() + self.config.op_timeout();

        let entry = self
            .store
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        self.sync_entry(entry, deadline)
    }

    /// Delete the on-disk mirror and the record for an entry.
    pub fn remove(&self, name: &str) -> Result<(), CacheError> {
        let _serial = self.serial_guard();
        self.remove_locked(name)
    }

    /// Remove all entries and their mirrors, best-effort.
    ///
    /// Failures are collected per entry rather than aborting on the first
    /// one.
    pub fn clear(&self) -> Result<ClearReport, CacheError> {
        let _serial = self.serial_guard();
        let names = self.store.lock().unwrap().names();

        let mut report = ClearReport::default();
        for name in names {
            match self.remove_locked(&name) {
                Ok(()) => report.removed += 1,
                Err(CacheError::NotFound(_)) => {}
                Err(err) => {
                    log::warn!("clear: failed to remove '{}': {}", name, err);
                    report.failures.push((name, err));
                }
            }
        }
        Ok(report)
    }

    /// All entries in insertion order, with freshness re-derived.
    pub fn list(&self) -> Vec<CacheEntry> {
        let ttl = self.config.default_timeout();
        let now = fsutil::now_unix();
        let store = self.store.lock().unwrap();
        store
            .entries()
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                entry.status = entry.effective_status(ttl, now);
                entry
            })
            .collect()
    }

    /// Look up one entry, with freshness re-derived.
    pub fn get(&self, name: &str) -> Result<CacheEntry, CacheError> {
        let ttl = self.config.default_timeout();
        let now = fsutil::now_unix();
        let store = self.store.lock().unwrap();
        let mut entry = store
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        entry.status = entry.effective_status(ttl, now);
        Ok(entry)
    }

    /// Detail view: additionally recomputes status from on-disk presence and
    /// re-measures the mirror size. Never mutates the mirror content.
    pub fn get_detailed(&self, name: &str) -> Result<CacheEntry, CacheError> {
        let mut entry = self.get(name)?;
        if entry.cache_path.exists() {
            entry.size_bytes = fsutil::dir_size(&entry.cache_path);
        } else {
            entry.status = CacheStatus::Missing;
        }
        Ok(entry)
    }

    /// Aggregate statistics over all entries.
    pub fn stats(&self) -> CacheStats {
        let ttl = self.config.default_timeout();
        let now = fsutil::now_unix();
        let store = self.store.lock().unwrap();

        let mut stats = CacheStats {
            max_size_bytes: self.config.max_cache_size(),
            ..CacheStats::default()
        };
        for entry in store.entries() {
            stats.total_entries += 1;
            match entry.cache_type {
                CacheType::Git => stats.git_entries += 1,
                CacheType::Local => stats.local_entries += 1,
            }
            match entry.effective_status(ttl, now) {
                CacheStatus::Fresh => stats.fresh += 1,
                CacheStatus::Stale => stats.stale += 1,
                CacheStatus::Missing => stats.missing += 1,
                CacheStatus::Error => stats.error += 1,
            }
            stats.total_size_bytes = stats.total_size_bytes.saturating_add(entry.size_bytes);
        }
        stats.is_full =
            stats.max_size_bytes > 0 && stats.total_size_bytes >= stats.max_size_bytes;
        stats
    }

    /// Path of the on-disk mirror, only while it actually exists.
    pub fn cached_path(&self, name: &str) -> Result<PathBuf, CacheError> {
        let entry = self.get_detailed(name)?;
        if entry.status == CacheStatus::Missing {
            return Err(CacheError::NotFound(format!(
                "mirror for '{}' is missing on disk",
                name
            )));
        }
        Ok(entry.cache_path)
    }

    fn serial_guard(&self) -> Option<MutexGuard<'_, ()>> {
        match self.config.concurrency() {
            ConcurrencyMode::Serial => Some(self.serial.lock().unwrap()),
            ConcurrencyMode::Concurrent => None,
        }
    }

    fn lock_entry(&self, name: &str) -> Result<EntryGuard, CacheError> {
        self.locks
            .acquire(name, self.config.lock_timeout())
            .map_err(|e| {
                if e.kind() == io::ErrorKind::TimedOut {
                    CacheError::Busy(format!("another operation on '{}' is in flight", name))
                } else {
                    CacheError::Io(e)
                }
            })
    }

    fn remove_locked(&self, name: &str) -> Result<(), CacheError> {
        let _guard = self.lock_entry(name)?;

        let entry = self.store.lock().unwrap().get(name).cloned();
        let Some(entry) = entry else {
            return Err(CacheError::NotFound(name.to_string()));
        };

        // Mirror first: if this fails the record stays valid.
        fsutil::remove_tree(&entry.cache_path)?;

        let mut store = self.store.lock().unwrap();
        store.remove(name);
        store.persist()?;
        Ok(())
    }

    fn create_entry(
        &self,
        source: &str,
        name: &EntryName,
        deadline: Instant,
    ) -> Result<CacheEntry, CacheError> {
        let (cache_type, origin) = classify_source(source)?;
        let cache_path = self.claim_mirror_dir(name.as_str())?;
        log::info!(
            "cache: creating {} entry '{}' from {}",
            cache_type,
            name,
            origin
        );

        let now = fsutil::now_unix();
        let mut entry = CacheEntry {
            name: name.to_string(),
            source: origin,
            cache_type,
            cache_path: cache_path.clone(),
            status: CacheStatus::Fresh,
            local_commit_hash: None,
            local_branch: None,
            remote_commit_hash: None,
            has_upstream_changes: false,
            upstream_changes_summary: None,
            source_fingerprint: None,
            size_bytes: 0,
            created_at: now,
            last_updated: now,
            metadata: BTreeMap::new(),
        };

        let populated = match cache_type {
            CacheType::Git => self.populate_git_fields(&mut entry, deadline),
            CacheType::Local => self.populate_local_fields(&mut entry, deadline),
        };
        if let Err(err) = populated {
            let _ = fsutil::remove_tree(&cache_path);
            return Err(err);
        }

        entry.size_bytes = fsutil::dir_size(&cache_path);
        entry.last_updated = fsutil::now_unix();

        {
            let mut store = self.store.lock().unwrap();
            store.upsert(entry.clone());
            if let Err(err) = store.persist() {
                store.remove(name.as_str());
                drop(store);
                let _ = fsutil::remove_tree(&cache_path);
                return Err(err);
            }
        }

        if let Err(err) = self.enforce_quota(name.as_str()) {
            log::warn!("cache: admitting '{}' breaks the quota, rolling back", name);
            let mut store = self.store.lock().unwrap();
            store.remove(name.as_str());
            if let Err(persist_err) = store.persist() {
                log::warn!("cache: rollback persist failed for '{}': {}", name, persist_err);
            }
            drop(store);
            let _ = fsutil::remove_tree(&cache_path);
            return Err(err);
        }

        let stored = self.store.lock().unwrap().get(name.as_str()).cloned();
        Ok(stored.unwrap_or(entry))
    }

    /// Re-sync an existing entry against its origin.
    fn sync_entry(&self, mut entry: CacheEntry, deadline: Instant) -> Result<CacheEntry, CacheError> {
        let name = entry.name.clone();

        if let Err(err) = self.sync_entry_inner(&mut entry, deadline) {
            self.fail_entry(&name);
            return Err(err);
        }

        entry.size_bytes = fsutil::dir_size(&entry.cache_path);
        entry.status = CacheStatus::Fresh;
        entry.last_updated = fsutil::now_unix();

        {
            let mut store = self.store.lock().unwrap();
            store.upsert(entry.clone());
            if let Err(err) = store.persist() {
                drop(store);
                self.fail_entry(&name);
                return Err(err);
            }
        }

        if let Err(err) = self.enforce_quota(&name) {
            self.fail_entry(&name);
            return Err(err);
        }

        let stored = self.store.lock().unwrap().get(&name).cloned();
        Ok(stored.unwrap_or(entry))
    }

    fn sync_entry_inner(
        &self,
        entry: &mut CacheEntry,
        deadline: Instant,
    ) -> Result<(), CacheError> {
        if !entry.cache_path.exists() {
            log::info!("cache: mirror for '{}' is missing on disk, rebuilding", entry.name);
            fsutil::remove_tree(&entry.cache_path)?;
            return match entry.cache_type {
                CacheType::Git => self.populate_git_fields(entry, deadline),
                CacheType::Local => self.populate_local_fields(entry, deadline),
            };
        }

        match entry.cache_type {
            CacheType::Git => self.sync_git(entry, deadline),
            CacheType::Local => self.sync_local(entry, deadline),
        }
    }

    fn sync_git(&self, entry: &mut CacheEntry, deadline: Instant) -> Result<(), CacheError> {
        let name = entry.name.clone();
        let (observed, branch) = self
            .git
            .local_head(&entry.cache_path)
            .map_err(|e| git_failure(&name, "read mirror HEAD", e))?;
        let remote = self
            .git
            .remote_head(&entry.source, deadline)
            .map_err(|e| git_failure(&name, "resolve remote HEAD", e))?;

        // A mirror whose HEAD matches neither its recorded state nor the new
        // remote state was mutated outside the cache; never overwrite it.
        if let Some(recorded) = entry.local_commit_hash.as_deref() {
            if observed != recorded && observed != remote {
                return Err(CacheError::Conflict(format!(
                    "mirror for '{}' has diverged: HEAD {} matches neither recorded {} nor remote {}",
                    name,
                    short(&observed),
                    short(recorded),
                    short(&remote)
                )));
            }
        }

        if observed == remote {
            entry.has_upstream_changes = false;
            entry.upstream_changes_summary = None;
            entry.local_commit_hash = Some(observed);
            entry.local_branch = branch;
            entry.remote_commit_hash = Some(remote);
            return Ok(());
        }

        log::info!(
            "cache: '{}' has upstream changes ({} -> {})",
            name,
            short(&observed),
            short(&remote)
        );
        self.git
            .fetch(&entry.cache_path, deadline)
            .map_err(|e| git_failure(&name, "fetch", e))?;
        let summary = diff::commit_range_summary(&entry.cache_path, &observed, &remote)
            .map_err(|e| git_failure(&name, "summarize upstream changes", e))?;
        self.git
            .merge_ff_only(&entry.cache_path, &remote, deadline)
            .map_err(|e| match e {
                GitError::Merge(msg) => CacheError::Conflict(format!(
                    "cannot fast-forward mirror for '{}': {}",
                    name,
                    msg.trim()
                )),
                other => git_failure(&name, "apply upstream changes", other),
            })?;

        let (new_head, new_branch) = self
            .git
            .local_head(&entry.cache_path)
            .map_err(|e| git_failure(&name, "read mirror HEAD", e))?;
        entry.has_upstream_changes = true;
        entry.upstream_changes_summary = Some(summary);
        entry.local_commit_hash = Some(new_head);
        entry.local_branch = new_branch;
        entry.remote_commit_hash = Some(remote);
        Ok(())
    }

    fn sync_local(&self, entry: &mut CacheEntry, deadline: Instant) -> Result<(), CacheError> {
        let name = entry.name.clone();
        let source = PathBuf::from(&entry.source);
        if !source.is_dir() {
            return Err(CacheError::SourceUnreachable(format!(
                "source directory for '{}' no longer exists: {}",
                name,
                source.display()
            )));
        }

        let source_map = diff::fingerprint_tree(&source)?;
        let mirror_map = diff::fingerprint_tree(&entry.cache_path)?;
        let aggregate = diff::aggregate_fingerprint(&source_map);
        let changed = entry.source_fingerprint.as_deref() != Some(aggregate.as_str());

        if changed {
            let summary = diff::compare_fingerprints(&mirror_map, &source_map);
            log::info!(
                "cache: local source for '{}' changed (+{} ~{} -{})",
                name,
                summary.files_added,
                summary.files_modified,
                summary.files_removed
            );
            self.replace_mirror(&name, &source, &entry.cache_path, deadline)?;
            entry.upstream_changes_summary = Some(summary);
        } else {
            entry.upstream_changes_summary = None;
        }

        entry.source_fingerprint = Some(aggregate);
        entry.has_upstream_changes = false;
        Ok(())
    }

    /// Copy the source into a temp sibling, then swap it in place of the
    /// mirror, so a failed copy never destroys the previous mirror.
    fn replace_mirror(
        &self,
        name: &str,
        source: &Path,
        mirror: &Path,
        deadline: Instant,
    ) -> Result<(), CacheError> {
        let staging = mirror.with_extension(format!("sync.{}", std::process::id()));
        fsutil::remove_tree(&staging)?;

        if let Err(err) = fsutil::copy_tree(source, &staging, deadline) {
            let _ = fsutil::remove_tree(&staging);
            return Err(io_failure(name, "copy source", err));
        }

        fsutil::remove_tree(mirror)?;
        fs::rename(&staging, mirror)?;
        Ok(())
    }

    fn populate_git_fields(
        &self,
        entry: &mut CacheEntry,
        deadline: Instant,
    ) -> Result<(), CacheError> {
        let name = entry.name.clone();
        self.git
            .clone_into(&entry.source, &entry.cache_path, deadline)
            .map_err(|e| git_failure(&name, "clone", e))?;
        let (commit, branch) = self
            .git
            .local_head(&entry.cache_path)
            .map_err(|e| git_failure(&name, "read mirror HEAD", e))?;
        let remote = match self.git.remote_head(&entry.source, deadline) {
            Ok(remote) => remote,
            Err(err) => {
                log::warn!(
                    "cache: could not re-resolve remote HEAD for '{}' after clone: {}",
                    name,
                    err
                );
                commit.clone()
            }
        };

        entry.has_upstream_changes = remote != commit;
        entry.upstream_changes_summary = None;
        entry.local_commit_hash = Some(commit);
        entry.local_branch = branch;
        entry.remote_commit_hash = Some(remote);
        entry.source_fingerprint = None;
        Ok(())
    }

    fn populate_local_fields(
        &self,
        entry: &mut CacheEntry,
        deadline: Instant,
    ) -> Result<(), CacheError> {
        let name = entry.name.clone();
        let source = PathBuf::from(&entry.source);
        if !source.is_dir() {
            return Err(CacheError::SourceUnreachable(format!(
                "source directory for '{}' cannot be read: {}",
                name,
                source.display()
            )));
        }

        if let Err(err) = fsutil::copy_tree(&source, &entry.cache_path, deadline) {
            let _ = fsutil::remove_tree(&entry.cache_path);
            return Err(io_failure(&name, "copy source", err));
        }

        let map = diff::fingerprint_tree(&source)?;
        entry.source_fingerprint = Some(diff::aggregate_fingerprint(&map));
        entry.has_upstream_changes = false;
        entry.upstream_changes_summary = None;
        entry.local_commit_hash = None;
        entry.local_branch = None;
        entry.remote_commit_hash = None;
        Ok(())
    }

    /// Pick the mirror directory for a new entry.
    ///
    /// An unmanaged directory already occupying `mirrors/<name>` is never
    /// reused; the first free of `<name>-2`, `<name>-3`, ... is taken
    /// instead, deterministically.
    fn claim_mirror_dir(&self, name: &str) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(self.paths.mirrors_dir())?;
        let first = self.paths.mirror_dir(name);
        if !first.exists() {
            return Ok(first);
        }
        for n in 2..100u32 {
            let candidate = self.paths.mirror_dir(&format!("{}-{}", name, n));
            if !candidate.exists() {
                log::warn!(
                    "cache: mirror directory {} is occupied, using {}",
                    first.display(),
                    candidate.display()
                );
                return Ok(candidate);
            }
        }
        Err(CacheError::Io(io::Error::other(format!(
            "no free mirror directory slot for '{}'",
            name
        ))))
    }

    /// Mark an entry's durable status as `Error` after a failed mutation.
    fn fail_entry(&self, name: &str) {
        let mut store = self.store.lock().unwrap();
        if let Some(existing) = store.get(name) {
            let mut entry = existing.clone();
            entry.status = CacheStatus::Error;
            store.upsert(entry);
            if let Err(err) = store.persist() {
                log::warn!("cache: failed to persist error status for '{}': {}", name, err);
            }
        }
    }

    fn enforce_quota(&self, protect: &str) -> Result<(), CacheError> {
        let limit = self.config.max_cache_size();
        if limit == 0 {
            return Ok(());
        }
        let mut store = self.store.lock().unwrap();
        let result = quota::enforce(&mut store, &self.locks, protect, limit);
        store.persist()?;
        match result {
            Ok(stats) => {
                if stats.evicted > 0 {
                    log::info!(
                        "quota: evicted {} entries, reclaimed {} bytes",
                        stats.evicted,
                        stats.reclaimed_bytes
                    );
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Derive an entry name from the final path segment of a source locator.
pub(crate) fn derive_name(source: &str) -> Result<EntryName, CacheError> {
    let trimmed = source.trim_end_matches('/');
    let tail = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    let tail = tail.strip_suffix(".git").unwrap_or(tail);
    tail.parse().map_err(|e| {
        CacheError::InvalidSource(format!("cannot derive entry name from '{}': {}", source, e))
    })
}

/// Classify a source as git (clonable) or local (plain copy), returning the
/// normalized origin locator.
fn classify_source(source: &str) -> Result<(CacheType, String), CacheError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(CacheError::InvalidSource("source is empty".to_string()));
    }
    if git::is_remote_source(trimmed) {
        return Ok((CacheType::Git, trimmed.to_string()));
    }

    let path = Path::new(trimmed);
    if path.is_dir() {
        let canonical = path.canonicalize()?;
        let origin = canonical.to_string_lossy().into_owned();
        if git::is_repository(&canonical) {
            Ok((CacheType::Git, origin))
        } else {
            Ok((CacheType::Local, origin))
        }
    } else {
        Err(CacheError::InvalidSource(format!(
            "'{}' is neither a recognized URL nor an existing directory",
            source
        )))
    }
}

/// Map a backend failure into the operation-level taxonomy with context.
fn git_failure(name: &str, op: &str, err: GitError) -> CacheError {
    match err {
        GitError::Timeout(msg) => {
            CacheError::Timeout(format!("{} for '{}': {}", op, name, msg))
        }
        GitError::Clone(msg) | GitError::Fetch(msg) | GitError::LsRemote(msg) => {
            CacheError::SourceUnreachable(format!("{} for '{}' failed: {}", op, name, msg.trim()))
        }
        GitError::Io(err) => CacheError::Io(err),
        other => CacheError::Io(io::Error::other(format!(
            "{} for '{}' failed: {}",
            op, name, other
        ))),
    }
}

fn io_failure(name: &str, op: &str, err: io::Error) -> CacheError {
    if err.kind() == io::ErrorKind::TimedOut {
        CacheError::Timeout(format!("{} for '{}': {}", op, name, err))
    } else {
        CacheError::Io(err)
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
