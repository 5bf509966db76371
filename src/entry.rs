//! The persisted record describing one cached repository.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::diff::ChangeSummary;
use crate::types::{CacheStatus, CacheType};

/// The unit of cached state: identity, origin, observed local/remote state,
/// freshness, and size of one mirror.
///
/// Entries round-trip losslessly through the sidecar metadata store; every
/// field here is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unique key, caller-supplied or derived from the source.
    pub name: String,
    /// Original locator (remote URL or local path).
    pub source: String,
    pub cache_type: CacheType,
    /// Absolute path of the on-disk mirror; owned exclusively by this entry.
    pub cache_path: PathBuf,
    /// Status at last write time. Readers re-derive fresh/stale via
    /// [`CacheEntry::effective_status`] before returning entries.
    pub status: CacheStatus,
    /// Observed HEAD commit of the mirror (git type only).
    #[serde(default)]
    pub local_commit_hash: Option<String>,
    /// Observed branch of the mirror, if not detached (git type only).
    #[serde(default)]
    pub local_branch: Option<String>,
    /// HEAD of the origin at last check (git type only).
    #[serde(default)]
    pub remote_commit_hash: Option<String>,
    /// True when the origin was ahead of the mirror at last check. Always
    /// false for local entries.
    #[serde(default)]
    pub has_upstream_changes: bool,
    /// Diff result of the last sync that found changes; `None` when the last
    /// check found none.
    #[serde(default)]
    pub upstream_changes_summary: Option<ChangeSummary>,
    /// Aggregate content fingerprint of a local source at last sync.
    #[serde(default)]
    pub source_fingerprint: Option<String>,
    /// Measured mirror size on disk.
    pub size_bytes: u64,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds of the last successful sync; drives freshness.
    pub last_updated: i64,
    /// Free-form key/value bag for collaborator use.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CacheEntry {
    /// Re-derive the freshness state from elapsed time.
    ///
    /// `Missing` and `Error` are sticky until the next successful sync;
    /// everything else reads as `Fresh` within the timeout window and
    /// `Stale` past it.
    pub fn effective_status(&self, default_timeout: Duration, now: i64) -> CacheStatus {
        match self.status {
            CacheStatus::Missing | CacheStatus::Error => self.status,
            CacheStatus::Fresh | CacheStatus::Stale => {
                let age = now.saturating_sub(self.last_updated);
                if age > default_timeout.as_secs() as i64 {
                    CacheStatus::Stale
                } else {
                    CacheStatus::Fresh
                }
            }
        }
    }
}

/// Aggregate cache statistics reported by `stats()`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub git_entries: usize,
    pub local_entries: usize,
    pub fresh: usize,
    pub stale: usize,
    pub missing: usize,
    pub error: usize,
    pub total_size_bytes: u64,
    /// Configured ceiling; `0` means unlimited.
    pub max_size_bytes: u64,
    /// True when a finite quota is met or exceeded.
    pub is_full: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> CacheEntry {
        CacheEntry {
            name: "sample".to_string(),
            source: "https://example.com/org/sample.git".to_string(),
            cache_type: CacheType::Git,
            cache_path: PathBuf::from("/cache/mirrors/sample"),
            status: CacheStatus::Fresh,
            local_commit_hash: Some("abc123".to_string()),
            local_branch: Some("main".to_string()),
            remote_commit_hash: Some("abc123".to_string()),
            has_upstream_changes: false,
            upstream_changes_summary: None,
            source_fingerprint: None,
            size_bytes: 4096,
            created_at: 1_700_000_000,
            last_updated: 1_700_000_000,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn serde_roundtrip_preserves_every_field() {
        let mut entry = sample_entry();
        entry
            .metadata
            .insert("analyzer".to_string(), "pending".to_string());
        entry.upstream_changes_summary = Some(ChangeSummary {
            commits: Some(3),
            files_added: 1,
            files_modified: 2,
            files_removed: 0,
        });

        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn effective_status_fresh_within_window() {
        let entry = sample_entry();
        let now = entry.last_updated + 100;
        assert_eq!(
            entry.effective_status(Duration::from_secs(3600), now),
            CacheStatus::Fresh
        );
    }

    #[test]
    fn effective_status_stale_past_window() {
        let entry = sample_entry();
        let now = entry.last_updated + 7200;
        assert_eq!(
            entry.effective_status(Duration::from_secs(3600), now),
            CacheStatus::Stale
        );
    }

    #[test]
    fn effective_status_error_is_sticky() {
        let mut entry = sample_entry();
        entry.status = CacheStatus::Error;
        let now = entry.last_updated + 7200;
        assert_eq!(
            entry.effective_status(Duration::from_secs(3600), now),
            CacheStatus::Error
        );
    }

    #[test]
    fn effective_status_missing_is_sticky() {
        let mut entry = sample_entry();
        entry.status = CacheStatus::Missing;
        assert_eq!(
            entry.effective_status(Duration::from_secs(3600), entry.last_updated),
            CacheStatus::Missing
        );
    }

    #[test]
    fn stored_stale_rereads_as_fresh_within_window() {
        // The persisted value is only a snapshot; derivation wins.
        let mut entry = sample_entry();
        entry.status = CacheStatus::Stale;
        assert_eq!(
            entry.effective_status(Duration::from_secs(3600), entry.last_updated + 1),
            CacheStatus::Fresh
        );
    }
}
