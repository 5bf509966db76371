//! Quota enforcement: size accounting and least-recently-updated eviction.

use crate::error::CacheError;
use crate::fsutil;
use crate::lock::EntryLocks;
use crate::store::EntryStore;

/// Outcome of one enforcement pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionStats {
    pub evicted: u64,
    pub reclaimed_bytes: u64,
}

/// Bring the cache under `limit` bytes by evicting least-recently-updated
/// entries.
///
/// Sizes are re-measured from disk before deciding anything. The entry named
/// by `protect` (the one that triggered the check) is never evicted, and
/// neither is any entry with a mutation currently in flight. Returns
/// `QuotaExceeded` when no further candidates remain and the cache is still
/// over the ceiling; the store is left reflecting whatever evictions did
/// happen, and the caller persists it either way.
pub fn enforce(
    store: &mut EntryStore,
    locks: &EntryLocks,
    protect: &str,
    limit: u64,
) -> Result<EvictionStats, CacheError> {
    let measured: Vec<(String, u64)> = store
        .entries()
        .iter()
        .map(|e| (e.name.clone(), fsutil::dir_size(&e.cache_path)))
        .collect();
    for (name, size) in &measured {
        store.set_size(name, *size);
    }

    let mut total = store.total_size();
    let mut stats = EvictionStats::default();

    while total > limit {
        let victim = store
            .entries()
            .iter()
            .filter(|e| e.name != protect && !locks.is_busy(&e.name))
            .min_by_key(|e| e.last_updated)
            .map(|e| e.name.clone());

        let Some(name) = victim else {
            return Err(CacheError::QuotaExceeded {
                total_bytes: total,
                limit_bytes: limit,
            });
        };

        if let Some(entry) = store.remove(&name) {
            log::info!(
                "quota: evicting '{}' ({} bytes, last updated {})",
                entry.name,
                entry.size_bytes,
                entry.last_updated
            );
            if let Err(err) = fsutil::remove_tree(&entry.cache_path) {
                log::warn!("quota: failed to remove mirror for '{}': {}", entry.name, err);
            }
            total = total.saturating_sub(entry.size_bytes);
            stats.evicted += 1;
            stats.reclaimed_bytes = stats.reclaimed_bytes.saturating_add(entry.size_bytes);
        }
    }

    Ok(stats)
}
