//! Error taxonomy for cache operations.

use thiserror::Error;

/// Errors returned by cache operations.
///
/// Every operation-level failure is returned as a typed value; the manager is
/// a library surface and never panics on expected failure modes. Variants
/// carry the entry name and operation context in their messages.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The source is neither a recognized URL nor an existing directory.
    #[error("invalid source: {0}")]
    InvalidSource(String),
    /// The origin could not be cloned, fetched, or read.
    #[error("source unreachable: {0}")]
    SourceUnreachable(String),
    /// No entry exists for the given name.
    #[error("entry not found: {0}")]
    NotFound(String),
    /// Another mutation for the same entry name is in flight.
    #[error("entry busy: {0}")]
    Busy(String),
    /// The cache cannot be brought under its size ceiling.
    #[error("quota exceeded: {total_bytes} bytes cached, limit is {limit_bytes}")]
    QuotaExceeded { total_bytes: u64, limit_bytes: u64 },
    /// The operation ran past its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// The mirror has diverged from both its recorded state and the origin.
    #[error("conflict: {0}")]
    Conflict(String),
    /// An underlying filesystem operation failed.
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted metadata was unreadable or invalid.
    #[error("corrupt metadata: {0}")]
    Corrupt(String),
}
