//! Shared types for repocache

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest accepted entry name; keeps mirror directory names manageable.
const MAX_NAME_LEN: usize = 64;

/// Error type for entry name parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name cannot be empty")]
    Empty,
    #[error("invalid character in name: {0}")]
    InvalidCharacter(char),
    #[error("name cannot start with '{0}'")]
    InvalidStart(char),
    #[error("name cannot be longer than {MAX_NAME_LEN} characters (got {0})")]
    TooLong(usize),
}

/// A validated cache entry name.
///
/// Entry names double as mirror directory names under the cache root, so the
/// accepted alphabet is deliberately narrow:
/// - Non-empty, at most 64 characters
/// - Alphanumeric characters, hyphens, underscores, and dots only
/// - Cannot start with a dot or a hyphen
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryName(String);

impl EntryName {
    /// Returns the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EntryName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NameError::Empty);
        }

        if s.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong(s.len()));
        }

        if s.starts_with('.') {
            return Err(NameError::InvalidStart('.'));
        }

        if s.starts_with('-') {
            return Err(NameError::InvalidStart('-'));
        }

        for c in s.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(NameError::InvalidCharacter(c));
            }
        }

        Ok(EntryName(s.to_string()))
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a mirror is derived from its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Origin is a clonable repository (remote URL or local repo path).
    Git,
    /// Origin is a plain directory, mirrored by copy.
    Local,
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheType::Git => write!(f, "git"),
            CacheType::Local => write!(f, "local"),
        }
    }
}

/// Freshness state of a cache entry.
///
/// `Fresh` and `Stale` are derived from elapsed time since the last
/// successful sync, not from content equality; readers re-derive them on
/// every access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Fresh,
    Stale,
    /// The mirror no longer exists on disk.
    Missing,
    /// The last mutating operation failed; the mirror must not be trusted.
    Error,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Fresh => write!(f, "fresh"),
            CacheStatus::Stale => write!(f, "stale"),
            CacheStatus::Missing => write!(f, "missing"),
            CacheStatus::Error => write!(f, "error"),
        }
    }
}
