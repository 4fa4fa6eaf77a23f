//! # Cache Module
//!
//! Persists analysis results so unchanged files are never analyzed twice.
//!
//! ## Validity
//! Every entry stores the [`FileFingerprint`] the analysis ran against.
//! Validation is deferred to read time: a lookup that supplies the file's
//! current fingerprint gets a miss (and the stale row is deleted) when the
//! two disagree. Entries can also carry a TTL.
//!
//! ## Backends
//! - `SqliteCache` - Persistent storage using SQLite, point series in batches
//! - `InMemoryCache` - For testing and throwaway sessions

mod key;
mod memory;
mod payload;
mod sqlite;
mod traits;

pub use key::{cache_key, canonical_params};
pub use memory::InMemoryCache;
pub use payload::{
    AnalysisPayload, BitrateProfile, DataPoint, StreamContribution, StreamInspection,
    StreamKind, StreamRemovalResult,
};
pub use sqlite::{SqliteCache, DEFAULT_BATCH_SIZE};
pub use traits::CacheBackend;

use crate::core::fingerprint::FileFingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// Logical cache table; one per kind of cached analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    /// Bitrate profiles
    Bitrate,
    /// Stream inspections
    Streams,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bitrate => "bitrate",
            Self::Streams => "streams",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bitrate" => Some(Self::Bitrate),
            "streams" => Some(Self::Streams),
            _ => None,
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached analysis result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_type: CacheType,
    pub cache_key: String,
    /// Path to the analyzed file
    pub file_path: PathBuf,
    /// Fingerprint of the file the analysis ran against
    pub fingerprint: FileFingerprint,
    pub payload: AnalysisPayload,
    /// When the entry was cached
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Check if this entry still describes a file with the given fingerprint
    pub fn is_valid_for(&self, fingerprint: &FileFingerprint) -> bool {
        &self.fingerprint == fingerprint
    }
}

/// Cache statistics for one cache type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheTypeStats {
    pub entries: usize,
    pub points: usize,
    pub size_bytes: u64,
}

/// Cache statistics
///
/// Advisory only; nothing uses these numbers for correctness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of entries
    pub total_entries: usize,
    /// Total number of stored data points
    pub total_points: usize,
    /// Approximate size of cached data in bytes
    pub total_size_bytes: u64,
    /// Oldest entry timestamp
    pub oldest_entry: Option<SystemTime>,
    /// Newest entry timestamp
    pub newest_entry: Option<SystemTime>,
    /// Breakdown keyed by cache type name
    pub by_type: BTreeMap<String, CacheTypeStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(expires_at: Option<SystemTime>) -> CacheEntry {
        let now = SystemTime::now();
        CacheEntry {
            cache_type: CacheType::Bitrate,
            cache_key: "bitrate|/a.mp4|{}".to_string(),
            file_path: PathBuf::from("/a.mp4"),
            fingerprint: FileFingerprint {
                size: 1000,
                modified_at: now,
                sample_digest: vec![1, 2, 3],
            },
            payload: AnalysisPayload::Bitrate(BitrateProfile::default()),
            created_at: now,
            expires_at,
        }
    }

    #[test]
    fn cache_type_roundtrip() {
        for cache_type in [CacheType::Bitrate, CacheType::Streams] {
            assert_eq!(CacheType::from_str(cache_type.as_str()), Some(cache_type));
        }
    }

    #[test]
    fn entry_without_ttl_never_expires() {
        let entry = entry(None);
        assert!(!entry.is_expired(SystemTime::now() + Duration::from_secs(10 * 365 * 86_400)));
    }

    #[test]
    fn entry_expires_at_deadline() {
        let now = SystemTime::now();
        let entry = entry(Some(now));
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - Duration::from_secs(1)));
    }

    #[test]
    fn entry_invalid_when_fingerprint_differs() {
        let entry = entry(None);
        let mut other = entry.fingerprint.clone();
        assert!(entry.is_valid_for(&other));

        other.size += 1;
        assert!(!entry.is_valid_for(&other));
    }
}
