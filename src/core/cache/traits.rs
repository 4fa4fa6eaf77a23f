//! Cache backend trait definition.

use super::{AnalysisPayload, CacheEntry, CacheStats, CacheType};
use crate::core::fingerprint::FileFingerprint;
use crate::error::CacheError;
use std::path::Path;
use std::time::Duration;

/// Trait for cache backends
pub trait CacheBackend: Send + Sync {
    /// Look up a cached analysis
    ///
    /// Returns `None` if there is no row, the row has expired, or
    /// `expected` is given and differs from the stored fingerprint. Expired
    /// and stale rows are deleted as a side effect.
    fn get(
        &self,
        cache_type: CacheType,
        path: &Path,
        params: &serde_json::Value,
        expected: Option<&FileFingerprint>,
    ) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an analysis, replacing any previous row for the same key
    ///
    /// The write is all-or-nothing: readers never see a partial point series.
    fn put(
        &self,
        cache_type: CacheType,
        path: &Path,
        fingerprint: &FileFingerprint,
        params: &serde_json::Value,
        payload: &AnalysisPayload,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry, CacheError>;

    /// Remove every entry for a file. Returns the number of entries removed.
    fn invalidate(&self, path: &Path) -> Result<usize, CacheError>;

    /// Remove every entry of one cache type
    fn invalidate_type(&self, cache_type: CacheType) -> Result<usize, CacheError>;

    /// Clear all cached entries
    fn clear_all(&self) -> Result<usize, CacheError>;

    /// Delete entries past their expiry time
    fn sweep_expired(&self) -> Result<usize, CacheError>;

    /// Get cache statistics
    fn statistics(&self) -> Result<CacheStats, CacheError>;

    /// Remove entries for files that no longer exist
    ///
    /// Returns the number of entries removed.
    fn prune_orphans(&self) -> Result<usize, CacheError>;
}

/// Reject payloads stored under the wrong cache type
pub(crate) fn check_payload(
    cache_type: CacheType,
    payload: &AnalysisPayload,
) -> Result<(), CacheError> {
    if payload.cache_type() == Some(cache_type) {
        Ok(())
    } else {
        Err(CacheError::PayloadMismatch {
            expected: cache_type.to_string(),
            found: payload.kind_name().to_string(),
        })
    }
}
