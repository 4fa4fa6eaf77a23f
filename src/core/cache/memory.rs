//! In-memory cache backend for testing.

use super::traits::check_payload;
use super::{
    cache_key, AnalysisPayload, CacheBackend, CacheEntry, CacheStats, CacheType,
};
use crate::core::fingerprint::FileFingerprint;
use crate::error::CacheError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

/// In-memory cache backend
///
/// Useful for testing and scenarios where persistence isn't needed.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    /// Create a new in-memory cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, CacheEntry>>, CacheError> {
        self.entries.read().map_err(|_| CacheError::Corrupted {
            path: PathBuf::from("memory"),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, CacheEntry>>, CacheError> {
        self.entries.write().map_err(|_| CacheError::Corrupted {
            path: PathBuf::from("memory"),
        })
    }

    fn remove_where(&self, keep: impl Fn(&CacheEntry) -> bool) -> Result<usize, CacheError> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, entry| keep(entry));
        Ok(before - entries.len())
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryCache {
    fn get(
        &self,
        cache_type: CacheType,
        path: &Path,
        params: &serde_json::Value,
        expected: Option<&FileFingerprint>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let key = cache_key(cache_type, path, params);

        {
            let entries = self.read()?;
            let Some(entry) = entries.get(&key) else {
                return Ok(None);
            };

            let expired = entry.is_expired(SystemTime::now());
            let stale = expected.is_some_and(|fp| !entry.is_valid_for(fp));
            if !expired && !stale {
                return Ok(Some(entry.clone()));
            }
        }

        self.write()?.remove(&key);
        Ok(None)
    }

    fn put(
        &self,
        cache_type: CacheType,
        path: &Path,
        fingerprint: &FileFingerprint,
        params: &serde_json::Value,
        payload: &AnalysisPayload,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry, CacheError> {
        check_payload(cache_type, payload)?;

        let mut payload = payload.clone();
        payload.normalize();

        let created_at = SystemTime::now();
        let entry = CacheEntry {
            cache_type,
            cache_key: cache_key(cache_type, path, params),
            file_path: path.to_path_buf(),
            fingerprint: fingerprint.clone(),
            payload,
            created_at,
            expires_at: ttl.map(|ttl| created_at + ttl),
        };

        self.write()?.insert(entry.cache_key.clone(), entry.clone());
        Ok(entry)
    }

    fn invalidate(&self, path: &Path) -> Result<usize, CacheError> {
        self.remove_where(|entry| entry.file_path != path)
    }

    fn invalidate_type(&self, cache_type: CacheType) -> Result<usize, CacheError> {
        self.remove_where(|entry| entry.cache_type != cache_type)
    }

    fn clear_all(&self) -> Result<usize, CacheError> {
        self.remove_where(|_| false)
    }

    fn sweep_expired(&self) -> Result<usize, CacheError> {
        let now = SystemTime::now();
        self.remove_where(|entry| !entry.is_expired(now))
    }

    fn statistics(&self) -> Result<CacheStats, CacheError> {
        let entries = self.read()?;
        let mut stats = CacheStats::default();

        for entry in entries.values() {
            let size = serde_json::to_vec(&entry.payload)
                .map(|bytes| bytes.len() as u64)
                .unwrap_or(0);
            let points = entry.payload.point_count();

            let type_stats = stats
                .by_type
                .entry(entry.cache_type.as_str().to_string())
                .or_default();
            type_stats.entries += 1;
            type_stats.points += points;
            type_stats.size_bytes += size;

            stats.total_entries += 1;
            stats.total_points += points;
            stats.total_size_bytes += size;
        }

        stats.oldest_entry = entries.values().map(|e| e.created_at).min();
        stats.newest_entry = entries.values().map(|e| e.created_at).max();

        Ok(stats)
    }

    fn prune_orphans(&self) -> Result<usize, CacheError> {
        self.remove_where(|entry| entry.file_path.exists())
    }
}
