//! SQLite cache backend for persistent storage.

use super::payload::PointSets;
use super::traits::check_payload;
use super::{
    cache_key, AnalysisPayload, CacheBackend, CacheEntry, CacheStats, CacheType, CacheTypeStats,
    DataPoint,
};
use crate::core::fingerprint::FileFingerprint;
use crate::error::CacheError;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Point rows written per INSERT statement by default
pub const DEFAULT_BATCH_SIZE: usize = 500;

const POINT_COLUMNS: usize = 5;

/// SQLite's default ceiling on bound parameters per statement
const MAX_PARAMETERS: usize = 32_766;

/// Rough on-disk cost of one point row, for statistics
const POINT_ROW_BYTES: u64 = 32;

/// SQLite-backed persistent cache
///
/// Uses WAL (Write-Ahead Logging) mode so readers proceed while writes are
/// happening. Point series live in `cache_points` and cascade with their
/// parent entry.
pub struct SqliteCache {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    batch_size: usize,
}

impl SqliteCache {
    /// Open or create a cache database at the given path
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| CacheError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // WAL allows readers to proceed even while writes are happening
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(query_failed)?;

        Self::init(conn, path.to_path_buf())
    }

    /// Open a private in-memory cache
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().map_err(|e| CacheError::OpenFailed {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, db_path: PathBuf) -> Result<Self, CacheError> {
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;
            CREATE TABLE IF NOT EXISTS cache_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cache_type TEXT NOT NULL,
                cache_key TEXT NOT NULL UNIQUE,
                file_path TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_cache_entries_path ON cache_entries(file_path);
            CREATE INDEX IF NOT EXISTS idx_cache_entries_type ON cache_entries(cache_type);
            CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry ON cache_entries(expires_at);
            CREATE TABLE IF NOT EXISTS cache_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id INTEGER NOT NULL REFERENCES cache_entries(id) ON DELETE CASCADE,
                group_index INTEGER NOT NULL,
                UNIQUE(entry_id, group_index)
            );
            CREATE TABLE IF NOT EXISTS cache_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id INTEGER NOT NULL REFERENCES cache_entries(id) ON DELETE CASCADE,
                group_id INTEGER REFERENCES cache_groups(id) ON DELETE CASCADE,
                timestamp REAL NOT NULL,
                value REAL NOT NULL,
                label TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_cache_points_parent
                ON cache_points(entry_id, group_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_cache_points_group ON cache_points(group_id);",
        )
        .map_err(query_failed)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Rows per point INSERT, capped by SQLite's parameter limit
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_PARAMETERS / POINT_COLUMNS);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Location of the backing database
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::Corrupted {
            path: self.db_path.clone(),
        })
    }

    /// Convert SystemTime to Unix milliseconds
    fn to_timestamp(time: SystemTime) -> i64 {
        time.duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as i64
    }

    /// Convert Unix milliseconds to SystemTime
    fn from_timestamp(timestamp: i64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(timestamp.max(0) as u64)
    }

    fn delete_entry(conn: &Connection, id: i64) -> Result<(), CacheError> {
        conn.execute("DELETE FROM cache_entries WHERE id = ?", [id])
            .map_err(query_failed)?;
        Ok(())
    }

    fn load_points(
        conn: &Connection,
        entry_id: i64,
        group_id: Option<i64>,
    ) -> Result<Vec<DataPoint>, CacheError> {
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(DataPoint {
                timestamp: row.get(0)?,
                value: row.get(1)?,
                label: row.get(2)?,
            })
        };

        let points = match group_id {
            None => {
                let mut stmt = conn
                    .prepare_cached(
                        "SELECT timestamp, value, label FROM cache_points
                         WHERE entry_id = ? AND group_id IS NULL
                         ORDER BY timestamp ASC, id ASC",
                    )
                    .map_err(query_failed)?;
                let rows = stmt
                    .query_map([entry_id], map_row)
                    .map_err(query_failed)?
                    .collect::<Result<Vec<_>, _>>();
                rows
            }
            Some(group_id) => {
                let mut stmt = conn
                    .prepare_cached(
                        "SELECT timestamp, value, label FROM cache_points
                         WHERE entry_id = ? AND group_id = ?
                         ORDER BY timestamp ASC, id ASC",
                    )
                    .map_err(query_failed)?;
                let rows = stmt
                    .query_map(params![entry_id, group_id], map_row)
                    .map_err(query_failed)?
                    .collect::<Result<Vec<_>, _>>();
                rows
            }
        };

        points.map_err(query_failed)
    }

    fn load_point_sets(conn: &Connection, entry_id: i64) -> Result<PointSets, CacheError> {
        let group_ids: Vec<i64> = {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id FROM cache_groups WHERE entry_id = ? ORDER BY group_index ASC",
                )
                .map_err(query_failed)?;
            let ids = stmt
                .query_map([entry_id], |row| row.get(0))
                .map_err(query_failed)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(query_failed)?;
            ids
        };

        let mut groups = Vec::with_capacity(group_ids.len());
        for group_id in group_ids {
            groups.push(Self::load_points(conn, entry_id, Some(group_id))?);
        }

        Ok(PointSets {
            root: Self::load_points(conn, entry_id, None)?,
            groups,
        })
    }

    /// Insert a point series in fixed-size multi-row statements
    fn insert_points(
        tx: &Transaction<'_>,
        entry_id: i64,
        group_id: Option<i64>,
        points: &[DataPoint],
        batch_size: usize,
    ) -> Result<(), CacheError> {
        for chunk in points.chunks(batch_size) {
            let sql = insert_points_sql(chunk.len());
            let mut stmt = tx.prepare_cached(&sql).map_err(query_failed)?;

            let mut values: Vec<SqlValue> = Vec::with_capacity(chunk.len() * POINT_COLUMNS);
            for point in chunk {
                values.push(SqlValue::Integer(entry_id));
                values.push(group_id.map_or(SqlValue::Null, SqlValue::Integer));
                values.push(SqlValue::Real(point.timestamp));
                values.push(SqlValue::Real(point.value));
                values.push(point.label.clone().map_or(SqlValue::Null, SqlValue::Text));
            }

            stmt.execute(params_from_iter(values))
                .map_err(query_failed)?;
        }
        Ok(())
    }
}

fn query_failed(e: rusqlite::Error) -> CacheError {
    CacheError::QueryFailed(e.to_string())
}

fn insert_points_sql(rows: usize) -> String {
    let mut sql = String::from(
        "INSERT INTO cache_points (entry_id, group_id, timestamp, value, label) VALUES ",
    );
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str("(?, ?, ?, ?, ?)");
    }
    sql
}

fn check_points(sets: &PointSets) -> Result<(), CacheError> {
    let all = sets.root.iter().chain(sets.groups.iter().flatten());
    for point in all {
        if !point.timestamp.is_finite() || !point.value.is_finite() {
            return Err(CacheError::SerializationFailed(format!(
                "non-finite data point at timestamp {}",
                point.timestamp
            )));
        }
    }
    Ok(())
}

impl CacheBackend for SqliteCache {
    fn get(
        &self,
        cache_type: CacheType,
        path: &Path,
        params: &serde_json::Value,
        expected: Option<&FileFingerprint>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let key = cache_key(cache_type, path, params);
        let conn = self.lock()?;

        let result: Result<(i64, String, String, i64, Option<i64>), _> = conn.query_row(
            "SELECT id, fingerprint, payload, created_at, expires_at
             FROM cache_entries WHERE cache_key = ?",
            [&key],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        );

        let (id, token, payload_json, created_at, expires_at) = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(query_failed(e)),
        };

        let expires_at = expires_at.map(Self::from_timestamp);
        if expires_at.is_some_and(|expires| expires <= SystemTime::now()) {
            debug!(key = %key, "cache entry expired");
            Self::delete_entry(&conn, id)?;
            return Ok(None);
        }

        let Some(fingerprint) = FileFingerprint::parse(&token) else {
            warn!(key = %key, "unreadable fingerprint in cache, discarding entry");
            Self::delete_entry(&conn, id)?;
            return Ok(None);
        };

        if let Some(expected) = expected {
            if expected != &fingerprint {
                debug!(key = %key, "cache entry stale, file changed since analysis");
                Self::delete_entry(&conn, id)?;
                return Ok(None);
            }
        }

        let mut payload: AnalysisPayload = match serde_json::from_str(&payload_json) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "unreadable payload in cache, discarding entry");
                Self::delete_entry(&conn, id)?;
                return Ok(None);
            }
        };
        payload.attach_points(Self::load_point_sets(&conn, id)?);

        Ok(Some(CacheEntry {
            cache_type,
            cache_key: key,
            file_path: path.to_path_buf(),
            fingerprint,
            payload,
            created_at: Self::from_timestamp(created_at),
            expires_at,
        }))
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
        let (shell, sets) = payload.detach_points();
        check_points(&sets)?;

        let shell_json = serde_json::to_string(&shell)
            .map_err(|e| CacheError::SerializationFailed(e.to_string()))?;
        let key = cache_key(cache_type, path, params);
        let created_at = SystemTime::now();
        let expires_at = ttl.map(|ttl| created_at + ttl);

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_failed)?;

        // Replace, not append: old points cascade with the old row
        tx.execute("DELETE FROM cache_entries WHERE cache_key = ?", [&key])
            .map_err(query_failed)?;

        tx.execute(
            "INSERT INTO cache_entries
             (cache_type, cache_key, file_path, fingerprint, payload, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                cache_type.as_str(),
                key,
                path.to_string_lossy(),
                fingerprint.to_token(),
                shell_json,
                Self::to_timestamp(created_at),
                expires_at.map(Self::to_timestamp),
            ],
        )
        .map_err(query_failed)?;
        let entry_id = tx.last_insert_rowid();

        Self::insert_points(&tx, entry_id, None, &sets.root, self.batch_size)?;

        for (index, points) in sets.groups.iter().enumerate() {
            tx.execute(
                "INSERT INTO cache_groups (entry_id, group_index) VALUES (?, ?)",
                params![entry_id, index as i64],
            )
            .map_err(query_failed)?;
            let group_id = tx.last_insert_rowid();
            Self::insert_points(&tx, entry_id, Some(group_id), points, self.batch_size)?;
        }

        tx.commit().map_err(query_failed)?;

        debug!(
            key = %key,
            points = payload.point_count(),
            "analysis cached"
        );

        Ok(CacheEntry {
            cache_type,
            cache_key: key,
            file_path: path.to_path_buf(),
            fingerprint: fingerprint.clone(),
            payload,
            created_at: Self::from_timestamp(Self::to_timestamp(created_at)),
            expires_at: expires_at.map(|t| Self::from_timestamp(Self::to_timestamp(t))),
        })
    }

    fn invalidate(&self, path: &Path) -> Result<usize, CacheError> {
        let conn = self.lock()?;
        let count = conn
            .execute(
                "DELETE FROM cache_entries WHERE file_path = ?",
                [path.to_string_lossy()],
            )
            .map_err(query_failed)?;
        Ok(count)
    }

    fn invalidate_type(&self, cache_type: CacheType) -> Result<usize, CacheError> {
        let conn = self.lock()?;
        let count = conn
            .execute(
                "DELETE FROM cache_entries WHERE cache_type = ?",
                [cache_type.as_str()],
            )
            .map_err(query_failed)?;
        Ok(count)
    }

    fn clear_all(&self) -> Result<usize, CacheError> {
        let conn = self.lock()?;
        let count = conn
            .execute("DELETE FROM cache_entries", [])
            .map_err(query_failed)?;
        Ok(count)
    }

    fn sweep_expired(&self) -> Result<usize, CacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_failed)?;
        let count = tx
            .execute(
                "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?",
                [Self::to_timestamp(SystemTime::now())],
            )
            .map_err(query_failed)?;
        tx.commit().map_err(query_failed)?;
        Ok(count)
    }

    fn statistics(&self) -> Result<CacheStats, CacheError> {
        let conn = self.lock()?;
        let mut stats = CacheStats::default();

        let mut stmt = conn
            .prepare(
                "SELECT cache_type, COUNT(*), COALESCE(SUM(LENGTH(payload)), 0),
                        MIN(created_at), MAX(created_at)
                 FROM cache_entries GROUP BY cache_type",
            )
            .map_err(query_failed)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;

        for (cache_type, entries, payload_bytes, oldest, newest) in rows {
            let type_stats = stats.by_type.entry(cache_type).or_default();
            type_stats.entries = entries as usize;
            type_stats.size_bytes += payload_bytes as u64;

            let oldest = oldest.map(Self::from_timestamp);
            let newest = newest.map(Self::from_timestamp);
            stats.oldest_entry = match (stats.oldest_entry, oldest) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            stats.newest_entry = match (stats.newest_entry, newest) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }

        let mut stmt = conn
            .prepare(
                "SELECT e.cache_type, COUNT(p.id), COALESCE(SUM(LENGTH(p.label)), 0)
                 FROM cache_points p JOIN cache_entries e ON e.id = p.entry_id
                 GROUP BY e.cache_type",
            )
            .map_err(query_failed)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;

        for (cache_type, points, label_bytes) in rows {
            let type_stats = stats.by_type.entry(cache_type).or_default();
            type_stats.points = points as usize;
            type_stats.size_bytes += points as u64 * POINT_ROW_BYTES + label_bytes as u64;
        }

        for type_stats in stats.by_type.values() {
            stats.total_entries += type_stats.entries;
            stats.total_points += type_stats.points;
            stats.total_size_bytes += type_stats.size_bytes;
        }

        Ok(stats)
    }

    fn prune_orphans(&self) -> Result<usize, CacheError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT DISTINCT file_path FROM cache_entries")
            .map_err(query_failed)?;

        let paths: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(query_failed)?
            .filter_map(|r| r.ok())
            .collect();

        drop(stmt);

        let mut count = 0;
        for path in paths {
            if !Path::new(&path).exists() {
                count += conn
                    .execute("DELETE FROM cache_entries WHERE file_path = ?", [&path])
                    .map_err(query_failed)?;
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{BitrateProfile, StreamContribution, StreamInspection, StreamKind};
    use serde_json::json;
    use tempfile::TempDir;

    fn fingerprint(size: u64) -> FileFingerprint {
        FileFingerprint {
            size,
            modified_at: UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_456_789),
            sample_digest: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    fn profile(points: usize) -> AnalysisPayload {
        AnalysisPayload::Bitrate(BitrateProfile {
            duration_seconds: points as f64,
            average_bitrate: 4_000_000.0,
            peak_bitrate: 9_000_000.0,
            points: (0..points)
                .map(|i| DataPoint::new(i as f64, (i % 7) as f64 * 1_000.0))
                .collect(),
        })
    }

    fn profile_points(entry: &CacheEntry) -> &[DataPoint] {
        match &entry.payload {
            AnalysisPayload::Bitrate(profile) => &profile.points,
            other => panic!("Wrong payload kind: {}", other.kind_name()),
        }
    }

    #[test]
    fn sqlite_cache_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");

        let cache = SqliteCache::open(&db_path).unwrap();

        assert!(db_path.exists());
        let stats = cache.statistics().unwrap();
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn sqlite_cache_stores_and_retrieves() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let fp = fingerprint(1000);
        let params = json!({ "window": 4096 });

        cache
            .put(CacheType::Bitrate, Path::new("/v.mp4"), &fp, &params, &profile(3), None)
            .unwrap();

        let entry = cache
            .get(CacheType::Bitrate, Path::new("/v.mp4"), &params, Some(&fp))
            .unwrap()
            .unwrap();

        assert_eq!(entry.payload, profile(3));
        assert_eq!(entry.fingerprint, fp);
    }

    #[test]
    fn sqlite_cache_get_without_fingerprint_skips_validation() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let params = json!({});
        cache
            .put(CacheType::Bitrate, Path::new("/v.mp4"), &fingerprint(1), &params, &profile(1), None)
            .unwrap();

        let entry = cache
            .get(CacheType::Bitrate, Path::new("/v.mp4"), &params, None)
            .unwrap();
        assert!(entry.is_some());
    }

    #[test]
    fn sqlite_cache_invalidates_on_fingerprint_mismatch() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let params = json!({});
        cache
            .put(CacheType::Bitrate, Path::new("/v.mp4"), &fingerprint(1000), &params, &profile(5), None)
            .unwrap();

        let result = cache
            .get(CacheType::Bitrate, Path::new("/v.mp4"), &params, Some(&fingerprint(2000)))
            .unwrap();
        assert!(result.is_none());

        // The stale row is gone, even for a caller that would have matched
        let result = cache
            .get(CacheType::Bitrate, Path::new("/v.mp4"), &params, Some(&fingerprint(1000)))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(cache.statistics().unwrap().total_points, 0);
    }

    #[test]
    fn sqlite_cache_upsert_keeps_one_row() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let fp = fingerprint(1000);
        let params = json!({ "b": 1, "a": 2 });
        let reordered = json!({ "a": 2, "b": 1 });

        cache
            .put(CacheType::Bitrate, Path::new("/v.mp4"), &fp, &params, &profile(10), None)
            .unwrap();
        cache
            .put(CacheType::Bitrate, Path::new("/v.mp4"), &fp, &reordered, &profile(4), None)
            .unwrap();

        let stats = cache.statistics().unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_points, 4);

        let entry = cache
            .get(CacheType::Bitrate, Path::new("/v.mp4"), &params, Some(&fp))
            .unwrap()
            .unwrap();
        assert_eq!(profile_points(&entry).len(), 4);
    }

    #[test]
    fn sqlite_cache_expired_entries_miss_and_sweep() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let fp = fingerprint(1);
        let params = json!({});

        cache
            .put(CacheType::Bitrate, Path::new("/old.mp4"), &fp, &params, &profile(2), Some(Duration::ZERO))
            .unwrap();
        cache
            .put(CacheType::Bitrate, Path::new("/gone.mp4"), &fp, &params, &profile(2), Some(Duration::ZERO))
            .unwrap();
        cache
            .put(CacheType::Bitrate, Path::new("/new.mp4"), &fp, &params, &profile(2), Some(Duration::from_secs(3600)))
            .unwrap();

        let result = cache
            .get(CacheType::Bitrate, Path::new("/old.mp4"), &params, Some(&fp))
            .unwrap();
        assert!(result.is_none());

        // /old.mp4 was removed lazily; /gone.mp4 is left for the sweep
        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert_eq!(cache.sweep_expired().unwrap(), 0);

        let stats = cache.statistics().unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_points, 2);
    }

    #[test]
    fn sqlite_cache_stream_groups_roundtrip() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let fp = fingerprint(77);
        let params = json!({});
        let payload = AnalysisPayload::Streams(StreamInspection {
            container: "matroska".to_string(),
            duration_seconds: 2.0,
            streams: vec![
                StreamContribution {
                    stream_index: 0,
                    kind: StreamKind::Video,
                    codec: "h264".to_string(),
                    label: None,
                    points: vec![DataPoint::new(1.0, 5.0), DataPoint::new(0.0, 4.0)],
                },
                StreamContribution {
                    stream_index: 3,
                    kind: StreamKind::Subtitle,
                    codec: "subrip".to_string(),
                    label: Some("forced".to_string()),
                    points: vec![DataPoint::labeled(0.5, 0.1, "cue")],
                },
            ],
        });

        cache
            .put(CacheType::Streams, Path::new("/m.mkv"), &fp, &params, &payload, None)
            .unwrap();
        let entry = cache
            .get(CacheType::Streams, Path::new("/m.mkv"), &params, Some(&fp))
            .unwrap()
            .unwrap();

        let AnalysisPayload::Streams(inspection) = entry.payload else {
            panic!("Wrong payload kind");
        };
        assert_eq!(inspection.streams.len(), 2);
        assert_eq!(inspection.streams[0].points[0].timestamp, 0.0);
        assert_eq!(inspection.streams[0].points[1].timestamp, 1.0);
        assert_eq!(inspection.streams[1].stream_index, 3);
        assert_eq!(inspection.streams[1].points[0].label.as_deref(), Some("cue"));
    }

    #[test]
    fn sqlite_cache_rejects_mismatched_payload() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let err = cache
            .put(CacheType::Streams, Path::new("/v.mp4"), &fingerprint(1), &json!({}), &profile(1), None)
            .unwrap_err();
        assert!(matches!(err, CacheError::PayloadMismatch { .. }));
    }

    #[test]
    fn sqlite_cache_large_series_is_ordered_and_complete() {
        let cache = SqliteCache::open_in_memory().unwrap().with_batch_size(500);
        let fp = fingerprint(10_000);
        let params = json!({});

        // Reverse order on the way in
        let points: Vec<DataPoint> = (0..10_000)
            .rev()
            .map(|i| DataPoint::new(i as f64 * 0.5, i as f64))
            .collect();
        let payload = AnalysisPayload::Bitrate(BitrateProfile {
            points,
            ..BitrateProfile::default()
        });

        cache
            .put(CacheType::Bitrate, Path::new("/big.mkv"), &fp, &params, &payload, None)
            .unwrap();

        let entry = cache
            .get(CacheType::Bitrate, Path::new("/big.mkv"), &params, Some(&fp))
            .unwrap()
            .unwrap();
        let points = profile_points(&entry);

        assert_eq!(points.len(), 10_000);
        for (i, point) in points.iter().enumerate() {
            assert_eq!(point.timestamp, i as f64 * 0.5);
            assert_eq!(point.value, i as f64);
        }
    }

    #[test]
    fn sqlite_cache_discards_garbled_fingerprint() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let path = Path::new("/v.mp4");
        let fp = fingerprint(1);
        let params = json!({});
        cache
            .put(CacheType::Bitrate, path, &fp, &params, &profile(2), None)
            .unwrap();

        cache
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE cache_entries SET fingerprint = '1-2-é0'", [])
            .unwrap();

        assert!(cache.get(CacheType::Bitrate, path, &params, None).unwrap().is_none());
        assert_eq!(cache.statistics().unwrap().total_entries, 0);

        // Connection is still usable afterwards
        cache
            .put(CacheType::Bitrate, path, &fp, &params, &profile(2), None)
            .unwrap();
        let entry = cache.get(CacheType::Bitrate, path, &params, Some(&fp)).unwrap();
        assert!(entry.is_some());
    }

    #[test]
    fn sqlite_cache_failed_batch_rolls_back_whole_entry() {
        let cache = SqliteCache::open_in_memory().unwrap().with_batch_size(500);
        let fp = fingerprint(10_000);
        let params = json!({});
        let payload = AnalysisPayload::Bitrate(BitrateProfile {
            points: (0..10_000).map(|i| DataPoint::new(i as f64, 1.0)).collect(),
            ..BitrateProfile::default()
        });

        // Point 5250 lives in the 11th batch of 500
        cache
            .conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER fail_mid_batch BEFORE INSERT ON cache_points
                 WHEN NEW.timestamp = 5250.0
                 BEGIN SELECT RAISE(ABORT, 'forced batch failure'); END;",
            )
            .unwrap();

        let err = cache
            .put(CacheType::Bitrate, Path::new("/big.mkv"), &fp, &params, &payload, None)
            .unwrap_err();
        assert!(err.to_string().contains("forced batch failure"));

        let stats = cache.statistics().unwrap();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_points, 0);
        assert!(cache
            .get(CacheType::Bitrate, Path::new("/big.mkv"), &params, Some(&fp))
            .unwrap()
            .is_none());

        cache
            .conn
            .lock()
            .unwrap()
            .execute_batch("DROP TRIGGER fail_mid_batch;")
            .unwrap();

        cache
            .put(CacheType::Bitrate, Path::new("/big.mkv"), &fp, &params, &payload, None)
            .unwrap();
        let entry = cache
            .get(CacheType::Bitrate, Path::new("/big.mkv"), &params, Some(&fp))
            .unwrap()
            .unwrap();
        assert_eq!(profile_points(&entry).len(), 10_000);
    }

    #[test]
    fn sqlite_cache_failed_overwrite_keeps_previous_entry() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let fp = fingerprint(1);
        let params = json!({});
        cache
            .put(CacheType::Bitrate, Path::new("/v.mp4"), &fp, &params, &profile(3), None)
            .unwrap();

        let bad = AnalysisPayload::Bitrate(BitrateProfile {
            points: vec![DataPoint::new(f64::NAN, 1.0)],
            ..BitrateProfile::default()
        });
        assert!(cache
            .put(CacheType::Bitrate, Path::new("/v.mp4"), &fp, &params, &bad, None)
            .is_err());

        let entry = cache
            .get(CacheType::Bitrate, Path::new("/v.mp4"), &params, Some(&fp))
            .unwrap()
            .unwrap();
        assert_eq!(profile_points(&entry).len(), 3);
    }

    #[test]
    fn sqlite_cache_bulk_deletes_cascade() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let fp = fingerprint(1);
        let a = json!({ "window": 1 });
        let b = json!({ "window": 2 });

        cache.put(CacheType::Bitrate, Path::new("/a.mp4"), &fp, &a, &profile(5), None).unwrap();
        cache.put(CacheType::Bitrate, Path::new("/a.mp4"), &fp, &b, &profile(5), None).unwrap();
        cache.put(CacheType::Bitrate, Path::new("/b.mp4"), &fp, &a, &profile(5), None).unwrap();

        assert_eq!(cache.invalidate(Path::new("/a.mp4")).unwrap(), 2);
        assert_eq!(cache.statistics().unwrap().total_points, 5);

        assert_eq!(cache.invalidate_type(CacheType::Streams).unwrap(), 0);
        assert_eq!(cache.invalidate_type(CacheType::Bitrate).unwrap(), 1);

        cache.put(CacheType::Bitrate, Path::new("/c.mp4"), &fp, &a, &profile(5), None).unwrap();
        assert_eq!(cache.clear_all().unwrap(), 1);

        let stats = cache.statistics().unwrap();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_points, 0);
    }

    #[test]
    fn sqlite_cache_statistics_group_by_type() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let fp = fingerprint(1);
        cache
            .put(CacheType::Bitrate, Path::new("/a.mp4"), &fp, &json!({}), &profile(4), None)
            .unwrap();

        let stats = cache.statistics().unwrap();
        let bitrate = stats.by_type.get("bitrate").unwrap();
        assert_eq!(bitrate.entries, 1);
        assert_eq!(bitrate.points, 4);
        assert!(stats.total_size_bytes > 0);
        assert!(stats.oldest_entry.is_some());
        assert_eq!(stats.oldest_entry, stats.newest_entry);
    }

    #[test]
    fn sqlite_cache_prunes_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("here.mp4");
        std::fs::write(&present, b"x").unwrap();

        let cache = SqliteCache::open_in_memory().unwrap();
        let fp = fingerprint(1);
        cache.put(CacheType::Bitrate, &present, &fp, &json!({}), &profile(1), None).unwrap();
        cache
            .put(CacheType::Bitrate, &temp_dir.path().join("gone.mp4"), &fp, &json!({}), &profile(1), None)
            .unwrap();

        assert_eq!(cache.prune_orphans().unwrap(), 1);
        assert_eq!(cache.statistics().unwrap().total_entries, 1);
    }

    #[test]
    fn sqlite_cache_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");
        let fp = fingerprint(9);

        {
            let cache = SqliteCache::open(&db_path).unwrap();
            cache
                .put(CacheType::Bitrate, Path::new("/v.mp4"), &fp, &json!({}), &profile(6), None)
                .unwrap();
        }

        let cache = SqliteCache::open(&db_path).unwrap();
        let entry = cache
            .get(CacheType::Bitrate, Path::new("/v.mp4"), &json!({}), Some(&fp))
            .unwrap()
            .unwrap();
        assert_eq!(profile_points(&entry).len(), 6);
    }

    #[test]
    fn batch_size_is_capped_by_parameter_limit() {
        let cache = SqliteCache::open_in_memory().unwrap().with_batch_size(1_000_000);
        assert_eq!(cache.batch_size(), MAX_PARAMETERS / POINT_COLUMNS);
        assert_eq!(SqliteCache::open_in_memory().unwrap().with_batch_size(0).batch_size(), 1);
    }
}
