//! Database operations for job records.

use super::types::{Job, JobStats, JobStatus, JobType, JobUpdate, RecoveryReport};
use crate::error::JobStoreError;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, job_type, file_path, file_hash, status, progress, params,
     result, error_message, created_at, started_at, completed_at";

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

/// Repository for job lifecycle records
///
/// Independent of the analysis cache so job history outlives any cached
/// artifact.
pub struct JobRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl JobRepository {
    /// Open or create the job database
    pub fn open(path: &Path) -> Result<Self, JobStoreError> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| JobStoreError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| JobStoreError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // Enable WAL mode
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(query_failed)?;

        Self::init(conn, path.to_path_buf())
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory().map_err(|e| JobStoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, db_path: PathBuf) -> Result<Self, JobStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_hash TEXT,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                params TEXT NOT NULL,
                result TEXT,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_path ON jobs(file_path);
            CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at DESC);",
        )
        .map_err(query_failed)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Location of the backing database
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn.lock().map_err(|_| JobStoreError::LockPoisoned)
    }

    /// Insert a new pending job
    pub fn create(
        &self,
        job_type: JobType,
        path: &Path,
        file_hash: Option<String>,
        params: &serde_json::Value,
    ) -> Result<Job, JobStoreError> {
        let job = Job {
            id: Self::generate_id(),
            job_type,
            file_path: path.to_path_buf(),
            file_hash,
            status: JobStatus::Pending,
            progress: 0,
            params: params.clone(),
            result: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let params_json = serde_json::to_string(&job.params)
            .map_err(|e| JobStoreError::SerializationFailed(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO jobs
             (id, job_type, file_path, file_hash, status, progress, params, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
            params![
                job.id,
                job.job_type.as_str(),
                job.file_path.to_string_lossy(),
                job.file_hash,
                job.status.as_str(),
                params_json,
                job.created_at.timestamp_millis(),
            ],
        )
        .map_err(query_failed)?;

        debug!(job_id = %job.id, job_type = %job.job_type, path = %job.file_path.display(), "job created");
        Ok(job)
    }

    /// Get a specific job by ID
    pub fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let conn = self.lock()?;
        fetch(&conn, id)
    }

    /// Move a job along its state machine
    ///
    /// Rejects edges the state machine does not allow, including any write
    /// after a terminal state, with [`JobStoreError::InvalidTransition`].
    pub fn transition(
        &self,
        id: &str,
        to: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_failed)?;

        let current = fetch(&tx, id)?.ok_or_else(|| JobStoreError::NotFound {
            id: id.to_string(),
        })?;

        if !current.status.can_transition_to(to) {
            return Err(JobStoreError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to,
            });
        }

        let now = Utc::now();
        let started_at = if to == JobStatus::Running {
            Some(now)
        } else {
            current.started_at
        };
        let completed_at = if to.is_terminal() { Some(now) } else { None };
        let progress = match to {
            JobStatus::Completed => 100,
            _ => update.progress.unwrap_or(current.progress).min(100),
        };
        let result = update.result.or(current.result);
        let error_message = update.error_message.or(current.error_message);

        let result_json = result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| JobStoreError::SerializationFailed(e.to_string()))?;

        tx.execute(
            "UPDATE jobs SET status = ?, progress = ?, result = ?, error_message = ?,
                 started_at = ?, completed_at = ?
             WHERE id = ?",
            params![
                to.as_str(),
                progress as i64,
                result_json,
                error_message,
                started_at.map(|t| t.timestamp_millis()),
                completed_at.map(|t| t.timestamp_millis()),
                id,
            ],
        )
        .map_err(query_failed)?;
        tx.commit().map_err(query_failed)?;

        debug!(job_id = %id, from = %current.status, to = %to, "job transition");

        Ok(Job {
            status: to,
            progress,
            result,
            error_message,
            started_at,
            completed_at,
            ..current
        })
    }

    /// Persist a progress percentage for a running job
    ///
    /// Returns `false` when the job is not running or the value would move
    /// progress backwards.
    pub fn record_progress(&self, id: &str, progress: u8) -> Result<bool, JobStoreError> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE jobs SET progress = ?2 WHERE id = ?1 AND status = 'running' AND progress < ?2",
                params![id, progress.min(100) as i64],
            )
            .map_err(query_failed)?;
        Ok(rows > 0)
    }

    /// Jobs in a given status, oldest first
    pub fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(query_failed)?;
        let jobs = stmt
            .query_map([status.as_str()], row_to_job)
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;
        Ok(jobs)
    }

    /// Jobs for a file, newest first
    pub fn list_by_path(&self, path: &Path) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE file_path = ? ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = conn.prepare(&sql).map_err(query_failed)?;
        let jobs = stmt
            .query_map([path.to_string_lossy()], row_to_job)
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;
        Ok(jobs)
    }

    /// The most recently created jobs
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?"
        );
        let mut stmt = conn.prepare(&sql).map_err(query_failed)?;
        let jobs = stmt
            .query_map([limit as i64], row_to_job)
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;
        Ok(jobs)
    }

    /// Get job statistics
    pub fn statistics(&self) -> Result<JobStats, JobStoreError> {
        let conn = self.lock()?;
        let mut stats = JobStats::default();

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .map_err(query_failed)?;
        let by_status = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;
        for (status, count) in by_status {
            if let Some(status) = JobStatus::from_str(&status) {
                stats.add_status(status, count as usize);
            }
        }

        let mut stmt = conn
            .prepare("SELECT job_type, COUNT(*) FROM jobs GROUP BY job_type")
            .map_err(query_failed)?;
        stats.by_type = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })
            .map_err(query_failed)?
            .collect::<Result<_, _>>()
            .map_err(query_failed)?;

        let (oldest, newest): (Option<i64>, Option<i64>) = conn
            .query_row("SELECT MIN(created_at), MAX(created_at) FROM jobs", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(query_failed)?;
        stats.oldest_job = oldest.and_then(DateTime::<Utc>::from_timestamp_millis);
        stats.newest_job = newest.and_then(DateTime::<Utc>::from_timestamp_millis);

        Ok(stats)
    }

    /// Delete every finished job record
    ///
    /// Pending and running rows are left alone: the queue still owns them
    /// and will write their terminal state.
    pub fn delete_all(&self) -> Result<usize, JobStoreError> {
        let conn = self.lock()?;
        let sql = format!("DELETE FROM jobs WHERE status IN {TERMINAL_STATUSES}");
        let count = conn.execute(&sql, []).map_err(query_failed)?;
        info!(count, "job history cleared");
        Ok(count)
    }

    /// Delete finished jobs that completed more than `days` days ago
    ///
    /// A window reaching past the earliest representable date matches
    /// nothing.
    pub fn sweep_older_than(&self, days: u32) -> Result<usize, JobStoreError> {
        let Some(cutoff) = Duration::try_days(i64::from(days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
        else {
            debug!(days, "retention window out of range, nothing swept");
            return Ok(0);
        };
        let conn = self.lock()?;
        let sql = format!(
            "DELETE FROM jobs
             WHERE status IN {TERMINAL_STATUSES}
               AND COALESCE(completed_at, created_at) < ?"
        );
        let count = conn
            .execute(&sql, [cutoff.timestamp_millis()])
            .map_err(query_failed)?;
        if count > 0 {
            info!(count, days, "swept old job records");
        }
        Ok(count)
    }

    /// Close out jobs a previous process never finished
    ///
    /// Running jobs become failed and pending jobs become cancelled, so the
    /// table never shows work that nothing is doing.
    pub fn recover_interrupted(&self) -> Result<RecoveryReport, JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_failed)?;
        let now = Utc::now().timestamp_millis();

        let failed = tx
            .execute(
                "UPDATE jobs SET status = 'failed', completed_at = ?,
                     error_message = 'interrupted before completion'
                 WHERE status = 'running'",
                [now],
            )
            .map_err(query_failed)?;
        let cancelled = tx
            .execute(
                "UPDATE jobs SET status = 'cancelled', completed_at = ? WHERE status = 'pending'",
                [now],
            )
            .map_err(query_failed)?;
        tx.commit().map_err(query_failed)?;

        if failed + cancelled > 0 {
            info!(failed, cancelled, "recovered interrupted jobs");
        }
        Ok(RecoveryReport { failed, cancelled })
    }

    /// Generate a new unique ID
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }
}

fn query_failed(e: rusqlite::Error) -> JobStoreError {
    JobStoreError::QueryFailed(e.to_string())
}

fn fetch(conn: &Connection, id: &str) -> Result<Option<Job>, JobStoreError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
    match conn.query_row(&sql, [id], row_to_job) {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(query_failed(e)),
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let job_type_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;
    let params_json: String = row.get(6)?;
    let result_json: Option<String> = row.get(7)?;
    let created_at: i64 = row.get(9)?;
    let started_at: Option<i64> = row.get(10)?;
    let completed_at: Option<i64> = row.get(11)?;

    let job_type = JobType::from_str(&job_type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown job type: {job_type_str}").into(),
        )
    })?;
    let status = JobStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown job status: {status_str}").into(),
        )
    })?;

    Ok(Job {
        id: row.get(0)?,
        job_type,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        file_hash: row.get(3)?,
        status,
        progress: row.get::<_, i64>(5)?.clamp(0, 100) as u8,
        params: serde_json::from_str(&params_json).unwrap_or(serde_json::Value::Null),
        result: result_json.and_then(|json| serde_json::from_str(&json).ok()),
        error_message: row.get(8)?,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_at).unwrap_or_default(),
        started_at: started_at.and_then(DateTime::<Utc>::from_timestamp_millis),
        completed_at: completed_at.and_then(DateTime::<Utc>::from_timestamp_millis),
    })
}
