//! # Error Module
//!
//! Error types for the analysis cache and job queue.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - paths, job ids, what went wrong
//! - **Cache faults are soft** - the request path treats them as a miss
//! - **Ordering bugs are loud** - invalid job transitions are always surfaced

use crate::core::jobs::{JobStatus, JobType};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Job store error: {0}")]
    Jobs(#[from] JobStoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors that occur while fingerprinting a file
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Permission denied reading: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Not a regular file: {path}")]
    NotAFile { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur with the analysis cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to open cache database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Cache corruption detected at {path}. Delete this file and try again.")]
    Corrupted { path: PathBuf },

    #[error("Failed to serialize analysis data: {0}")]
    SerializationFailed(String),

    #[error("Payload of kind {found} cannot be stored as a {expected} entry")]
    PayloadMismatch { expected: String, found: String },
}

/// Errors that occur with the persistent job records
#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("Failed to open job database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Job not found: {id}")]
    NotFound { id: String },

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Failed to serialize job data: {0}")]
    SerializationFailed(String),

    #[error("Job database lock was poisoned")]
    LockPoisoned,
}

/// Errors raised by the job queue coordinator
#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error("Queue state lock was poisoned")]
    LockPoisoned,

    #[error("Timed out waiting for job {id}")]
    Timeout { id: String },

    #[error("Failed to start worker thread: {0}")]
    SpawnFailed(String),
}

/// Errors reported by an analysis worker
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Analysis was cancelled")]
    Cancelled,

    #[error("Analysis failed: {0}")]
    Failed(String),

    #[error("No worker can handle {job_type} jobs")]
    Unsupported { job_type: JobType },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while collecting media files
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Path not found: {path}")]
    PathNotFound { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur while watching folders
#[derive(Error, Debug, Clone)]
pub enum WatcherError {
    #[error("Failed to initialize watcher: {0}")]
    InitFailed(String),

    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Failed to watch {}: {reason}", .path.display())]
    WatchFailed { path: PathBuf, reason: String },

    #[error("Failed to unwatch {}: {reason}", .path.display())]
    UnwatchFailed { path: PathBuf, reason: String },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, AnalyzerError>;
