//! # Core Module
//!
//! The analysis cache and job queue engine, independent of any front end.
//!
//! ## Modules
//! - `fingerprint` - Cheap content identity for media files
//! - `cache` - Persists analysis results keyed by path, type and params
//! - `jobs` - Durable job records and their lifecycle
//! - `queue` - Bounded-parallel job execution with dedup and cancellation
//! - `worker` - The analysis worker seam and a reference profiler
//! - `service` - The request path tying the pieces together
//! - `scanner` - Discovers media files in directories
//! - `watcher` - Invalidates cache entries when media changes on disk

pub mod cache;
pub mod fingerprint;
pub mod jobs;
pub mod queue;
pub mod scanner;
pub mod service;
pub mod watcher;
pub mod worker;

// Re-export commonly used types
pub use cache::{AnalysisPayload, CacheBackend, CacheEntry, CacheType};
pub use fingerprint::{FileFingerprint, Fingerprinter};
pub use jobs::{Job, JobStatus, JobType};
pub use queue::{JobQueue, JobRequest, SubmitOutcome};
pub use scanner::MediaFile;
pub use service::{AnalysisOutcome, AnalysisService, ServiceConfig};
pub use worker::{AnalysisWorker, WorkerRegistry};
