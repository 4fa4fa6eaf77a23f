//! Event type definitions for queue and job reporting.

use crate::core::jobs::{JobStatus, JobType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by the analysis service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Queue membership changed
    Queue(QueueEvent),
    /// Lifecycle and progress of a single job
    Job(JobEvent),
    /// File watcher events
    Watcher(WatcherEvent),
}

impl Event {
    /// Wire name for transports that route by topic
    pub fn name(&self) -> &'static str {
        match self {
            Event::Queue(QueueEvent::Updated(_)) => "queue-update",
            Event::Job(JobEvent::Progress(_)) => "progress",
            Event::Job(JobEvent::Queued { .. }) => "job-queued",
            Event::Job(JobEvent::Started { .. }) => "job-started",
            Event::Job(JobEvent::Completed { .. }) => "job-completed",
            Event::Job(JobEvent::Failed { .. }) => "job-failed",
            Event::Job(JobEvent::Cancelled { .. }) => "job-cancelled",
            Event::Watcher(_) => "watcher",
        }
    }

    /// Job this event is about, if any
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Event::Job(event) => Some(event.job_id()),
            _ => None,
        }
    }
}

/// Queue-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// Published on admission, promotion, completion, failure and cancellation
    Updated(QueueSnapshot),
}

/// Per-job events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job accepted and waiting for a slot
    Queued {
        job_id: String,
        job_type: JobType,
        file_path: PathBuf,
    },
    /// Job promoted to a running slot
    Started { job_id: String },
    /// Progress update from the worker
    Progress(JobProgress),
    /// Job finished successfully
    Completed {
        job_id: String,
        /// Whether the result was written to the cache
        cached: bool,
    },
    /// Job failed; other jobs are unaffected
    Failed { job_id: String, message: String },
    /// Job was cancelled before finishing
    Cancelled { job_id: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Queued { job_id, .. }
            | JobEvent::Started { job_id }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id } => job_id,
            JobEvent::Progress(progress) => &progress.job_id,
        }
    }

    /// True for the last event a job will ever emit
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed { .. } | JobEvent::Failed { .. } | JobEvent::Cancelled { .. }
        )
    }
}

/// Progress information for a running job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    /// Units of work done so far
    pub current: u64,
    /// Total units of work, 0 if unknown
    pub total: u64,
    /// 0-100, never decreases for a given job
    pub percentage: u8,
    /// Free-form label for the current phase
    pub stage: Option<String>,
}

impl JobProgress {
    /// Integer percentage of `current` over `total`, clamped to 0-100
    pub fn percentage_of(current: u64, total: u64) -> u8 {
        if total == 0 {
            return 0;
        }
        ((current.min(total) as u128 * 100) / total as u128) as u8
    }
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Waiting jobs in promotion order
    pub queued: Vec<JobInfo>,
    /// Jobs currently holding a slot
    pub running: Vec<JobInfo>,
    pub max_parallel: usize,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.running.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queued.len() + self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find a job in either list
    pub fn find(&self, job_id: &str) -> Option<&JobInfo> {
        self.running
            .iter()
            .chain(self.queued.iter())
            .find(|info| info.job_id == job_id)
    }
}

/// Live state of one queued or running job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub job_type: JobType,
    pub file_path: PathBuf,
    pub status: JobStatus,
    pub progress: u8,
    pub stage: Option<String>,
    pub current: Option<u64>,
    pub total: Option<u64>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Events from the cache invalidation watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WatcherEvent {
    /// Watcher started monitoring a folder
    Started { path: PathBuf },
    /// Watcher stopped monitoring a folder
    Stopped { path: PathBuf },
    /// A media file changed on disk
    MediaModified { path: PathBuf, entries_removed: usize },
    /// A media file was removed
    MediaRemoved { path: PathBuf, entries_removed: usize },
    /// An error occurred
    Error { message: String },
}
