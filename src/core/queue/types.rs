//! Request and outcome types for the job queue.

use crate::core::fingerprint::FileFingerprint;
use crate::core::jobs::JobType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of jobs allowed to run at once
pub const DEFAULT_MAX_PARALLEL: usize = 2;

/// Queue limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Running slots (at least 1)
    pub max_parallel: usize,
    /// Waiting jobs allowed before submissions are rejected
    pub max_queued: Option<usize>,
    /// Lifetime of cache entries written by completed jobs
    pub cache_ttl: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            max_queued: None,
            cache_ttl: None,
        }
    }
}

/// A unit of work to enqueue
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_type: JobType,
    pub path: PathBuf,
    pub params: serde_json::Value,
    /// Fingerprint captured before submission; completed results are
    /// cached under it
    pub fingerprint: Option<FileFingerprint>,
}

impl JobRequest {
    pub fn new(job_type: JobType, path: impl Into<PathBuf>) -> Self {
        Self {
            job_type,
            path: path.into(),
            params: serde_json::Value::Object(Default::default()),
            fingerprint: None,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: FileFingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// Why a submission was turned away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The queue no longer accepts work
    ShuttingDown,
    /// Nothing is registered to run this job type
    NoWorker(JobType),
    /// `max_queued` jobs are already waiting
    QueueFull { limit: usize },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShuttingDown => f.write_str("queue is shutting down"),
            Self::NoWorker(job_type) => write!(f, "no worker registered for {}", job_type),
            Self::QueueFull { limit } => write!(f, "queue is full ({} waiting)", limit),
        }
    }
}

/// Result of [`JobQueue::submit`](super::JobQueue::submit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitOutcome {
    /// A new job was created
    Accepted(String),
    /// An equivalent job is already pending or running
    Deduplicated(String),
    Rejected(RejectReason),
}

impl SubmitOutcome {
    /// The job that will answer this request, if any
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Accepted(id) | Self::Deduplicated(id) => Some(id),
            Self::Rejected(_) => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_to_empty_params() {
        let request = JobRequest::new(JobType::BitrateAnalysis, "/v.mp4");
        assert_eq!(request.params, serde_json::json!({}));
        assert!(request.fingerprint.is_none());
    }

    #[test]
    fn outcome_job_id() {
        assert_eq!(SubmitOutcome::Accepted("a".into()).job_id(), Some("a"));
        assert_eq!(SubmitOutcome::Deduplicated("b".into()).job_id(), Some("b"));
        assert_eq!(
            SubmitOutcome::Rejected(RejectReason::ShuttingDown).job_id(),
            None
        );
    }

    #[test]
    fn reject_reasons_read_well() {
        let reason = RejectReason::NoWorker(JobType::StreamRemoval);
        assert_eq!(reason.to_string(), "no worker registered for stream_removal");
        assert!(RejectReason::QueueFull { limit: 3 }.to_string().contains('3'));
    }
}
