//! Types for job records.

use crate::core::cache::CacheType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full-file bitrate profiling
    BitrateAnalysis,
    /// Multi-stream demuxing inspection
    StreamAnalysis,
    /// Stream-removal transcode
    StreamRemoval,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BitrateAnalysis => "bitrate_analysis",
            Self::StreamAnalysis => "stream_analysis",
            Self::StreamRemoval => "stream_removal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bitrate_analysis" => Some(Self::BitrateAnalysis),
            "stream_analysis" => Some(Self::StreamAnalysis),
            "stream_removal" => Some(Self::StreamRemoval),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::BitrateAnalysis => "Bitrate Analysis",
            Self::StreamAnalysis => "Stream Analysis",
            Self::StreamRemoval => "Stream Removal",
        }
    }

    /// Cache table that stores this job's result, if results are cached at all.
    ///
    /// Processing jobs write new files instead of producing a reusable
    /// analysis, so they have no cache type.
    pub fn cache_type(&self) -> Option<CacheType> {
        match self {
            Self::BitrateAnalysis => Some(CacheType::Bitrate),
            Self::StreamAnalysis => Some(CacheType::Streams),
            Self::StreamRemoval => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job
///
/// ```text
/// pending --start--> running --success--> completed
///                          \----failure---> failed
/// pending --cancel--------------------> cancelled
/// running --cancel--------------------> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// No status write is valid after a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub file_path: PathBuf,
    /// Fingerprint token of the file at submission time
    pub file_hash: Option<String>,
    pub status: JobStatus,
    /// 0-100
    pub progress: u8,
    pub params: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Wall-clock time spent running, once the job has finished
    pub fn run_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Optional fields written alongside a status transition
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub progress: Option<u8>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn with_result(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn with_error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Aggregate counters over the job table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub by_type: BTreeMap<String, usize>,
    pub oldest_job: Option<DateTime<Utc>>,
    pub newest_job: Option<DateTime<Utc>>,
}

impl JobStats {
    pub(crate) fn add_status(&mut self, status: JobStatus, count: usize) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
        self.total += count;
    }
}

/// Jobs left behind by a previous process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Running jobs marked failed
    pub failed: usize,
    /// Pending jobs marked cancelled
    pub cancelled: usize,
}
