//! # Worker Module
//!
//! The boundary between the queue and the code that actually analyzes a
//! file. Workers are black boxes: they get a [`WorkerTask`], report
//! progress, poll for cancellation and return an [`AnalysisPayload`].
//!
//! Plain closures implement [`AnalysisWorker`], which keeps tests short.

mod cancel;
mod profiler;
mod progress;

pub use cancel::CancellationToken;
pub use profiler::{ChunkProfiler, DEFAULT_WINDOW_BYTES};
pub use progress::ProgressReporter;

use crate::core::cache::AnalysisPayload;
use crate::core::jobs::JobType;
use crate::error::WorkerError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a worker needs to run one job
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub job_id: String,
    pub job_type: JobType,
    pub path: PathBuf,
    pub params: serde_json::Value,
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
}

impl WorkerTask {
    /// A task with a fresh token and a detached reporter
    pub fn standalone(
        job_type: JobType,
        path: impl Into<PathBuf>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            job_id: String::new(),
            job_type,
            path: path.into(),
            params,
            cancel: CancellationToken::new(),
            progress: ProgressReporter::detached(""),
        }
    }
}

/// Runs one job to completion on the calling thread
pub trait AnalysisWorker: Send + Sync {
    /// Return [`WorkerError::Cancelled`] promptly once `task.cancel` is set.
    fn run(&self, task: &WorkerTask) -> Result<AnalysisPayload, WorkerError>;
}

impl<F> AnalysisWorker for F
where
    F: Fn(&WorkerTask) -> Result<AnalysisPayload, WorkerError> + Send + Sync,
{
    fn run(&self, task: &WorkerTask) -> Result<AnalysisPayload, WorkerError> {
        self(task)
    }
}

/// Maps job types to the worker that handles them
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<JobType, Arc<dyn AnalysisWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in bitrate profiler
    pub fn with_defaults() -> Self {
        Self::new().with(JobType::BitrateAnalysis, ChunkProfiler::new())
    }

    /// Register a worker, replacing any previous one for the same type
    pub fn with(mut self, job_type: JobType, worker: impl AnalysisWorker + 'static) -> Self {
        self.register(job_type, Arc::new(worker));
        self
    }

    pub fn register(&mut self, job_type: JobType, worker: Arc<dyn AnalysisWorker>) {
        self.workers.insert(job_type, worker);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn AnalysisWorker>> {
        self.workers.get(&job_type).cloned()
    }

    pub fn supports(&self, job_type: JobType) -> bool {
        self.workers.contains_key(&job_type)
    }

    /// Registered job types, in a stable order
    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.workers.keys().copied().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
