//! Fire-and-forget progress reporting from worker threads.

use crate::events::JobProgress;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Handle a worker uses to report how far it has got
///
/// Reporting never blocks and never fails. Percentages are clamped so
/// they only move forward, even when clones report from several threads.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: String,
    sender: Option<Sender<JobProgress>>,
    high_water: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub(crate) fn new(job_id: impl Into<String>, sender: Sender<JobProgress>) -> Self {
        Self {
            job_id: job_id.into(),
            sender: Some(sender),
            high_water: Arc::new(AtomicU8::new(0)),
        }
    }

    /// A reporter connected to nothing, for running workers directly
    pub fn detached(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            sender: None,
            high_water: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Highest percentage reported so far
    pub fn percentage(&self) -> u8 {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Report `current` of `total` units done
    pub fn report(&self, current: u64, total: u64, stage: Option<&str>) {
        let percentage = JobProgress::percentage_of(current, total);
        let previous = self.high_water.fetch_max(percentage, Ordering::SeqCst);

        if let Some(sender) = &self.sender {
            // Receiver gone means the queue shut down; nothing to do
            let _ = sender.send(JobProgress {
                job_id: self.job_id.clone(),
                current,
                total,
                percentage: percentage.max(previous),
                stage: stage.map(str::to_string),
            });
        }
    }
}
