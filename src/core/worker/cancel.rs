//! Cooperative cancellation flag shared between the queue and a worker.

use crate::error::WorkerError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once by the queue, polled by the worker
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(WorkerError::Cancelled)` once cancellation was requested
    ///
    /// Lets workers bail out with `token.check()?` between units of work.
    pub fn check(&self) -> Result<(), WorkerError> {
        if self.is_cancelled() {
            Err(WorkerError::Cancelled)
        } else {
            Ok(())
        }
    }
}
