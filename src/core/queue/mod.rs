//! # Job Queue Module
//!
//! Bounded-concurrency FIFO coordinator for analysis jobs.
//!
//! ## Guarantees
//! - At most one pending/running job per `(job type, path)`
//! - Jobs start in submission order, at most `max_parallel` at a time
//! - Progress events for a job never go backwards and never follow its
//!   terminal event
//! - A failing or panicking worker only fails its own job
//!
//! All queue membership lives behind one mutex, so promotion (pop from the
//! queue, mark running) and cancel-all are atomic with respect to each
//! other. Each running job gets its own named thread.

mod types;

pub use types::{JobRequest, QueueConfig, RejectReason, SubmitOutcome, DEFAULT_MAX_PARALLEL};

use crate::core::cache::{AnalysisPayload, CacheBackend};
use crate::core::jobs::{Job, JobRepository, JobStatus, JobType, JobUpdate};
use crate::core::worker::{
    AnalysisWorker, CancellationToken, ProgressReporter, WorkerRegistry, WorkerTask,
};
use crate::error::{JobStoreError, QueueError, WorkerError};
use crate::events::{
    Event, EventBus, JobEvent, JobInfo, JobProgress, QueueEvent, QueueSnapshot,
};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct QueuedJob {
    info: JobInfo,
    request: JobRequest,
}

struct RunningJob {
    info: JobInfo,
    cancel: CancellationToken,
}

struct QueueState {
    queued: VecDeque<QueuedJob>,
    running: Vec<RunningJob>,
    /// Pending/running job per (type, path), for dedup
    in_flight: HashMap<(JobType, PathBuf), String>,
    max_parallel: usize,
    accepting: bool,
}

impl QueueState {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queued: self.queued.iter().map(|job| job.info.clone()).collect(),
            running: self.running.iter().map(|job| job.info.clone()).collect(),
            max_parallel: self.max_parallel,
        }
    }

    fn contains(&self, job_id: &str) -> bool {
        self.queued.iter().any(|job| job.info.job_id == job_id)
            || self.running.iter().any(|job| job.info.job_id == job_id)
    }

    /// Forget the dedup entry, but only if it still points at this job
    fn release(&mut self, job_type: JobType, path: &Path, job_id: &str) {
        let key = (job_type, path.to_path_buf());
        if self.in_flight.get(&key).is_some_and(|id| id == job_id) {
            self.in_flight.remove(&key);
        }
    }
}

struct QueueShared {
    state: Mutex<QueueState>,
    /// Signalled whenever a job leaves the queue for good
    finished: Condvar,
    jobs: Arc<JobRepository>,
    cache: Arc<dyn CacheBackend>,
    workers: WorkerRegistry,
    bus: EventBus,
    progress: Sender<JobProgress>,
    max_queued: Option<usize>,
    cache_ttl: Option<Duration>,
}

/// Background job coordinator
///
/// Dropping the queue stops admissions and cancels every job.
pub struct JobQueue {
    shared: Arc<QueueShared>,
}

impl JobQueue {
    pub fn new(
        jobs: Arc<JobRepository>,
        cache: Arc<dyn CacheBackend>,
        workers: WorkerRegistry,
        bus: EventBus,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        let (progress_tx, progress_rx) = unbounded();

        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                queued: VecDeque::new(),
                running: Vec::new(),
                in_flight: HashMap::new(),
                max_parallel: config.max_parallel.max(1),
                accepting: true,
            }),
            finished: Condvar::new(),
            jobs,
            cache,
            workers,
            bus,
            progress: progress_tx,
            max_queued: config.max_queued,
            cache_ttl: config.cache_ttl,
        });

        let weak = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("progress-dispatcher".to_string())
            .spawn(move || dispatch_progress(weak, progress_rx))
            .map_err(|e| QueueError::SpawnFailed(e.to_string()))?;

        Ok(Self { shared })
    }

    /// Enqueue a job unless an equivalent one is already in flight
    pub fn submit(&self, request: JobRequest) -> Result<SubmitOutcome, QueueError> {
        let shared = &self.shared;
        let mut state = shared.lock()?;

        if !state.accepting {
            return Ok(SubmitOutcome::Rejected(RejectReason::ShuttingDown));
        }

        let key = (request.job_type, request.path.clone());
        if let Some(existing) = state.in_flight.get(&key) {
            debug!(job_id = %existing, path = %request.path.display(), "request deduplicated");
            return Ok(SubmitOutcome::Deduplicated(existing.clone()));
        }

        if !shared.workers.supports(request.job_type) {
            return Ok(SubmitOutcome::Rejected(RejectReason::NoWorker(
                request.job_type,
            )));
        }

        if let Some(limit) = shared.max_queued {
            if state.queued.len() >= limit {
                return Ok(SubmitOutcome::Rejected(RejectReason::QueueFull { limit }));
            }
        }

        let job = shared.jobs.create(
            request.job_type,
            &request.path,
            request.fingerprint.as_ref().map(|fp| fp.to_token()),
            &request.params,
        )?;

        let info = JobInfo {
            job_id: job.id.clone(),
            job_type: job.job_type,
            file_path: job.file_path.clone(),
            status: JobStatus::Pending,
            progress: 0,
            stage: None,
            current: None,
            total: None,
            queued_at: job.created_at,
            started_at: None,
        };

        state.in_flight.insert(key, job.id.clone());
        state.queued.push_back(QueuedJob { info, request });

        shared.bus.publish(Event::Job(JobEvent::Queued {
            job_id: job.id.clone(),
            job_type: job.job_type,
            file_path: job.file_path.clone(),
        }));

        shared.promote(&mut state);
        shared.publish_snapshot(&state);

        Ok(SubmitOutcome::Accepted(job.id))
    }

    /// Cancel one job
    ///
    /// Pending jobs are cancelled immediately. Running jobs are signalled
    /// and become cancelled once their worker returns. Returns `false` for
    /// unknown or already finished jobs.
    pub fn cancel(&self, job_id: &str) -> Result<bool, QueueError> {
        let mut state = self.shared.lock()?;
        let cancelled = self.shared.cancel_locked(&mut state, job_id);
        if cancelled {
            self.shared.publish_snapshot(&state);
        }
        Ok(cancelled)
    }

    /// Cancel every in-flight job for a file
    pub fn cancel_path(&self, path: &Path) -> Result<bool, QueueError> {
        let mut state = self.shared.lock()?;

        let ids: Vec<String> = state
            .queued
            .iter()
            .map(|job| &job.info)
            .chain(state.running.iter().map(|job| &job.info))
            .filter(|info| info.file_path == path)
            .map(|info| info.job_id.clone())
            .collect();

        let mut any = false;
        for id in ids {
            any |= self.shared.cancel_locked(&mut state, &id);
        }
        if any {
            self.shared.publish_snapshot(&state);
        }
        Ok(any)
    }

    /// Cancel everything queued or running. Returns the number of jobs hit.
    pub fn cancel_all(&self) -> Result<usize, QueueError> {
        let mut state = self.shared.lock()?;
        let count = self.shared.cancel_all_locked(&mut state);
        if count > 0 {
            self.shared.publish_snapshot(&state);
        }
        Ok(count)
    }

    /// Change the number of running slots (minimum 1)
    ///
    /// Raising the limit starts waiting jobs immediately. Lowering it never
    /// interrupts running jobs.
    pub fn set_max_parallel(&self, max_parallel: usize) -> Result<(), QueueError> {
        let mut state = self.shared.lock()?;
        state.max_parallel = max_parallel.max(1);
        self.shared.promote(&mut state);
        self.shared.publish_snapshot(&state);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        Ok(self.shared.lock()?.snapshot())
    }

    /// Block until a job reaches a terminal state, then return its record
    pub fn wait_for(&self, job_id: &str, timeout: Duration) -> Result<Job, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock()?;

        while state.contains(job_id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QueueError::Timeout {
                    id: job_id.to_string(),
                });
            }
            state = self
                .shared
                .finished
                .wait_timeout(state, remaining)
                .map_err(|_| QueueError::LockPoisoned)?
                .0;
        }
        drop(state);

        self.shared
            .jobs
            .get(job_id)?
            .ok_or_else(|| {
                QueueError::Store(JobStoreError::NotFound {
                    id: job_id.to_string(),
                })
            })
    }

    /// Stop accepting work and cancel everything in flight
    pub fn shutdown(&self) -> Result<usize, QueueError> {
        let mut state = self.shared.lock()?;
        state.accepting = false;
        let count = self.shared.cancel_all_locked(&mut state);
        self.shared.publish_snapshot(&state);
        info!(cancelled = count, "job queue shut down");
        Ok(count)
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.lock().map(|s| s.accepting).unwrap_or(false)
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.shared.workers
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "failed to shut down job queue");
        }
    }
}

impl QueueShared {
    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::LockPoisoned)
    }

    fn publish_snapshot(&self, state: &QueueState) {
        self.bus
            .publish(Event::Queue(QueueEvent::Updated(state.snapshot())));
    }

    /// Start waiting jobs, oldest first, until the slots are full
    fn promote(self: &Arc<Self>, state: &mut QueueState) {
        while state.running.len() < state.max_parallel {
            let Some(QueuedJob { mut info, request }) = state.queued.pop_front() else {
                break;
            };

            let job = match self
                .jobs
                .transition(&info.job_id, JobStatus::Running, JobUpdate::default())
            {
                Ok(job) => job,
                Err(e) => {
                    error!(job_id = %info.job_id, error = %e, "could not start job");
                    state.release(info.job_type, &info.file_path, &info.job_id);
                    self.bus.publish(Event::Job(JobEvent::Failed {
                        job_id: info.job_id.clone(),
                        message: e.to_string(),
                    }));
                    self.finished.notify_all();
                    continue;
                }
            };

            info.status = JobStatus::Running;
            info.started_at = job.started_at.or_else(|| Some(Utc::now()));

            let Some(worker) = self.workers.get(info.job_type) else {
                self.fail_unstarted(state, info, "no worker registered".to_string());
                continue;
            };

            let cancel = CancellationToken::new();
            let task = WorkerTask {
                job_id: info.job_id.clone(),
                job_type: info.job_type,
                path: info.file_path.clone(),
                params: request.params.clone(),
                cancel: cancel.clone(),
                progress: ProgressReporter::new(info.job_id.clone(), self.progress.clone()),
            };

            let shared = Arc::clone(self);
            let name = format!("job-{}", info.job_id.chars().take(8).collect::<String>());
            let spawned = thread::Builder::new()
                .name(name)
                .spawn(move || shared.run_job(worker, task, request));

            match spawned {
                Ok(_) => {
                    debug!(job_id = %info.job_id, path = %info.file_path.display(), "job started");
                    self.bus.publish(Event::Job(JobEvent::Started {
                        job_id: info.job_id.clone(),
                    }));
                    state.running.push(RunningJob { info, cancel });
                }
                Err(e) => {
                    let message = format!("failed to start worker thread: {}", e);
                    self.fail_unstarted(state, info, message);
                }
            }
        }
    }

    /// Fail a job that was marked running but never got a worker
    fn fail_unstarted(&self, state: &mut QueueState, info: JobInfo, message: String) {
        error!(job_id = %info.job_id, message = %message, "job failed to start");
        if let Err(e) = self.jobs.transition(
            &info.job_id,
            JobStatus::Failed,
            JobUpdate::with_error(message.clone()),
        ) {
            warn!(job_id = %info.job_id, error = %e, "could not record job failure");
        }
        state.release(info.job_type, &info.file_path, &info.job_id);
        self.bus.publish(Event::Job(JobEvent::Failed {
            job_id: info.job_id,
            message,
        }));
        self.finished.notify_all();
    }

    fn cancel_locked(&self, state: &mut QueueState, job_id: &str) -> bool {
        if let Some(pos) = state.queued.iter().position(|job| job.info.job_id == job_id) {
            if let Some(job) = state.queued.remove(pos) {
                self.cancel_pending(state, job);
                return true;
            }
        }

        // The dedup key stays held until the worker returns and `finish` runs
        if let Some(job) = state.running.iter().find(|job| job.info.job_id == job_id) {
            if job.cancel.is_cancelled() {
                return false;
            }
            job.cancel.cancel();
            debug!(job_id = %job_id, "cancellation requested for running job");
            return true;
        }

        false
    }

    fn cancel_all_locked(&self, state: &mut QueueState) -> usize {
        let mut count = 0;
        while let Some(job) = state.queued.pop_front() {
            self.cancel_pending(state, job);
            count += 1;
        }

        for job in state.running.iter().filter(|job| !job.cancel.is_cancelled()) {
            job.cancel.cancel();
            count += 1;
        }

        count
    }

    fn cancel_pending(&self, state: &mut QueueState, job: QueuedJob) {
        let info = job.info;
        if let Err(e) = self
            .jobs
            .transition(&info.job_id, JobStatus::Cancelled, JobUpdate::default())
        {
            warn!(job_id = %info.job_id, error = %e, "could not record cancellation");
        }
        state.release(info.job_type, &info.file_path, &info.job_id);
        debug!(job_id = %info.job_id, "pending job cancelled");
        self.bus.publish(Event::Job(JobEvent::Cancelled {
            job_id: info.job_id,
        }));
        self.finished.notify_all();
    }

    /// Body of a job thread
    fn run_job(
        self: Arc<Self>,
        worker: Arc<dyn AnalysisWorker>,
        task: WorkerTask,
        request: JobRequest,
    ) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run(&task)))
            .unwrap_or_else(|panic| {
                Err(WorkerError::Failed(format!(
                    "worker panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        self.finish(&task, &request, outcome);
    }

    /// Write a successful result to the cache under the submitted fingerprint
    fn store_result(&self, request: &JobRequest, payload: &AnalysisPayload) -> bool {
        let Some(cache_type) = request.job_type.cache_type() else {
            return false;
        };
        let Some(fingerprint) = &request.fingerprint else {
            debug!(path = %request.path.display(), "no fingerprint captured, result not cached");
            return false;
        };

        match self.cache.put(
            cache_type,
            &request.path,
            fingerprint,
            &request.params,
            payload,
            self.cache_ttl,
        ) {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    path = %request.path.display(),
                    error = %e,
                    "failed to cache analysis result"
                );
                false
            }
        }
    }

    /// Record the terminal state and hand the slot to the next job
    ///
    /// The result is cached while the queue lock is held, so a concurrent
    /// cancel either lands first and nothing is stored, or finds the job
    /// already gone.
    fn finish(
        self: &Arc<Self>,
        task: &WorkerTask,
        request: &JobRequest,
        outcome: Result<AnalysisPayload, WorkerError>,
    ) {
        let Ok(mut state) = self.state.lock() else {
            error!(job_id = %task.job_id, "queue lock poisoned, job outcome lost");
            return;
        };

        let Some(pos) = state
            .running
            .iter()
            .position(|job| job.info.job_id == task.job_id)
        else {
            return;
        };
        let job = state.running.remove(pos);
        state.release(job.info.job_type, &job.info.file_path, &job.info.job_id);

        let cancelled =
            job.cancel.is_cancelled() || matches!(outcome, Err(WorkerError::Cancelled));
        let (status, update, event) = if cancelled {
            (
                JobStatus::Cancelled,
                JobUpdate::default(),
                JobEvent::Cancelled {
                    job_id: task.job_id.clone(),
                },
            )
        } else {
            match outcome {
                Ok(payload) => {
                    let cached = self.store_result(request, &payload);
                    (
                        JobStatus::Completed,
                        JobUpdate::with_result(payload.summary()),
                        JobEvent::Completed {
                            job_id: task.job_id.clone(),
                            cached,
                        },
                    )
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(
                        job_id = %task.job_id,
                        path = %task.path.display(),
                        error = %message,
                        "job failed"
                    );
                    (
                        JobStatus::Failed,
                        JobUpdate::with_error(message.clone()),
                        JobEvent::Failed {
                            job_id: task.job_id.clone(),
                            message,
                        },
                    )
                }
            }
        };

        if let Err(e) = self.jobs.transition(&task.job_id, status, update) {
            error!(job_id = %task.job_id, error = %e, "could not record job outcome");
        }
        debug!(job_id = %task.job_id, status = %status, "job finished");

        self.bus.publish(Event::Job(event));
        self.promote(&mut state);
        self.publish_snapshot(&state);
        self.finished.notify_all();
    }

    /// Fold one progress report into the live job info
    fn apply_progress(&self, progress: JobProgress) {
        let persist = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            // Reports that arrive after the job finished are dropped
            let Some(job) = state
                .running
                .iter_mut()
                .find(|job| job.info.job_id == progress.job_id)
            else {
                return;
            };

            let percentage = progress.percentage.max(job.info.progress);
            let advanced = percentage > job.info.progress;
            job.info.progress = percentage;
            job.info.current = Some(progress.current);
            job.info.total = Some(progress.total);
            if progress.stage.is_some() {
                job.info.stage = progress.stage.clone();
            }

            self.bus.publish(Event::Job(JobEvent::Progress(JobProgress {
                percentage,
                ..progress.clone()
            })));

            advanced.then_some(percentage)
        };

        if let Some(percentage) = persist {
            if let Err(e) = self.jobs.record_progress(&progress.job_id, percentage) {
                warn!(job_id = %progress.job_id, error = %e, "could not persist progress");
            }
        }
    }
}

/// Progress dispatcher loop
///
/// Holds only a weak handle so it never keeps the queue alive; it exits
/// once every reporter and the queue itself are gone.
fn dispatch_progress(shared: Weak<QueueShared>, receiver: Receiver<JobProgress>) {
    for progress in receiver.iter() {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.apply_progress(progress);
    }
    debug!("progress dispatcher stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
