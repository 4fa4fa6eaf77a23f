//! # Service Module
//!
//! The request path and external surface: fingerprint, consult the cache,
//! and fall back to the job queue.
//!
//! ## Request path
//! 1. Fingerprint the file
//! 2. Look it up in the cache with that fingerprint; a hit returns at once
//! 3. On a miss, submit a job carrying the fingerprint
//! 4. The queue caches the result under that same fingerprint
//!
//! Cache faults degrade to a miss. A file that cannot be fingerprinted is
//! never served from or written to the cache.

mod config;

pub use config::{default_data_dir, ServiceConfig, ServiceConfigBuilder, DEFAULT_JOB_RETENTION_DAYS};

use crate::core::cache::{CacheBackend, CacheEntry, CacheStats, SqliteCache};
use crate::core::fingerprint::{FileFingerprint, Fingerprinter};
use crate::core::jobs::{Job, JobRepository, JobStats, JobType, RecoveryReport};
use crate::core::queue::{JobQueue, JobRequest, RejectReason, SubmitOutcome};
use crate::core::watcher::{CacheInvalidator, WatcherConfig};
use crate::core::worker::WorkerRegistry;
use crate::error::{FingerprintError, Result};
use crate::events::{EventBus, EventReceiver, QueueSnapshot};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened to an analysis request
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// Served from the cache; no job was created
    Cached(CacheEntry),
    /// A job will produce the result
    Queued { job_id: String, deduplicated: bool },
    /// The queue refused the request
    Rejected(RejectReason),
}

impl AnalysisOutcome {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Queued { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

/// Who to cancel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    Job(String),
    Path(PathBuf),
}

/// Rows removed by a clear operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub cache_entries: usize,
    pub jobs: usize,
}

/// Rows removed by a maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Finished jobs older than the retention window
    pub jobs_cleaned: usize,
    /// Cache entries past their expiry
    pub cache_cleaned: usize,
    /// Cache entries whose file no longer exists
    pub orphans_removed: usize,
}

/// Analysis cache and job queue behind one handle
pub struct AnalysisService {
    config: ServiceConfig,
    fingerprinter: Fingerprinter,
    cache: Arc<dyn CacheBackend>,
    jobs: Arc<JobRepository>,
    queue: JobQueue,
    bus: EventBus,
    recovered: RecoveryReport,
}

impl AnalysisService {
    /// Open the databases named in `config` and start the queue
    pub fn open(config: ServiceConfig, workers: WorkerRegistry) -> Result<Self> {
        config.validate()?;
        let cache = SqliteCache::open(&config.cache_db)?.with_batch_size(config.batch_size);
        let jobs = JobRepository::open(&config.jobs_db)?;
        Self::with_backends(config, Arc::new(cache), Arc::new(jobs), workers)
    }

    /// Start the service over caller-supplied stores
    ///
    /// Jobs left pending or running by an earlier process are closed out
    /// before the queue accepts work.
    pub fn with_backends(
        config: ServiceConfig,
        cache: Arc<dyn CacheBackend>,
        jobs: Arc<JobRepository>,
        workers: WorkerRegistry,
    ) -> Result<Self> {
        let recovered = jobs.recover_interrupted()?;
        let bus = EventBus::new();
        let queue = JobQueue::new(
            jobs.clone(),
            cache.clone(),
            workers,
            bus.clone(),
            config.queue_config(),
        )?;

        info!(
            max_parallel = config.max_parallel,
            cache_db = %config.cache_db.display(),
            "analysis service started"
        );

        Ok(Self {
            fingerprinter: Fingerprinter::new().with_sample_bytes(config.sample_bytes),
            config,
            cache,
            jobs,
            queue,
            bus,
            recovered,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Jobs closed out at startup
    pub fn recovered(&self) -> RecoveryReport {
        self.recovered
    }

    /// Serve from the cache or queue a job
    pub fn analyze(
        &self,
        path: &Path,
        job_type: JobType,
        params: &serde_json::Value,
    ) -> Result<AnalysisOutcome> {
        match self.lookup(path, job_type, params)? {
            Lookup::Hit(entry) => Ok(AnalysisOutcome::Cached(entry)),
            Lookup::Miss(fingerprint) => self.submit(path, job_type, params, fingerprint),
        }
    }

    /// Drop every cached result for the file, then analyze it
    pub fn force_reanalyze(
        &self,
        path: &Path,
        job_type: JobType,
        params: &serde_json::Value,
    ) -> Result<AnalysisOutcome> {
        match self.cache.invalidate(path) {
            Ok(removed) => {
                debug!(path = %path.display(), removed, "cache invalidated for reanalysis")
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to invalidate cache"),
        }
        self.analyze(path, job_type, params)
    }

    /// Analyze many files; fingerprints are computed in parallel
    ///
    /// Submissions happen in input order, so queue order matches `paths`.
    pub fn analyze_batch(
        &self,
        paths: &[PathBuf],
        job_type: JobType,
        params: &serde_json::Value,
    ) -> Vec<(PathBuf, Result<AnalysisOutcome>)> {
        let lookups: Vec<Result<Lookup>> = paths
            .par_iter()
            .map(|path| self.lookup(path, job_type, params))
            .collect();

        paths
            .iter()
            .cloned()
            .zip(lookups)
            .map(|(path, lookup)| {
                let outcome = lookup.and_then(|lookup| match lookup {
                    Lookup::Hit(entry) => Ok(AnalysisOutcome::Cached(entry)),
                    Lookup::Miss(fingerprint) => self.submit(&path, job_type, params, fingerprint),
                });
                (path, outcome)
            })
            .collect()
    }

    /// Fingerprint and cache lookup without submitting
    fn lookup(&self, path: &Path, job_type: JobType, params: &serde_json::Value) -> Result<Lookup> {
        let Some(fingerprint) = self.fingerprint_for_request(path)? else {
            return Ok(Lookup::Miss(None));
        };
        if let Some(cache_type) = job_type.cache_type() {
            match self.cache.get(cache_type, path, params, Some(&fingerprint)) {
                Ok(Some(entry)) => {
                    debug!(path = %path.display(), cache_type = %cache_type, "cache hit");
                    return Ok(Lookup::Hit(entry));
                }
                Ok(None) => debug!(path = %path.display(), cache_type = %cache_type, "cache miss"),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "cache lookup failed, treating as miss"
                    )
                }
            }
        }
        Ok(Lookup::Miss(Some(fingerprint)))
    }

    /// `Ok(None)` means the file exists but could not be fingerprinted;
    /// it is analyzed fresh without touching the cache.
    fn fingerprint_for_request(&self, path: &Path) -> Result<Option<FileFingerprint>> {
        match self.fingerprinter.fingerprint(path) {
            Ok(fingerprint) => Ok(Some(fingerprint)),
            Err(e @ (FingerprintError::NotFound { .. } | FingerprintError::NotAFile { .. })) => {
                Err(e.into())
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "fingerprint failed, analyzing without cache"
                );
                Ok(None)
            }
        }
    }

    fn submit(
        &self,
        path: &Path,
        job_type: JobType,
        params: &serde_json::Value,
        fingerprint: Option<FileFingerprint>,
    ) -> Result<AnalysisOutcome> {
        let mut request = JobRequest::new(job_type, path).with_params(params.clone());
        if let Some(fingerprint) = fingerprint {
            request = request.with_fingerprint(fingerprint);
        }

        Ok(match self.queue.submit(request)? {
            SubmitOutcome::Accepted(job_id) => AnalysisOutcome::Queued {
                job_id,
                deduplicated: false,
            },
            SubmitOutcome::Deduplicated(job_id) => AnalysisOutcome::Queued {
                job_id,
                deduplicated: true,
            },
            SubmitOutcome::Rejected(reason) => {
                warn!(path = %path.display(), reason = %reason, "analysis request rejected");
                AnalysisOutcome::Rejected(reason)
            }
        })
    }

    pub fn cancel(&self, target: CancelTarget) -> Result<bool> {
        Ok(match target {
            CancelTarget::Job(id) => self.queue.cancel(&id)?,
            CancelTarget::Path(path) => self.queue.cancel_path(&path)?,
        })
    }

    pub fn cancel_all(&self) -> Result<usize> {
        Ok(self.queue.cancel_all()?)
    }

    pub fn set_max_parallel(&self, max_parallel: usize) -> Result<()> {
        Ok(self.queue.set_max_parallel(max_parallel)?)
    }

    pub fn queue_status(&self) -> Result<QueueSnapshot> {
        Ok(self.queue.snapshot()?)
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.cache.statistics()?)
    }

    pub fn job_stats(&self) -> Result<JobStats> {
        Ok(self.jobs.statistics()?)
    }

    pub fn job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.get(job_id)?)
    }

    pub fn recent_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self.jobs.list_recent(limit)?)
    }

    pub fn jobs_for_path(&self, path: &Path) -> Result<Vec<Job>> {
        Ok(self.jobs.list_by_path(path)?)
    }

    /// Remove a file's cached results (used by the watcher)
    pub fn invalidate(&self, path: &Path) -> Result<usize> {
        Ok(self.cache.invalidate(path)?)
    }

    pub fn clear_cache(&self) -> Result<ClearReport> {
        let cache_entries = self.cache.clear_all()?;
        info!(cache_entries, "cache cleared");
        Ok(ClearReport {
            cache_entries,
            jobs: 0,
        })
    }

    /// Delete finished job records; in-flight jobs are kept
    pub fn clear_jobs(&self) -> Result<ClearReport> {
        Ok(ClearReport {
            cache_entries: 0,
            jobs: self.jobs.delete_all()?,
        })
    }

    pub fn clear_all(&self) -> Result<ClearReport> {
        let cache = self.clear_cache()?;
        let jobs = self.clear_jobs()?;
        Ok(ClearReport {
            cache_entries: cache.cache_entries,
            jobs: jobs.jobs,
        })
    }

    /// Sweep old job records and expired or orphaned cache entries
    pub fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let report = MaintenanceReport {
            jobs_cleaned: self.jobs.sweep_older_than(self.config.job_retention_days)?,
            cache_cleaned: self.cache.sweep_expired()?,
            orphans_removed: self.cache.prune_orphans()?,
        };
        info!(
            jobs_cleaned = report.jobs_cleaned,
            cache_cleaned = report.cache_cleaned,
            orphans_removed = report.orphans_removed,
            "maintenance finished"
        );
        Ok(report)
    }

    /// Receive queue and job events from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    /// Bus shared with the queue, for extra publishers like the watcher
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Build a watcher that invalidates this service's cache and publishes
    /// on its bus. Call `watch` on the result for each folder.
    pub fn invalidator(&self, config: WatcherConfig) -> Result<CacheInvalidator> {
        Ok(CacheInvalidator::new(config, self.cache.clone(), self.bus.clone())?)
    }

    /// Block until a job is terminal
    pub fn wait_for(&self, job_id: &str, timeout: Duration) -> Result<Job> {
        Ok(self.queue.wait_for(job_id, timeout)?)
    }

    /// Stop accepting requests and cancel everything in flight
    pub fn shutdown(&self) -> Result<usize> {
        Ok(self.queue.shutdown()?)
    }
}

enum Lookup {
    Hit(CacheEntry),
    Miss(Option<FileFingerprint>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{AnalysisPayload, BitrateProfile, CacheType, DataPoint, InMemoryCache};
    use crate::core::jobs::{JobStatus, JobUpdate};
    use crate::core::worker::WorkerTask;
    use crate::error::{AnalyzerError, WorkerError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::fs;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    fn counting_registry(runs: Arc<AtomicUsize>) -> WorkerRegistry {
        WorkerRegistry::new().with(
            JobType::BitrateAnalysis,
            move |_: &WorkerTask| -> std::result::Result<AnalysisPayload, WorkerError> {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(AnalysisPayload::Bitrate(BitrateProfile {
                    points: vec![DataPoint::new(0.0, 1.0), DataPoint::new(1.0, 2.0)],
                    ..BitrateProfile::default()
                }))
            },
        )
    }

    fn service(temp_dir: &TempDir, workers: WorkerRegistry) -> AnalysisService {
        let config = ServiceConfig::builder().data_dir(temp_dir.path()).build();
        AnalysisService::open(config, workers).unwrap()
    }

    fn queued(outcome: AnalysisOutcome) -> String {
        match outcome {
            AnalysisOutcome::Queued { job_id, .. } => job_id,
            other => panic!("Expected a queued job, got {:?}", other),
        }
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let temp_dir = TempDir::new().unwrap();
        let media = temp_dir.path().join("video.mp4");
        fs::write(&media, b"frames").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let service = service(&temp_dir, counting_registry(runs.clone()));

        let id = queued(service.analyze(&media, JobType::BitrateAnalysis, &json!({})).unwrap());
        assert_eq!(service.wait_for(&id, WAIT).unwrap().status, JobStatus::Completed);

        let outcome = service.analyze(&media, JobType::BitrateAnalysis, &json!({})).unwrap();
        assert!(outcome.is_cached());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(service.job_stats().unwrap().total, 1);
    }

    #[test]
    fn force_reanalyze_skips_the_cache() {
        let temp_dir = TempDir::new().unwrap();
        let media = temp_dir.path().join("video.mp4");
        fs::write(&media, b"frames").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let service = service(&temp_dir, counting_registry(runs.clone()));

        let id = queued(service.analyze(&media, JobType::BitrateAnalysis, &json!({})).unwrap());
        service.wait_for(&id, WAIT).unwrap();

        let id = queued(
            service
                .force_reanalyze(&media, JobType::BitrateAnalysis, &json!({}))
                .unwrap(),
        );
        service.wait_for(&id, WAIT).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_file_fails_without_touching_cache() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, counting_registry(Arc::new(AtomicUsize::new(0))));

        let result = service.analyze(
            &temp_dir.path().join("gone.mp4"),
            JobType::BitrateAnalysis,
            &json!({}),
        );

        assert!(matches!(result, Err(AnalyzerError::Fingerprint(_))));
        assert_eq!(service.job_stats().unwrap().total, 0);
    }

    #[test]
    fn cache_faults_degrade_to_a_miss() {
        use crate::error::CacheError;

        struct BrokenCache;

        impl CacheBackend for BrokenCache {
            fn get(
                &self,
                _: CacheType,
                _: &Path,
                _: &serde_json::Value,
                _: Option<&FileFingerprint>,
            ) -> std::result::Result<Option<CacheEntry>, CacheError> {
                Err(CacheError::QueryFailed("disk on fire".to_string()))
            }

            fn put(
                &self,
                _: CacheType,
                _: &Path,
                _: &FileFingerprint,
                _: &serde_json::Value,
                _: &AnalysisPayload,
                _: Option<Duration>,
            ) -> std::result::Result<CacheEntry, CacheError> {
                Err(CacheError::QueryFailed("disk on fire".to_string()))
            }

            fn invalidate(&self, _: &Path) -> std::result::Result<usize, CacheError> {
                Ok(0)
            }

            fn invalidate_type(&self, _: CacheType) -> std::result::Result<usize, CacheError> {
                Ok(0)
            }

            fn clear_all(&self) -> std::result::Result<usize, CacheError> {
                Ok(0)
            }

            fn sweep_expired(&self) -> std::result::Result<usize, CacheError> {
                Ok(0)
            }

            fn statistics(&self) -> std::result::Result<CacheStats, CacheError> {
                Ok(CacheStats::default())
            }

            fn prune_orphans(&self) -> std::result::Result<usize, CacheError> {
                Ok(0)
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let media = temp_dir.path().join("video.mp4");
        fs::write(&media, b"frames").unwrap();
        let service = AnalysisService::with_backends(
            ServiceConfig::default(),
            Arc::new(BrokenCache),
            Arc::new(JobRepository::open_in_memory().unwrap()),
            counting_registry(Arc::new(AtomicUsize::new(0))),
        )
        .unwrap();

        let id = queued(service.analyze(&media, JobType::BitrateAnalysis, &json!({})).unwrap());
        let job = service.wait_for(&id, WAIT).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn batch_preserves_input_order() {
        let temp_dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..8)
            .map(|i| {
                let path = temp_dir.path().join(format!("clip{}.mkv", i));
                fs::write(&path, format!("clip {}", i)).unwrap();
                path
            })
            .collect();
        let mut with_missing = paths.clone();
        with_missing.push(temp_dir.path().join("missing.mkv"));

        let service = service(&temp_dir, counting_registry(Arc::new(AtomicUsize::new(0))));
        service.set_max_parallel(1).unwrap();

        let results = service.analyze_batch(&with_missing, JobType::BitrateAnalysis, &json!({}));

        assert_eq!(results.len(), 9);
        for ((path, outcome), expected) in results.iter().zip(&with_missing) {
            assert_eq!(path, expected);
            if path.ends_with("missing.mkv") {
                assert!(outcome.is_err());
            } else {
                assert!(outcome.as_ref().unwrap().job_id().is_some());
            }
        }
    }

    #[test]
    fn recovers_jobs_from_a_previous_run() {
        let jobs = Arc::new(JobRepository::open_in_memory().unwrap());
        let stale = jobs
            .create(JobType::BitrateAnalysis, Path::new("/v.mp4"), None, &json!({}))
            .unwrap();
        jobs.transition(&stale.id, JobStatus::Running, JobUpdate::default())
            .unwrap();

        let service = AnalysisService::with_backends(
            ServiceConfig::default(),
            Arc::new(InMemoryCache::new()),
            jobs,
            WorkerRegistry::with_defaults(),
        )
        .unwrap();

        assert_eq!(service.recovered().failed, 1);
        assert_eq!(service.job(&stale.id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn clear_and_maintenance_report_counts() {
        let temp_dir = TempDir::new().unwrap();
        let media = temp_dir.path().join("video.mp4");
        fs::write(&media, b"frames").unwrap();
        let service = service(&temp_dir, counting_registry(Arc::new(AtomicUsize::new(0))));

        let id = queued(service.analyze(&media, JobType::BitrateAnalysis, &json!({})).unwrap());
        service.wait_for(&id, WAIT).unwrap();

        assert_eq!(service.cache_stats().unwrap().total_entries, 1);
        assert_eq!(service.run_maintenance().unwrap(), MaintenanceReport::default());

        let report = service.clear_all().unwrap();
        assert_eq!(report, ClearReport { cache_entries: 1, jobs: 1 });
        assert_eq!(service.cache_stats().unwrap().total_entries, 0);
    }

    #[test]
    fn processing_jobs_bypass_the_cache() {
        let temp_dir = TempDir::new().unwrap();
        let media = temp_dir.path().join("video.mkv");
        fs::write(&media, b"frames").unwrap();
        let service = service(&temp_dir, WorkerRegistry::with_defaults());

        let outcome = service
            .analyze(&media, JobType::StreamRemoval, &json!({ "streams": [2] }))
            .unwrap();
        assert!(matches!(
            outcome,
            AnalysisOutcome::Rejected(RejectReason::NoWorker(JobType::StreamRemoval))
        ));
    }
}
