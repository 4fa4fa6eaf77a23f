//! Service configuration.

use crate::core::cache::DEFAULT_BATCH_SIZE;
use crate::core::fingerprint::DEFAULT_SAMPLE_BYTES;
use crate::core::queue::{QueueConfig, DEFAULT_MAX_PARALLEL};
use crate::error::AnalyzerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of days finished job records are kept
pub const DEFAULT_JOB_RETENTION_DAYS: u32 = 30;

const APP_DIR: &str = "media-analyzer";

/// Everything needed to open an [`AnalysisService`](super::AnalysisService)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// SQLite database for cached analyses
    pub cache_db: PathBuf,
    /// SQLite database for job records
    pub jobs_db: PathBuf,
    pub max_parallel: usize,
    pub max_queued: Option<usize>,
    /// Cache entry lifetime in seconds; entries never expire when unset
    pub cache_ttl_secs: Option<u64>,
    /// Point rows per INSERT
    pub batch_size: usize,
    /// Bytes sampled from each end of a file when fingerprinting
    pub sample_bytes: u64,
    pub job_retention_days: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let dir = default_data_dir();
        Self {
            cache_db: dir.join("cache.db"),
            jobs_db: dir.join("jobs.db"),
            max_parallel: DEFAULT_MAX_PARALLEL,
            max_queued: None,
            cache_ttl_secs: None,
            batch_size: DEFAULT_BATCH_SIZE,
            sample_bytes: DEFAULT_SAMPLE_BYTES,
            job_retention_days: DEFAULT_JOB_RETENTION_DAYS,
        }
    }
}

/// Per-user data directory, falling back to the working directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::new()
    }

    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, AnalyzerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AnalyzerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            AnalyzerError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), AnalyzerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AnalyzerError::Config(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| AnalyzerError::Config(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| AnalyzerError::Config(format!("cannot write {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<(), AnalyzerError> {
        if self.max_parallel == 0 {
            return Err(AnalyzerError::Config("max_parallel must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(AnalyzerError::Config("batch_size must be at least 1".to_string()));
        }
        if self.sample_bytes == 0 {
            return Err(AnalyzerError::Config("sample_bytes must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_parallel: self.max_parallel,
            max_queued: self.max_queued,
            cache_ttl: self.cache_ttl(),
        }
    }
}

/// Builder for [`ServiceConfig`]
#[derive(Debug, Clone, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config, e.g. one loaded from disk
    pub fn from_config(config: ServiceConfig) -> Self {
        Self { config }
    }

    /// Put both databases in one directory
    pub fn data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.config.cache_db = dir.join("cache.db");
        self.config.jobs_db = dir.join("jobs.db");
        self
    }

    pub fn cache_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_db = path.into();
        self
    }

    pub fn jobs_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.jobs_db = path.into();
        self
    }

    /// Running slots (minimum 1)
    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.config.max_parallel = max_parallel.max(1);
        self
    }

    pub fn max_queued(mut self, max_queued: Option<usize>) -> Self {
        self.config.max_queued = max_queued;
        self
    }

    pub fn cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.cache_ttl_secs = ttl.map(|t| t.as_secs());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size.max(1);
        self
    }

    pub fn sample_bytes(mut self, sample_bytes: u64) -> Self {
        self.config.sample_bytes = sample_bytes.max(1);
        self
    }

    pub fn job_retention_days(mut self, days: u32) -> Self {
        self.config.job_retention_days = days;
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.sample_bytes, 64 * 1024);
        assert_eq!(config.job_retention_days, 30);
        assert!(config.cache_ttl().is_none());
        assert!(config.cache_db.ends_with("media-analyzer/cache.db"));
    }

    #[test]
    fn builder_clamps_and_sets() {
        let config = ServiceConfig::builder()
            .data_dir("/tmp/analyzer")
            .max_parallel(0)
            .max_queued(Some(10))
            .cache_ttl(Some(Duration::from_secs(3600)))
            .batch_size(0)
            .build();

        assert_eq!(config.cache_db, PathBuf::from("/tmp/analyzer/cache.db"));
        assert_eq!(config.jobs_db, PathBuf::from("/tmp/analyzer/jobs.db"));
        assert_eq!(config.max_parallel, 1);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.queue_config().max_queued, Some(10));
        assert_eq!(config.queue_config().cache_ttl, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.json");
        let config = ServiceConfig::builder()
            .data_dir(temp_dir.path())
            .max_parallel(4)
            .build();

        config.save(&path).unwrap();
        assert_eq!(ServiceConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_parallel": 3 }"#).unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn invalid_file_is_a_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_parallel": 0 }"#).unwrap();

        assert!(matches!(
            ServiceConfig::load(&path),
            Err(AnalyzerError::Config(_))
        ));
        assert!(ServiceConfig::load(&temp_dir.path().join("missing.json")).is_err());
    }
}
