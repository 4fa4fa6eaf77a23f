//! # Watcher Module
//!
//! Drops cached analyses as soon as the underlying media changes on disk.
//!
//! Fingerprints already make stale entries miss on the next lookup; the
//! watcher only reclaims those rows early. Raw filesystem notifications are
//! debounced per path so a file being written in many small chunks is
//! invalidated once, after it goes quiet.
//!
//! ## Example
//! ```rust,ignore
//! use media_analyzer::core::watcher::{CacheInvalidator, WatcherConfig};
//!
//! let mut watcher = CacheInvalidator::new(WatcherConfig::default(), cache, bus)?;
//! watcher.watch("/srv/media")?;
//! ```

use crate::core::cache::CacheBackend;
use crate::core::scanner::MediaFilter;
use crate::error::WatcherError;
use crate::events::{Event, EventBus, WatcherEvent};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use notify::event::{AccessKind, AccessMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Watcher options
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period a path needs before it is invalidated
    pub debounce_duration: Duration,
    pub recursive: bool,
    /// Watch dot-files too
    pub include_hidden: bool,
    /// Custom extensions (None = default media set)
    pub extensions: Option<Vec<String>>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
            recursive: true,
            include_hidden: false,
            extensions: None,
        }
    }
}

/// Collapses bursts of notifications into one per path
#[derive(Debug)]
pub(crate) struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Note a change; repeated changes push the deadline back
    pub(crate) fn record(&mut self, path: PathBuf, at: Instant) {
        self.pending.insert(path, at);
    }

    /// Paths that have been quiet for a full window, oldest first
    pub(crate) fn take_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let mut ready: Vec<(PathBuf, Instant)> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= window)
            .map(|(path, last)| (path.clone(), *last))
            .collect();
        ready.sort_by_key(|(_, last)| *last);

        for (path, _) in &ready {
            self.pending.remove(path);
        }
        ready.into_iter().map(|(path, _)| path).collect()
    }

    pub(crate) fn take_all(&mut self) -> Vec<PathBuf> {
        self.pending.drain().map(|(path, _)| path).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Watches folders and invalidates cache entries for media that changes
pub struct CacheInvalidator {
    watcher: RecommendedWatcher,
    config: WatcherConfig,
    bus: EventBus,
    watched_paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl CacheInvalidator {
    /// Start the notification backend and the invalidation thread
    pub fn new(
        config: WatcherConfig,
        cache: Arc<dyn CacheBackend>,
        bus: EventBus,
    ) -> Result<Self, WatcherError> {
        let mut filter = MediaFilter::new().with_hidden(config.include_hidden);
        if let Some(ref extensions) = config.extensions {
            filter = filter.with_extensions(extensions.clone());
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let error_bus = bus.clone();
        let watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => forward_event(event, &filter, &tx),
                Err(e) => error_bus.publish(Event::Watcher(WatcherEvent::Error {
                    message: e.to_string(),
                })),
            },
        )
        .map_err(|e| WatcherError::InitFailed(e.to_string()))?;

        let debounce = config.debounce_duration;
        let worker_bus = bus.clone();
        thread::Builder::new()
            .name("cache-invalidator".to_string())
            .spawn(move || invalidate_loop(rx, debounce, cache, worker_bus))
            .map_err(|e| WatcherError::InitFailed(e.to_string()))?;

        Ok(Self {
            watcher,
            config,
            bus,
            watched_paths: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Start watching a directory
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<(), WatcherError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(WatcherError::PathNotFound(path));
        }

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        self.watcher
            .watch(&path, mode)
            .map_err(|e| WatcherError::WatchFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(path = %path.display(), "Watching for media changes");
        self.bus
            .publish(Event::Watcher(WatcherEvent::Started { path: path.clone() }));
        if let Ok(mut paths) = self.watched_paths.lock() {
            paths.insert(path);
        }

        Ok(())
    }

    /// Stop watching a directory
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<(), WatcherError> {
        let path = path.as_ref();

        self.watcher
            .unwatch(path)
            .map_err(|e| WatcherError::UnwatchFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        self.bus.publish(Event::Watcher(WatcherEvent::Stopped {
            path: path.to_path_buf(),
        }));
        if let Ok(mut paths) = self.watched_paths.lock() {
            paths.remove(path);
        }

        Ok(())
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched_paths
            .lock()
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        self.watched_paths
            .lock()
            .map(|paths| paths.contains(path.as_ref()))
            .unwrap_or(false)
    }
}

/// Whether a notification can change file content or existence
fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        _ => false,
    }
}

fn forward_event(event: notify::Event, filter: &MediaFilter, tx: &Sender<PathBuf>) {
    if !is_relevant(&event.kind) {
        return;
    }
    for path in event.paths {
        if filter.should_include(&path) {
            let _ = tx.send(path);
        }
    }
}

/// Runs until the notify backend drops its sender
fn invalidate_loop(
    rx: Receiver<PathBuf>,
    debounce: Duration,
    cache: Arc<dyn CacheBackend>,
    bus: EventBus,
) {
    let mut debouncer = Debouncer::new(debounce);
    let tick = (debounce / 2).max(Duration::from_millis(10));

    loop {
        match rx.recv_timeout(tick) {
            Ok(path) => debouncer.record(path, Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                for path in debouncer.take_all() {
                    invalidate_path(&path, cache.as_ref(), &bus);
                }
                break;
            }
        }

        if !debouncer.is_empty() {
            for path in debouncer.take_ready(Instant::now()) {
                invalidate_path(&path, cache.as_ref(), &bus);
            }
        }
    }

    tracing::debug!("Cache invalidator stopped");
}

fn invalidate_path(path: &Path, cache: &dyn CacheBackend, bus: &EventBus) {
    match cache.invalidate(path) {
        Ok(entries_removed) => {
            let path = path.to_path_buf();
            let event = if path.exists() {
                WatcherEvent::MediaModified {
                    path,
                    entries_removed,
                }
            } else {
                WatcherEvent::MediaRemoved {
                    path,
                    entries_removed,
                }
            };
            if entries_removed > 0 {
                tracing::debug!(?event, "Invalidated cache entries");
            }
            bus.publish(Event::Watcher(event));
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cache invalidation failed");
            bus.publish(Event::Watcher(WatcherEvent::Error {
                message: format!("{}: {}", path.display(), e),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{AnalysisPayload, BitrateProfile, CacheType, InMemoryCache};
    use crate::core::fingerprint::fingerprint;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use tempfile::TempDir;

    fn invalidator(cache: Arc<dyn CacheBackend>, bus: EventBus) -> CacheInvalidator {
        let config = WatcherConfig {
            debounce_duration: Duration::from_millis(50),
            ..Default::default()
        };
        CacheInvalidator::new(config, cache, bus).unwrap()
    }

    #[test]
    fn config_default() {
        let config = WatcherConfig::default();
        assert_eq!(config.debounce_duration, Duration::from_millis(500));
        assert!(config.recursive);
        assert!(!config.include_hidden);
    }

    #[test]
    fn debouncer_waits_for_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let path = PathBuf::from("/media/a.mp4");

        debouncer.record(path.clone(), start);
        debouncer.record(path.clone(), start + Duration::from_millis(80));

        assert!(debouncer
            .take_ready(start + Duration::from_millis(120))
            .is_empty());
        assert_eq!(
            debouncer.take_ready(start + Duration::from_millis(180)),
            vec![path]
        );
        assert!(debouncer.is_empty());
    }

    #[test]
    fn debouncer_releases_oldest_first() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        debouncer.record(PathBuf::from("/b.mkv"), start + Duration::from_millis(5));
        debouncer.record(PathBuf::from("/a.mkv"), start);

        let ready = debouncer.take_ready(start + Duration::from_secs(1));
        assert_eq!(ready, [PathBuf::from("/a.mkv"), PathBuf::from("/b.mkv")]);
    }

    #[test]
    fn only_content_changes_are_relevant() {
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_relevant(&EventKind::Remove(RemoveKind::File)));
        assert!(is_relevant(&EventKind::Access(AccessKind::Close(
            AccessMode::Write
        ))));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Read)));
        assert!(!is_relevant(&EventKind::Any));
    }

    #[test]
    fn forward_event_filters_non_media() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/m/clip.mp4"))
            .add_path(PathBuf::from("/m/notes.txt"));

        forward_event(event, &MediaFilter::new(), &tx);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), [PathBuf::from("/m/clip.mp4")]);
    }

    #[test]
    fn invalidate_path_reports_removed_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone.mp4");
        std::fs::write(&path, b"media").unwrap();
        let fp = fingerprint(&path).unwrap();

        let cache = InMemoryCache::new();
        let payload = AnalysisPayload::Bitrate(BitrateProfile::default());
        cache
            .put(CacheType::Bitrate, &path, &fp, &serde_json::json!({}), &payload, None)
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        let bus = EventBus::new();
        let rx = bus.subscribe();
        invalidate_path(&path, &cache, &bus);

        match rx.try_recv() {
            Some(Event::Watcher(WatcherEvent::MediaRemoved {
                entries_removed, ..
            })) => assert_eq!(entries_removed, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn watch_rejects_missing_path() {
        let mut watcher = invalidator(Arc::new(InMemoryCache::new()), EventBus::new());
        let result = watcher.watch("/nonexistent/path/that/doesnt/exist");
        assert!(matches!(result, Err(WatcherError::PathNotFound(_))));
    }

    #[test]
    fn watch_and_unwatch_track_paths_and_publish() {
        let temp_dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let mut watcher = invalidator(Arc::new(InMemoryCache::new()), bus);

        watcher.watch(temp_dir.path()).unwrap();
        assert!(watcher.is_watching(temp_dir.path()));
        assert_eq!(watcher.watched_paths(), [temp_dir.path().to_path_buf()]);

        watcher.unwatch(temp_dir.path()).unwrap();
        assert!(!watcher.is_watching(temp_dir.path()));

        let names: Vec<_> = rx
            .drain()
            .into_iter()
            .map(|e| match e {
                Event::Watcher(WatcherEvent::Started { .. }) => "started",
                Event::Watcher(WatcherEvent::Stopped { .. }) => "stopped",
                _ => "other",
            })
            .collect();
        assert_eq!(names, ["started", "stopped"]);
    }
}
