//! Directory walking using walkdir.

use super::filter::{is_hidden, MediaFilter};
use super::{MediaFile, ScanResult};
use crate::error::ScanError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// Scanner options
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Descend into subdirectories
    pub recursive: bool,
    pub follow_symlinks: bool,
    /// Include hidden files and directories
    pub include_hidden: bool,
    /// Maximum directory depth (None = unlimited)
    pub max_depth: Option<usize>,
    /// Custom extensions (None = default media set)
    pub extensions: Option<Vec<String>>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_symlinks: false,
            include_hidden: false,
            max_depth: None,
            extensions: None,
        }
    }
}

/// Finds media files under a set of roots
#[derive(Debug, Clone)]
pub struct MediaScanner {
    config: ScanConfig,
    filter: MediaFilter,
}

impl MediaScanner {
    pub fn new(config: ScanConfig) -> Self {
        let mut filter = MediaFilter::new().with_hidden(config.include_hidden);
        if let Some(ref extensions) = config.extensions {
            filter = filter.with_extensions(extensions.clone());
        }
        Self { config, filter }
    }

    pub fn filter(&self) -> &MediaFilter {
        &self.filter
    }

    /// Scan every root. A root may be a directory or a single file.
    /// Unreadable roots and entries are collected as errors rather than
    /// aborting the scan.
    pub fn scan(&self, roots: &[PathBuf]) -> ScanResult {
        let mut result = ScanResult::default();

        for root in roots {
            if let Err(e) = self.scan_root(root, &mut result) {
                tracing::warn!(path = %root.display(), error = %e, "Skipping scan root");
                result.errors.push(e);
            }
        }

        tracing::debug!(
            files = result.files.len(),
            errors = result.errors.len(),
            "Scan finished"
        );
        result
    }

    fn scan_root(&self, root: &Path, result: &mut ScanResult) -> Result<(), ScanError> {
        let metadata = fs::metadata(root).map_err(|e| classify_io(root, e))?;

        // An explicitly named file is taken as-is, bypassing the filter
        if metadata.is_file() {
            result.files.push(self.media_file(root, &metadata));
            return Ok(());
        }

        let mut walker = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name();
        if !self.config.recursive {
            walker = walker.max_depth(1);
        } else if let Some(depth) = self.config.max_depth {
            walker = walker.max_depth(depth);
        }

        let include_hidden = self.config.include_hidden;
        let entries = walker
            .into_iter()
            .filter_entry(|entry| include_hidden || entry.depth() == 0 || !is_hidden(entry.path()));

        for entry in entries {
            match entry {
                Ok(entry) => self.visit(entry, result),
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    let error = match e.into_io_error() {
                        Some(io) => classify_io(&path, io),
                        None => ScanError::ReadDirectory {
                            path: path.clone(),
                            source: std::io::Error::other("filesystem loop"),
                        },
                    };
                    tracing::debug!(path = %path.display(), error = %error, "Scan entry failed");
                    result.errors.push(error);
                }
            }
        }
        Ok(())
    }

    fn visit(&self, entry: DirEntry, result: &mut ScanResult) {
        // file_type already follows links when follow_symlinks is set
        if !entry.file_type().is_file() {
            return;
        }
        let path = entry.path();
        if !self.filter.should_include(path) {
            return;
        }

        match entry.metadata() {
            Ok(metadata) => result.files.push(self.media_file(path, &metadata)),
            Err(e) => result.errors.push(ScanError::ReadDirectory {
                path: path.to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            }),
        }
    }

    fn media_file(&self, path: &Path, metadata: &fs::Metadata) -> MediaFile {
        MediaFile {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            kind: self.filter.kind_of(path),
        }
    }
}

impl Default for MediaScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

fn classify_io(path: &Path, error: std::io::Error) -> ScanError {
    match error.kind() {
        std::io::ErrorKind::NotFound => ScanError::PathNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ScanError::ReadDirectory {
            path: path.to_path_buf(),
            source: error,
        },
    }
}
