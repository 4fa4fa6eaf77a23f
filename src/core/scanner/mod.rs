//! # Scanner Module
//!
//! Discovers media files under directories so they can be submitted for
//! analysis in bulk.
//!
//! ## Recognised Containers
//! - Video: mp4, m4v, mkv, mov, avi, webm, flv, wmv, mpg, mpeg, ts, m2ts, mts, 3gp
//! - Audio: mp3, flac, wav, aac, m4a, ogg, opus, wma, aiff
//!
//! ## Example
//! ```rust,ignore
//! use media_analyzer::core::scanner::{MediaScanner, ScanConfig};
//!
//! let scanner = MediaScanner::new(ScanConfig::default());
//! let result = scanner.scan(&["/srv/media".into()]);
//! ```

mod filter;
mod walker;

pub use filter::MediaFilter;
pub use walker::{MediaScanner, ScanConfig};

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// A media file found during a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    pub modified: SystemTime,
    pub kind: MediaKind,
}

/// Broad category of a media container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Unknown,
}

impl MediaKind {
    /// Classify by file extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp4" | "m4v" | "mkv" | "mov" | "avi" | "webm" | "flv" | "wmv" | "mpg" | "mpeg"
            | "ts" | "m2ts" | "mts" | "3gp" => MediaKind::Video,
            "mp3" | "flac" | "wav" | "aac" | "m4a" | "ogg" | "opus" | "wma" | "aiff" => {
                MediaKind::Audio
            }
            _ => MediaKind::Unknown,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, MediaKind::Unknown)
    }
}

/// Result of a scan
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<MediaFile>,
    /// Non-fatal errors hit along the way
    pub errors: Vec<ScanError>,
}

impl ScanResult {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}
