//! # Fingerprint Module
//!
//! Cheap file identity used to decide whether a cached analysis still
//! describes the file on disk.
//!
//! A fingerprint combines:
//! - the file size
//! - the last-modified time (nanosecond precision where the platform has it)
//! - an XXH3-128 digest of the first and last `sample_bytes` of the file
//!
//! The cost is one metadata call plus at most two bounded reads, so
//! fingerprinting a 40 GB remux costs the same as a 4 MB clip.

use crate::error::FingerprintError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::xxh3_128;

/// Default bytes sampled from each end of the file
pub const DEFAULT_SAMPLE_BYTES: u64 = 64 * 1024;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Identity of a file's current content
///
/// Two fingerprints are equal only if size, modification time and sample
/// digest all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub size: u64,
    pub modified_at: SystemTime,
    pub sample_digest: Vec<u8>,
}

impl FileFingerprint {
    /// Stable textual form: `<size>-<mtime nanos>-<hex digest>`
    pub fn to_token(&self) -> String {
        let digest: String = self
            .sample_digest
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        format!("{}-{}-{}", self.size, to_nanos(self.modified_at), digest)
    }

    /// Parse a token produced by [`FileFingerprint::to_token`]
    pub fn parse(token: &str) -> Option<Self> {
        let (size, rest) = token.split_once('-')?;
        // mtime may be negative, so split the digest off the right
        let (nanos, digest) = rest.rsplit_once('-')?;

        // Byte-indexed slicing below needs single-byte characters
        if !digest.is_ascii() || digest.len() % 2 != 0 {
            return None;
        }
        let sample_digest = (0..digest.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&digest[i..i + 2], 16).ok())
            .collect::<Option<Vec<u8>>>()?;

        Some(Self {
            size: size.parse().ok()?,
            modified_at: from_nanos(nanos.parse().ok()?),
            sample_digest,
        })
    }
}

fn to_nanos(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    }
}

fn from_nanos(nanos: i128) -> SystemTime {
    let magnitude = nanos.unsigned_abs();
    let duration = Duration::new(
        (magnitude / NANOS_PER_SEC as u128) as u64,
        (magnitude % NANOS_PER_SEC as u128) as u32,
    );
    if nanos >= 0 {
        UNIX_EPOCH + duration
    } else {
        UNIX_EPOCH - duration
    }
}

/// Computes [`FileFingerprint`]s with a configurable sample size
#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    sample_bytes: u64,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self {
            sample_bytes: DEFAULT_SAMPLE_BYTES,
        }
    }

    /// Bytes read from each end of the file (minimum 1)
    pub fn with_sample_bytes(mut self, sample_bytes: u64) -> Self {
        self.sample_bytes = sample_bytes.max(1);
        self
    }

    pub fn sample_bytes(&self) -> u64 {
        self.sample_bytes
    }

    /// Fingerprint a file
    ///
    /// Missing or unreadable files are errors; callers must not treat them
    /// as an ordinary cache miss.
    pub fn fingerprint(&self, path: &Path) -> Result<FileFingerprint, FingerprintError> {
        let mut file = File::open(path).map_err(|e| io_error(path, e))?;
        let metadata = file.metadata().map_err(|e| io_error(path, e))?;

        if !metadata.is_file() {
            return Err(FingerprintError::NotAFile {
                path: path.to_path_buf(),
            });
        }

        let size = metadata.len();
        let modified_at = metadata.modified().map_err(|e| io_error(path, e))?;

        let head_len = size.min(self.sample_bytes);
        let tail_len = size.saturating_sub(head_len).min(self.sample_bytes);

        let mut sample = Vec::with_capacity((head_len + tail_len) as usize);
        (&mut file)
            .take(head_len)
            .read_to_end(&mut sample)
            .map_err(|e| io_error(path, e))?;

        if tail_len > 0 {
            file.seek(SeekFrom::Start(size - tail_len))
                .map_err(|e| io_error(path, e))?;
            file.take(tail_len)
                .read_to_end(&mut sample)
                .map_err(|e| io_error(path, e))?;
        }

        Ok(FileFingerprint {
            size,
            modified_at,
            sample_digest: xxh3_128(&sample).to_le_bytes().to_vec(),
        })
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint a file with the default sample size
pub fn fingerprint(path: &Path) -> Result<FileFingerprint, FingerprintError> {
    Fingerprinter::new().fingerprint(path)
}

fn io_error(path: &Path, source: std::io::Error) -> FingerprintError {
    match source.kind() {
        ErrorKind::NotFound => FingerprintError::NotFound {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => FingerprintError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => FingerprintError::Io {
            path: path.to_path_buf(),
            source,
        },
    }
}
