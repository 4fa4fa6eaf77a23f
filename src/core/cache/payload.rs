//! Typed analysis results.
//!
//! Each cache type has its own concrete schema instead of an untyped blob.
//! Large ordered point series are split off and stored as rows by the
//! SQLite backend; the rest of the payload is stored as JSON.

use super::CacheType;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;

/// One sample of a time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Media time in seconds
    pub timestamp: f64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl DataPoint {
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            label: None,
        }
    }

    pub fn labeled(timestamp: f64, value: f64, label: impl Into<String>) -> Self {
        Self {
            timestamp,
            value,
            label: Some(label.into()),
        }
    }
}

/// Result of a full-file bitrate profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BitrateProfile {
    pub duration_seconds: f64,
    /// Bits per second
    pub average_bitrate: f64,
    /// Bits per second
    pub peak_bitrate: f64,
    pub points: Vec<DataPoint>,
}

/// Kind of elementary stream inside a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Other,
}

/// One stream's share of a demuxed file, with its own ordered series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamContribution {
    pub stream_index: u32,
    pub kind: StreamKind,
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub points: Vec<DataPoint>,
}

/// Result of a multi-stream demux inspection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamInspection {
    pub container: String,
    pub duration_seconds: f64,
    pub streams: Vec<StreamContribution>,
}

/// Result of a stream-removal transcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRemovalResult {
    pub output_path: PathBuf,
    pub removed_streams: Vec<u32>,
    pub bytes_written: u64,
}

/// Everything a worker can produce, keyed by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisPayload {
    Bitrate(BitrateProfile),
    Streams(StreamInspection),
    StreamRemoval(StreamRemovalResult),
}

/// Point series detached from a payload, in storage order
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PointSets {
    /// Series owned directly by the entry
    pub root: Vec<DataPoint>,
    /// One series per stream contribution, in stream order
    pub groups: Vec<Vec<DataPoint>>,
}

impl AnalysisPayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bitrate(_) => "bitrate",
            Self::Streams(_) => "streams",
            Self::StreamRemoval(_) => "stream_removal",
        }
    }

    /// Cache table this payload belongs in, if it is cacheable
    pub fn cache_type(&self) -> Option<CacheType> {
        match self {
            Self::Bitrate(_) => Some(CacheType::Bitrate),
            Self::Streams(_) => Some(CacheType::Streams),
            Self::StreamRemoval(_) => None,
        }
    }

    /// Total data points across all series
    pub fn point_count(&self) -> usize {
        match self {
            Self::Bitrate(profile) => profile.points.len(),
            Self::Streams(inspection) => inspection.streams.iter().map(|s| s.points.len()).sum(),
            Self::StreamRemoval(_) => 0,
        }
    }

    /// Sort every series by ascending timestamp, keeping ties in order
    pub fn normalize(&mut self) {
        match self {
            Self::Bitrate(profile) => sort_points(&mut profile.points),
            Self::Streams(inspection) => {
                for stream in &mut inspection.streams {
                    sort_points(&mut stream.points);
                }
            }
            Self::StreamRemoval(_) => {}
        }
    }

    /// Compact description stored on the job record
    ///
    /// Full point series live in the cache; job history only keeps totals.
    pub fn summary(&self) -> serde_json::Value {
        match self {
            Self::Bitrate(profile) => json!({
                "kind": self.kind_name(),
                "duration_seconds": profile.duration_seconds,
                "average_bitrate": profile.average_bitrate,
                "peak_bitrate": profile.peak_bitrate,
                "points": profile.points.len(),
            }),
            Self::Streams(inspection) => json!({
                "kind": self.kind_name(),
                "container": inspection.container,
                "duration_seconds": inspection.duration_seconds,
                "streams": inspection.streams.len(),
                "points": self.point_count(),
            }),
            Self::StreamRemoval(result) => json!({
                "kind": self.kind_name(),
                "output_path": result.output_path,
                "removed_streams": result.removed_streams,
                "bytes_written": result.bytes_written,
            }),
        }
    }

    /// Split the point series off, leaving an otherwise identical shell
    pub(crate) fn detach_points(&self) -> (AnalysisPayload, PointSets) {
        let mut shell = self.clone();
        let mut sets = PointSets::default();
        match &mut shell {
            Self::Bitrate(profile) => {
                sets.root = std::mem::take(&mut profile.points);
            }
            Self::Streams(inspection) => {
                sets.groups = inspection
                    .streams
                    .iter_mut()
                    .map(|stream| std::mem::take(&mut stream.points))
                    .collect();
            }
            Self::StreamRemoval(_) => {}
        }
        (shell, sets)
    }

    /// Inverse of [`AnalysisPayload::detach_points`]
    pub(crate) fn attach_points(&mut self, sets: PointSets) {
        match self {
            Self::Bitrate(profile) => profile.points = sets.root,
            Self::Streams(inspection) => {
                for (stream, points) in inspection.streams.iter_mut().zip(sets.groups) {
                    stream.points = points;
                }
            }
            Self::StreamRemoval(_) => {}
        }
    }
}

fn sort_points(points: &mut [DataPoint]) {
    points.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
}
