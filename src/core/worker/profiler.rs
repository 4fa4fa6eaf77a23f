//! Built-in bitrate profiler.
//!
//! Container-agnostic: the file is read in fixed-size windows and each
//! window contributes one data point carrying its payload bitrate (bits
//! in non-zero bytes per second). Zero-filled padding therefore shows up
//! as a dip. Real codec-aware workers plug in through the same trait.
//!
//! Parameters:
//! - `window_bytes`: bytes per window (default 1 MiB)
//! - `duration_seconds`: media duration; without it each window counts
//!   as one second

use super::{AnalysisWorker, WorkerTask};
use crate::core::cache::{AnalysisPayload, BitrateProfile, DataPoint};
use crate::error::WorkerError;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Default bytes per profiling window
pub const DEFAULT_WINDOW_BYTES: u64 = 1024 * 1024;

const READ_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ChunkProfiler {
    window_bytes: u64,
}

impl ChunkProfiler {
    pub fn new() -> Self {
        Self {
            window_bytes: DEFAULT_WINDOW_BYTES,
        }
    }

    pub fn with_window_bytes(mut self, window_bytes: u64) -> Self {
        self.window_bytes = window_bytes.max(1);
        self
    }

    pub fn window_bytes(&self) -> u64 {
        self.window_bytes
    }
}

impl Default for ChunkProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisWorker for ChunkProfiler {
    fn run(&self, task: &WorkerTask) -> Result<AnalysisPayload, WorkerError> {
        let window = task
            .params
            .get("window_bytes")
            .and_then(serde_json::Value::as_u64)
            .filter(|w| *w > 0)
            .unwrap_or(self.window_bytes);
        let duration = task
            .params
            .get("duration_seconds")
            .and_then(serde_json::Value::as_f64)
            .filter(|d| d.is_finite() && *d > 0.0);

        let mut file = File::open(&task.path).map_err(|e| io_error(&task.path, e))?;
        let size = file.metadata().map_err(|e| io_error(&task.path, e))?.len();

        // Media seconds per byte; nominal one second per window otherwise
        let seconds_per_byte = match duration {
            Some(d) if size > 0 => d / size as f64,
            _ => 1.0 / window as f64,
        };

        let mut buffer = vec![0u8; READ_BUFFER_BYTES];
        let mut points = Vec::new();
        let mut offset = 0u64;
        let mut payload_bits = 0u64;

        task.progress.report(0, size, Some("profiling"));

        loop {
            task.cancel.check()?;

            let (read, non_zero) = read_window(&mut file, &mut buffer, window)
                .map_err(|e| io_error(&task.path, e))?;
            if read == 0 {
                break;
            }

            let seconds = read as f64 * seconds_per_byte;
            let bits = non_zero * 8;
            points.push(DataPoint::new(offset as f64 * seconds_per_byte, bits as f64 / seconds));

            offset += read;
            payload_bits += bits;
            task.progress.report(offset, size, Some("profiling"));
        }

        let duration_seconds = offset as f64 * seconds_per_byte;
        let average_bitrate = if duration_seconds > 0.0 {
            payload_bits as f64 / duration_seconds
        } else {
            0.0
        };
        let peak_bitrate = points.iter().map(|p| p.value).fold(0.0, f64::max);

        Ok(AnalysisPayload::Bitrate(BitrateProfile {
            duration_seconds,
            average_bitrate,
            peak_bitrate,
            points,
        }))
    }
}

/// Read up to `window` bytes, returning (bytes read, non-zero bytes)
fn read_window(file: &mut File, buffer: &mut [u8], window: u64) -> std::io::Result<(u64, u64)> {
    let mut limited = file.take(window);
    let mut read = 0u64;
    let mut non_zero = 0u64;

    loop {
        let n = match limited.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        read += n as u64;
        non_zero += buffer[..n].iter().filter(|b| **b != 0).count() as u64;
    }

    Ok((read, non_zero))
}

fn io_error(path: &Path, source: std::io::Error) -> WorkerError {
    WorkerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::JobType;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn task(path: &Path, params: serde_json::Value) -> WorkerTask {
        WorkerTask::standalone(JobType::BitrateAnalysis, path, params)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn profile(payload: AnalysisPayload) -> BitrateProfile {
        match payload {
            AnalysisPayload::Bitrate(profile) => profile,
            other => panic!("Wrong payload kind: {}", other.kind_name()),
        }
    }

    #[test]
    fn one_point_per_window() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.ts");
        fs::write(&path, vec![1u8; 2_500]).unwrap();

        let result = ChunkProfiler::new()
            .run(&task(&path, json!({ "window_bytes": 1_000 })))
            .unwrap();
        let profile = profile(result);

        assert_eq!(profile.points.len(), 3);
        assert_eq!(profile.points[0].timestamp, 0.0);
        assert!(approx(profile.points[1].timestamp, 1.0));
        assert!(approx(profile.points[0].value, 8_000.0));
        assert!(approx(profile.duration_seconds, 2.5));
    }

    #[test]
    fn duration_scales_timestamps() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.ts");
        fs::write(&path, vec![1u8; 4_000]).unwrap();

        let result = ChunkProfiler::new()
            .run(&task(&path, json!({ "window_bytes": 1_000, "duration_seconds": 8.0 })))
            .unwrap();
        let profile = profile(result);

        assert_eq!(profile.points.len(), 4);
        assert!(approx(profile.points[3].timestamp, 6.0));
        // 1000 bytes over 2 seconds
        assert!(approx(profile.points[0].value, 4_000.0));
        assert!(approx(profile.average_bitrate, 4_000.0));
    }

    #[test]
    fn zero_padding_shows_as_a_dip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("padded.mkv");
        let mut content = vec![0xAAu8; 3_000];
        content[1_000..2_000].fill(0);
        fs::write(&path, content).unwrap();

        let profile = profile(
            ChunkProfiler::new()
                .with_window_bytes(1_000)
                .run(&task(&path, json!({})))
                .unwrap(),
        );

        assert_eq!(profile.points[1].value, 0.0);
        assert!(approx(profile.peak_bitrate, 8_000.0));
    }

    #[test]
    fn reports_progress_to_completion() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.ts");
        fs::write(&path, vec![1u8; 10_000]).unwrap();

        let task = task(&path, json!({ "window_bytes": 1_000 }));
        ChunkProfiler::new().run(&task).unwrap();

        assert_eq!(task.progress.percentage(), 100);
    }

    #[test]
    fn cancelled_task_stops() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.ts");
        fs::write(&path, vec![1u8; 1_000]).unwrap();

        let task = task(&path, json!({}));
        task.cancel.cancel();

        assert!(matches!(
            ChunkProfiler::new().run(&task),
            Err(WorkerError::Cancelled)
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = ChunkProfiler::new().run(&task(Path::new("/no/such/file.mp4"), json!({})));
        assert!(matches!(result, Err(WorkerError::Io { .. })));
    }

    #[test]
    fn empty_file_has_no_points() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.mp4");
        fs::write(&path, b"").unwrap();

        let profile = profile(ChunkProfiler::new().run(&task(&path, json!({}))).unwrap());
        assert!(profile.points.is_empty());
        assert_eq!(profile.average_bitrate, 0.0);
    }
}
