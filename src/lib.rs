//! # Media Analyzer
//!
//! A persistent cache and background job queue for expensive media
//! analyses such as bitrate profiles and stream inspections.
//!
//! ## How it works
//! - Each file is fingerprinted (size, mtime, sampled content hash)
//! - Results are cached per file, analysis type and parameters, and are
//!   only served while the fingerprint still matches
//! - Misses become jobs on a bounded-parallel queue that deduplicates,
//!   reports progress and survives restarts as durable records
//!
//! ## Architecture
//! - `core` - The cache, queue and request path
//! - `events` - Progress and lifecycle events for any front end
//! - `error` - Error types with path and job context

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use crate::core::{AnalysisOutcome, AnalysisService, ServiceConfig};
pub use error::{AnalyzerError, Result};

/// Install a `RUST_LOG`-driven tracing subscriber
///
/// Called by the binary. Calling it again, or after another subscriber is
/// installed, is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
