//! # Job Records Module
//!
//! Durable history of every queued unit of work.
//!
//! ## Features
//! - Persistent storage using SQLite
//! - Enforced lifecycle state machine
//! - Monotonic progress
//! - Retention sweep and crash recovery

mod repository;
mod types;

pub use repository::JobRepository;
pub use types::{Job, JobStats, JobStatus, JobType, JobUpdate, RecoveryReport};
