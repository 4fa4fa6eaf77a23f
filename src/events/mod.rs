//! # Events Module
//!
//! Event-driven reporting for queue state and job progress.
//!
//! ## Design
//! The queue and service publish events on an [`EventBus`], allowing any
//! UI (CLI, GUI, web) to subscribe and display progress.
//!
//! ## Example
//! ```rust,ignore
//! let receiver = service.subscribe();
//!
//! // In a separate thread, listen for events
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         match event {
//!             Event::Queue(QueueEvent::Updated(s)) => println!("{} queued", s.queued.len()),
//!             Event::Job(JobEvent::Progress(p)) => println!("{}: {}%", p.job_id, p.percentage),
//!             _ => {}
//!         }
//!     }
//! });
//! ```

mod channel;
mod types;

pub use channel::{EventBus, EventReceiver};
pub use types::*;
