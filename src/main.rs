//! # media-analyzer CLI
//!
//! Command-line front end for the media analysis cache and job queue.
//!
//! ## Usage
//! ```bash
//! media-analyzer analyze ~/Videos --max-parallel 2
//! media-analyzer jobs stats --output json
//! RUST_LOG=media_analyzer=debug media-analyzer analyze clip.mp4
//! ```

mod cli;

use media_analyzer::Result;

fn main() -> Result<()> {
    media_analyzer::init_tracing();
    cli::run()
}
