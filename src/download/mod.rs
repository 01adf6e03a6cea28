//! Segment download engine.
//!
//! This module fetches the chunks of a segmented stream concurrently and
//! reassembles them, in order, into one output file.
//!
//! # Features
//!
//! - Bounded worker pool with a sequential recovery pass
//! - Shared pacing with global penalties on HTTP 429
//! - Per-segment retry with exponential backoff and jitter
//! - Streaming writes through temporary files, renamed into place
//! - Cooperative cancellation via `CancellationToken`
//!
//! # Example
//!
//! ```no_run
//! use segment_fetch::download::{DownloadJob, FetchCoordinator, GapPolicy, HttpClient, RateLimiter, Segment};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = FetchCoordinator::new(
//!     HttpClient::new(),
//!     Arc::new(RateLimiter::new(Duration::from_millis(100))),
//! );
//! let job = DownloadJob::new(
//!     Segment::enumerate(["https://cdn.example.com/seg0.ts", "https://cdn.example.com/seg1.ts"]),
//!     "./downloads/Intro.mp4",
//! )
//! .with_gap_policy(GapPolicy::Allow);
//! let report = coordinator.run(&job).await?;
//! println!("missing segments: {:?}", report.failed_indices);
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod fetcher;
pub mod rate_limiter;
mod reassemble;
mod retry;
mod segment;

pub use client::{ClientOptions, HttpClient};
pub use constants::{CONNECT_TIMEOUT_SECS, DEFAULT_RATE_LIMIT, REQUEST_TIMEOUT_SECS};
pub use engine::{DownloadReport, EngineError, FetchCoordinator};
pub use error::DownloadError;
pub use fetcher::{FetchStats, SegmentFetcher};
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use reassemble::{Reassembler, ReassemblyError};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use segment::{
    DEFAULT_MAX_WORKERS, DownloadJob, FetchOutcome, GapPolicy, Segment, SegmentArtifact,
    SegmentFailure, artifact_file_name, artifact_path,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
