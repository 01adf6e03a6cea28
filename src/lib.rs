//! Segment Fetch Library
//!
//! This library downloads segmented media streams: it fetches every chunk
//! listed in a playlist concurrently, survives transient and rate-limit
//! failures, and concatenates the chunks in playlist order into one file.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Rate limiter, segment fetcher, fetch coordinator and reassembler
//! - [`playlist`] - Segment lists from local or remote playlists
//! - [`filename`] - Safe output names from free-form titles

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod filename;
pub mod playlist;
mod user_agent;

// Re-export commonly used types
pub use download::{
    ClientOptions, DEFAULT_MAX_RETRIES, DEFAULT_MAX_WORKERS, DownloadError, DownloadJob,
    DownloadReport, EngineError, FetchCoordinator, GapPolicy, HttpClient, RateLimiter,
    RetryPolicy, Segment,
};
pub use filename::sanitize_filename;
pub use playlist::{PlaylistError, PlaylistSource, discover, parse_playlist};
pub use user_agent::BROWSER_USER_AGENT;
