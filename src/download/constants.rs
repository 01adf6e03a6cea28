//! Constants for the download module (timeouts, pacing, backoff).

use std::time::Duration;

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout for a single segment (15 seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Default minimum spacing between two request dispatches.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Warning threshold for cumulative server-imposed penalties (30 seconds).
pub const CUMULATIVE_PENALTY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Fixed width of the zero-padded index in segment artifact names.
pub const SEGMENT_INDEX_WIDTH: usize = 5;

/// Extension of segment artifacts.
pub const SEGMENT_EXTENSION: &str = "ts";
