//! Retry logic with exponential backoff for segment fetches.
//!
//! A failed attempt is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - may succeed on retry (timeouts, resets, 5xx)
//! - [`FailureType::RateLimited`] - the server asked us to slow down (429)
//! - [`FailureType::Permanent`] - retrying within the same pass will not help
//! - [`FailureType::Fatal`] - local failure that aborts the whole job
//!
//! The [`RetryPolicy`] then decides whether to retry and how long to back off:
//!
//! ```text
//! delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
//! ```
//!
//! With defaults the delays are 1.5s, 3s, 6s, 12s, 24s, 30s, 30s, ...
//! plus 0-200ms of jitter.
//!
//! # Example
//!
//! ```
//! use segment_fetch::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://cdn.example.com/seg1.ts", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts per segment per pass.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default base delay for exponential backoff (1.5 seconds).
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1500);

/// Default maximum delay cap (30 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Maximum jitter added to delays (200ms).
///
/// Keeps tasks woken by the same penalty from re-synchronizing.
const MAX_JITTER: Duration = Duration::from_millis(200);

/// Classification of a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: timeout, connection reset, 408, 5xx.
    Transient,

    /// The server signalled overload (HTTP 429).
    ///
    /// Retried after a shared penalty; counts as an attempt.
    RateLimited,

    /// Failure that won't succeed on an immediate retry.
    ///
    /// Examples: 404 Not Found, 400 Bad Request, invalid URL. The segment
    /// still gets its sequential recovery fetch.
    Permanent,

    /// Local failure (disk, permissions) or cancellation; aborts the job.
    Fatal,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying (backoff plus jitter).
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `base_delay`: 1.5 seconds
/// - `max_delay`: 30 seconds
/// - `backoff_multiplier`: 2.0
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Backoff after the first failed attempt.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::default().limited_to(max_attempts)
    }

    /// Returns a copy of this policy with a different attempt limit.
    #[must_use]
    pub fn limited_to(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self.clone()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Fatal => {
                return RetryDecision::DoNotRetry {
                    reason: "fatal failure - job must stop".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff(attempt) + self.jitter();

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Exponential backoff after `attempt` (1-indexed) failed, without jitter.
    ///
    /// Also used as the rate-limit wait when the server sends no Retry-After.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        if capped_secs.is_finite() && capped_secs >= 0.0 {
            Duration::from_secs_f64(capped_secs)
        } else {
            self.max_delay
        }
    }

    /// Random jitter between 0 and 200ms.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::unused_self)]
    pub fn jitter(&self) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a fetch error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP 429 | RateLimited |
/// | HTTP 408, 5xx | Transient |
/// | other HTTP 4xx | Permanent |
/// | Timeout, Network | Transient |
/// | InvalidUrl, InvalidHeader, ClientBuild | Permanent |
/// | Io, Cancelled | Fatal |
#[must_use]
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. } | DownloadError::Network { .. } => FailureType::Transient,
        DownloadError::InvalidUrl { .. }
        | DownloadError::InvalidHeader { .. }
        | DownloadError::ClientBuild { .. } => FailureType::Permanent,
        DownloadError::Io { .. } | DownloadError::Cancelled { .. } => FailureType::Fatal,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        429 => FailureType::RateLimited, // Too Many Requests
        408 => FailureType::Transient,   // Request Timeout
        400..=499 => FailureType::Permanent,
        500..=599 => FailureType::Transient,
        // Anything else is unexpected for a segment, treat as transient
        _ => FailureType::Transient,
    }
}
