//! Shared request pacing with server-driven penalties.
//!
//! This module provides the [`RateLimiter`] struct, a single pacing gate
//! shared by every fetch task of a download session. It enforces a minimum
//! spacing between any two request dispatches and can be pushed forward when
//! the remote server signals overload, slowing down *all* tasks instead of
//! only the one that saw the rate-limit response.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use segment_fetch::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_millis(200)));
//!
//! // First request proceeds immediately
//! limiter.wait().await;
//!
//! // Second request waits for the interval
//! limiter.wait().await;
//!
//! // A 429 seen by any task delays every subsequent wait
//! limiter.penalize(Duration::from_secs(5));
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_PENALTY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Session-wide request pacing gate.
///
/// Wrap in `Arc` and hand a clone to every fetch task. The only state shared
/// between tasks is the next-allowed instant, guarded by a `std::sync::Mutex`
/// that is held for timestamp arithmetic only, never across a sleep.
///
/// # Invariant
///
/// The next-allowed instant never moves backwards.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum spacing between two dispatches.
    interval: Duration,

    /// Earliest instant at which the next dispatch may happen.
    next_allowed: Mutex<Instant>,

    /// Sum of all penalties recorded (in milliseconds), for warnings only.
    cumulative_penalty_ms: AtomicU64,
}

impl RateLimiter {
    /// Creates a rate limiter that spaces dispatches by `interval`.
    ///
    /// The first call to [`wait`](Self::wait) proceeds immediately.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis()))]
    pub fn new(interval: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            interval,
            next_allowed: Mutex::new(Instant::now()),
            cumulative_penalty_ms: AtomicU64::new(0),
        }
    }

    /// Creates a rate limiter without pacing.
    ///
    /// Penalties from [`penalize`](Self::penalize) are still honored, so
    /// server overload signals keep propagating to all tasks.
    #[must_use]
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns the configured spacing between dispatches.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the earliest instant at which the next dispatch may happen.
    #[must_use]
    pub fn next_allowed(&self) -> Instant {
        *self.state()
    }

    /// Returns the total penalty time recorded so far.
    #[must_use]
    pub fn cumulative_penalty(&self) -> Duration {
        Duration::from_millis(self.cumulative_penalty_ms.load(Ordering::SeqCst))
    }

    /// Waits for this caller's dispatch slot.
    ///
    /// Claims the next free slot (now, or the shared next-allowed instant if
    /// that is later) and advances the shared instant by one interval before
    /// releasing the lock, so two concurrent callers can never claim the same
    /// slot. The sleep happens after the lock is released.
    pub async fn wait(&self) {
        let delay = {
            let mut next_allowed = self.state();
            let now = Instant::now();
            let slot = (*next_allowed).max(now);
            *next_allowed = slot + self.interval;
            slot - now
        };

        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis(), "pacing request");
            tokio::time::sleep(delay).await;
        }
    }

    /// Pushes the shared next-allowed instant to at least `now + duration`.
    ///
    /// Never moves the instant earlier: a penalty shorter than what is
    /// already scheduled has no effect on pacing.
    #[instrument(skip(self), fields(penalty_ms = duration.as_millis()))]
    pub fn penalize(&self, duration: Duration) {
        let target = Instant::now() + duration;
        {
            let mut next_allowed = self.state();
            if target > *next_allowed {
                *next_allowed = target;
            }
        }

        let cumulative = self.add_cumulative_penalty(duration);
        debug!(
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_PENALTY_WARNING_THRESHOLD {
            warn!(
                cumulative_penalty_secs = cumulative.as_secs(),
                "excessive server rate limiting - consider fewer workers or a larger rate limit"
            );
        }
    }

    fn state(&self) -> MutexGuard<'_, Instant> {
        // Poisoning only means another task panicked mid-arithmetic; the
        // stored instant is still a valid instant.
        self.next_allowed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_penalty(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_penalty_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use segment_fetch::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) if duration > MAX_RETRY_AFTER => {
            warn!(
                delay_secs = duration.as_secs(),
                max_secs = MAX_RETRY_AFTER.as_secs(),
                "Retry-After date exceeds maximum, capping at 1 hour"
            );
            Some(MAX_RETRY_AFTER)
        }
        Ok(duration) => Some(duration),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past");
            Some(Duration::ZERO)
        }
    }
}
