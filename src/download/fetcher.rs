//! Single-segment fetch with pacing, retry and global rate-limit penalties.
//!
//! Every attempt first waits for a slot on the shared [`RateLimiter`]. A
//! 429 response penalizes the limiter so every other in-flight fetch slows
//! down too, then the fetch sleeps locally before retrying. Other failures
//! back off exponentially until the attempt budget is spent.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::client::{remove_partial, with_suffix};
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::segment::{FetchOutcome, Segment, SegmentArtifact, artifact_path};
use super::{DownloadError, HttpClient};

/// Counters shared by all fetches of one coordinator run.
///
/// Write-only from the fetchers' point of view; read for reporting.
#[derive(Debug, Default)]
pub struct FetchStats {
    attempts: AtomicU64,
    retried: AtomicU64,
    rate_limit_hits: AtomicU64,
}

impl FetchStats {
    /// Creates a stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of HTTP requests issued.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the number of retries scheduled.
    #[must_use]
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the number of rate-limit responses observed.
    #[must_use]
    pub fn rate_limit_hits(&self) -> u64 {
        self.rate_limit_hits.load(Ordering::SeqCst)
    }

    fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn record_rate_limit_hit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fetches individual segments to disk.
///
/// Cheap to clone: all members are shared handles.
#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: HttpClient,
    rate_limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    stats: Arc<FetchStats>,
}

impl SegmentFetcher {
    /// Creates a fetcher.
    #[must_use]
    pub fn new(
        client: HttpClient,
        rate_limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        stats: Arc<FetchStats>,
    ) -> Self {
        Self {
            client,
            rate_limiter,
            policy,
            stats,
        }
    }

    /// Returns the retry policy applied to each segment.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the shared counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<FetchStats> {
        &self.stats
    }

    /// Fetches `segment` into `artifact_dir`, retrying per the policy.
    ///
    /// Never returns an error directly: every outcome, including
    /// cancellation and local I/O failures, is a [`FetchOutcome`].
    /// Cancellation is checked before each attempt and also interrupts the
    /// pacing wait, the request, and backoff sleeps.
    #[instrument(skip(self, artifact_dir, cancel), fields(index = segment.index, url = %segment.url))]
    pub async fn fetch(
        &self,
        segment: &Segment,
        artifact_dir: &Path,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let destination = artifact_path(artifact_dir, segment.index);
        let cancelled = |attempts| {
            FetchOutcome::failure(segment.index, attempts, DownloadError::cancelled(&segment.url))
        };
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return cancelled(attempt);
            }
            attempt += 1;
            debug!(attempt, "attempting segment fetch");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return cancelled(attempt - 1),
                () = self.rate_limiter.wait() => {}
            }

            self.stats.record_attempt();
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(DownloadError::cancelled(&segment.url)),
                result = self.client.download_to_path(&segment.url, &destination) => result,
            };

            let error = match result {
                Ok(bytes) => {
                    debug!(attempt, bytes, "segment fetched");
                    return FetchOutcome::Success(SegmentArtifact {
                        index: segment.index,
                        path: destination,
                    });
                }
                Err(DownloadError::Cancelled { url }) => {
                    // The request future was dropped mid-write.
                    remove_partial(&with_suffix(&destination, ".part")).await;
                    return FetchOutcome::failure(
                        segment.index,
                        attempt,
                        DownloadError::Cancelled { url },
                    );
                }
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            let rate_limit_wait = (failure_type == FailureType::RateLimited)
                .then(|| self.apply_rate_limit(&error, attempt));

            match self.policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    let delay =
                        rate_limit_wait.map_or(backoff_delay, |wait| wait + self.policy.jitter());

                    info!(
                        attempt = next_attempt,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        rate_limited = rate_limit_wait.is_some(),
                        error = %error,
                        "retrying segment"
                    );
                    self.stats.record_retry();

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return cancelled(attempt),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, %reason, error = %error, "giving up on segment");
                    return FetchOutcome::failure(segment.index, attempt, error);
                }
            }
        }
    }

    /// Records a rate-limit hit and penalizes the shared limiter.
    ///
    /// Returns the wait the server asked for, or the backoff for `attempt`
    /// when it sent no usable Retry-After.
    fn apply_rate_limit(&self, error: &DownloadError, attempt: u32) -> Duration {
        self.stats.record_rate_limit_hit();

        let server_wait = error.retry_after().and_then(parse_retry_after);
        let wait = server_wait.unwrap_or_else(|| self.policy.backoff(attempt));

        debug!(
            wait_ms = wait.as_millis(),
            using_retry_after = server_wait.is_some(),
            "rate limited, penalizing all fetches"
        );
        self.rate_limiter.penalize(wait);
        wait
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fast_fetcher(max_attempts: u32) -> SegmentFetcher {
        SegmentFetcher::new(
            HttpClient::new(),
            Arc::new(RateLimiter::unpaced()),
            RetryPolicy::new(
                max_attempts,
                Duration::from_millis(1),
                Duration::from_millis(5),
                2.0,
            ),
            Arc::new(FetchStats::new()),
        )
    }

    #[test]
    fn test_fetch_stats_default_zero() {
        let stats = FetchStats::new();
        assert_eq!(stats.attempts(), 0);
        assert_eq!(stats.retried(), 0);
        assert_eq!(stats.rate_limit_hits(), 0);
    }

    #[test]
    fn test_apply_rate_limit_prefers_retry_after() {
        let fetcher = fast_fetcher(3);
        let error = DownloadError::http_status_with_retry_after(
            "https://cdn.example.com/seg.ts",
            429,
            Some("2".to_string()),
        );

        let wait = fetcher.apply_rate_limit(&error, 1);

        assert_eq!(wait, Duration::from_secs(2));
        assert_eq!(fetcher.stats().rate_limit_hits(), 1);
    }

    #[test]
    fn test_apply_rate_limit_falls_back_to_backoff() {
        let fetcher = fast_fetcher(3);
        let error = DownloadError::http_status("https://cdn.example.com/seg.ts", 429);

        assert_eq!(fetcher.apply_rate_limit(&error, 1), Duration::from_millis(1));
        assert_eq!(fetcher.apply_rate_limit(&error, 2), Duration::from_millis(2));
        assert_eq!(fetcher.stats().rate_limit_hits(), 2);
    }

    #[tokio::test]
    async fn test_fetch_cancelled_before_start_makes_no_attempt() {
        let fetcher = fast_fetcher(3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dir = tempfile::tempdir().unwrap();

        let outcome = fetcher
            .fetch(
                &Segment::new(0, "https://cdn.example.com/seg.ts"),
                dir.path(),
                &cancel,
            )
            .await;

        let FetchOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.attempts, 0);
        assert!(matches!(failure.error, DownloadError::Cancelled { .. }));
        assert_eq!(fetcher.stats().attempts(), 0);
    }

    #[tokio::test]
    async fn test_fetch_invalid_url_is_not_retried() {
        let fetcher = fast_fetcher(4);
        let dir = tempfile::tempdir().unwrap();

        let outcome = fetcher
            .fetch(
                &Segment::new(2, "not a url"),
                dir.path(),
                &CancellationToken::new(),
            )
            .await;

        let FetchOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.index, 2);
        assert_eq!(failure.attempts, 1);
        assert!(matches!(failure.error, DownloadError::InvalidUrl { .. }));
        assert_eq!(fetcher.stats().retried(), 0);
    }
}
