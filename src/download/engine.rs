//! Fetch coordinator: a bounded worker pool plus a sequential recovery pass.
//!
//! This module provides the `FetchCoordinator` which downloads every segment
//! of a [`DownloadJob`] concurrently, re-fetches the failures one by one,
//! applies the job's [`GapPolicy`] and hands the artifacts to the
//! [`Reassembler`].
//!
//! # Overview
//!
//! 1. Phase 1 spawns one task per segment on a `JoinSet`. A `Semaphore`
//!    with `max_workers` permits caps how many are in flight; results are
//!    collected as they complete, in any order.
//! 2. Phase 2 retries each failed index, ascending, on the calling task
//!    with the same retry policy.
//! 3. Remaining gaps either fail the job (default) or are written around
//!    and reported.
//!
//! # Example
//!
//! ```no_run
//! use segment_fetch::download::{DownloadJob, FetchCoordinator, HttpClient, RateLimiter, Segment};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(100)));
//! let coordinator = FetchCoordinator::new(HttpClient::new(), rate_limiter);
//! let segments = Segment::enumerate([
//!     "https://cdn.example.com/seg0.ts",
//!     "https://cdn.example.com/seg1.ts",
//! ]);
//! let report = coordinator.run(&DownloadJob::new(segments, "./out/Intro.mp4")).await?;
//! println!("wrote {} bytes, {} rate-limit hits", report.bytes_written, report.rate_limit_hits);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::fetcher::{FetchStats, SegmentFetcher};
use super::rate_limiter::RateLimiter;
use super::reassemble::{Reassembler, ReassemblyError};
use super::retry::RetryPolicy;
use super::segment::{DownloadJob, FetchOutcome, GapPolicy, Segment, SegmentArtifact};
use super::{DownloadError, HttpClient};

/// Minimum allowed worker count.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed worker count.
const MAX_CONCURRENCY: usize = 100;

/// Error type for coordinator runs.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid worker count provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The job allows zero attempts per segment.
    #[error("invalid retry count {value}: must be at least 1")]
    InvalidRetries {
        /// The invalid value that was provided.
        value: u32,
    },

    /// The job has no segments.
    #[error("download job has no segments")]
    EmptyJob,

    /// Two segments share an index.
    #[error("duplicate segment index {index}")]
    DuplicateSegment {
        /// The repeated index.
        index: usize,
    },

    /// The output path has no file name component.
    #[error("output path {path} has no file name")]
    InvalidOutputPath {
        /// The rejected path.
        path: PathBuf,
    },

    /// Preparing the output or artifact directory failed.
    #[error("IO error preparing {path}: {source}")]
    Io {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A segment hit an error that stops the whole job.
    #[error("segment {index} failed fatally: {source}")]
    Fatal {
        /// Index of the segment that failed.
        index: usize,
        /// The fatal error.
        #[source]
        source: DownloadError,
    },

    /// Some segments were still missing after the recovery pass.
    #[error(
        "{} of {total} segments could not be fetched: {failed_indices:?}",
        .failed_indices.len()
    )]
    IncompleteDownload {
        /// Indices of the missing segments, ascending.
        failed_indices: Vec<usize>,
        /// Number of segments in the job.
        total: usize,
    },

    /// Every segment failed, so there is nothing to write.
    #[error("none of the {total} segments could be fetched")]
    NoSegmentsFetched {
        /// Number of segments in the job.
        total: usize,
    },

    /// The job was cancelled by the caller.
    #[error("download cancelled")]
    Cancelled,

    /// Writing the final output failed.
    #[error("reassembly failed: {0}")]
    Reassembly(#[from] ReassemblyError),
}

/// Summary of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    /// Path of the assembled output.
    pub output_path: PathBuf,
    /// Segments in the job.
    pub total_segments: usize,
    /// Segments present in the output.
    pub succeeded: usize,
    /// Segments that only succeeded in the recovery pass.
    pub recovered: usize,
    /// Segments missing from the output, ascending. Empty unless gaps are allowed.
    pub failed_indices: Vec<usize>,
    /// HTTP requests issued across both passes.
    pub requests: u64,
    /// Retries scheduled across both passes.
    pub retried: u64,
    /// Rate-limit responses observed.
    pub rate_limit_hits: u64,
    /// Size of the output file.
    pub bytes_written: u64,
}

impl DownloadReport {
    /// Returns true when every segment made it into the output.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_indices.is_empty()
    }
}

/// Result of the parallel pass.
struct PassResult {
    artifacts: Vec<SegmentArtifact>,
    failed: Vec<usize>,
}

/// Coordinates concurrent segment fetches for download jobs.
///
/// One coordinator can run many jobs; they share its HTTP connection pool
/// and rate limiter. Each job gets fresh [`FetchStats`].
///
/// # Concurrency Model
///
/// - Each segment runs in its own Tokio task on a `JoinSet`
/// - A task acquires a semaphore permit before fetching (RAII release)
/// - Outcomes are collected with `join_next_with_id`; a panicked task is
///   mapped back to its segment through its task id
/// - A fatal error cancels in-flight tasks and closes the semaphore so
///   queued tasks exit without fetching
#[derive(Debug, Clone)]
pub struct FetchCoordinator {
    client: HttpClient,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
}

impl FetchCoordinator {
    /// Creates a coordinator with the default retry policy.
    #[must_use]
    pub fn new(client: HttpClient, rate_limiter: Arc<RateLimiter>) -> Self {
        debug!(
            rate_limit_ms = rate_limiter.interval().as_millis(),
            "creating fetch coordinator"
        );
        Self {
            client,
            rate_limiter,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy's delays.
    ///
    /// The attempt limit is always taken from each job's `max_retries`.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Runs `job` to completion.
    ///
    /// # Errors
    ///
    /// See [`run_cancellable`](Self::run_cancellable).
    pub async fn run(&self, job: &DownloadJob) -> Result<DownloadReport, EngineError> {
        self.run_cancellable(job, &CancellationToken::new()).await
    }

    /// Runs `job` until it finishes or `cancel` fires.
    ///
    /// Individual segment failures do NOT cause this method to error unless
    /// they survive the recovery pass under [`GapPolicy::Fail`]. No output is
    /// written on error. The artifact directory is removed on every error
    /// except [`EngineError::Reassembly`], which leaves the fetched segments
    /// in [`DownloadJob::artifact_dir`].
    ///
    /// # Errors
    ///
    /// - Validation: [`EngineError::EmptyJob`],
    ///   [`EngineError::DuplicateSegment`],
    ///   [`EngineError::InvalidConcurrency`], [`EngineError::InvalidRetries`],
    ///   [`EngineError::InvalidOutputPath`]
    /// - [`EngineError::Io`] if a directory cannot be created
    /// - [`EngineError::Fatal`] if writing a segment fails
    /// - [`EngineError::IncompleteDownload`] for gaps under [`GapPolicy::Fail`]
    /// - [`EngineError::NoSegmentsFetched`] if every segment failed
    /// - [`EngineError::Cancelled`] if `cancel` fired
    /// - [`EngineError::Reassembly`] if the output cannot be written
    #[instrument(
        skip(self, job, cancel),
        fields(segments = job.segments.len(), output = %job.output_path.display())
    )]
    pub async fn run_cancellable(
        &self,
        job: &DownloadJob,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, EngineError> {
        let segments = validate(job)?;
        let artifact_dir = job.artifact_dir();
        prepare_dirs(&job.output_path, &artifact_dir).await?;

        let fetcher = SegmentFetcher::new(
            self.client.clone(),
            Arc::clone(&self.rate_limiter),
            self.retry_policy.limited_to(job.max_retries),
            Arc::new(FetchStats::new()),
        );

        info!(
            workers = job.max_workers,
            max_retries = job.max_retries,
            gap_policy = ?job.gap_policy,
            "starting download job"
        );

        let job_token = cancel.child_token();
        let result =
            fetch_and_assemble(job, &segments, &fetcher, &artifact_dir, &job_token).await;

        match result {
            Ok(report) => {
                info!(
                    succeeded = report.succeeded,
                    recovered = report.recovered,
                    failed = report.failed_indices.len(),
                    retried = report.retried,
                    rate_limit_hits = report.rate_limit_hits,
                    bytes = report.bytes_written,
                    "download job complete"
                );
                remove_artifact_dir(&artifact_dir).await;
                Ok(report)
            }
            Err(EngineError::Reassembly(error)) => {
                // Every segment is on disk; only the final write failed.
                warn!(
                    error = %error,
                    dir = %artifact_dir.display(),
                    "reassembly failed, keeping segment artifacts"
                );
                Err(EngineError::Reassembly(error))
            }
            Err(error) => {
                job_token.cancel();
                remove_artifact_dir(&artifact_dir).await;
                if cancel.is_cancelled() {
                    info!("download job cancelled");
                    return Err(EngineError::Cancelled);
                }
                warn!(error = %error, "download job failed");
                Err(error)
            }
        }
    }
}

/// Runs both passes, applies the gap policy and writes the output.
async fn fetch_and_assemble(
    job: &DownloadJob,
    segments: &BTreeMap<usize, Segment>,
    fetcher: &SegmentFetcher,
    artifact_dir: &Path,
    token: &CancellationToken,
) -> Result<DownloadReport, EngineError> {
    let total = segments.len();
    let PassResult {
        mut artifacts,
        mut failed,
    } = parallel_pass(segments, job.max_workers, fetcher, artifact_dir, token).await?;

    debug!(
        fetched = artifacts.len(),
        failed = failed.len(),
        "parallel pass finished"
    );

    failed.sort_unstable();
    let mut recovered = 0;
    let mut still_failed = Vec::new();
    for index in failed {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let Some(segment) = segments.get(&index) else {
            continue;
        };

        info!(index, "recovery fetch");
        match fetcher.fetch(segment, artifact_dir, token).await {
            FetchOutcome::Success(artifact) => {
                recovered += 1;
                artifacts.push(artifact);
            }
            FetchOutcome::Failure(failure) => match failure.error {
                DownloadError::Cancelled { .. } => return Err(EngineError::Cancelled),
                error if error.is_fatal() => {
                    return Err(EngineError::Fatal { index, source: error });
                }
                error => {
                    warn!(index, attempts = failure.attempts, error = %error, "segment unrecoverable");
                    still_failed.push(index);
                }
            },
        }
    }

    if artifacts.is_empty() {
        return Err(EngineError::NoSegmentsFetched { total });
    }
    if !still_failed.is_empty() {
        match job.gap_policy {
            GapPolicy::Fail => {
                return Err(EngineError::IncompleteDownload {
                    failed_indices: still_failed,
                    total,
                });
            }
            GapPolicy::Allow => {
                warn!(
                    missing = still_failed.len(),
                    indices = ?still_failed,
                    "writing output with missing segments"
                );
            }
        }
    }

    let succeeded = artifacts.len();
    let bytes_written = Reassembler::combine(artifacts, &job.output_path).await?;
    let stats = fetcher.stats();
    Ok(DownloadReport {
        output_path: job.output_path.clone(),
        total_segments: total,
        succeeded,
        recovered,
        failed_indices: still_failed,
        requests: stats.attempts(),
        retried: stats.retried(),
        rate_limit_hits: stats.rate_limit_hits(),
        bytes_written,
    })
}

/// Checks the job and indexes its segments.
fn validate(job: &DownloadJob) -> Result<BTreeMap<usize, Segment>, EngineError> {
    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&job.max_workers) {
        return Err(EngineError::InvalidConcurrency {
            value: job.max_workers,
        });
    }
    if job.max_retries == 0 {
        return Err(EngineError::InvalidRetries {
            value: job.max_retries,
        });
    }
    if job.output_path.file_name().is_none() {
        return Err(EngineError::InvalidOutputPath {
            path: job.output_path.clone(),
        });
    }
    if job.segments.is_empty() {
        return Err(EngineError::EmptyJob);
    }

    let mut segments = BTreeMap::new();
    for segment in &job.segments {
        if segments.insert(segment.index, segment.clone()).is_some() {
            return Err(EngineError::DuplicateSegment {
                index: segment.index,
            });
        }
    }
    Ok(segments)
}

/// Creates the output directory and a fresh, empty artifact directory.
///
/// Leftovers from an interrupted earlier run of the same output are removed.
async fn prepare_dirs(output_path: &Path, artifact_dir: &Path) -> Result<(), EngineError> {
    match tokio::fs::remove_dir_all(artifact_dir).await {
        Ok(()) => debug!(dir = %artifact_dir.display(), "removed stale artifact directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(EngineError::Io {
                path: artifact_dir.to_path_buf(),
                source,
            });
        }
    }
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| EngineError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::create_dir_all(artifact_dir)
        .await
        .map_err(|source| EngineError::Io {
            path: artifact_dir.to_path_buf(),
            source,
        })
}

async fn remove_artifact_dir(artifact_dir: &Path) {
    match tokio::fs::remove_dir_all(artifact_dir).await {
        Ok(()) => debug!(dir = %artifact_dir.display(), "removed artifact directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(dir = %artifact_dir.display(), error = %e, "failed to remove artifact directory");
        }
    }
}

/// Fetches every segment with at most `max_workers` in flight.
///
/// Returns the artifacts and the indices that failed. Fails fast on a fatal
/// error or cancellation.
async fn parallel_pass(
    segments: &BTreeMap<usize, Segment>,
    max_workers: usize,
    fetcher: &SegmentFetcher,
    artifact_dir: &Path,
    token: &CancellationToken,
) -> Result<PassResult, EngineError> {
    let semaphore = Arc::new(Semaphore::new(max_workers));
    let mut tasks = JoinSet::new();
    let mut task_index = HashMap::with_capacity(segments.len());

    for segment in segments.values() {
        let semaphore = Arc::clone(&semaphore);
        let fetcher = fetcher.clone();
        let artifact_dir = artifact_dir.to_path_buf();
        let token = token.clone();
        let segment = segment.clone();
        let index = segment.index;

        let handle = tasks.spawn(async move {
            // Closed only when the job is aborting.
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return FetchOutcome::failure(
                    segment.index,
                    0,
                    DownloadError::cancelled(&segment.url),
                );
            };
            fetcher.fetch(&segment, &artifact_dir, &token).await
        });
        task_index.insert(handle.id(), index);
    }

    debug!(task_count = tasks.len(), "waiting for segment fetches");

    let mut artifacts = Vec::with_capacity(segments.len());
    let mut failed = Vec::new();
    let mut fatal: Option<(usize, DownloadError)> = None;

    while let Some(joined) = tasks.join_next_with_id().await {
        let outcome = match joined {
            Ok((_, outcome)) => outcome,
            Err(join_error) => {
                let index = task_index.get(&join_error.id()).copied();
                warn!(?index, error = %join_error, "segment task panicked");
                if let Some(index) = index {
                    failed.push(index);
                }
                continue;
            }
        };

        match outcome {
            FetchOutcome::Success(artifact) => artifacts.push(artifact),
            FetchOutcome::Failure(failure) => match failure.error {
                DownloadError::Cancelled { .. } => {}
                error if error.is_fatal() => {
                    if fatal.is_none() {
                        warn!(index = failure.index, error = %error, "fatal segment error, aborting job");
                        token.cancel();
                        semaphore.close();
                        fatal = Some((failure.index, error));
                    }
                }
                error => {
                    warn!(
                        index = failure.index,
                        attempts = failure.attempts,
                        error = %error,
                        "segment failed, queued for recovery"
                    );
                    failed.push(failure.index);
                }
            },
        }
    }

    if let Some((index, source)) = fatal {
        return Err(EngineError::Fatal { index, source });
    }
    if token.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    Ok(PassResult { artifacts, failed })
}
