//! Segment, artifact and job types shared by the fetch pipeline.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::DownloadError;
use super::constants::{SEGMENT_EXTENSION, SEGMENT_INDEX_WIDTH};
use super::retry::DEFAULT_MAX_RETRIES;

/// Default number of concurrently in-flight segment fetches.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// One chunk of a media stream.
///
/// The index is 0-based and defines the position of the chunk in the
/// reassembled output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Position in the final output.
    pub index: usize,
    /// Absolute http(s) URL of the chunk.
    pub url: String,
}

impl Segment {
    /// Creates a segment.
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
        }
    }

    /// Numbers `urls` from 0 in iteration order.
    pub fn enumerate<I, S>(urls: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .enumerate()
            .map(|(index, url)| Self::new(index, url))
            .collect()
    }
}

/// Raw bytes fetched for one segment, stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentArtifact {
    /// Index of the segment the bytes belong to.
    pub index: usize,
    /// Location of the bytes.
    pub path: PathBuf,
}

/// Returns the artifact file name for `index`, e.g. `segment_00042.ts`.
///
/// The index is zero-padded to a fixed width so lexicographic and numeric
/// order agree.
#[must_use]
pub fn artifact_file_name(index: usize) -> String {
    format!("segment_{index:0width$}.{SEGMENT_EXTENSION}", width = SEGMENT_INDEX_WIDTH)
}

/// Returns the artifact path for `index` inside `dir`.
#[must_use]
pub fn artifact_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(artifact_file_name(index))
}

/// A segment that could not be fetched.
#[derive(Debug)]
pub struct SegmentFailure {
    /// Index of the failed segment.
    pub index: usize,
    /// Number of attempts made in the pass that produced this failure.
    pub attempts: u32,
    /// Error from the last attempt.
    pub error: DownloadError,
}

/// Result of fetching one segment in one pass.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The segment is on disk.
    Success(SegmentArtifact),
    /// Every allowed attempt failed.
    Failure(SegmentFailure),
}

impl FetchOutcome {
    /// Creates a failure outcome.
    #[must_use]
    pub fn failure(index: usize, attempts: u32, error: DownloadError) -> Self {
        Self::Failure(SegmentFailure {
            index,
            attempts,
            error,
        })
    }

    /// Returns the segment index this outcome belongs to.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Success(artifact) => artifact.index,
            Self::Failure(failure) => failure.index,
        }
    }

    /// Returns true for [`FetchOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// What to do with segments that still fail after the recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Fail the job and write no output.
    #[default]
    Fail,
    /// Write the output without the missing segments and report them.
    Allow,
}

/// A unit of work for the fetch coordinator.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Segments in any order; output order follows their indices.
    pub segments: Vec<Segment>,
    /// Final output file.
    pub output_path: PathBuf,
    /// Maximum concurrently in-flight fetches in the parallel pass.
    pub max_workers: usize,
    /// Attempts per segment per pass.
    pub max_retries: u32,
    /// Handling of unrecoverable segments.
    pub gap_policy: GapPolicy,
}

impl DownloadJob {
    /// Creates a job with default worker, retry and gap settings.
    pub fn new(segments: Vec<Segment>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            segments,
            output_path: output_path.into(),
            max_workers: DEFAULT_MAX_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            gap_policy: GapPolicy::default(),
        }
    }

    /// Sets the worker limit.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the attempts per segment per pass.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the terminal gap policy.
    #[must_use]
    pub fn with_gap_policy(mut self, gap_policy: GapPolicy) -> Self {
        self.gap_policy = gap_policy;
        self
    }

    /// Directory holding this job's segment artifacts.
    ///
    /// A hidden sibling of the output file, e.g. `out/.Intro.mp4.segments`
    /// for `out/Intro.mp4`, so concurrent jobs in one directory never share
    /// artifacts.
    #[must_use]
    pub fn artifact_dir(&self) -> PathBuf {
        let name = self
            .output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.output_path
            .with_file_name(format!(".{name}.segments"))
    }
}
