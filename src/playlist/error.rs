//! Error types for playlist loading.

use std::path::PathBuf;

use thiserror::Error;

use crate::download::DownloadError;

/// Errors that can occur while obtaining a segment list.
#[derive(Debug, Error)]
pub enum PlaylistError {
    /// No playlist file in the searched directory.
    #[error(
        "no .m3u8 playlist found in {dir}\n  Suggestion: pass --playlist <FILE> or --playlist-url <URL>"
    )]
    NotFound {
        /// The directory that was searched.
        dir: PathBuf,
    },

    /// The playlist file or directory could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The path that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Fetching a remote playlist failed.
    #[error("failed to fetch playlist: {0}")]
    Fetch(#[from] DownloadError),

    /// The playlist was read but lists no segment URLs.
    #[error(
        "playlist {origin} lists no segment URLs\n  Suggestion: segment lines must be absolute http:// or https:// URLs"
    )]
    NoSegments {
        /// Where the playlist came from.
        origin: String,
    },
}

impl PlaylistError {
    /// Creates a `Read` error.
    #[must_use]
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }
}
