//! Segment lists from playlists.
//!
//! A playlist is UTF-8 text with one entry per line. Lines that start with
//! `http://` or `https://` after trimming are segment URLs, in order;
//! everything else (tags, comments, blank lines) is ignored.
//!
//! # Example
//!
//! ```
//! use segment_fetch::playlist::parse_playlist;
//!
//! let urls = parse_playlist("#EXTM3U\n#EXTINF:4.0,\nhttps://cdn.example.com/seg0.ts\n");
//! assert_eq!(urls, vec!["https://cdn.example.com/seg0.ts"]);
//! ```

mod error;

pub use error::PlaylistError;

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::download::{HttpClient, Segment};

/// File extension of discoverable playlists.
const PLAYLIST_EXTENSION: &str = "m3u8";

/// Extracts segment URLs from playlist text, in order.
#[must_use]
pub fn parse_playlist(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(ToString::to_string)
        .collect()
}

/// Finds the playlist to use in `dir`.
///
/// Returns the first `.m3u8` file by name, so the choice is stable when
/// several exist.
///
/// # Errors
///
/// Returns [`PlaylistError::Read`] if `dir` cannot be listed and
/// [`PlaylistError::NotFound`] if it holds no playlist.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn discover(dir: &Path) -> Result<PathBuf, PlaylistError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PlaylistError::read(dir, e))?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PlaylistError::read(dir, e))?
    {
        let path = entry.path();
        let is_playlist = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(PLAYLIST_EXTENSION));
        if !is_playlist {
            continue;
        }
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| PlaylistError::read(&path, e))?;
        if file_type.is_file() {
            candidates.push(path);
        }
    }

    candidates.sort();
    debug!(found = candidates.len(), "playlist candidates");
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| PlaylistError::NotFound {
            dir: dir.to_path_buf(),
        })
}

/// Where a segment list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistSource {
    /// A playlist file on disk.
    Local(PathBuf),
    /// A playlist served over HTTP.
    Remote(String),
    /// URLs already extracted by the caller.
    Urls(Vec<String>),
}

impl PlaylistSource {
    /// Uses the playlist discovered in `dir`.
    ///
    /// # Errors
    ///
    /// See [`discover`].
    pub async fn discover(dir: &Path) -> Result<Self, PlaylistError> {
        discover(dir).await.map(Self::Local)
    }

    /// Returns the ordered segments, numbered from 0.
    ///
    /// `client` is only used for [`PlaylistSource::Remote`].
    ///
    /// # Errors
    ///
    /// Returns [`PlaylistError::Read`] or [`PlaylistError::Fetch`] if the
    /// playlist cannot be loaded, and [`PlaylistError::NoSegments`] if it
    /// lists no URLs.
    #[instrument(skip(self, client), fields(source = %self))]
    pub async fn list_segments(&self, client: &HttpClient) -> Result<Vec<Segment>, PlaylistError> {
        let urls = match self {
            Self::Local(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| PlaylistError::read(path, e))?;
                parse_playlist(&text)
            }
            Self::Remote(url) => parse_playlist(&client.fetch_text(url).await?),
            Self::Urls(urls) => urls
                .iter()
                .map(|url| url.trim())
                .filter(|url| !url.is_empty())
                .map(ToString::to_string)
                .collect(),
        };

        if urls.is_empty() {
            return Err(PlaylistError::NoSegments {
                origin: self.to_string(),
            });
        }

        info!(segments = urls.len(), "loaded playlist");
        Ok(Segment::enumerate(urls))
    }
}

impl fmt::Display for PlaylistSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
            Self::Urls(urls) => write!(f, "<{} urls>", urls.len()),
        }
    }
}
