//! HTTP client wrapper for fetching segments and playlists.
//!
//! This module provides the `HttpClient` struct which streams response
//! bodies to disk with a bounded timeout and maps transport failures into
//! [`DownloadError`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER, RETRY_AFTER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// Settings for building an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout for one segment.
    pub request_timeout: Duration,
    /// User-Agent override; defaults to a desktop browser string.
    pub user_agent: Option<String>,
    /// Optional `Referer` header sent with every request.
    pub referer: Option<String>,
    /// Optional `Origin` header sent with every request.
    pub origin: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            user_agent: None,
            referer: None,
            origin: None,
        }
    }
}

/// HTTP client for segment downloads.
///
/// Create once and clone into tasks; clones share the connection pool.
///
/// # Example
///
/// ```no_run
/// use segment_fetch::download::HttpClient;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let bytes = client
///     .download_to_path("https://cdn.example.com/seg0.ts", Path::new("./segment_00000.ts"))
///     .await?;
/// println!("wrote {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts and headers.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_options(&ClientOptions::default())
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a new HTTP client from explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidHeader`] if a configured header value
    /// is not valid, or [`DownloadError::ClientBuild`] if reqwest rejects the
    /// configuration.
    #[instrument(level = "debug", skip(options))]
    pub fn with_options(options: &ClientOptions) -> Result<Self, DownloadError> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, REFERER, "Referer", options.referer.as_deref())?;
        insert_header(&mut headers, ORIGIN, "Origin", options.origin.as_deref())?;

        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(|| user_agent::BROWSER_USER_AGENT.to_string());

        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .gzip(true)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })?;

        debug!(
            request_timeout_secs = options.request_timeout.as_secs(),
            "built HTTP client"
        );
        Ok(Self { client })
    }

    /// Streams the body of `url` into `destination`.
    ///
    /// The body is written to `<destination>.part` and renamed into place
    /// only after every byte has been flushed, so `destination` either holds
    /// the complete body or does not exist. The partial file is removed on
    /// any error.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is invalid or not http(s)
    /// - The request fails (network error, timeout)
    /// - The server returns an error status (4xx, 5xx)
    /// - Writing to disk fails
    #[instrument(skip(self), fields(url = %url, path = %destination.display()))]
    pub async fn download_to_path(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<u64, DownloadError> {
        validate_url(url)?;
        let response = self.send_request(url).await?;

        let part_path = with_suffix(destination, ".part");
        let result = write_response(response, url, &part_path, destination).await;
        if result.is_err() {
            debug!(path = %part_path.display(), "cleaning up partial segment after error");
            remove_partial(&part_path).await;
        }
        result
    }

    /// Fetches `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns the same network and status errors as
    /// [`download_to_path`](Self::download_to_path).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        validate_url(url)?;
        let response = self.send_request(url).await?;
        response
            .text()
            .await
            .map_err(|e| map_transport_error(url, e))
    }

    async fn send_request(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                response.status().as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Returns `path` with `suffix` appended to its file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Deletes a temporary file, logging anything but its absence.
pub(crate) async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial file"),
    }
}

fn validate_url(url: &str) -> Result<(), DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    if matches!(parsed.scheme(), "http" | "https") {
        Ok(())
    } else {
        Err(DownloadError::invalid_url(url))
    }
}

fn map_transport_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

fn insert_header(
    headers: &mut HeaderMap,
    header: HeaderName,
    name: &'static str,
    value: Option<&str>,
) -> Result<(), DownloadError> {
    if let Some(value) = value {
        let value =
            HeaderValue::from_str(value).map_err(|_| DownloadError::InvalidHeader { name })?;
        headers.insert(header, value);
    }
    Ok(())
}

async fn write_response(
    response: reqwest::Response,
    url: &str,
    part_path: &Path,
    destination: &Path,
) -> Result<u64, DownloadError> {
    let file = File::create(part_path)
        .await
        .map_err(|e| DownloadError::io(part_path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| map_transport_error(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(part_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(part_path, e))?;
    drop(writer);

    tokio::fs::rename(part_path, destination)
        .await
        .map_err(|e| DownloadError::io(destination, e))?;

    debug!(bytes = bytes_written, "segment written");
    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_with_suffix_appends_to_file_name() {
        let path = Path::new("/tmp/job/segment_00003.ts");
        assert_eq!(
            with_suffix(path, ".part"),
            PathBuf::from("/tmp/job/segment_00003.ts.part")
        );
    }

    #[tokio::test]
    async fn test_remove_partial_deletes_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("segment_00000.ts.part");
        tokio::fs::write(&part, b"half").await.unwrap();

        remove_partial(&part).await;
        assert!(!part.exists());

        // Already gone: must not panic or error.
        remove_partial(&part).await;
        assert!(!part.exists());
    }

    #[test]
    fn test_validate_url_rejects_non_http_schemes() {
        assert!(validate_url("https://cdn.example.com/a.ts").is_ok());
        assert!(validate_url("http://cdn.example.com/a.ts").is_ok());
        assert!(matches!(
            validate_url("ftp://cdn.example.com/a.ts"),
            Err(DownloadError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_url("segment.ts"),
            Err(DownloadError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_with_options_rejects_invalid_header() {
        let options = ClientOptions {
            referer: Some("https://example.com/\n".to_string()),
            ..ClientOptions::default()
        };
        let result = HttpClient::with_options(&options);
        assert!(matches!(
            result,
            Err(DownloadError::InvalidHeader { name: "Referer" })
        ));
    }

    #[test]
    fn test_with_options_accepts_browser_headers() {
        let options = ClientOptions {
            referer: Some("https://example.com/".to_string()),
            origin: Some("https://example.com".to_string()),
            user_agent: Some("custom-agent/1.0".to_string()),
            ..ClientOptions::default()
        };
        assert!(HttpClient::with_options(&options).is_ok());
    }
}
