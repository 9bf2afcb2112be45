//! HTTP client wrapper for downloads.
//!
//! This module provides the `HttpClient` struct which issues the download
//! request, returns as soon as response headers are available and classifies
//! whether the response plausibly carries a file.

use std::time::Duration;

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderName};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::filename::is_attachment;

/// User-Agent sent with every download request.
pub const DEFAULT_USER_AGENT: &str = concat!("download-hub/", env!("CARGO_PKG_VERSION"));

/// Reusable HTTP client for downloads.
///
/// Created once and cloned into every download, taking advantage of
/// connection pooling. Cloning is cheap.
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
    /// Creates a new HTTP client with default timeouts.
    ///
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes between body reads
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = build_client(connect_timeout_secs, read_timeout_secs)
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Issues a GET and returns once the response headers are available.
    ///
    /// The body is not read; it is streamed later by the download task.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Network`] or [`DownloadError::Timeout`] when
    /// the request cannot be completed.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn fetch_headers(&self, url: &Url) -> Result<Response, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::network(url.as_str(), e))?;

        debug!(status = response.status().as_u16(), "response headers received");
        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn build_client(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .read_timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .user_agent(DEFAULT_USER_AGENT)
        .build()
}

/// Header values of a response that matter for a download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code.
    pub status: u16,
    /// Raw Content-Disposition header, if present and valid UTF-8.
    pub content_disposition: Option<String>,
    /// Raw Content-Type header, if present and valid UTF-8.
    pub content_type: Option<String>,
    /// Body length in bytes, `-1` when the server did not send one.
    pub total_bytes: i64,
}

impl ResponseHead {
    /// Extracts the download-relevant headers from a response.
    #[must_use]
    pub fn from_response(response: &Response) -> Self {
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        };

        let total_bytes = header(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|len| *len >= 0)
            .unwrap_or(-1);

        Self {
            status: response.status().as_u16(),
            content_disposition: header(CONTENT_DISPOSITION),
            content_type: header(CONTENT_TYPE),
            total_bytes,
        }
    }

    /// Checks that the response is `200 OK` and plausibly a file.
    ///
    /// Attachments are always accepted. Anything else is rejected only when
    /// its media type is `text/html`, which is most likely an error or login
    /// page rather than the requested file.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::HttpStatus`] for non-OK responses and
    /// [`DownloadError::NotAFile`] for HTML pages that are not attachments.
    pub fn ensure_has_file(&self, url: &Url) -> Result<(), DownloadError> {
        if self.status != StatusCode::OK.as_u16() {
            warn!(url = %url, status = self.status, "did not get OK response, download aborted");
            return Err(DownloadError::http_status(url.as_str(), self.status));
        }

        if self.content_disposition.as_deref().is_some_and(is_attachment) {
            return Ok(());
        }

        if self.media_type().as_deref() == Some("text/html") {
            warn!(
                url = %url,
                "content is not an attachment and is text/html, probably not a file; download aborted"
            );
            return Err(DownloadError::not_a_file(url.as_str()));
        }

        Ok(())
    }

    fn media_type(&self) -> Option<String> {
        let content_type = self.content_type.as_deref()?;
        let mime = content_type.split(';').next().unwrap_or("").trim();
        Some(mime.to_ascii_lowercase())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.com/file").unwrap()
    }

    fn head(status: u16, disposition: Option<&str>, content_type: Option<&str>) -> ResponseHead {
        ResponseHead {
            status,
            content_disposition: disposition.map(ToString::to_string),
            content_type: content_type.map(ToString::to_string),
            total_bytes: -1,
        }
    }

    #[test]
    fn test_ensure_has_file_accepts_binary() {
        let h = head(200, None, Some("application/octet-stream"));
        assert!(h.ensure_has_file(&url()).is_ok());
    }

    #[test]
    fn test_ensure_has_file_accepts_missing_content_type() {
        assert!(head(200, None, None).ensure_has_file(&url()).is_ok());
    }

    #[test]
    fn test_ensure_has_file_rejects_html_page() {
        let h = head(200, None, Some("text/html; charset=utf-8"));
        assert!(matches!(
            h.ensure_has_file(&url()),
            Err(DownloadError::NotAFile { .. })
        ));
    }

    #[test]
    fn test_ensure_has_file_accepts_html_attachment() {
        let h = head(200, Some(r#"attachment; filename="page.html""#), Some("text/html"));
        assert!(h.ensure_has_file(&url()).is_ok());
    }

    #[test]
    fn test_ensure_has_file_rejects_inline_html() {
        let h = head(200, Some("inline"), Some("TEXT/HTML"));
        assert!(h.ensure_has_file(&url()).is_err());
    }

    #[test]
    fn test_ensure_has_file_rejects_non_ok_status() {
        for status in [201, 206, 404, 500] {
            let result = head(status, None, None).ensure_has_file(&url());
            assert!(
                matches!(result, Err(DownloadError::HttpStatus { status: s, .. }) if s == status),
                "status {status} should be rejected"
            );
        }
    }

    #[test]
    fn test_default_user_agent_names_crate() {
        assert!(DEFAULT_USER_AGENT.starts_with("download-hub/"));
    }
}
