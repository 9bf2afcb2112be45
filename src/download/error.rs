//! Error types for the download module.
//!
//! Every failure a download can hit is represented here with enough context
//! (URL, path, directory name) to produce a useful log line. The registry
//! converts these into boolean results plus notifications at its boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while starting or running a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The requested target directory is not configured.
    #[error("Invalid directory name `{name}`")]
    UnknownDirectory {
        /// The directory name that was requested.
        name: String,
    },

    /// The directory exists in configuration but downloads into it are not allowed.
    #[error("Creating files is prohibited in directory `{name}`")]
    DirectoryNotWritable {
        /// The directory name that was requested.
        name: String,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS errors, broken body stream).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The server answered with something other than `200 OK`.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response is an HTML page without an attachment disposition.
    #[error("content of {url} is text/html and not an attachment, probably not a file")]
    NotAFile {
        /// The URL whose response was rejected.
        url: String,
    },

    /// No file name could be derived from the request or the response.
    #[error("could not obtain a file name for {url}")]
    NoFileName {
        /// The URL being downloaded.
        url: String,
    },

    /// File system error while writing, renaming or creating directories.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The temp file could not be moved to any final name.
    #[error("could not rename {from} to {to}: {source}")]
    Finalize {
        /// Temp file path.
        from: PathBuf,
        /// Last attempted final path.
        to: PathBuf,
        /// The rename failure.
        #[source]
        source: std::io::Error,
    },

    /// The download was cancelled.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates an unknown-directory policy error.
    pub fn unknown_directory(name: impl Into<String>) -> Self {
        Self::UnknownDirectory { name: name.into() }
    }

    /// Creates a not-writable policy error.
    pub fn directory_not_writable(name: impl Into<String>) -> Self {
        Self::DirectoryNotWritable { name: name.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a not-a-file error.
    pub fn not_a_file(url: impl Into<String>) -> Self {
        Self::NotAFile { url: url.into() }
    }

    /// Creates a missing file name error.
    pub fn no_file_name(url: impl Into<String>) -> Self {
        Self::NoFileName { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a finalize (rename) error.
    pub fn finalize(
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Finalize {
            from: from.into(),
            to: to.into(),
            source,
        }
    }

    /// Returns true for the policy class (rejected before any resource is allocated).
    #[must_use]
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::UnknownDirectory { .. } | Self::DirectoryNotWritable { .. }
        )
    }

    /// Returns true if the error represents a cancellation rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`:
// the variants need a URL or path that the source errors do not carry.
