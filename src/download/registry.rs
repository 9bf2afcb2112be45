//! The set of active downloads and the operations callers run against it.
//!
//! [`DownloadRegistry`] checks directory policy, builds [`Download`]s, wires
//! their lifecycle to [`DownloadEvent`]s and keeps enough information about
//! failed downloads to restart them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::client::HttpClient;
use super::error::DownloadError;
use super::constants::{DEFAULT_BUFFER_SIZE, REPORT_PROGRESS_INTERVAL};
use super::progress::{ProgressReporter, ReporterHandle};
use super::query_params::{QueryParams, prepare_download_url};
use super::task::{Download, DownloadObserver, DownloadOutcome, DownloadSnapshot};
use crate::directory::{DirectoryModel, DirectoryProvider};
use crate::events::{DownloadEvent, EventSink};
use crate::journal::FileChangesLog;

/// Tunables for a [`DownloadRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Cadence of `DownloadUpdated` events.
    pub report_interval: Duration,
    /// Write buffer of each copy loop.
    pub buffer_size: usize,
    /// Query parameters injected into matching URLs.
    pub query_params: Vec<QueryParams>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            report_interval: REPORT_PROGRESS_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            query_params: Vec::new(),
        }
    }
}

/// What is needed to start a failed download again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDownloadInfo {
    /// Id of the failed download.
    pub id: String,
    /// File name as originally requested.
    pub file_name: Option<String>,
    /// Target directory name.
    pub directory_name: String,
    /// URL as originally requested.
    pub url: String,
}

struct ActiveDownload {
    download: Arc<Download>,
    reporter: Option<ReporterHandle>,
}

#[derive(Default)]
struct RegistryState {
    active: Mutex<HashMap<String, ActiveDownload>>,
    failed: Mutex<Vec<FailedDownloadInfo>>,
}

impl RegistryState {
    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveDownload>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failed(&self) -> MutexGuard<'_, Vec<FailedDownloadInfo>> {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find(&self, id: &str) -> Option<Arc<Download>> {
        self.active().get(id).map(|a| Arc::clone(&a.download))
    }
}

/// Coordinator of all active downloads.
///
/// Cloning is cheap; clones share the same active set.
#[derive(Clone)]
pub struct DownloadRegistry {
    directories: Arc<dyn DirectoryProvider>,
    events: Arc<dyn EventSink>,
    journal: Arc<FileChangesLog>,
    client: HttpClient,
    options: RegistryOptions,
    state: Arc<RegistryState>,
}

impl std::fmt::Debug for DownloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRegistry")
            .field("options", &self.options)
            .field("active", &self.state.active().len())
            .finish_non_exhaustive()
    }
}

impl DownloadRegistry {
    /// Creates a registry with default options, HTTP client and no journal.
    #[must_use]
    pub fn new(directories: Arc<dyn DirectoryProvider>, events: Arc<dyn EventSink>) -> Self {
        Self {
            directories,
            events,
            journal: Arc::new(FileChangesLog::disabled()),
            client: HttpClient::new(),
            options: RegistryOptions::default(),
            state: Arc::new(RegistryState::default()),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: RegistryOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses `client` for every download.
    #[must_use]
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    /// Records completed downloads in `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<FileChangesLog>) -> Self {
        self.journal = journal;
        self
    }

    /// Starts downloading `url` into the directory named `directory_name`.
    ///
    /// Returns `false` when the directory is unknown or not a download
    /// target, when the URL is invalid, or when the download fails before
    /// streaming. Nothing is written to disk in those cases.
    #[instrument(skip(self))]
    pub async fn start_download(
        &self,
        url: &str,
        directory_name: &str,
        file_name: Option<&str>,
    ) -> bool {
        let directory = match self.writable_directory(directory_name) {
            Ok(directory) => directory,
            Err(e) => {
                warn!("{e}. Download aborted");
                return false;
            }
        };

        let uri = match prepare_download_url(url, &self.options.query_params) {
            Ok(uri) => uri,
            Err(e) => {
                warn!(error = %e, "Could not start download. Wrong url: `{url}`");
                return false;
            }
        };

        let observer = Arc::new(RegistryObserver {
            state: Arc::downgrade(&self.state),
            events: Arc::clone(&self.events),
            journal: Arc::clone(&self.journal),
            reporter: ProgressReporter::new(self.options.report_interval, Arc::clone(&self.events)),
            request: FailedDownloadInfo {
                id: String::new(),
                file_name: file_name.map(ToString::to_string),
                directory_name: directory_name.to_string(),
                url: url.to_string(),
            },
        });

        let download = Arc::new(
            Download::new(uri, directory, self.client.clone(), observer)
                .with_buffer_size(self.options.buffer_size),
        );

        let started = download.start(file_name).await;
        if !started {
            download.dispose();
        }
        started
    }

    /// Cancels an active download.
    ///
    /// Returns `false` when no such download is active, it is already
    /// being cancelled or it is finalizing. The `DownloadRemoved` event follows once the copy
    /// task has cleaned up.
    pub fn cancel_download(&self, id: &str) -> bool {
        let Some(download) = self.state.find(id).filter(|d| d.cancel()) else {
            warn!("Could not cancel download. There was no active download with id `{id}`");
            return false;
        };

        download.dispose();
        log_download("Cancelled downloading file", &download);
        true
    }

    /// Pauses an active download. Returns `false` when it is not active.
    pub fn pause_download(&self, id: &str) -> bool {
        let Some(download) = self.state.find(id) else {
            return false;
        };
        download.pause();
        self.events.publish(DownloadEvent::DownloadPaused { id: id.to_string() });
        true
    }

    /// Resumes an active download. Returns `false` when it is not active.
    pub fn resume_download(&self, id: &str) -> bool {
        let Some(download) = self.state.find(id) else {
            return false;
        };
        download.resume();
        self.events.publish(DownloadEvent::DownloadResumed { id: id.to_string() });
        true
    }

    /// Snapshots of every active download.
    #[must_use]
    pub fn list_active_downloads(&self) -> Vec<DownloadSnapshot> {
        let downloads: Vec<Arc<Download>> = self
            .state
            .active()
            .values()
            .map(|a| Arc::clone(&a.download))
            .collect();
        downloads.iter().map(|d| d.snapshot()).collect()
    }

    /// Failed downloads that can still be restarted.
    #[must_use]
    pub fn failed_downloads(&self) -> Vec<FailedDownloadInfo> {
        self.state.failed().clone()
    }

    /// Starts a failed download again with its original arguments.
    ///
    /// The failure record is consumed even if the new attempt does not start.
    pub async fn restart_download(&self, id: &str) -> bool {
        let info = {
            let mut failed = self.state.failed();
            let Some(position) = failed.iter().position(|f| f.id == id) else {
                return false;
            };
            failed.remove(position)
        };

        info!(id, url = %info.url, "restarting failed download");
        self.start_download(&info.url, &info.directory_name, info.file_name.as_deref())
            .await
    }

    /// Cancels every active download. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        let downloads: Vec<Arc<Download>> = self
            .state
            .active()
            .values()
            .map(|a| Arc::clone(&a.download))
            .collect();

        for download in &downloads {
            download.cancel();
            download.dispose();
        }
        if !downloads.is_empty() {
            info!(count = downloads.len(), "cancelled all active downloads");
        }
        downloads.len()
    }

    fn writable_directory(&self, name: &str) -> Result<DirectoryModel, DownloadError> {
        let directory = self
            .directories
            .directory_by_name(name)
            .ok_or_else(|| DownloadError::unknown_directory(name))?;
        if !directory.create_allowed {
            return Err(DownloadError::directory_not_writable(name));
        }
        Ok(directory)
    }
}

struct RegistryObserver {
    state: Weak<RegistryState>,
    events: Arc<dyn EventSink>,
    journal: Arc<FileChangesLog>,
    reporter: ProgressReporter,
    request: FailedDownloadInfo,
}

impl DownloadObserver for RegistryObserver {
    fn on_started(&self, download: &Arc<Download>) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let id = download.id().to_string();

        state.active().insert(
            id.clone(),
            ActiveDownload {
                download: Arc::clone(download),
                reporter: None,
            },
        );

        log_download("Started downloading file", download);
        self.events.publish(DownloadEvent::DownloadAdded {
            download: download.snapshot(),
        });

        let reporter = self.reporter.spawn(Arc::clone(download));
        if let Some(active) = state.active().get_mut(&id) {
            active.reporter = Some(reporter);
        }
    }

    fn on_ended(&self, download: &Download, outcome: DownloadOutcome) {
        let id = download.id();

        if let Some(state) = self.state.upgrade() {
            let removed = state.active().remove(id);
            if let Some(reporter) = removed.and_then(|a| a.reporter) {
                reporter.stop();
            }

            if outcome == DownloadOutcome::Failed {
                state.failed().push(FailedDownloadInfo {
                    id: id.to_string(),
                    ..self.request.clone()
                });
            }
        }

        download.dispose();

        if outcome.is_completed() {
            log_download("Downloaded file", download);
            if let Some(path) = download.full_path() {
                let file_name = download.file_name().unwrap_or_default();
                self.journal
                    .download_completed(&file_name, &download.directory().name, &path);
            }
        }

        self.events.publish(DownloadEvent::DownloadRemoved {
            id: id.to_string(),
            completed: outcome.is_completed(),
        });
    }
}

fn log_download(action: &str, download: &Download) {
    let file_name = download.file_name().unwrap_or_default();
    let full_path = download.full_path().unwrap_or_default();
    info!(
        "{action} `{file_name}` to `{}` ({}). Download ID: `{}`",
        download.directory().name,
        full_path.display(),
        download.id()
    );
}
