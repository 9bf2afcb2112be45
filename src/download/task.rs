//! A single download's lifecycle.
//!
//! [`Download`] connects, resolves a file name, streams the body into a temp
//! file next to the target and renames it into place. Pause, resume and
//! cancel may be called from any task while the copy loop runs.
//!
//! ```text
//! Created -> Connecting -> Streaming <-> Paused -> Finalizing -> Completed | Failed
//!                 \______________\__________\____________________-> Cancelled
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Response;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::client::{HttpClient, ResponseHead};
use super::constants::DEFAULT_BUFFER_SIZE;
use super::error::DownloadError;
use super::filename::{NameResolver, suggested_file_name, temp_file_name};
use crate::directory::DirectoryModel;

/// Lifecycle state of a [`Download`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    /// Constructed, `start` not called yet.
    Created,
    /// Waiting for response headers.
    Connecting,
    /// Copying the body to the temp file.
    Streaming,
    /// Copy loop suspended between chunks.
    Paused,
    /// Body fully written, renaming into place.
    Finalizing,
    /// File is on disk under its final name.
    Completed,
    /// Stopped by a cancel request.
    Cancelled,
    /// Stopped by an error.
    Failed,
}

impl DownloadState {
    /// No transitions leave a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// How a started download ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file was finalized.
    Completed,
    /// A streaming or finalize error.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl DownloadOutcome {
    /// Value of the `completed` flag reported to subscribers.
    #[must_use]
    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }

    fn state(self) -> DownloadState {
        match self {
            Self::Completed => DownloadState::Completed,
            Self::Failed => DownloadState::Failed,
            Self::Cancelled => DownloadState::Cancelled,
        }
    }
}

/// Receives the two lifecycle notifications of a [`Download`].
///
/// `on_started` runs synchronously inside [`Download::start`] before the copy
/// task is spawned; `on_ended` runs exactly once on the copy task after the
/// temp file has been renamed or cleaned up. Neither fires for a download
/// whose `start` returned `false`.
pub trait DownloadObserver: Send + Sync {
    /// The download resolved its name and is about to stream.
    fn on_started(&self, download: &Arc<Download>);

    /// The download reached a terminal state.
    fn on_ended(&self, download: &Download, outcome: DownloadOutcome);
}

/// Point-in-time copy of a download, safe to hand to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSnapshot {
    /// Download id.
    pub id: String,
    /// Source URL (after query-parameter injection).
    pub url: String,
    /// Target directory name.
    pub directory_name: String,
    /// Resolved file name, `None` before connecting succeeded.
    pub file_name: Option<String>,
    /// Lifecycle state.
    pub state: DownloadState,
    /// Bytes written so far.
    pub bytes_downloaded: u64,
    /// Expected size, `-1` when unknown.
    pub total_bytes: i64,
    /// Last sampled speed in bytes per second.
    pub speed: f64,
    /// Pause flag.
    pub paused: bool,
}

impl DownloadSnapshot {
    /// Completion percentage, `None` when the total size is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            total if total < 0 => None,
            0 => Some(100.0),
            total => Some((self.bytes_downloaded as f64 / total as f64 * 100.0).min(100.0)),
        }
    }

    /// Estimated time left, `None` when the size or speed is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn eta(&self) -> Option<Duration> {
        if self.total_bytes < 0 || !self.speed.is_finite() || self.speed <= 0.0 {
            return None;
        }
        let remaining = (self.total_bytes as u64).saturating_sub(self.bytes_downloaded);
        Some(Duration::from_secs_f64(remaining as f64 / self.speed))
    }
}

#[derive(Debug)]
struct Inner {
    state: DownloadState,
    file_name: Option<String>,
    speed: f64,
    disposed: bool,
}

/// One download, shared between the registry, its copy task and its sampler.
pub struct Download {
    id: String,
    url: Url,
    directory: DirectoryModel,
    client: HttpClient,
    buffer_size: usize,
    inner: Mutex<Inner>,
    bytes_downloaded: AtomicU64,
    total_bytes: AtomicI64,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    observer: Arc<dyn DownloadObserver>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("directory", &self.directory.name)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl Download {
    /// Creates a download of `url` into `directory`.
    #[must_use]
    pub fn new(
        url: Url,
        directory: DirectoryModel,
        client: HttpClient,
        observer: Arc<dyn DownloadObserver>,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4().to_string(),
            url,
            directory,
            client,
            buffer_size: DEFAULT_BUFFER_SIZE,
            inner: Mutex::new(Inner {
                state: DownloadState::Created,
                file_name: None,
                speed: 0.0,
                disposed: false,
            }),
            bytes_downloaded: AtomicU64::new(0),
            total_bytes: AtomicI64::new(-1),
            cancel: CancellationToken::new(),
            paused,
            observer,
        }
    }

    /// Sets the write buffer capacity of the copy loop.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Connects, resolves the file name and spawns the copy task.
    ///
    /// Returns `true` once the download is streaming, or when it was already
    /// started and has not ended yet. Returns `false` when the download is
    /// terminal or disposed, or when it failed before streaming; in that
    /// case no observer callback fires.
    #[instrument(skip(self, requested_name), fields(id = %self.id, url = %self.url))]
    pub async fn start(self: &Arc<Self>, requested_name: Option<&str>) -> bool {
        {
            let mut inner = self.lock();
            match inner.state {
                DownloadState::Created if inner.disposed || self.cancel.is_cancelled() => {
                    inner.state = DownloadState::Cancelled;
                    return false;
                }
                DownloadState::Created => inner.state = DownloadState::Connecting,
                state if state.is_terminal() => return false,
                _ => return true,
            }
        }

        let (response, file_name) = match self.connect(requested_name).await {
            Ok(connected) => connected,
            Err(e) => {
                self.fail_before_start(&e);
                return false;
            }
        };

        let (file, temp_path, file_name) = match self.create_temp_file(file_name).await {
            Ok(created) => created,
            Err(e) => {
                self.fail_before_start(&e);
                return false;
            }
        };

        let cancelled = {
            let mut inner = self.lock();
            if self.cancel.is_cancelled() {
                inner.state = DownloadState::Cancelled;
                true
            } else {
                inner.file_name = Some(file_name);
                inner.state = if *self.paused.borrow() {
                    DownloadState::Paused
                } else {
                    DownloadState::Streaming
                };
                false
            }
        };
        if cancelled {
            remove_temp_file(&temp_path).await;
            return false;
        }

        self.observer.on_started(self);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(response, file, temp_path).await });
        true
    }

    /// Sets the pause flag. Returns `false` if it was already set.
    pub fn pause(&self) -> bool {
        let changed = self.paused.send_if_modified(|paused| !std::mem::replace(paused, true));
        if changed {
            let mut inner = self.lock();
            if inner.state == DownloadState::Streaming {
                inner.state = DownloadState::Paused;
            }
            debug!(id = %self.id, "paused");
        }
        changed
    }

    /// Clears the pause flag. Returns `false` if it was not set.
    pub fn resume(&self) -> bool {
        let changed = self.paused.send_if_modified(|paused| std::mem::replace(paused, false));
        if changed {
            let mut inner = self.lock();
            if inner.state == DownloadState::Paused {
                inner.state = DownloadState::Streaming;
            }
            debug!(id = %self.id, "resumed");
        }
        changed
    }

    /// Requests cancellation.
    ///
    /// Returns `false` when cancellation was already requested or the download
    /// is finalizing or terminal; the request has no effect then.
    pub fn cancel(&self) -> bool {
        let inner = self.lock();
        if self.cancel.is_cancelled()
            || inner.state == DownloadState::Finalizing
            || inner.state.is_terminal()
        {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Releases the download. Safe to call any number of times.
    ///
    /// A download that is still running is cancelled; its copy task deletes
    /// the temp file and reports the end as usual.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        if !inner.state.is_terminal() {
            self.cancel.cancel();
        }
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancellation_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Unique id, stable for the download's lifetime.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Target directory.
    #[must_use]
    pub fn directory(&self) -> &DirectoryModel {
        &self.directory
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.lock().state
    }

    /// Resolved file name.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        self.lock().file_name.clone()
    }

    /// Final path of the file, once the name is resolved.
    #[must_use]
    pub fn full_path(&self) -> Option<PathBuf> {
        self.file_name().map(|name| self.directory.path.join(name))
    }

    /// Bytes written to the temp file so far.
    #[must_use]
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    /// Expected size, `-1` when unknown.
    #[must_use]
    pub fn total_bytes(&self) -> i64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    /// Pause flag.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Copies the current values.
    #[must_use]
    pub fn snapshot(&self) -> DownloadSnapshot {
        let (state, file_name, speed) = {
            let inner = self.lock();
            (inner.state, inner.file_name.clone(), inner.speed)
        };
        DownloadSnapshot {
            id: self.id.clone(),
            url: self.url.to_string(),
            directory_name: self.directory.name.clone(),
            file_name,
            state,
            bytes_downloaded: self.bytes_downloaded(),
            total_bytes: self.total_bytes(),
            speed,
            paused: self.is_paused(),
        }
    }

    pub(crate) fn set_speed(&self, speed: f64) {
        self.lock().speed = speed;
    }

    pub(crate) fn pause_signal(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    fn fail_before_start(&self, e: &DownloadError) {
        let state = if e.is_cancelled() {
            debug!(id = %self.id, "cancelled before streaming");
            DownloadState::Cancelled
        } else {
            warn!(id = %self.id, url = %self.url, error = %e, "could not start download");
            DownloadState::Failed
        };
        self.lock().state = state;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect(&self, requested_name: Option<&str>) -> Result<(Response, String), DownloadError> {
        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            result = self.client.fetch_headers(&self.url) => result?,
        };

        let head = ResponseHead::from_response(&response);
        head.ensure_has_file(&self.url)?;

        // Redirects are followed; the final URL names the file.
        let suggested = suggested_file_name(head.content_disposition.as_deref(), response.url());
        let resolution = NameResolver::new(&self.directory.path)
            .resolve(requested_name, suggested.as_deref())
            .ok_or_else(|| DownloadError::no_file_name(self.url.as_str()))?;

        self.total_bytes.store(head.total_bytes, Ordering::SeqCst);
        debug!(
            file = %resolution.file_name,
            total_bytes = head.total_bytes,
            "resolved file name"
        );
        Ok((response, resolution.file_name))
    }

    async fn run(self: Arc<Self>, response: Response, file: File, temp_path: PathBuf) {
        let outcome = match self.stream_and_finalize(response, file, &temp_path).await {
            Ok(path) => {
                debug!(id = %self.id, path = %path.display(), "download finalized");
                DownloadOutcome::Completed
            }
            Err(e) if e.is_cancelled() => DownloadOutcome::Cancelled,
            Err(e) => {
                warn!(id = %self.id, url = %self.url, error = %e, "download failed");
                DownloadOutcome::Failed
            }
        };

        {
            let mut inner = self.lock();
            inner.state = outcome.state();
            inner.speed = 0.0;
        }
        self.observer.on_ended(&self, outcome);
    }

    async fn stream_and_finalize(
        &self,
        response: Response,
        file: File,
        temp_path: &Path,
    ) -> Result<PathBuf, DownloadError> {
        if let Err(e) = self.copy_body(file, response, temp_path).await {
            remove_temp_file(temp_path).await;
            return Err(e);
        }

        let file_name = {
            let mut inner = self.lock();
            if self.cancel.is_cancelled() {
                None
            } else {
                inner.state = DownloadState::Finalizing;
                Some(inner.file_name.clone())
            }
        };
        let Some(file_name) = file_name else {
            remove_temp_file(temp_path).await;
            return Err(DownloadError::Cancelled);
        };
        let file_name =
            file_name.ok_or_else(|| DownloadError::no_file_name(self.url.as_str()))?;

        match self.finalize(temp_path, &file_name).await {
            Ok(path) => Ok(path),
            Err(e) => {
                remove_temp_file(temp_path).await;
                Err(e)
            }
        }
    }

    /// Creates `<name>.~` exclusively; a name claimed in the meantime gets
    /// one more uniqueness pass.
    async fn create_temp_file(
        &self,
        mut file_name: String,
    ) -> Result<(File, PathBuf, String), DownloadError> {
        let directory = &self.directory.path;
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| DownloadError::io(directory, e))?;

        let mut retried = false;
        loop {
            let temp_path = directory.join(temp_file_name(&file_name));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)
                .await
            {
                Ok(file) => return Ok((file, temp_path, file_name)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && !retried => {
                    retried = true;
                    let Some(unique) = NameResolver::new(directory).make_unique(&file_name) else {
                        return Err(DownloadError::io(temp_path, e));
                    };
                    debug!(id = %self.id, old = %file_name, new = %unique, "file name was claimed concurrently");
                    file_name = unique;
                }
                Err(e) => return Err(DownloadError::io(temp_path, e)),
            }
        }
    }

    async fn copy_body(
        &self,
        file: File,
        response: Response,
        temp_path: &Path,
    ) -> Result<(), DownloadError> {
        let io_err = |e| DownloadError::io(temp_path, e);
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let mut stream = response.bytes_stream();
        let mut paused = self.pause_signal();

        loop {
            self.wait_while_paused(&mut paused).await?;

            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| DownloadError::network(self.url.as_str(), e))?;

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                result = writer.write_all(&chunk) => result.map_err(io_err)?,
            }
            self.bytes_downloaded
                .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        }

        writer.flush().await.map_err(io_err)?;
        writer.into_inner().sync_all().await.map_err(io_err)?;
        Ok(())
    }

    async fn wait_while_paused(&self, paused: &mut watch::Receiver<bool>) -> Result<(), DownloadError> {
        if !*paused.borrow_and_update() {
            return Ok(());
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            _ = paused.wait_for(|paused| !*paused) => Ok(()),
        }
    }

    async fn finalize(&self, temp_path: &Path, file_name: &str) -> Result<PathBuf, DownloadError> {
        let resolver = NameResolver::new(&self.directory.path);
        let target = resolver.path_of(file_name);

        let first_error = match rename_no_clobber(temp_path, &target).await {
            Ok(()) => return Ok(target),
            Err(e) => e,
        };
        debug!(
            id = %self.id,
            target = %target.display(),
            error = %first_error,
            "rename failed, retrying with a fresh name"
        );

        let Some(unique) = resolver.make_unique(file_name) else {
            return Err(DownloadError::finalize(temp_path, target, first_error));
        };
        let retry_target = resolver.path_of(&unique);
        rename_no_clobber(temp_path, &retry_target)
            .await
            .map_err(|e| DownloadError::finalize(temp_path, &retry_target, e))?;

        info!(id = %self.id, old = %file_name, new = %unique, "file name was taken at finalize, saved under a new name");
        self.lock().file_name = Some(unique);
        Ok(retry_target)
    }
}

async fn rename_no_clobber(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(to).await? {
        return Err(std::io::ErrorKind::AlreadyExists.into());
    }
    tokio::fs::rename(from, to).await
}

async fn remove_temp_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!(path = %path.display(), error = %e, "could not delete temp file"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, PartialEq)]
    enum Seen {
        Started(String),
        Ended(String, DownloadOutcome),
    }

    struct ChannelObserver(mpsc::UnboundedSender<Seen>);

    impl DownloadObserver for ChannelObserver {
        fn on_started(&self, download: &Arc<Download>) {
            let _ = self.0.send(Seen::Started(download.id().to_string()));
        }

        fn on_ended(&self, download: &Download, outcome: DownloadOutcome) {
            let _ = self.0.send(Seen::Ended(download.id().to_string(), outcome));
        }
    }

    fn directory(path: &Path) -> DirectoryModel {
        DirectoryModel {
            name: "downloads".to_string(),
            path: path.to_path_buf(),
            create_allowed: true,
            edit_allowed: false,
        }
    }

    fn new_download(url: &str, dir: &Path) -> (Arc<Download>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let download = Download::new(
            Url::parse(url).unwrap(),
            directory(dir),
            HttpClient::new(),
            Arc::new(ChannelObserver(tx)),
        );
        (Arc::new(download), rx)
    }

    async fn ended(rx: &mut mpsc::UnboundedReceiver<Seen>) -> DownloadOutcome {
        loop {
            match tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap()
            {
                Seen::Ended(_, outcome) => return outcome,
                Seen::Started(_) => {}
            }
        }
    }

    fn attachment(body: Vec<u8>, name: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("Content-Disposition", format!("attachment; filename=\"{name}\"").as_str())
            .set_body_bytes(body)
    }

    #[tokio::test]
    async fn test_download_completes_and_renames_temp_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(attachment(vec![7u8; 4096], "data.bin"))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let (download, mut rx) = new_download(&format!("{}/file", server.uri()), temp.path());

        assert!(download.start(None).await);
        assert_eq!(rx.recv().await.unwrap(), Seen::Started(download.id().to_string()));
        assert_eq!(ended(&mut rx).await, DownloadOutcome::Completed);

        assert_eq!(download.state(), DownloadState::Completed);
        assert_eq!(download.bytes_downloaded(), 4096);
        assert_eq!(download.total_bytes(), 4096);
        assert_eq!(std::fs::read(temp.path().join("data.bin")).unwrap().len(), 4096);
        assert!(!temp.path().join("data.bin.~").exists());
    }

    #[tokio::test]
    async fn test_start_twice_returns_true_and_starts_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(attachment(vec![1u8; 16], "a.bin").set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let (download, mut rx) = new_download(&format!("{}/a", server.uri()), temp.path());

        let (first, second) = tokio::join!(download.start(None), download.start(None));
        assert!(first);
        assert!(second);
        assert_eq!(ended(&mut rx).await, DownloadOutcome::Completed);
        assert!(rx.try_recv().is_err());

        assert!(!download.start(None).await, "start after terminal must fail");
    }

    #[tokio::test]
    async fn test_start_rejects_html_page_without_side_effects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html; charset=utf-8")
                    .set_body_bytes(b"<html>login</html>".to_vec()),
            )
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let (download, mut rx) = new_download(&format!("{}/page", server.uri()), temp.path());

        assert!(!download.start(None).await);
        assert_eq!(download.state(), DownloadState::Failed);
        assert!(rx.try_recv().is_err());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_start_rejects_non_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let (download, _rx) = new_download(&format!("{}/missing.bin", server.uri()), temp.path());

        assert!(!download.start(None).await);
        assert_eq!(download.state(), DownloadState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_removes_temp_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(attachment(vec![0u8; 64], "slow.bin"))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let (download, mut rx) = new_download(&format!("{}/slow", server.uri()), temp.path());

        download.pause();
        assert!(download.start(None).await);
        assert_eq!(download.state(), DownloadState::Paused);
        assert!(temp.path().join("slow.bin.~").exists());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(download.cancel());
        assert!(!download.cancel(), "repeat cancel is refused");
        assert_eq!(ended(&mut rx).await, DownloadOutcome::Cancelled);
        assert_eq!(download.state(), DownloadState::Cancelled);
        assert!(!temp.path().join("slow.bin.~").exists());
        assert!(!temp.path().join("slow.bin").exists());
    }

    #[tokio::test]
    async fn test_cancel_before_start_prevents_start() {
        let temp = TempDir::new().unwrap();
        let (download, mut rx) = new_download("http://127.0.0.1:9/never", temp.path());

        download.cancel();
        assert!(!download.start(None).await);
        assert_eq!(download.state(), DownloadState::Cancelled);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pause_and_resume_toggle_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(attachment(vec![3u8; 32], "p.bin"))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let (download, mut rx) = new_download(&format!("{}/p", server.uri()), temp.path());

        assert!(download.pause());
        assert!(!download.pause(), "second pause is a no-op");
        assert!(download.start(None).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(download.bytes_downloaded(), 0);
        assert!(download.snapshot().paused);

        assert!(download.resume());
        assert!(!download.resume());
        assert_eq!(ended(&mut rx).await, DownloadOutcome::Completed);
        assert_eq!(download.bytes_downloaded(), 32);
    }

    #[tokio::test]
    async fn test_finalize_picks_new_name_when_target_appears() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(attachment(vec![5u8; 8], "race.bin"))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let (download, mut rx) = new_download(&format!("{}/race", server.uri()), temp.path());

        download.pause();
        assert!(download.start(None).await);
        std::fs::write(temp.path().join("race.bin"), b"other").unwrap();
        download.resume();

        assert_eq!(ended(&mut rx).await, DownloadOutcome::Completed);
        assert_eq!(download.file_name().as_deref(), Some("race (1).bin"));
        assert_eq!(std::fs::read(temp.path().join("race.bin")).unwrap(), b"other");
        assert_eq!(std::fs::read(temp.path().join("race (1).bin")).unwrap(), vec![5u8; 8]);
    }

    #[tokio::test]
    async fn test_started_downloads_reserve_distinct_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(attachment(vec![9u8; 8], "same.bin"))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let url = format!("{}/same", server.uri());
        let (first, mut first_rx) = new_download(&url, temp.path());
        let (second, mut second_rx) = new_download(&url, temp.path());

        first.pause();
        second.pause();
        assert!(first.start(None).await);
        assert!(second.start(None).await);
        assert_eq!(first.file_name().as_deref(), Some("same.bin"));
        assert_eq!(second.file_name().as_deref(), Some("same (1).bin"));

        first.resume();
        second.resume();
        assert_eq!(ended(&mut first_rx).await, DownloadOutcome::Completed);
        assert_eq!(ended(&mut second_rx).await, DownloadOutcome::Completed);
        assert!(temp.path().join("same.bin").exists());
        assert!(temp.path().join("same (1).bin").exists());
    }

    #[tokio::test]
    async fn test_finalize_fails_when_both_renames_fail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(attachment(vec![6u8; 8], "lost.bin"))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let (download, mut rx) = new_download(&format!("{}/lost", server.uri()), temp.path());

        download.pause();
        assert!(download.start(None).await);
        // The open handle keeps writing; only the directory entry is gone.
        std::fs::remove_file(temp.path().join("lost.bin.~")).unwrap();
        download.resume();

        assert_eq!(ended(&mut rx).await, DownloadOutcome::Failed);
        assert_eq!(download.state(), DownloadState::Failed);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cancel_is_refused_while_finalizing() {
        let temp = TempDir::new().unwrap();
        let (download, _rx) = new_download("http://127.0.0.1:9/f.bin", temp.path());
        download.lock().state = DownloadState::Finalizing;

        assert!(!download.cancel());
        assert!(!download.is_cancellation_requested());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_cancels_running_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(attachment(vec![0u8; 8], "d.bin"))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let (download, mut rx) = new_download(&format!("{}/d", server.uri()), temp.path());

        download.pause();
        assert!(download.start(None).await);
        download.dispose();
        download.dispose();
        assert!(download.is_cancellation_requested());
        assert_eq!(ended(&mut rx).await, DownloadOutcome::Cancelled);
    }

    #[test]
    fn test_snapshot_percent_and_eta_with_unknown_total() {
        let snapshot = DownloadSnapshot {
            id: "x".into(),
            url: "http://example.com/a".into(),
            directory_name: "d".into(),
            file_name: None,
            state: DownloadState::Streaming,
            bytes_downloaded: 500,
            total_bytes: -1,
            speed: 100.0,
            paused: false,
        };
        assert_eq!(snapshot.percent(), None);
        assert_eq!(snapshot.eta(), None);

        let known = DownloadSnapshot {
            total_bytes: 1000,
            ..snapshot
        };
        assert_eq!(known.percent(), Some(50.0));
        assert_eq!(known.eta(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_snapshot_eta_without_speed() {
        let snapshot = DownloadSnapshot {
            id: "x".into(),
            url: "http://example.com/a".into(),
            directory_name: "d".into(),
            file_name: None,
            state: DownloadState::Streaming,
            bytes_downloaded: 0,
            total_bytes: 0,
            speed: 0.0,
            paused: false,
        };
        assert_eq!(snapshot.percent(), Some(100.0));
        assert_eq!(snapshot.eta(), None);
    }
}
