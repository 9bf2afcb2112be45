//! Append-only record of files added to or removed from managed directories.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::debug;

/// Plain-text journal of file changes made through this crate.
///
/// Each record is one line: `[<HTTP-date>] - Information: <message>`.
/// Write failures never propagate; the journal is informational only.
#[derive(Debug, Default)]
pub struct FileChangesLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl FileChangesLog {
    /// Creates a journal writing to `path`, or a no-op journal for `None`.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Journal that discards every record.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Target file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends one record.
    pub fn record(&self, message: &str) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        let line = format!(
            "[{}] - Information: {message}\n",
            httpdate::fmt_http_date(SystemTime::now())
        );

        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Err(e) = append_line(path, &line) {
            debug!(path = %path.display(), error = %e, "could not write file-changes journal");
        }
    }

    /// Records a finished download.
    pub fn download_completed(&self, file_name: &str, directory_name: &str, full_path: &Path) {
        self.record(&format!(
            "Downloaded file `{file_name}` to `{directory_name}` ({})",
            full_path.display()
        ));
    }

    /// Records a deleted file.
    pub fn file_deleted(&self, file_name: &str, directory_name: &str, full_path: &Path) {
        self.record(&format!(
            "Deleted file `{file_name}` from directory `{directory_name}` ({})",
            full_path.display()
        ));
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}
