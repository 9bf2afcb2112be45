//! Allow-listed target directories and the policy checks around them.
//!
//! Downloads may only land in directories marked `create_allowed`; files may
//! only be deleted from directories marked `edit_allowed`. Policy is looked
//! up on every call, so replacing the configured set takes effect for the
//! next operation.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::download::is_temp_file_name;
use crate::journal::FileChangesLog;

/// A configured directory and its capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryModel {
    /// Unique key used by callers.
    pub name: String,
    /// Filesystem location.
    pub path: PathBuf,
    /// Downloads may target this directory.
    #[serde(default)]
    pub create_allowed: bool,
    /// Files in this directory may be deleted.
    #[serde(default)]
    pub edit_allowed: bool,
}

/// Directory policy lookup used by the download registry.
pub trait DirectoryProvider: Send + Sync {
    /// Exact-match lookup by name.
    fn directory_by_name(&self, name: &str) -> Option<DirectoryModel>;
}

/// Errors from directory-level file operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory name is not configured.
    #[error("invalid directory name `{name}`")]
    UnknownDirectory {
        /// Requested directory name.
        name: String,
    },

    /// Deleting files is not allowed in this directory.
    #[error("editing files is prohibited in directory `{name}`")]
    EditNotAllowed {
        /// Requested directory name.
        name: String,
    },

    /// The file name is not a plain name inside the directory.
    #[error("invalid file name `{file_name}`")]
    InvalidFileName {
        /// Rejected file name.
        file_name: String,
    },

    /// No such file.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Full path that was looked up.
        path: PathBuf,
    },

    /// Filesystem failure.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// A finished file inside a managed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, if the platform reports one.
    pub last_modified: Option<SystemTime>,
}

/// In-memory directory set with policy-checked file operations.
#[derive(Debug)]
pub struct DirectoryService {
    directories: RwLock<Vec<DirectoryModel>>,
    journal: Arc<FileChangesLog>,
}

impl DirectoryService {
    /// Creates a service over the given directories.
    #[must_use]
    pub fn new(directories: Vec<DirectoryModel>) -> Self {
        Self {
            directories: RwLock::new(directories),
            journal: Arc::new(FileChangesLog::disabled()),
        }
    }

    /// Records deletions in `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<FileChangesLog>) -> Self {
        self.journal = journal;
        self
    }

    /// Replaces the configured set, e.g. after the caller reloaded configuration.
    pub fn replace_directories(&self, directories: Vec<DirectoryModel>) {
        info!(count = directories.len(), "directory configuration replaced");
        *self
            .directories
            .write()
            .unwrap_or_else(PoisonError::into_inner) = directories;
    }

    /// Every configured directory.
    #[must_use]
    pub fn all_directories(&self) -> Vec<DirectoryModel> {
        self.directories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of directories downloads may target.
    #[must_use]
    pub fn download_allowed_directory_names(&self) -> Vec<String> {
        self.directories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| d.create_allowed)
            .map(|d| d.name.clone())
            .collect()
    }

    /// Finished files in a directory, skipping in-flight temp files and subdirectories.
    ///
    /// A configured directory that does not exist on disk yields an empty list.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::UnknownDirectory`] for unconfigured names,
    /// [`DirectoryError::Io`] when the directory cannot be read.
    pub fn list_files(&self, directory_name: &str) -> Result<Vec<FileEntry>, DirectoryError> {
        let directory = self
            .directory_by_name(directory_name)
            .ok_or_else(|| DirectoryError::UnknownDirectory {
                name: directory_name.to_string(),
            })?;

        if !directory.path.is_dir() {
            return Ok(Vec::new());
        }

        let io_err = |source| DirectoryError::Io {
            path: directory.path.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&directory.path).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_temp_file_name(&name) {
                continue;
            }
            files.push(FileEntry {
                name,
                size: metadata.len(),
                last_modified: metadata.modified().ok(),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Deletes a finished file from an edit-allowed directory.
    ///
    /// # Errors
    ///
    /// Fails closed for unknown or non-editable directories, rejects names
    /// that are not a plain file name (or that belong to an in-flight
    /// download), and reports missing files and IO failures.
    #[instrument(skip(self))]
    pub fn delete_file(&self, directory_name: &str, file_name: &str) -> Result<(), DirectoryError> {
        let Some(directory) = self.directory_by_name(directory_name) else {
            warn!(directory = directory_name, "invalid directory name, delete aborted");
            return Err(DirectoryError::UnknownDirectory {
                name: directory_name.to_string(),
            });
        };

        if !directory.edit_allowed {
            warn!(directory = directory_name, "editing files is prohibited, delete aborted");
            return Err(DirectoryError::EditNotAllowed {
                name: directory_name.to_string(),
            });
        }

        if !is_plain_file_name(file_name) || is_temp_file_name(file_name) {
            warn!(directory = directory_name, file = file_name, "invalid file name, delete aborted");
            return Err(DirectoryError::InvalidFileName {
                file_name: file_name.to_string(),
            });
        }

        let full_path = directory.path.join(file_name);
        if !full_path.is_file() {
            warn!(path = %full_path.display(), "file not found, delete aborted");
            return Err(DirectoryError::FileNotFound { path: full_path });
        }

        std::fs::remove_file(&full_path).map_err(|source| DirectoryError::Io {
            path: full_path.clone(),
            source,
        })?;

        info!(
            file = file_name,
            directory = directory_name,
            path = %full_path.display(),
            "deleted file"
        );
        self.journal
            .file_deleted(file_name, directory_name, &full_path);
        Ok(())
    }
}

impl DirectoryProvider for DirectoryService {
    fn directory_by_name(&self, name: &str) -> Option<DirectoryModel> {
        self.directories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
