//! JSON configuration: directories, query parameters and engine tunables.

use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directory::{DirectoryModel, DirectoryService};
use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_BUFFER_SIZE, READ_TIMEOUT_SECS, REPORT_PROGRESS_INTERVAL,
};
use crate::download::{HttpClient, QueryParams, RegistryOptions};
use crate::journal::FileChangesLog;

const APP_DIR: &str = "download-hub";
const CONFIG_FILE: &str = "config.json";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for [`HubConfig`].
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Rejected value.
        value: u64,
        /// Human-readable range.
        expected: &'static str,
    },

    /// A directory entry has an empty name.
    #[error("invalid config: directory with path '{path}' has an empty name")]
    EmptyDirectoryName {
        /// Path of the offending entry.
        path: PathBuf,
    },

    /// Two directory entries share a name.
    #[error("invalid config: directory name `{name}` is used more than once")]
    DuplicateDirectoryName {
        /// The duplicated name.
        name: String,
    },
}

/// Contents of `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Directories downloads and deletions may target.
    pub allowed_directories: Vec<DirectoryModel>,
    /// Query parameters injected into matching download URLs.
    pub query_params: Vec<QueryParams>,
    /// Journal of completed downloads and deleted files.
    pub files_changes_log_file: Option<PathBuf>,
    /// Cadence of progress events in milliseconds.
    pub report_interval_ms: u64,
    /// Write buffer of each download in bytes.
    pub buffer_size: usize,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            allowed_directories: Vec::new(),
            query_params: Vec::new(),
            files_changes_log_file: None,
            report_interval_ms: u64::try_from(REPORT_PROGRESS_INTERVAL.as_millis())
                .unwrap_or(500),
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl HubConfig {
    /// Parses a JSON document and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown keys and
    /// the validation errors of [`HubConfig::validate`].
    pub fn from_json(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for directory in &self.allowed_directories {
            if directory.name.trim().is_empty() {
                return Err(ConfigError::EmptyDirectoryName {
                    path: directory.path.clone(),
                });
            }
            if !names.insert(directory.name.as_str()) {
                return Err(ConfigError::DuplicateDirectoryName {
                    name: directory.name.clone(),
                });
            }
        }

        validate_range(
            "report_interval_ms",
            self.report_interval_ms,
            50..=60_000,
            "50..=60000",
        )?;
        validate_range(
            "buffer_size",
            u64::try_from(self.buffer_size).unwrap_or(u64::MAX),
            1024..=16 * 1024 * 1024,
            "1024..=16777216",
        )?;
        validate_range(
            "connect_timeout_secs",
            self.connect_timeout_secs,
            1..=3600,
            "1..=3600",
        )?;
        validate_range(
            "read_timeout_secs",
            self.read_timeout_secs,
            1..=3600,
            "1..=3600",
        )?;
        Ok(())
    }

    /// Registry options derived from this config.
    #[must_use]
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            report_interval: Duration::from_millis(self.report_interval_ms),
            buffer_size: self.buffer_size,
            query_params: self.query_params.clone(),
        }
    }

    /// HTTP client with the configured timeouts.
    #[must_use]
    pub fn http_client(&self) -> HttpClient {
        HttpClient::new_with_timeouts(self.connect_timeout_secs, self.read_timeout_secs)
    }

    /// File-changes journal, disabled when no file is configured.
    #[must_use]
    pub fn journal(&self) -> Arc<FileChangesLog> {
        Arc::new(FileChangesLog::new(self.files_changes_log_file.clone()))
    }

    /// Directory service over the configured directories.
    #[must_use]
    pub fn directory_service(&self, journal: Arc<FileChangesLog>) -> DirectoryService {
        DirectoryService::new(self.allowed_directories.clone()).with_journal(journal)
    }
}

fn validate_range(
    field: &'static str,
    value: u64,
    range: std::ops::RangeInclusive<u64>,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected,
        })
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed config, defaults when no file exists.
    pub config: HubConfig,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/download-hub/config.json`
/// 2. `$HOME/.config/download-hub/config.json`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    config_path_from(
        env_var_non_empty_os("XDG_CONFIG_HOME"),
        env_var_non_empty_os("HOME"),
    )
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    if let Some(xdg_config_home) = xdg_config_home {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join(CONFIG_FILE));
    }
    let home = home?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILE),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads and validates the config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed or validated.
pub fn load(path: &Path) -> Result<HubConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    HubConfig::from_json(path, &raw)
}

/// Loads the config from the default path, falling back to defaults when
/// there is no file.
///
/// # Errors
///
/// Returns [`ConfigError`] when a file exists but is invalid.
pub fn load_default() -> Result<LoadedConfig, ConfigError> {
    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: HubConfig::default(),
            loaded_from_file: false,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(raw: &str) -> Result<HubConfig, ConfigError> {
        HubConfig::from_json(Path::new("config.json"), raw)
    }

    #[test]
    fn test_parse_empty_object_uses_defaults() {
        let config = parse("{}").unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.report_interval_ms, 500);
        assert_eq!(config.buffer_size, 8192);
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"{
                "allowed_directories": [
                    {"name": "movies", "path": "/srv/movies", "create_allowed": true},
                    {"name": "docs", "path": "/srv/docs", "edit_allowed": true}
                ],
                "query_params": [
                    {"host_wildcard": "files.example.com", "params": {"token": "abc"}}
                ],
                "files_changes_log_file": "/var/log/download-hub/changes.log",
                "report_interval_ms": 250,
                "connect_timeout_secs": 10
            }"#,
        )
        .unwrap();

        assert_eq!(config.allowed_directories.len(), 2);
        assert!(config.allowed_directories[0].create_allowed);
        assert!(!config.allowed_directories[0].edit_allowed);
        assert!(config.allowed_directories[1].edit_allowed);
        assert_eq!(config.query_params[0].params["token"], "abc");
        assert_eq!(
            config.registry_options().report_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.connect_timeout_secs, 10);
        assert!(config.journal().path().is_some());
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        assert!(matches!(
            parse(r#"{"concurrency": 4}"#),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_directory_names() {
        let err = parse(
            r#"{"allowed_directories": [
                {"name": "a", "path": "/x"},
                {"name": "a", "path": "/y"}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDirectoryName { ref name } if name == "a"));
    }

    #[test]
    fn test_validate_rejects_empty_directory_name() {
        assert!(matches!(
            parse(r#"{"allowed_directories": [{"name": " ", "path": "/x"}]}"#),
            Err(ConfigError::EmptyDirectoryName { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        for raw in [
            r#"{"report_interval_ms": 0}"#,
            r#"{"buffer_size": 10}"#,
            r#"{"connect_timeout_secs": 0}"#,
            r#"{"read_timeout_secs": 3601}"#,
        ] {
            assert!(
                matches!(parse(raw), Err(ConfigError::OutOfRange { .. })),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_out_of_range_message_names_field() {
        let msg = parse(r#"{"read_timeout_secs": 0}"#).unwrap_err().to_string();
        assert!(msg.contains("`read_timeout_secs`"), "{msg}");
        assert!(msg.contains("1..=3600"), "{msg}");
    }

    #[test]
    fn test_config_path_prefers_xdg() {
        let path = config_path_from(Some("/xdg".into()), Some("/home/u".into())).unwrap();
        assert_eq!(path, PathBuf::from("/xdg/download-hub/config.json"));
    }

    #[test]
    fn test_config_path_falls_back_to_home() {
        let path = config_path_from(None, Some("/home/u".into())).unwrap();
        assert_eq!(path, PathBuf::from("/home/u/.config/download-hub/config.json"));
        assert!(config_path_from(None, None).is_none());
    }

    #[test]
    fn test_load_reads_file_and_reports_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"buffer_size": 4096}"#).unwrap();
        assert_eq!(load(&path).unwrap().buffer_size, 4096);

        assert!(matches!(
            load(&temp.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
