//! Download Hub Library
//!
//! Concurrent, cancellable, pausable background downloads into allow-listed
//! directories, with lifecycle events for whoever is watching.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Download state machine, registry and progress sampling
//! - [`directory`] - Allow-listed directories and their policy checks
//! - [`events`] - Lifecycle notifications and the in-process event bus
//! - [`journal`] - Append-only record of file changes
//! - [`config`] - JSON configuration loading and validation

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod directory;
pub mod download;
pub mod events;
pub mod journal;

// Re-export commonly used types
pub use config::{ConfigError, HubConfig};
pub use directory::{DirectoryModel, DirectoryProvider, DirectoryService};
pub use download::{
    Download, DownloadError, DownloadOutcome, DownloadRegistry, DownloadSnapshot, DownloadState,
    HttpClient, RegistryOptions,
};
pub use events::{DownloadEvent, EventBus, EventSink};
pub use journal::FileChangesLog;
