//! Download engine: single-download state machine plus the registry that
//! coordinates concurrent downloads.
//!
//! # Features
//!
//! - Streaming downloads into `<name>.~` temp files, renamed on completion
//! - Pause, resume and cancel from any task
//! - File names from the request, Content-Disposition or the URL path,
//!   made unique within the target directory
//! - Periodic progress events with instantaneous speed
//! - Directory allow-list enforced on every start
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use download_hub::directory::{DirectoryModel, DirectoryService};
//! use download_hub::download::DownloadRegistry;
//! use download_hub::events::EventBus;
//!
//! # async fn example() {
//! let directories = DirectoryService::new(vec![DirectoryModel {
//!     name: "downloads".into(),
//!     path: "/srv/downloads".into(),
//!     create_allowed: true,
//!     edit_allowed: false,
//! }]);
//! let bus = EventBus::default();
//! let mut events = bus.subscribe();
//! let registry = DownloadRegistry::new(Arc::new(directories), Arc::new(bus));
//!
//! if registry
//!     .start_download("https://example.com/data.bin", "downloads", None)
//!     .await
//! {
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! }
//! # }
//! ```

mod client;
pub mod constants;
mod error;
pub mod filename;
mod progress;
mod query_params;
mod registry;
mod task;

pub use client::{DEFAULT_USER_AGENT, HttpClient, ResponseHead};
pub use error::DownloadError;
pub use filename::{NameResolution, NameResolver, is_temp_file_name, temp_file_name};
pub use progress::{ProgressReporter, ReporterHandle};
pub use query_params::{QueryParams, prepare_download_url};
pub use registry::{DownloadRegistry, FailedDownloadInfo, RegistryOptions};
pub use task::{
    Download, DownloadObserver, DownloadOutcome, DownloadSnapshot, DownloadState,
};
