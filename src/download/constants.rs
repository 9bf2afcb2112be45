//! Constants for the download module (timeouts, buffers, temp naming).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes between body reads).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Marker appended to a file name while its body is still being written.
pub const TEMP_EXTENSION: &str = ".~";

/// Placeholder used when a resolved name would end with [`TEMP_EXTENSION`].
pub const TEMP_EXTENSION_REPLACEMENT: &str = "._";

/// Default write buffer for the body copy loop (8 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Default cadence of `DownloadUpdated` events.
pub const REPORT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on `"name (n).ext"` probing before giving up on a unique name.
pub const MAX_UNIQUE_NAME_ATTEMPTS: u32 = 10_000;
