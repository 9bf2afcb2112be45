//! Periodic throughput sampling for active downloads.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::task::Download;
use crate::events::{DownloadEvent, EventSink};

/// Spawns one sampler task per download, emitting `DownloadUpdated` events.
#[derive(Clone)]
pub struct ProgressReporter {
    interval: Duration,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Creates a reporter ticking every `interval`.
    #[must_use]
    pub fn new(interval: Duration, sink: Arc<dyn EventSink>) -> Self {
        Self { interval, sink }
    }

    /// Starts sampling `download` until the returned handle is stopped or dropped.
    ///
    /// The first sample is taken one full interval after this call. While the
    /// download is paused nothing is emitted; sampling restarts with a fresh
    /// baseline once it resumes.
    #[must_use]
    pub fn spawn(&self, download: Arc<Download>) -> ReporterHandle {
        let gate = Arc::new(Mutex::new(true));
        let stop = CancellationToken::new();

        let task = tokio::spawn(sample(
            download,
            self.interval,
            Arc::clone(&self.sink),
            Arc::clone(&gate),
            stop.clone(),
        ));

        ReporterHandle { gate, stop, task }
    }
}

/// Owner of a running sampler.
#[derive(Debug)]
pub struct ReporterHandle {
    gate: Arc<Mutex<bool>>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ReporterHandle {
    /// Stops the sampler.
    ///
    /// Once this returns no further event is published for the download,
    /// even if the sampler task is still winding down.
    pub fn stop(&self) {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.stop.cancel();
    }

    /// True once the sampler task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::cast_precision_loss)]
async fn sample(
    download: Arc<Download>,
    interval: Duration,
    sink: Arc<dyn EventSink>,
    gate: Arc<Mutex<bool>>,
    stop: CancellationToken,
) {
    let mut paused = download.pause_signal();
    let mut last_bytes = download.bytes_downloaded();
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        if *paused.borrow_and_update() {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = paused.wait_for(|paused| !*paused) => {}
            }
            last_bytes = download.bytes_downloaded();
            last_tick = Instant::now();
            continue;
        }

        let now = Instant::now();
        let bytes = download.bytes_downloaded();
        let elapsed = now.duration_since(last_tick).as_secs_f64();
        let speed = if elapsed > 0.0 {
            bytes.saturating_sub(last_bytes) as f64 / elapsed
        } else {
            0.0
        };
        last_bytes = bytes;
        last_tick = now;
        download.set_speed(speed);

        let open = gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            break;
        }
        sink.publish(DownloadEvent::DownloadUpdated {
            id: download.id().to_string(),
            bytes_downloaded: bytes,
            total_bytes: download.total_bytes(),
            speed,
        });
        drop(open);
        trace!(id = %download.id(), bytes, speed, "progress sampled");
    }
}
