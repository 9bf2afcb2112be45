//! Progress bars driven by download events.

use std::collections::HashMap;

use download_hub::DownloadEvent;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{msg:30!} [{bar:30}] {bytes}/{total_bytes} {binary_bytes_per_sec} eta {eta}";
const SPINNER_TEMPLATE: &str = "{spinner} {msg:30!} {bytes} {binary_bytes_per_sec}";

/// One bar per active download.
pub(crate) struct ProgressUi {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl ProgressUi {
    /// Draws to stderr unless `hidden`.
    pub(crate) fn new(hidden: bool) -> Self {
        let target = if hidden {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
        }
    }

    /// Applies one event. Returns `Some(completed)` when a download ended.
    pub(crate) fn handle(&mut self, event: &DownloadEvent) -> Option<bool> {
        match event {
            DownloadEvent::DownloadAdded { download } => {
                let bar = match u64::try_from(download.total_bytes) {
                    Ok(total) => ProgressBar::new(total).with_style(
                        ProgressStyle::with_template(BAR_TEMPLATE)
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("=> "),
                    ),
                    Err(_) => ProgressBar::new_spinner().with_style(
                        ProgressStyle::with_template(SPINNER_TEMPLATE)
                            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                    ),
                };
                let bar = self.multi.add(bar);
                bar.set_message(download.file_name.clone().unwrap_or_default());
                self.bars.insert(download.id.clone(), bar);
                None
            }
            DownloadEvent::DownloadUpdated {
                id,
                bytes_downloaded,
                ..
            } => {
                if let Some(bar) = self.bars.get(id) {
                    bar.set_position(*bytes_downloaded);
                }
                None
            }
            DownloadEvent::DownloadPaused { id } | DownloadEvent::DownloadResumed { id } => {
                if let Some(bar) = self.bars.get(id) {
                    bar.tick();
                }
                None
            }
            DownloadEvent::DownloadRemoved { id, completed } => {
                if let Some(bar) = self.bars.remove(id) {
                    if *completed {
                        bar.finish_with_message(format!("{} done", bar.message()));
                    } else {
                        bar.abandon_with_message(format!("{} failed", bar.message()));
                    }
                }
                Some(*completed)
            }
        }
    }

    /// Number of downloads with a bar.
    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.bars.len()
    }
}
