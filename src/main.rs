//! CLI entry point for download-hub.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use download_hub::config::{self, HubConfig};
use download_hub::{DirectoryService, DownloadEvent, DownloadRegistry, EventBus, FileChangesLog};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

mod cli;
mod progress_ui;

use cli::Args;
use progress_ui::ProgressUi;

/// Event buffer for the CLI subscriber; large enough that bars rarely lag.
const EVENT_CAPACITY: usize = 4096;

/// How often to look at the registry once events were lost.
const LAG_RECHECK_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = load_config(&args)?;
    let journal = config.journal();
    let directories = Arc::new(config.directory_service(Arc::clone(&journal)));

    if args.list_dirs {
        for name in directories.download_allowed_directory_names() {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let directory = args.dir.as_deref().context("--dir is required")?;
    run_downloads(&args, &config, directories, journal, directory).await
}

fn load_config(args: &Args) -> Result<HubConfig> {
    if let Some(path) = &args.config {
        let config = config::load(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?;
        info!(path = %path.display(), "loaded config");
        return Ok(config);
    }

    let loaded = config::load_default().context("Failed to load default config")?;
    match (&loaded.path, loaded.loaded_from_file) {
        (Some(path), true) => info!(path = %path.display(), "loaded config"),
        (Some(path), false) => warn!(path = %path.display(), "no config file found, no directories configured"),
        (None, _) => warn!("no config location known, no directories configured"),
    }
    Ok(loaded.config)
}

async fn run_downloads(
    args: &Args,
    config: &HubConfig,
    directories: Arc<DirectoryService>,
    journal: Arc<FileChangesLog>,
    directory: &str,
) -> Result<ExitCode> {
    let bus = EventBus::new(EVENT_CAPACITY);
    let mut events = bus.subscribe();
    let registry = DownloadRegistry::new(directories, Arc::new(bus))
        .with_options(config.registry_options())
        .with_client(config.http_client())
        .with_journal(journal);

    let mut started = 0usize;
    let mut rejected = 0usize;
    for url in &args.urls {
        if registry
            .start_download(url, directory, args.name.as_deref())
            .await
        {
            started += 1;
        } else {
            rejected += 1;
            warn!(url = %url, "download did not start");
        }
    }

    let mut ui = ProgressUi::new(args.quiet);
    let completed =
        wait_for_downloads(&registry, &mut events, &mut ui, started, tokio::signal::ctrl_c()).await;

    let failed = started.saturating_sub(completed) + rejected;
    info!(completed, failed, total = args.urls.len(), "downloads finished");

    if failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Drives the progress UI until `started` downloads have ended. Returns how
/// many completed.
async fn wait_for_downloads(
    registry: &DownloadRegistry,
    events: &mut broadcast::Receiver<DownloadEvent>,
    ui: &mut ProgressUi,
    started: usize,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> usize {
    let mut finished = 0usize;
    let mut completed = 0usize;
    let mut interrupted = false;
    let mut lagged = false;
    tokio::pin!(interrupt);
    let mut recheck = tokio::time::interval(LAG_RECHECK_INTERVAL);

    while finished < started {
        // A lagged receiver may have missed `DownloadRemoved` events.
        if lagged && registry.list_active_downloads().is_empty() {
            while let Ok(event) = events.try_recv() {
                ui.handle(&event);
            }
            if !interrupted {
                completed = started.saturating_sub(registry.failed_downloads().len());
            }
            break;
        }

        tokio::select! {
            result = &mut interrupt, if !interrupted => {
                interrupted = true;
                if let Err(e) = result {
                    warn!(error = %e, "could not listen for Ctrl-C");
                    continue;
                }
                let cancelled = registry.shutdown();
                warn!(cancelled, "interrupted, cancelling downloads");
            }
            _ = recheck.tick(), if lagged => {}
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(done) = ui.handle(&event) {
                        finished += 1;
                        completed += usize::from(done);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress events lagged");
                    lagged = true;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    completed
}
