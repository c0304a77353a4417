//! CLI entry point for rangeget.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use rangeget::download::{
    DownloadManager, DownloadManagerOptions, DownloadOptions, DownloadProgress, DownloadStatus,
};
use rangeget::events::DownloadEvent;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::{VerbositySetting, load_default_file_config};
use cli::{Args, Settings};

const BAR_TEMPLATE: &str =
    "{msg:30!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}";
const SPINNER_TEMPLATE: &str = "{spinner} {msg:30!} {bytes} {bytes_per_sec}";
const INTERRUPT_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let loaded = load_default_file_config()?;
    let settings = args.resolve(loaded.config.as_ref());

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.verbosity.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    if let Some(path) = loaded.path.as_deref().filter(|_| loaded.config.is_some()) {
        debug!(path = %path.display(), "loaded config file");
    }
    debug!(?settings, "effective settings");

    if args.urls.len() > 1 && !is_directory_target(&settings) {
        bail!(
            "--output must be a directory (ending with '{}') when downloading several URLs",
            std::path::MAIN_SEPARATOR
        );
    }

    // Segment temp files carry a per-run id, so a later run cannot resume them.
    let mut manager_options = DownloadManagerOptions {
        max_concurrent_downloads: settings.concurrency,
        cleanup_temp_files_on_cancel: true,
        ..DownloadManagerOptions::default()
    };
    if let Some(temp_dir) = &settings.temp_dir {
        manager_options.temp_directory.clone_from(temp_dir);
    }
    let manager = DownloadManager::new(manager_options);

    let bars = if settings.verbosity == VerbositySetting::Quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::new()
    };

    // Subscribe before starting so no terminal event can be missed.
    let rx = manager.subscribe();
    let mut active = HashMap::new();
    for url in &args.urls {
        let options = download_options(url, &settings);
        let id = manager
            .start_download(options)
            .with_context(|| format!("Cannot start download of {url}"))?;
        info!(download_id = %id, url = %url, "download started");
        let bar = bars.add(ProgressBar::new_spinner());
        bar.set_style(ProgressStyle::with_template(SPINNER_TEMPLATE)?);
        bar.set_message(url.clone());
        active.insert(id, bar);
    }

    let failed = track_downloads(&manager, rx, active).await?;
    manager.shutdown();

    if failed > 0 {
        bail!("{failed} of {} downloads did not complete", args.urls.len());
    }
    Ok(())
}

fn download_options(url: &str, settings: &Settings) -> DownloadOptions {
    DownloadOptions::new(url, settings.output.clone())
        .with_max_segments(settings.segments)
        .with_retry(settings.max_retries, settings.retry_delay)
        .with_timeout(settings.timeout)
        .with_overwrite(settings.overwrite)
        .with_resume(settings.resume)
}

fn is_directory_target(settings: &Settings) -> bool {
    let raw = settings.output.to_string_lossy();
    raw.ends_with('/') || raw.ends_with(std::path::MAIN_SEPARATOR) || settings.output.is_dir()
}

/// Drives the progress bars until every download is terminal or Ctrl-C is
/// pressed. Returns the number of downloads that did not complete.
async fn track_downloads(
    manager: &DownloadManager,
    mut rx: broadcast::Receiver<DownloadEvent>,
    mut active: HashMap<String, ProgressBar>,
) -> Result<usize> {
    let mut failed = 0;
    let mut poll = tokio::time::interval(std::time::Duration::from_secs(1));
    while !active.is_empty() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling downloads");
                for id in active.keys() {
                    manager.cancel_download(id);
                }
                for (id, bar) in active.drain() {
                    // Give each download a moment to remove its temp files.
                    if tokio::time::timeout(INTERRUPT_GRACE, manager.wait_for_completion(&id))
                        .await
                        .is_err()
                    {
                        debug!(download_id = %id, "download did not stop in time");
                    }
                    bar.abandon_with_message("interrupted");
                    failed += 1;
                }
                break;
            }
            event = rx.recv() => match event {
                Ok(event) => {
                    let Some(bar) = active.get(event.download_id()) else {
                        continue;
                    };
                    render(bar, event.progress())?;
                    if event.is_terminal() {
                        if !finish_bar(bar, &event) {
                            failed += 1;
                        }
                        active.remove(event.progress().download_id.as_str());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress display lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = poll.tick() => {
                // Downloads that left the registry without an observed terminal event.
                let gone: Vec<String> = active
                    .keys()
                    .filter(|id| manager.get_progress(id).is_none())
                    .cloned()
                    .collect();
                for id in gone {
                    if let Some(bar) = active.remove(&id) {
                        bar.abandon_with_message("finished (status unknown)");
                        failed += 1;
                    }
                }
            }
        }
    }
    Ok(failed)
}

fn render(bar: &ProgressBar, progress: &DownloadProgress) -> Result<()> {
    if let Some(total) = progress.known_total() {
        if bar.length() != Some(total) {
            bar.set_style(
                ProgressStyle::with_template(BAR_TEMPLATE)?.progress_chars("=> "),
            );
            bar.set_length(total);
        }
    }
    bar.set_position(progress.downloaded_bytes);
    if !progress.file_name.is_empty() {
        bar.set_message(progress.file_name.clone());
    }
    Ok(())
}

/// Finishes a bar for a terminal event. Returns true on success.
fn finish_bar(bar: &ProgressBar, event: &DownloadEvent) -> bool {
    let progress = event.progress();
    match progress.status {
        DownloadStatus::Completed => {
            info!(
                file = %progress.file_name,
                bytes = progress.downloaded_bytes,
                elapsed_ms = progress.elapsed.as_millis(),
                "download complete"
            );
            bar.finish_with_message(format!("{} done", progress.file_name));
            true
        }
        DownloadStatus::Cancelled => {
            bar.abandon_with_message(format!("{} cancelled", progress.file_name));
            false
        }
        _ => {
            let reason = progress.error_message.as_deref().unwrap_or("unknown error");
            warn!(file = %progress.file_name, error = %reason, "download failed");
            bar.abandon_with_message(format!("{} failed: {reason}", progress.file_name));
            false
        }
    }
}
