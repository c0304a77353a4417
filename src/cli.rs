//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use rangeget::download::{
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_MAX_SEGMENTS, DEFAULT_RETRY_ATTEMPTS, MAX_SEGMENTS,
    MIN_SEGMENTS,
};

use crate::app_config::{FileConfig, VerbositySetting};

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Default delay between segment retries in milliseconds.
const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Download files over HTTP(S) using parallel byte-range segments.
///
/// Each URL is probed first; servers that support range requests are
/// fetched in up to `--segments` parallel pieces, everything else as a
/// single stream. Interrupted downloads resume from their partial files.
#[derive(Parser, Debug)]
#[command(name = "rangeget")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Destination file (single URL) or directory (ends with a separator or exists)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum parallel segments per download (1-16)
    #[arg(short = 's', long, value_parser = clap::value_parser!(u32).range(i64::from(MIN_SEGMENTS)..=i64::from(MAX_SEGMENTS)))]
    pub segments: Option<u32>,

    /// Maximum concurrent downloads (1-32)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// Retry attempts per segment after the first failure (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Delay between segment retries in milliseconds (max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub retry_delay: Option<u64>,

    /// Per-request timeout in seconds (1-3600)
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Directory for segment temp files
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Replace existing destination files
    #[arg(long)]
    pub overwrite: bool,

    /// Ignore partial data on disk and start from scratch
    #[arg(long)]
    pub no_resume: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Effective settings after merging the command line over the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub output: PathBuf,
    pub segments: u32,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub temp_dir: Option<PathBuf>,
    pub overwrite: bool,
    pub resume: bool,
    pub verbosity: VerbositySetting,
}

impl Args {
    /// Merges explicit flags over `config`, falling back to built-in defaults.
    #[must_use]
    pub fn resolve(&self, config: Option<&FileConfig>) -> Settings {
        let empty = FileConfig::default();
        let config = config.unwrap_or(&empty);

        let output = self
            .output
            .clone()
            .or_else(|| config.output_dir.as_ref().map(|dir| with_trailing_separator(dir)))
            .unwrap_or_else(|| PathBuf::from(format!(".{}", std::path::MAIN_SEPARATOR)));

        let verbosity = if self.quiet {
            VerbositySetting::Quiet
        } else if self.verbose >= 2 {
            VerbositySetting::Debug
        } else if self.verbose == 1 {
            VerbositySetting::Verbose
        } else {
            config.verbosity.unwrap_or(VerbositySetting::Default)
        };

        Settings {
            output,
            segments: self
                .segments
                .or(config.segments)
                .unwrap_or(DEFAULT_MAX_SEGMENTS),
            concurrency: self
                .concurrency
                .or(config.concurrency)
                .map_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS, usize::from),
            max_retries: self
                .max_retries
                .or(config.max_retries)
                .map_or(DEFAULT_RETRY_ATTEMPTS, u32::from),
            retry_delay: Duration::from_millis(
                self.retry_delay
                    .or(config.retry_delay_ms)
                    .unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            timeout: Duration::from_secs(
                self.timeout
                    .or(config.timeout_secs)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            temp_dir: self.temp_dir.clone().or_else(|| config.temp_dir.clone()),
            overwrite: self.overwrite || config.overwrite.unwrap_or(false),
            resume: !self.no_resume && config.resume.unwrap_or(true),
            verbosity,
        }
    }
}

/// A configured output directory is always a directory, even if it does
/// not exist yet.
fn with_trailing_separator(dir: &std::path::Path) -> PathBuf {
    let mut raw = dir.as_os_str().to_os_string();
    let text = raw.to_string_lossy();
    if !text.ends_with('/') && !text.ends_with(std::path::MAIN_SEPARATOR) {
        raw.push(std::path::MAIN_SEPARATOR.to_string());
    }
    PathBuf::from(raw)
}
