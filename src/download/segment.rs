//! Byte-range segments and the worker that fills one segment's file.
//!
//! A segment is written to its own temp file (or, in single-stream mode,
//! straight into the destination). The file always holds exactly
//! `downloaded_bytes` bytes of the range, so a later attempt resumes by
//! requesting `start_byte + downloaded_bytes` onwards.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::DownloadError;
use super::client::{range_header, send_request};
use super::options::DownloadOptions;
use super::progress::DownloadStatus;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error, retry_after_delay};

/// One contiguous byte range of a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSegment {
    /// Index within the download (merge order).
    pub id: usize,
    /// Owning download.
    pub download_id: String,
    /// First byte of the range (inclusive).
    pub start_byte: u64,
    /// Last byte of the range (inclusive); `None` when the size is unknown.
    pub end_byte: Option<u64>,
    /// Bytes of the range already on disk.
    pub downloaded_bytes: u64,
    /// File holding this segment's bytes.
    pub temp_file_path: PathBuf,
    /// Segment status.
    pub status: DownloadStatus,
    /// Last failure message.
    pub error_message: Option<String>,
}

/// Segment shared between its worker, the progress ticker and snapshot getters.
pub type SharedSegment = Arc<Mutex<DownloadSegment>>;

impl DownloadSegment {
    /// Creates a Pending segment covering `[start_byte, end_byte]`.
    pub fn new(
        id: usize,
        download_id: impl Into<String>,
        start_byte: u64,
        end_byte: Option<u64>,
        temp_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            download_id: download_id.into(),
            start_byte,
            end_byte,
            downloaded_bytes: 0,
            temp_file_path: temp_file_path.into(),
            status: DownloadStatus::Pending,
            error_message: None,
        }
    }

    /// Number of bytes in the range; `None` when open-ended.
    #[must_use]
    pub fn length(&self) -> Option<u64> {
        self.end_byte
            .map(|end| end.saturating_sub(self.start_byte).saturating_add(1))
    }

    /// Bytes still missing; `None` when open-ended.
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        self.length()
            .map(|len| len.saturating_sub(self.downloaded_bytes))
    }

    /// True once every byte of a bounded range is on disk.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.length()
            .is_some_and(|len| self.downloaded_bytes >= len)
    }

    /// Absolute offset of the next byte to request.
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.start_byte + self.downloaded_bytes
    }

    /// Picks up bytes already present in the segment file from an earlier run.
    ///
    /// Returns the number of bytes adopted. A missing file adopts nothing,
    /// and so does a file longer than the segment: it cannot hold this
    /// range's bytes, so the next attempt truncates it and starts over.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] if the file exists but cannot be inspected.
    pub async fn adopt_existing_file(&mut self) -> Result<u64, DownloadError> {
        let existing = match tokio::fs::metadata(&self.temp_file_path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(DownloadError::io(&self.temp_file_path, e)),
        };

        let adopted = match self.length() {
            Some(len) if existing > len => {
                warn!(
                    segment = self.id,
                    existing,
                    expected = len,
                    path = %self.temp_file_path.display(),
                    "existing file is longer than the segment, starting over"
                );
                0
            }
            _ => existing,
        };
        self.downloaded_bytes = adopted;
        if self.is_complete() {
            self.status = DownloadStatus::Completed;
        }
        debug!(
            segment = self.id,
            adopted,
            path = %self.temp_file_path.display(),
            "adopted existing segment data"
        );
        Ok(adopted)
    }
}

/// Temp file name for segment `index` of `download_id`.
#[must_use]
pub fn segment_temp_path(temp_dir: &Path, download_id: &str, index: usize) -> PathBuf {
    temp_dir.join(format!("{download_id}_segment_{index}.tmp"))
}

/// Splits `[0, content_length - 1]` into at most `max_segments` equal ranges.
///
/// The last range absorbs the remainder; the count is clamped so that no
/// range is empty.
#[must_use]
pub fn plan_segments(
    download_id: &str,
    content_length: u64,
    max_segments: u32,
    temp_dir: &Path,
) -> Vec<DownloadSegment> {
    if content_length == 0 {
        return Vec::new();
    }
    let count = u64::from(max_segments.max(1)).min(content_length);
    let size = content_length / count;

    (0..count)
        .map(|i| {
            let start = i * size;
            let end = if i == count - 1 {
                content_length - 1
            } else {
                start + size - 1
            };
            #[allow(clippy::cast_possible_truncation)]
            let index = i as usize;
            DownloadSegment::new(
                index,
                download_id,
                start,
                Some(end),
                segment_temp_path(temp_dir, download_id, index),
            )
        })
        .collect()
}

/// Segment covering the whole resource, written directly to `destination`.
#[must_use]
pub fn single_stream_segment(
    download_id: &str,
    destination: &Path,
    content_length: Option<u64>,
) -> DownloadSegment {
    DownloadSegment::new(
        0,
        download_id,
        0,
        content_length.filter(|len| *len > 0).map(|len| len - 1),
        destination,
    )
}

fn lock(segment: &SharedSegment) -> std::sync::MutexGuard<'_, DownloadSegment> {
    segment.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Downloads one segment with a bounded retry budget.
#[derive(Debug, Clone)]
pub struct SegmentDownloader {
    client: Client,
}

impl SegmentDownloader {
    /// Creates a downloader issuing requests through `client`.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fills `segment` from the server, retrying transient failures.
    ///
    /// Each chunk's size is reported through `on_bytes` after it has been
    /// written and counted in `segment.downloaded_bytes`. Up to
    /// `options.retry_attempts` retries are made, `options.retry_delay`
    /// apart; every failed attempt is recorded in `segment.error_message`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Cancelled`] when `cancel` fires (the segment
    /// status is left for the caller to set), or the last error once the
    /// budget is exhausted or a permanent failure occurs (segment marked
    /// Failed).
    #[instrument(skip_all, fields(url = %options.url, segment = segment_id(segment)))]
    pub async fn download_segment(
        &self,
        segment: &SharedSegment,
        options: &DownloadOptions,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let policy = RetryPolicy::from_options(options);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let error = match self.attempt(segment, options, on_bytes, cancel).await {
                Ok(()) => {
                    let mut seg = lock(segment);
                    seg.status = DownloadStatus::Completed;
                    seg.error_message = None;
                    return Ok(());
                }
                Err(e) => e,
            };

            let failure = classify_error(&error);
            if failure == FailureType::Cancelled {
                return Err(error);
            }
            lock(segment).error_message = Some(error.to_string());

            match policy.should_retry(failure, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    let delay = retry_after_delay(&error).map_or(delay, |wait| wait.max(delay));
                    warn!(
                        attempt,
                        next_attempt = next,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "segment attempt failed, retrying"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(DownloadError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(attempt, reason = %reason, error = %error, "segment failed");
                    lock(segment).status = DownloadStatus::Failed;
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(
        &self,
        segment: &SharedSegment,
        options: &DownloadOptions,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let (start, end, mut downloaded, path) = {
            let mut seg = lock(segment);
            if seg.is_complete() {
                seg.status = DownloadStatus::Completed;
                return Ok(());
            }
            seg.status = DownloadStatus::Downloading;
            (
                seg.start_byte,
                seg.end_byte,
                seg.downloaded_bytes,
                seg.temp_file_path.clone(),
            )
        };

        let offset = start + downloaded;
        let range = (offset > 0 || end.is_some()).then(|| range_header(offset, end));

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::Cancelled),
            result = send_request(&self.client, Method::GET, &options.url, range.as_deref()) => result?,
        };

        if response.status() != StatusCode::PARTIAL_CONTENT && offset > 0 {
            // A full body is only usable when it lines up with the start of this range.
            if start != 0 {
                return Err(DownloadError::range_not_honored(&options.url, offset));
            }
            debug!(offset, "server ignored range, restarting from zero");
            downloaded = 0;
            lock(segment).downloaded_bytes = 0;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        file.set_len(downloaded)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        file.seek(SeekFrom::Start(downloaded))
            .await
            .map_err(|e| DownloadError::io(&path, e))?;

        let mut writer = BufWriter::with_capacity(options.buffer_size, file);
        let mut stream = response.bytes_stream();
        let mut remaining = end.map(|end| (end - start + 1).saturating_sub(downloaded));
        let expected = remaining;
        let mut received: u64 = 0;

        loop {
            if remaining == Some(0) {
                break;
            }
            let next = tokio::select! {
                () = cancel.cancelled() => {
                    writer.flush().await.map_err(|e| DownloadError::io(&path, e))?;
                    return Err(DownloadError::Cancelled);
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    writer.flush().await.map_err(|e| DownloadError::io(&path, e))?;
                    return Err(DownloadError::network(&options.url, e));
                }
            };

            let take = match remaining {
                Some(left) => chunk.len().min(usize::try_from(left).unwrap_or(usize::MAX)),
                None => chunk.len(),
            };
            writer
                .write_all(&chunk[..take])
                .await
                .map_err(|e| DownloadError::io(&path, e))?;

            let n = take as u64;
            received += n;
            remaining = remaining.map(|left| left - n);
            lock(segment).downloaded_bytes += n;
            on_bytes(n);
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(&path, e))?;

        if let (Some(expected), Some(left)) = (expected, remaining) {
            if left > 0 {
                return Err(DownloadError::incomplete(&options.url, expected, received));
            }
        }

        if end.is_none() {
            // Open-ended transfer: the server closing the stream is the end.
            let mut seg = lock(segment);
            seg.end_byte = Some((seg.start_byte + seg.downloaded_bytes).saturating_sub(1));
        }
        Ok(())
    }
}

fn segment_id(segment: &SharedSegment) -> usize {
    lock(segment).id
}
