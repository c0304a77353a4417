//! Concatenation of segment files into the destination.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::DownloadError;
use super::constants::MERGING_SUFFIX;

/// Merges ordered segment files into one output file.
///
/// Output is written to `<output>.merging` and renamed into place only after
/// every segment has been copied, so a failed merge never leaves a partial
/// file at the destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMerger;

impl FileMerger {
    /// Creates a merger.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Copies `segments` in order into `output`, replacing any existing file.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::MissingSegment`] if a segment file does not
    /// exist, [`DownloadError::Io`] on copy or rename failures, and
    /// [`DownloadError::Cancelled`] if `cancel` fires between segments. The
    /// `.merging` file is removed in every error case.
    #[instrument(skip(self, segments, cancel), fields(output = %output.display(), segments = segments.len()))]
    pub async fn merge(
        &self,
        segments: &[PathBuf],
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let temp = merging_path(output);

        match copy_segments(segments, &temp, cancel).await {
            Ok(total) => {
                if let Err(e) = replace(&temp, output).await {
                    discard(&temp).await;
                    return Err(e);
                }
                info!(bytes = total, "merge complete");
                Ok(total)
            }
            Err(e) => {
                discard(&temp).await;
                Err(e)
            }
        }
    }
}

/// `<output>.merging`.
fn merging_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(MERGING_SUFFIX);
    PathBuf::from(name)
}

async fn copy_segments(
    segments: &[PathBuf],
    temp: &Path,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let file = File::create(temp)
        .await
        .map_err(|e| DownloadError::io(temp, e))?;
    let mut writer = BufWriter::new(file);
    let mut total = 0_u64;

    for segment in segments {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let mut reader = match File::open(segment).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::missing_segment(segment));
            }
            Err(e) => return Err(DownloadError::io(segment, e)),
        };
        let copied = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| DownloadError::io(segment, e))?;
        debug!(segment = %segment.display(), bytes = copied, "segment appended");
        total += copied;
    }

    writer.flush().await.map_err(|e| DownloadError::io(temp, e))?;
    writer
        .get_ref()
        .sync_all()
        .await
        .map_err(|e| DownloadError::io(temp, e))?;
    Ok(total)
}

/// Renames `temp` over `output`. The rename replaces an existing file in
/// one step, so the destination is never missing.
async fn replace(temp: &Path, output: &Path) -> Result<(), DownloadError> {
    fs::rename(temp, output)
        .await
        .map_err(|e| DownloadError::io(output, e))
}

async fn discard(temp: &Path) {
    if let Err(e) = fs::remove_file(temp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %temp.display(), error = %e, "failed to remove partial merge file");
        }
    }
}
