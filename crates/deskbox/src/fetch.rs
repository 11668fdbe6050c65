//! Resumable download and extraction of the compressed disk-image artifact.
//!
//! The archive is fetched with byte-range requests so an interrupted transfer
//! resumes from the partial file's current length instead of restarting. A
//! 416 response means the partial file already covers the whole artifact.
//! Transient network or IO faults re-enter the resume loop after a backoff;
//! the loop gives up after [`MAX_STALLED_ATTEMPTS`] consecutive attempts that
//! made no byte progress.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::RANGE;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{ProvisionError, Result};
use crate::paths::ImageStore;

/// First delay after a transient transfer fault.
const RETRY_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
/// Backoff doubles up to this cap.
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);
/// Give up after this many consecutive attempts without byte progress.
const MAX_STALLED_ATTEMPTS: u32 = 10;
/// Log a progress line roughly every this many bytes.
const PROGRESS_LOG_STEP: u64 = 32 * 1024 * 1024;

/// Ensure the raw disk image for `url` exists in the store.
///
/// Downloads (resuming any partial file) and extracts the archive if the
/// image is absent. Returns the image path.
pub async fn ensure_image(
    client: &reqwest::Client,
    store: &ImageStore,
    url: &str,
) -> Result<PathBuf> {
    let image_path = store.image_path(url)?;
    if tokio::fs::try_exists(&image_path).await.unwrap_or(false) {
        return Ok(image_path);
    }

    tokio::fs::create_dir_all(store.dir()).await?;
    let archive_path = store.archive_path(url)?;

    download_resumable(client, url, &archive_path).await?;
    extract_archive(&archive_path, store.dir()).await?;

    if !tokio::fs::try_exists(&image_path).await.unwrap_or(false) {
        return Err(ProvisionError::Extract(format!(
            "archive did not contain {}",
            image_path.display()
        )));
    }
    Ok(image_path)
}

/// Fetch `url` into `target`, resuming from the file's current length.
async fn download_resumable(client: &reqwest::Client, url: &str, target: &Path) -> Result<()> {
    let mut backoff = RETRY_BACKOFF_INITIAL;
    let mut stalled = 0u32;

    loop {
        let offset = current_len(target).await;

        let mut request = client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                (stalled, backoff) =
                    note_transient(&e.to_string(), offset, offset, stalled, backoff).await?;
                continue;
            }
        };

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            // Nothing left to fetch: the partial file is the whole artifact.
            break;
        }
        if !response.status().is_success() {
            return Err(ProvisionError::Download(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        let total = response.content_length().map(|remaining| offset + remaining);
        match append_body(response, target, offset, total).await {
            Ok(()) => break,
            Err(detail) => {
                let reached = current_len(target).await;
                (stalled, backoff) =
                    note_transient(&detail, offset, reached, stalled, backoff).await?;
            }
        }
    }

    Ok(())
}

async fn current_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Record a transient fault: reset the stall counter on byte progress, give
/// up after too many progress-free attempts, otherwise sleep out the backoff.
/// Returns the updated `(stalled, backoff)` pair.
async fn note_transient(
    detail: &str,
    offset_before: u64,
    offset_after: u64,
    stalled: u32,
    backoff: Duration,
) -> Result<(u32, Duration)> {
    let (stalled, backoff) = if offset_after > offset_before {
        (1, RETRY_BACKOFF_INITIAL)
    } else {
        (stalled + 1, backoff)
    };
    if stalled >= MAX_STALLED_ATTEMPTS {
        return Err(ProvisionError::Download(format!(
            "no progress after {stalled} attempts: {detail}"
        )));
    }
    warn!(
        error = detail,
        resume_from = offset_after,
        retry_in_secs = backoff.as_secs(),
        "download interrupted, will resume"
    );
    tokio::time::sleep(backoff).await;
    Ok((stalled, (backoff * 2).min(RETRY_BACKOFF_MAX)))
}

/// Stream the response body onto the end of `target`.
///
/// Any chunk or write fault is transient by construction and reported as a
/// message for the resume loop.
async fn append_body(
    mut response: reqwest::Response,
    target: &Path,
    offset: u64,
    total: Option<u64>,
) -> std::result::Result<(), String> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(target)
        .await
        .map_err(|e| format!("open {}: {e}", target.display()))?;

    let mut received = offset;
    let mut next_log = offset + PROGRESS_LOG_STEP;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| format!("read chunk: {e}"))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("write {}: {e}", target.display()))?;
        received += chunk.len() as u64;
        if received >= next_log {
            log_progress(received, total);
            next_log = received + PROGRESS_LOG_STEP;
        }
    }

    file.flush()
        .await
        .map_err(|e| format!("flush {}: {e}", target.display()))?;
    log_progress(received, total);
    Ok(())
}

fn log_progress(received: u64, total: Option<u64>) {
    match total {
        Some(total) if total > 0 => {
            info!(
                received_mb = received / (1024 * 1024),
                total_mb = total / (1024 * 1024),
                percent = received * 100 / total,
                "downloading disk image"
            );
        }
        _ => {
            info!(received_mb = received / (1024 * 1024), "downloading disk image");
        }
    }
}

/// Unpack the gzip tarball into `dir`.
async fn extract_archive(archive: &Path, dir: &Path) -> Result<()> {
    let archive = archive.to_owned();
    let dir = dir.to_owned();

    // Sync IO on local files, acceptable for a one-shot extraction.
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive)
            .map_err(|e| ProvisionError::Extract(format!("open {}: {e}", archive.display())))?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut tarball = tar::Archive::new(decoder);
        tarball
            .unpack(&dir)
            .map_err(|e| ProvisionError::Extract(format!("unpack {}: {e}", archive.display())))
    })
    .await
    .map_err(|e| ProvisionError::Extract(format!("extract task: {e}")))?
}
