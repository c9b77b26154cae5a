//! # Transfer Engine
//!
//! Streams image bytes from the network, either into memory (preview
//! fetch, decoded before it is returned) or onto disk (full-resolution
//! download).
//!
//! ## Progress
//! Every transfer publishes `(received, total)` on a watch channel as
//! chunks arrive; received counts only ever grow, and reach the total on
//! success. `total` is absent when the server sends no content length.
//!
//! ## Cancellation
//! A [`Transfer`] handle carries a cancel flag that is checked on every
//! chunk. Cancelling removes any partial file and resolves the operation
//! with [`Error::Cancelled`], distinct from a failure so callers can keep
//! error reporting quiet for intentional aborts. Cancelling twice, or
//! after the transfer finished, does nothing.
//!
//! ## Downloads Are Atomic
//! Bytes go to `<name>.part` next to the target; the file is renamed into
//! place only after the stream completed and was flushed. A cancelled or
//! failed download never leaves anything at the final path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{pin_mut, Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::debug;

use crate::browse::create_client;
use crate::error::{Error, Result};

/// Byte counts for one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes received so far.
    pub received: u64,
    /// Expected size, when the server reported one.
    pub total: Option<u64>,
}

impl Progress {
    /// Completed fraction in `0.0..=1.0`; `0.0` while the total is unknown.
    pub fn fraction(&self) -> f64 {
        match self.total {
            Some(total) if total > 0 => (self.received as f64 / total as f64).min(1.0),
            _ => 0.0,
        }
    }
}

/// Handle for one in-flight transfer: progress subscription plus cancel
/// control. Created by the caller and passed to the engine operation.
#[derive(Debug)]
pub struct Transfer {
    cancelled: AtomicBool,
    progress: watch::Sender<Progress>,
}

impl Transfer {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            cancelled: AtomicBool::new(false),
            progress,
        }
    }

    /// Requests cancellation. Safe to call at any time, any number of
    /// times; after natural completion it has no effect.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Subscribes to progress updates. The receiver always holds the
    /// latest value.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    fn report(&self, received: u64, total: Option<u64>) {
        self.progress.send_replace(Progress { received, total });
    }
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}

/// Performs preview fetches and full-resolution downloads.
pub struct TransferEngine {
    client: reqwest::Client,
}

impl TransferEngine {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: create_client()?,
        })
    }

    /// Fetches and decodes an image, reporting progress on `transfer`.
    pub async fn fetch_image(
        &self,
        url: &str,
        transfer: &Transfer,
    ) -> Result<image::DynamicImage> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length();
        let stream = response.bytes_stream().map(|r| r.map_err(Error::from));

        let bytes = collect_stream(stream, total, transfer).await?;
        debug!(url, bytes = bytes.len(), "fetched image data");

        Ok(image::load_from_memory(&bytes)?)
    }

    /// Downloads `url` into `dest_dir` under `file_name`.
    ///
    /// Returns the final path on success. On cancellation or failure the
    /// partial file is removed and nothing exists at the final path.
    pub async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        file_name: &str,
        transfer: &Transfer,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| Error::Destination {
                path: dest_dir.to_path_buf(),
                source: e,
            })?;
        let target = dest_dir.join(file_name);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length();
        let stream = response.bytes_stream().map(|r| r.map_err(Error::from));

        download_stream(stream, &target, total, transfer).await
    }
}

/// Accumulates a byte stream in memory with per-chunk progress and
/// cancellation checks.
async fn collect_stream<S, B>(stream: S, total: Option<u64>, transfer: &Transfer) -> Result<Vec<u8>>
where
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
{
    pin_mut!(stream);

    let mut buf = match total {
        Some(total) => Vec::with_capacity(total as usize),
        None => Vec::new(),
    };
    while let Some(chunk) = stream.next().await {
        if transfer.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let chunk = chunk?;
        buf.extend_from_slice(chunk.as_ref());
        transfer.report(buf.len() as u64, total);
    }

    Ok(buf)
}

/// Streams bytes to `<target>.part`, renaming to `target` on success.
async fn download_stream<S, B>(
    stream: S,
    target: &Path,
    total: Option<u64>,
    transfer: &Transfer,
) -> Result<PathBuf>
where
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
{
    pin_mut!(stream);

    let part = target.with_extension("part");
    let mut file = tokio::fs::File::create(&part)
        .await
        .map_err(|e| Error::Destination {
            path: part.clone(),
            source: e,
        })?;

    let mut received: u64 = 0;
    let written: Result<()> = async {
        while let Some(chunk) = stream.next().await {
            if transfer.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let chunk = chunk?;
            file.write_all(chunk.as_ref())
                .await
                .map_err(|e| Error::Destination {
                    path: part.clone(),
                    source: e,
                })?;
            received += chunk.as_ref().len() as u64;
            transfer.report(received, total);
        }
        file.flush().await.map_err(|e| Error::Destination {
            path: part.clone(),
            source: e,
        })
    }
    .await;

    drop(file);
    match written {
        Ok(()) => {
            tokio::fs::rename(&part, target)
                .await
                .map_err(|e| Error::Destination {
                    path: target.to_path_buf(),
                    source: e,
                })?;
            Ok(target.to_path_buf())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}
