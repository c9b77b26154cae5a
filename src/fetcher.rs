//! # Fetcher
//!
//! The consumer-facing façade: composes the image source and the transfer
//! engine into the two user-visible actions, "get me a new candidate" and
//! "download this candidate", each independently cancellable and each
//! reporting fractional progress.
//!
//! ## One Transfer Per Kind
//! At most one fetch and one download run at a time. Starting a second
//! transfer of the same kind is rejected with
//! [`Error::AlreadyInProgress`] rather than cancelling and replacing it,
//! so the current operation keeps its one visible outcome.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::info;

use crate::candidate::SdImage;
use crate::error::{Error, Result};
use crate::source::ImageSource;
use crate::transfer::{Progress, Transfer, TransferEngine};

/// A freshly produced candidate together with its decoded preview.
pub struct Fetched {
    pub image: SdImage,
    pub preview: image::DynamicImage,
}

/// Single-flight slot for one kind of transfer.
#[derive(Debug)]
struct TransferSlot {
    kind: &'static str,
    active: Mutex<Option<Arc<Transfer>>>,
}

impl TransferSlot {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            active: Mutex::new(None),
        }
    }

    /// Claims the slot, or rejects when a transfer is already running.
    /// The slot frees itself when the returned guard drops.
    fn begin(&self) -> Result<SlotGuard<'_>> {
        let mut active = self.active.lock().expect("transfer slot lock poisoned");
        if active.is_some() {
            return Err(Error::AlreadyInProgress { kind: self.kind });
        }

        let transfer = Arc::new(Transfer::new());
        *active = Some(transfer.clone());
        Ok(SlotGuard {
            slot: self,
            transfer,
        })
    }

    /// Cancels the active transfer, if any. Nothing to do otherwise.
    fn cancel(&self) {
        let active = self.active.lock().expect("transfer slot lock poisoned");
        if let Some(transfer) = active.as_ref() {
            transfer.cancel();
        }
    }

    fn is_active(&self) -> bool {
        self.active
            .lock()
            .expect("transfer slot lock poisoned")
            .is_some()
    }

    fn progress(&self) -> Option<watch::Receiver<Progress>> {
        self.active
            .lock()
            .expect("transfer slot lock poisoned")
            .as_ref()
            .map(|t| t.progress())
    }
}

/// Occupies a [`TransferSlot`] for the duration of one operation.
#[derive(Debug)]
struct SlotGuard<'a> {
    slot: &'a TransferSlot,
    transfer: Arc<Transfer>,
}

impl SlotGuard<'_> {
    fn transfer(&self) -> &Transfer {
        &self.transfer
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        *self
            .slot
            .active
            .lock()
            .expect("transfer slot lock poisoned") = None;
    }
}

/// Drives candidate production and downloads for one consumer.
pub struct Fetcher {
    source: Arc<dyn ImageSource>,
    engine: TransferEngine,
    fetch_slot: TransferSlot,
    download_slot: TransferSlot,
}

impl Fetcher {
    pub fn new(source: Arc<dyn ImageSource>, engine: TransferEngine) -> Self {
        Self {
            source,
            engine,
            fetch_slot: TransferSlot::new("fetch"),
            download_slot: TransferSlot::new("download"),
        }
    }

    pub fn source(&self) -> &Arc<dyn ImageSource> {
        &self.source
    }

    /// Produces a fresh candidate and its decoded preview.
    ///
    /// `Ok(None)` means the randomly chosen page yielded nothing this time;
    /// the list is unchanged and the caller may simply try again.
    pub async fn fetch(&self) -> Result<Option<Fetched>> {
        let guard = self.fetch_slot.begin()?;

        if !self.source.refresh().await? {
            return Ok(None);
        }
        let Some(image) = self.source.images().into_iter().next() else {
            return Ok(None);
        };

        let preview = self
            .engine
            .fetch_image(&image.preview_url, guard.transfer())
            .await?;
        info!(url = %image.preview_url, "fetched preview");

        Ok(Some(Fetched { image, preview }))
    }

    /// Downloads the full-resolution file for `image` into `dest_dir`.
    ///
    /// Fails with [`Error::NoFullReference`] before touching the network
    /// when the full-resolution URL cannot be derived.
    pub async fn download(&self, image: &SdImage, dest_dir: &Path) -> Result<PathBuf> {
        let guard = self.download_slot.begin()?;

        let no_reference = || Error::NoFullReference {
            preview_url: image.preview_url.clone(),
        };
        let full_url = image.full_url().ok_or_else(no_reference)?;
        let file_name = image.file_name().ok_or_else(no_reference)?;

        let path = self
            .engine
            .download(&full_url, dest_dir, &file_name, guard.transfer())
            .await?;
        info!(path = %path.display(), "downloaded full image");

        Ok(path)
    }

    /// Cancels the in-flight fetch, if any.
    pub fn cancel_fetch(&self) {
        self.fetch_slot.cancel();
    }

    /// Cancels the in-flight download, if any.
    pub fn cancel_download(&self) {
        self.download_slot.cancel();
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_slot.is_active()
    }

    pub fn is_downloading(&self) -> bool {
        self.download_slot.is_active()
    }

    /// Progress of the in-flight fetch, when one is running.
    pub fn fetch_progress(&self) -> Option<watch::Receiver<Progress>> {
        self.fetch_slot.progress()
    }

    /// Progress of the in-flight download, when one is running.
    pub fn download_progress(&self) -> Option<watch::Receiver<Progress>> {
        self.download_slot.progress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct IdleSource;

    #[async_trait]
    impl ImageSource for IdleSource {
        async fn refresh(&self) -> Result<bool> {
            Ok(false)
        }

        fn images(&self) -> Vec<SdImage> {
            Vec::new()
        }

        fn remove_image(&self, index: usize) -> Result<SdImage> {
            Err(Error::IndexOutOfRange { index, len: 0 })
        }
    }

    fn fetcher() -> Fetcher {
        Fetcher::new(Arc::new(IdleSource), TransferEngine::new().unwrap())
    }

    #[test]
    fn slot_rejects_second_claim() {
        let slot = TransferSlot::new("fetch");

        let guard = slot.begin().unwrap();
        assert!(slot.is_active());

        let err = slot.begin().unwrap_err();
        assert!(matches!(err, Error::AlreadyInProgress { kind: "fetch" }));

        drop(guard);
        assert!(!slot.is_active());
        assert!(slot.begin().is_ok());
    }

    #[test]
    fn slot_cancel_reaches_active_transfer() {
        let slot = TransferSlot::new("download");

        // No transfer running: nothing happens.
        slot.cancel();

        let guard = slot.begin().unwrap();
        slot.cancel();
        assert!(guard.transfer().is_cancelled());
    }

    #[test]
    fn progress_only_while_active() {
        let slot = TransferSlot::new("fetch");
        assert!(slot.progress().is_none());

        let _guard = slot.begin().unwrap();
        assert!(slot.progress().is_some());
    }

    #[tokio::test]
    async fn fetch_on_dry_source_returns_none_and_frees_slot() {
        let fetcher = fetcher();

        assert!(fetcher.fetch().await.unwrap().is_none());
        assert!(!fetcher.is_fetching());
        assert!(fetcher.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn download_without_full_reference_fails_fast() {
        let fetcher = fetcher();
        let dir = tempfile::tempdir().unwrap();

        // Preview URL without the size-suffix pattern: nothing to download.
        let image = SdImage::new("http://static.simpledesktops.com/uploads/desktops/plain.png");
        let err = fetcher.download(&image, dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::NoFullReference { .. }));

        assert!(!fetcher.is_downloading());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
