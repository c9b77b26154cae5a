//! # Image Source
//!
//! The orchestration layer: owns the in-memory candidate list, replays the
//! history store at startup, pulls fresh candidates from random browse
//! pages, and keeps list and store free of duplicates.
//!
//! ## Duplicate Handling
//! An image's dedup name is derived from its full-resolution path (see
//! [`crate::candidate`]). When a refresh picks an image that is already in
//! the list, the old entry is removed from both the list and the store
//! before the new one is inserted at the front, so after every successful
//! refresh the chosen image is the single, most-recent entry for its name.
//! A reselected duplicate therefore visibly moves to the front.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::browse::{extract_image_links, spawn_discovery, PageClient};
use crate::candidate::SdImage;
use crate::config::{SharedConfig, MIN_PAGE};
use crate::error::{Error, Result};
use crate::history::{HistoryRecord, HistoryStore};

/// A remote gallery that can hand out wallpaper candidates.
///
/// Concrete sources are selected at construction time by the composition
/// root; consumers only see this trait.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Pulls one fresh candidate from the remote source.
    ///
    /// Returns `Ok(true)` when a candidate was produced and committed,
    /// `Ok(false)` when the chosen page yielded nothing usable (callers
    /// decide whether to retry), and an error only when persisting the
    /// result failed.
    async fn refresh(&self) -> Result<bool>;

    /// Snapshot of the candidate list, newest-first.
    fn images(&self) -> Vec<SdImage>;

    /// Removes and returns the candidate at `index`, deleting its history
    /// record as well.
    fn remove_image(&self, index: usize) -> Result<SdImage>;
}

/// [`ImageSource`] backed by the simpledesktops.com browse listing.
pub struct SimpleDesktopsSource {
    pages: Arc<dyn PageClient>,
    history: Arc<HistoryStore>,
    config: SharedConfig,
    /// Newest-first candidate list. Held only for short synchronous
    /// sections; never across an await.
    images: RwLock<Vec<SdImage>>,
    /// Serializes `refresh()`; the remove-then-insert sequence must never
    /// interleave with another refresh.
    refresh_gate: tokio::sync::Mutex<()>,
    discovery_running: Arc<AtomicBool>,
}

impl SimpleDesktopsSource {
    /// Builds the source, replaying history into the candidate list and
    /// kicking off background page discovery.
    ///
    /// Must be called inside a tokio runtime; discovery is spawned, not
    /// awaited, so construction never waits on the network.
    pub fn new(
        pages: Arc<dyn PageClient>,
        history: Arc<HistoryStore>,
        config: SharedConfig,
    ) -> Self {
        let images: Vec<SdImage> = history
            .retrieve_all(true)
            .iter()
            .map(|record| SdImage::new(record.preview_url.as_str()))
            .collect();
        debug!(count = images.len(), "loaded candidate list from history");

        let source = Self {
            pages,
            history,
            config,
            images: RwLock::new(images),
            refresh_gate: tokio::sync::Mutex::new(()),
            discovery_running: Arc::new(AtomicBool::new(false)),
        };

        let _ = spawn_discovery(
            source.pages.clone(),
            source.config.clone(),
            source.discovery_running.clone(),
        );

        source
    }

    fn do_remove(&self, index: usize) -> Result<SdImage> {
        let mut images = self.images.write().expect("image list lock poisoned");
        let len = images.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }

        match images[index].name() {
            Some(name) => self.history.remove(&name)?,
            // No derivable name means nothing was ever stored under one.
            None => debug!(index, "no derivable name, no history record to delete"),
        }

        Ok(images.remove(index))
    }
}

#[async_trait]
impl ImageSource for SimpleDesktopsSource {
    async fn refresh(&self) -> Result<bool> {
        let _gate = self.refresh_gate.lock().await;

        let max_page = self.config.read().expect("config lock poisoned").max_page;
        let page = rand::rng().random_range(MIN_PAGE..=max_page.max(MIN_PAGE));

        let html = match self.pages.page_html(page).await {
            Ok(html) => html,
            Err(e) => {
                debug!(page, error = %e, "refresh could not fetch page");
                return Ok(false);
            }
        };

        let links = extract_image_links(&html);
        let Some(link) = links.choose(&mut rand::rng()) else {
            debug!(page, "page yielded no image links");
            return Ok(false);
        };
        let image = SdImage::new(link.as_str());

        // The image may already be in the list; remove the old entry first
        // so the list never holds two entries with the same name.
        let existing = {
            let images = self.images.read().expect("image list lock poisoned");
            images.iter().position(|i| i.same_image(&image))
        };
        if let Some(index) = existing {
            self.do_remove(index)?;
        }

        self.history
            .insert(HistoryRecord::new(image.preview_url.as_str()))?;
        self.images
            .write()
            .expect("image list lock poisoned")
            .insert(0, image);

        info!(page, "committed fresh candidate");
        Ok(true)
    }

    fn images(&self) -> Vec<SdImage> {
        self.images.read().expect("image list lock poisoned").clone()
    }

    fn remove_image(&self, index: usize) -> Result<SdImage> {
        self.do_remove(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashMap;

    const PREVIEW_A: &str =
        "http://static.simpledesktops.com/uploads/desktops/2020/01/30/a.png.295x184_q100.png";
    const PREVIEW_B: &str =
        "http://static.simpledesktops.com/uploads/desktops/2020/02/14/b.png.295x184_q100.png";
    const PREVIEW_C: &str =
        "http://static.simpledesktops.com/uploads/desktops/2020/03/01/c.png.295x184_q100.png";

    /// Serves a fixed set of image links per page; unknown pages are empty.
    struct FakePages {
        by_page: HashMap<u32, Vec<String>>,
    }

    impl FakePages {
        fn single_page(links: &[&str]) -> Self {
            let mut by_page = HashMap::new();
            by_page.insert(1, links.iter().map(|s| s.to_string()).collect());
            Self { by_page }
        }
    }

    #[async_trait]
    impl PageClient for FakePages {
        async fn page_html(&self, page: u32) -> Result<String> {
            let links = self.by_page.get(&page).cloned().unwrap_or_default();
            let tags: String = links
                .iter()
                .map(|l| format!("<img src=\"{l}\"/>"))
                .collect();
            Ok(format!("<html><body>{tags}</body></html>"))
        }
    }

    fn shared_config() -> SharedConfig {
        let config = Config {
            max_page: 1,
            ..Config::default()
        };
        Arc::new(std::sync::RwLock::new(config))
    }

    fn history_in(dir: &tempfile::TempDir) -> Arc<HistoryStore> {
        Arc::new(HistoryStore::open(dir.path().join("history.json")).unwrap())
    }

    fn names(source: &SimpleDesktopsSource) -> Vec<String> {
        source.images().iter().filter_map(SdImage::name).collect()
    }

    #[tokio::test]
    async fn refresh_commits_one_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let history = history_in(&dir);
        let source = SimpleDesktopsSource::new(
            Arc::new(FakePages::single_page(&[PREVIEW_A])),
            history.clone(),
            shared_config(),
        );

        assert!(source.refresh().await.unwrap());

        let images = source.images();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].preview_url, PREVIEW_A);
        assert_eq!(history.retrieve_all(true).len(), 1);
    }

    #[tokio::test]
    async fn refresh_on_empty_page_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let history = history_in(&dir);
        let source = SimpleDesktopsSource::new(
            Arc::new(FakePages::single_page(&[])),
            history.clone(),
            shared_config(),
        );

        assert!(!source.refresh().await.unwrap());
        assert!(source.images().is_empty());
        assert!(history.retrieve_all(true).is_empty());
    }

    #[tokio::test]
    async fn refresh_never_duplicates_names() {
        let dir = tempfile::tempdir().unwrap();
        let history = history_in(&dir);
        history.insert(HistoryRecord::new(PREVIEW_A)).unwrap();

        let source = SimpleDesktopsSource::new(
            Arc::new(FakePages::single_page(&[PREVIEW_A, PREVIEW_B])),
            history.clone(),
            shared_config(),
        );
        assert_eq!(source.images().len(), 1);

        assert!(source.refresh().await.unwrap());

        // Either A was reselected (list stays at one) or B was picked (list
        // grows by one); in both cases names are unique and the chosen image
        // sits at the front.
        let list = names(&source);
        assert!(list.len() == 1 || list.len() == 2, "unexpected list {list:?}");
        let mut deduped = list.clone();
        deduped.dedup();
        assert_eq!(list, deduped);
        assert_eq!(history.retrieve_all(true).len(), list.len());

        if list.len() == 2 {
            assert_eq!(list[0], "2020-02-14-b.png");
            assert_eq!(list[1], "2020-01-30-a.png");
        } else {
            assert_eq!(list[0], "2020-01-30-a.png");
        }
    }

    #[tokio::test]
    async fn reselected_duplicate_moves_to_front() {
        let dir = tempfile::tempdir().unwrap();
        let history = history_in(&dir);
        history.insert(HistoryRecord::new(PREVIEW_A)).unwrap();
        history.insert(HistoryRecord::new(PREVIEW_B)).unwrap();

        let source = SimpleDesktopsSource::new(
            Arc::new(FakePages::single_page(&[PREVIEW_A])),
            history.clone(),
            shared_config(),
        );
        // Loaded newest-first: B then A.
        assert_eq!(source.images()[0].preview_url, PREVIEW_B);

        assert!(source.refresh().await.unwrap());

        let list = names(&source);
        assert_eq!(list, ["2020-01-30-a.png", "2020-02-14-b.png"]);
        // The store reflects the re-insertion: A is now the newest record.
        assert_eq!(history.retrieve_all(true)[0].preview_url, PREVIEW_A);
    }

    #[tokio::test]
    async fn list_rebuilds_from_history_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        {
            let history = Arc::new(HistoryStore::open(&path).unwrap());
            let source = SimpleDesktopsSource::new(
                Arc::new(FakePages::single_page(&[PREVIEW_C])),
                history,
                shared_config(),
            );
            assert!(source.refresh().await.unwrap());
        }

        // Simulated restart: a new source over the same store file.
        let history = Arc::new(HistoryStore::open(&path).unwrap());
        let source = SimpleDesktopsSource::new(
            Arc::new(FakePages::single_page(&[])),
            history,
            shared_config(),
        );

        let images = source.images();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].preview_url, PREVIEW_C);
    }

    #[tokio::test]
    async fn remove_image_returns_front_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let history = history_in(&dir);
        for url in [PREVIEW_A, PREVIEW_B, PREVIEW_C] {
            history.insert(HistoryRecord::new(url)).unwrap();
        }

        let source = SimpleDesktopsSource::new(
            Arc::new(FakePages::single_page(&[])),
            history.clone(),
            shared_config(),
        );

        let removed = source.remove_image(0).unwrap();
        assert_eq!(removed.preview_url, PREVIEW_C);

        let remaining = source.images();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].preview_url, PREVIEW_B);
        assert_eq!(remaining[1].preview_url, PREVIEW_A);
        assert_eq!(history.retrieve_all(true).len(), 2);
    }

    #[tokio::test]
    async fn remove_image_rejects_bad_index() {
        let dir = tempfile::tempdir().unwrap();
        let source = SimpleDesktopsSource::new(
            Arc::new(FakePages::single_page(&[])),
            history_in(&dir),
            shared_config(),
        );

        let err = source.remove_image(0).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 0, len: 0 }));
    }
}
