//! # Browse Protocol
//!
//! Talks to the paginated gallery at simpledesktops.com.
//!
//! ## Page Layout
//! Browse pages live at:
//! ```text
//! http://simpledesktops.com/browse/<page>/
//! ```
//! The response body is plain HTML; every wallpaper on the page appears as
//! an `img` tag whose `src` attribute is a preview-resolution URL. There is
//! no API and no authentication.
//!
//! ## Failure Policy
//! A page that 404s, times out, or fails to parse simply "has no images".
//! Nothing in this module surfaces an error for that: probing past the end
//! of the gallery is how discovery finds the end, and a flaky page must not
//! abort a caller's retry loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SharedConfig;
use crate::error::Result;

/// Base URL of the browse listing.
const BROWSE_URL: &str = "http://simpledesktops.com/browse";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Creates the HTTP client used for pages and transfers.
pub(crate) fn create_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?)
}

/// Port for fetching browse-page markup.
///
/// The HTTP implementation is [`HttpPageClient`]; tests substitute an
/// in-memory one.
#[async_trait]
pub trait PageClient: Send + Sync {
    /// Fetches the HTML body of the given browse page.
    async fn page_html(&self, page: u32) -> Result<String>;
}

/// [`PageClient`] backed by reqwest.
pub struct HttpPageClient {
    client: reqwest::Client,
}

impl HttpPageClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: create_client()?,
        })
    }
}

#[async_trait]
impl PageClient for HttpPageClient {
    async fn page_html(&self, page: u32) -> Result<String> {
        let url = format!("{BROWSE_URL}/{page}/");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Extracts every `img src` attribute from a page, in document order.
///
/// Malformed markup yields whatever the parser could salvage (usually an
/// empty list), never an error.
pub fn extract_image_links(html: &str) -> Vec<String> {
    let selector = Selector::parse("img").expect("valid img selector");

    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|tag| tag.value().attr("src"))
        .map(str::to_string)
        .collect()
}

/// Returns true if the page contains at least one image.
///
/// Network and parse failures count as unavailable.
pub async fn is_page_available(pages: &dyn PageClient, page: u32) -> bool {
    match pages.page_html(page).await {
        Ok(html) => !extract_image_links(&html).is_empty(),
        Err(e) => {
            debug!(page, error = %e, "probe treated as unavailable");
            false
        }
    }
}

/// Extends the known max page by probing forward from `max_page + 1`.
///
/// The scan is linear: each available page raises the shared config (so a
/// concurrent refresh immediately benefits), and the first unavailable page
/// ends the pass. The gallery's page sequence is dense, so an unavailable
/// page means "past the end", so there is no retry. Returns whether the
/// range grew.
pub async fn extend_max_page(pages: &dyn PageClient, config: &SharedConfig) -> bool {
    let start = config.read().expect("config lock poisoned").max_page;
    let mut page = start;

    while is_page_available(pages, page + 1).await {
        page += 1;
        config
            .write()
            .expect("config lock poisoned")
            .raise_max_page(page);
    }

    if page > start {
        info!(from = start, to = page, "extended known browse range");
    }
    page > start
}

/// Runs [`extend_max_page`] in the background, at most one pass at a time,
/// persisting the config once when the pass grew the range.
///
/// Returns `None` without spawning when a pass is already in flight. The
/// caller is never blocked; the guard is cleared when the pass finishes.
pub fn spawn_discovery(
    pages: Arc<dyn PageClient>,
    config: SharedConfig,
    running: Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    if running.swap(true, Ordering::SeqCst) {
        debug!("discovery already in flight");
        return None;
    }

    Some(tokio::spawn(async move {
        if extend_max_page(pages.as_ref(), &config).await {
            let snapshot = config.read().expect("config lock poisoned").clone();
            if let Err(e) = snapshot.save() {
                warn!(error = %e, "could not persist extended browse range");
            }
        }
        running.store(false, Ordering::SeqCst);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashSet;
    use std::sync::RwLock;

    /// In-memory page client: listed pages serve one image each, everything
    /// else fails the way a dead connection would.
    struct FakePages {
        available: HashSet<u32>,
    }

    impl FakePages {
        fn new(available: impl IntoIterator<Item = u32>) -> Self {
            Self {
                available: available.into_iter().collect(),
            }
        }
    }

    /// A real `reqwest::Error` without any network: an unparseable URL
    /// fails at send time.
    async fn network_error() -> crate::error::Error {
        reqwest::Client::new()
            .get("no-base-url")
            .send()
            .await
            .expect_err("relative url cannot be sent")
            .into()
    }

    #[async_trait]
    impl PageClient for FakePages {
        async fn page_html(&self, page: u32) -> Result<String> {
            if self.available.contains(&page) {
                Ok(format!(
                    "<html><body><img src=\"http://cdn/desktops/p{page}.png.295x184_q100.png\"/></body></html>"
                ))
            } else {
                Err(network_error().await)
            }
        }
    }

    fn shared_config(max_page: u32) -> SharedConfig {
        let config = Config {
            max_page,
            ..Config::default()
        };
        Arc::new(RwLock::new(config))
    }

    #[test]
    fn extracts_sources_in_document_order() {
        let html = r#"
            <html><body>
              <img src="http://cdn/a.png"/>
              <div><img src="http://cdn/b.png"></div>
              <img alt="no source">
              <img src="http://cdn/c.png"/>
            </body></html>
        "#;

        let links = extract_image_links(html);
        assert_eq!(links, ["http://cdn/a.png", "http://cdn/b.png", "http://cdn/c.png"]);
    }

    #[test]
    fn malformed_markup_yields_nothing() {
        assert!(extract_image_links("").is_empty());
        assert!(extract_image_links("<<<%%% not markup >>>").is_empty());
        assert!(extract_image_links("<html><p>no images</p></html>").is_empty());
    }

    #[tokio::test]
    async fn probe_reports_availability() {
        let pages = FakePages::new([3]);
        assert!(is_page_available(&pages, 3).await);
        assert!(!is_page_available(&pages, 4).await);
    }

    #[tokio::test]
    async fn discovery_stops_at_first_unavailable_page() {
        let pages = FakePages::new([5, 6, 7, 9]);
        let config = shared_config(4);

        assert!(extend_max_page(&pages, &config).await);

        // Page 8 ends the scan; page 9 is never reached.
        assert_eq!(config.read().unwrap().max_page, 7);
    }

    #[tokio::test]
    async fn failures_never_lower_max_page() {
        let pages = FakePages::new([]);
        let config = shared_config(12);

        assert!(!extend_max_page(&pages, &config).await);

        assert_eq!(config.read().unwrap().max_page, 12);
    }

    #[tokio::test]
    async fn only_one_discovery_pass_in_flight() {
        let pages: Arc<dyn PageClient> = Arc::new(FakePages::new([]));
        let config = shared_config(1);
        let running = Arc::new(AtomicBool::new(false));

        running.store(true, Ordering::SeqCst);
        assert!(spawn_discovery(pages.clone(), config.clone(), running.clone()).is_none());

        running.store(false, Ordering::SeqCst);
        let handle = spawn_discovery(pages, config, running.clone()).expect("should spawn");
        handle.await.unwrap();
        assert!(!running.load(Ordering::SeqCst));
    }
}
