//! # Simple Desktops Wallpaper
//!
//! Fetches wallpapers from the curated gallery at simpledesktops.com and
//! sets them as the COSMIC desktop background.
//!
//! ## Features
//! - Picks a random image from a random page of the browse listing
//! - Keeps a persisted history of everything it has handed out, with
//!   duplicate detection across restarts
//! - Extends the known page range in the background as the gallery grows
//! - Progress-tracked transfers, cancellable with Ctrl-C
//! - Watch mode for automatic periodic changes
//!
//! ## Architecture
//! - `browse.rs` - browse-page protocol: fetching, extraction, discovery
//! - `candidate.rs` - image candidates and their URL/name derivations
//! - `source.rs` - candidate list orchestration and duplicate handling
//! - `history.rs` - persisted history store
//! - `transfer.rs` - streamed fetches/downloads with progress and cancel
//! - `fetcher.rs` - user-facing fetch/download façade
//! - `wallpaper.rs` - desktop background application
//! - `timer.rs` - auto-change timer for watch mode
//! - `config.rs` - user configuration and known page range
//!
//! ## CLI Usage
//! - No arguments or `--apply`: fetch, download, and set a wallpaper
//! - `--fetch`: fetch a fresh candidate, print it, change nothing else
//! - `--download`: fetch and download without applying
//! - `--watch`: keep changing the wallpaper on the configured interval
//! - `--history`: list previously fetched images, newest first
//! - `--remove <index>`: drop one entry from the history

mod browse;
mod candidate;
mod config;
mod error;
mod fetcher;
mod history;
mod source;
mod timer;
mod transfer;
mod wallpaper;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::browse::HttpPageClient;
use crate::config::{Config, SharedConfig};
use crate::error::{Error, Result};
use crate::fetcher::{Fetched, Fetcher};
use crate::history::HistoryStore;
use crate::source::SimpleDesktopsSource;
use crate::timer::AutoChangeTimer;
use crate::transfer::{Progress, TransferEngine};
use crate::wallpaper::{CosmicBackground, WallpaperSetter};

/// Maximum number of attempts when producing a candidate.
const MAX_RETRIES: u32 = 3;

/// Initial delay between retries in seconds.
/// Uses exponential backoff: 10s, 20s (doubles each attempt).
const INITIAL_RETRY_DELAY_SECS: u64 = 10;

/// How often transfer progress is logged.
const PROGRESS_LOG_INTERVAL_MS: u64 = 500;

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("simple_desktops_wallpaper=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let outcome = match args.get(1).map(String::as_str) {
        Some("--help" | "-h") => {
            print_help(&args[0]);
            Ok(())
        }
        Some("--version" | "-v") => {
            println!("simple-desktops-wallpaper {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("--fetch" | "-f") => run_async(run_fetch),
        Some("--download" | "-d") => run_async(run_download),
        Some("--watch" | "-w") => run_async(run_watch),
        Some("--history") => run_async(run_history),
        Some("--remove") => match args.get(2).and_then(|s| s.parse::<usize>().ok()) {
            Some(index) => run_async(move |app| run_remove(app, index)),
            None => {
                eprintln!("Usage: --remove <index>  (see --history for indices)");
                std::process::exit(1);
            }
        },
        None | Some("--apply" | "-a") => run_async(run_apply),
        Some(other) => {
            eprintln!("Unknown argument: {other}");
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    if let Err(e) = outcome {
        if e.is_cancelled() {
            eprintln!("Cancelled");
            std::process::exit(130);
        }
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Prints help message
fn print_help(program: &str) {
    println!("Simple Desktops Wallpaper for COSMIC Desktop\n");
    println!("Usage: {} [OPTIONS]\n", program);
    println!("Options:");
    println!("  (none)             Fetch, download, and apply a wallpaper");
    println!("  --apply, -a        Same as the default mode");
    println!("  --fetch, -f        Fetch a fresh candidate and print it");
    println!("  --download, -d     Fetch and download without applying");
    println!("  --watch, -w        Change the wallpaper on the configured interval");
    println!("  --history          List previously fetched images, newest first");
    println!("  --remove <index>   Remove one history entry");
    println!("  --version, -v      Show version information");
    println!("  --help, -h         Show this help message");
    println!();
    println!("Configuration lives in ~/.config/simple-desktops-wallpaper/config.json");
}

/// Everything a command needs, wired up once.
///
/// All collaborators are constructed here and passed in explicitly; no
/// ambient shared state anywhere.
struct App {
    config: SharedConfig,
    history: Arc<HistoryStore>,
    fetcher: Fetcher,
    setter: Arc<dyn WallpaperSetter>,
}

impl App {
    /// Builds the full service graph. Must run inside the runtime: the
    /// source starts background page discovery on construction.
    fn build() -> Result<Self> {
        let config: SharedConfig = Arc::new(RwLock::new(Config::load()));

        let history_path = HistoryStore::default_path().ok_or_else(|| {
            Error::storage(
                "history path",
                std::io::Error::new(std::io::ErrorKind::NotFound, "no config directory"),
            )
        })?;
        let history = Arc::new(HistoryStore::open(history_path)?);

        let pages = Arc::new(HttpPageClient::new()?);
        let source = Arc::new(SimpleDesktopsSource::new(
            pages,
            history.clone(),
            config.clone(),
        ));
        let fetcher = Fetcher::new(source, TransferEngine::new()?);

        Ok(Self {
            config,
            history,
            fetcher,
            setter: Arc::new(CosmicBackground),
        })
    }

    fn wallpaper_dir(&self) -> PathBuf {
        PathBuf::from(
            &self
                .config
                .read()
                .expect("config lock poisoned")
                .wallpaper_dir,
        )
    }
}

/// Creates a runtime, builds the app, and runs one command to completion.
fn run_async<F, Fut>(command: F) -> Result<()>
where
    F: FnOnce(App) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    rt.block_on(async {
        let app = App::build()?;
        command(app).await
    })
}

/// `--fetch`: produce one fresh candidate and print it.
async fn run_fetch(app: App) -> Result<()> {
    match fetch_with_retries(&app).await? {
        Some(fetched) => {
            let image = &fetched.image;
            println!(
                "Fetched: {}",
                image.name().unwrap_or_else(|| "(unnamed)".into())
            );
            println!("  preview: {}", image.preview_url);
            match image.full_url() {
                Some(full) => println!("  full:    {full}"),
                None => println!("  full:    (not derivable)"),
            }
            println!(
                "  preview size: {}x{}",
                fetched.preview.width(),
                fetched.preview.height()
            );
            Ok(())
        }
        None => {
            eprintln!("No candidate produced after {MAX_RETRIES} attempts");
            std::process::exit(1);
        }
    }
}

/// `--download`: fetch a candidate and download the full image.
async fn run_download(app: App) -> Result<()> {
    match fetch_with_retries(&app).await? {
        Some(fetched) => {
            let path = download_full(&app, &fetched).await?;
            println!("Downloaded to: {}", path.display());
            Ok(())
        }
        None => {
            eprintln!("No candidate produced after {MAX_RETRIES} attempts");
            std::process::exit(1);
        }
    }
}

/// Default mode: fetch, download, and apply.
async fn run_apply(app: App) -> Result<()> {
    if fetch_download_apply(&app).await? {
        Ok(())
    } else {
        eprintln!("No wallpaper produced after {MAX_RETRIES} attempts");
        std::process::exit(1);
    }
}

/// `--watch`: apply immediately, then keep going on the configured
/// interval. Each change runs as its own task so a slow download never
/// blocks the tick loop; a tick that lands while a change is still in
/// flight is skipped.
async fn run_watch(app: App) -> Result<()> {
    let interval = {
        let config = app.config.read().expect("config lock poisoned");
        Duration::from_secs(config.change_interval_secs.max(60))
    };

    let timer = AutoChangeTimer::new(true, interval);
    let mut ticks = timer.start();
    info!(
        interval_secs = interval.as_secs(),
        enabled = timer.is_enabled(),
        "watch mode started"
    );

    let app = Arc::new(app);
    change_wallpaper(app.clone()).await;

    loop {
        tokio::select! {
            tick = ticks.recv() => {
                if tick.is_none() {
                    break;
                }
                if app.fetcher.is_fetching() || app.fetcher.is_downloading() {
                    info!("previous change still in flight, skipping this interval");
                    continue;
                }
                tokio::spawn(change_wallpaper(app.clone()));
            }
            _ = tokio::signal::ctrl_c() => {
                timer.set_enabled(false);
                app.fetcher.cancel_fetch();
                app.fetcher.cancel_download();
                info!("watch mode shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// One watch-mode change, with its outcome logged rather than returned.
async fn change_wallpaper(app: Arc<App>) {
    match fetch_download_apply(&app).await {
        Ok(true) => {}
        Ok(false) => warn!("change produced no wallpaper, waiting for next tick"),
        Err(e) if e.is_cancelled() => info!("change cancelled"),
        Err(e) => warn!(error = %e, "change failed, waiting for next tick"),
    }
}

/// `--history`: list stored records, newest first.
async fn run_history(app: App) -> Result<()> {
    let records = app.history.retrieve_all(true);
    if records.is_empty() {
        println!("No wallpapers fetched yet");
        return Ok(());
    }

    for (index, record) in records.iter().enumerate() {
        let name = record.name().unwrap_or_else(|| record.preview_url.clone());
        println!(
            "{index:3}  {}  {name}",
            record.inserted_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// `--remove <index>`: drop one entry from list and store.
async fn run_remove(app: App, index: usize) -> Result<()> {
    // Look the record up first for the removal message; it is gone after.
    let record = app
        .fetcher
        .source()
        .images()
        .get(index)
        .and_then(|image| image.name())
        .and_then(|name| app.history.retrieve(&name));

    let removed = app.fetcher.source().remove_image(index)?;
    let name = removed.name().unwrap_or(removed.preview_url);
    match record {
        Some(record) => println!(
            "Removed: {name} (fetched {})",
            record.inserted_at.format("%Y-%m-%d")
        ),
        None => println!("Removed: {name}"),
    }
    Ok(())
}

/// Runs the full pipeline once: fetch with retries, download, apply.
///
/// Returns `Ok(false)` when no candidate could be produced.
async fn fetch_download_apply(app: &App) -> Result<bool> {
    let Some(fetched) = fetch_with_retries(app).await? else {
        return Ok(false);
    };

    let path = download_full(app, &fetched).await?;
    println!("Downloaded to: {}", path.display());

    // The setter blocks while the compositor restarts; keep it off the
    // async workers.
    let setter = app.setter.clone();
    tokio::task::spawn_blocking(move || setter.set_wallpaper(&path))
        .await
        .map_err(|e| Error::storage("wallpaper task", std::io::Error::other(e.to_string())))??;

    println!("Wallpaper applied!");
    Ok(true)
}

/// Fetches a candidate, retrying with exponential backoff.
///
/// An empty page and a network error both just mean "try again";
/// everything else (storage, decode, collision, cancel) aborts
/// immediately.
async fn fetch_with_retries(app: &App) -> Result<Option<Fetched>> {
    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            let delay = INITIAL_RETRY_DELAY_SECS * (1 << (attempt - 1));
            info!(attempt, delay_secs = delay, "retrying fetch");
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        let result = drive_transfer(
            app.fetcher.fetch(),
            || app.fetcher.fetch_progress(),
            || app.fetcher.cancel_fetch(),
            "fetch",
        )
        .await;

        match result {
            Ok(Some(fetched)) => return Ok(Some(fetched)),
            Ok(None) => warn!(attempt, "page yielded no candidates"),
            Err(Error::Network(e)) => warn!(attempt, error = %e, "fetch failed"),
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}

/// Downloads the full image for a fetched candidate.
async fn download_full(app: &App, fetched: &Fetched) -> Result<PathBuf> {
    let dest_dir = app.wallpaper_dir();
    drive_transfer(
        app.fetcher.download(&fetched.image, &dest_dir),
        || app.fetcher.download_progress(),
        || app.fetcher.cancel_download(),
        "download",
    )
    .await
}

/// Drives one transfer-backed operation to completion, logging progress at
/// a steady cadence and cancelling the transfer on Ctrl-C (the operation
/// then resolves with the `Cancelled` outcome on its own).
async fn drive_transfer<Fut, T>(
    operation: Fut,
    progress: impl Fn() -> Option<watch::Receiver<Progress>>,
    interrupt: impl Fn(),
    label: &'static str,
) -> T
where
    Fut: std::future::Future<Output = T>,
{
    tokio::pin!(operation);

    let mut ticker = tokio::time::interval(Duration::from_millis(PROGRESS_LOG_INTERVAL_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = &mut operation => return result,
            _ = tokio::signal::ctrl_c() => {
                info!(label, "interrupt received, cancelling");
                interrupt();
            }
            _ = ticker.tick() => {
                if let Some(rx) = progress() {
                    let p = *rx.borrow();
                    if p.total.is_some() {
                        info!(label, percent = (p.fraction() * 100.0) as u32, "transfer progress");
                    } else if p.received > 0 {
                        info!(label, received = p.received, "transfer progress");
                    }
                }
            }
        }
    }
}
