//! # Configuration Module
//!
//! Handles user configuration persistence.
//!
//! ## Configuration Storage
//! User preferences are stored as JSON in:
//! `~/.config/simple-desktops-wallpaper/config.json`
//!
//! ## Known Max Page
//! simpledesktops.com serves its gallery as a paginated browse listing. The
//! highest page index confirmed to contain images is kept here (`max_page`)
//! so random page selection has a range to draw from. The value is raised by
//! background discovery and never lowered; see [`Config::raise_max_page`].

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lowest valid browse page. `max_page` never drops below this.
pub const MIN_PAGE: u32 = 1;

/// Default known max page for a fresh install. Discovery extends this on
/// first run; the seed just has to be a page that exists.
const DEFAULT_MAX_PAGE: u32 = 50;

/// Default interval for the auto-change timer (seconds).
const DEFAULT_CHANGE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// User configuration for the application.
///
/// Persisted to `~/.config/simple-desktops-wallpaper/config.json` as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory where downloaded wallpapers are stored.
    /// Defaults to `~/Pictures/SimpleDesktops/`
    pub wallpaper_dir: String,
    /// Highest browse page known to contain images. Never below
    /// [`MIN_PAGE`]; raised by background discovery.
    pub max_page: u32,
    /// Whether the auto-change timer is enabled in watch mode.
    pub auto_change: bool,
    /// Seconds between automatic wallpaper changes in watch mode.
    pub change_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let wallpaper_dir = dirs::picture_dir()
            .unwrap_or_else(|| PathBuf::from("~"))
            .join("SimpleDesktops")
            .to_string_lossy()
            .to_string();

        Self {
            wallpaper_dir,
            max_page: DEFAULT_MAX_PAGE,
            auto_change: false,
            change_interval_secs: DEFAULT_CHANGE_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Returns the path to the configuration file.
    fn config_path() -> Option<PathBuf> {
        app_config_dir().map(|p| p.join("config.json"))
    }

    /// Loads the configuration from disk.
    ///
    /// If the config file doesn't exist or cannot be parsed, returns default
    /// values, so the application always starts with a valid configuration.
    /// A stored `max_page` below [`MIN_PAGE`] is clamped up.
    pub fn load() -> Self {
        let mut config: Self = Self::config_path()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        config.max_page = config.max_page.max(MIN_PAGE);
        config
    }

    /// Persists the current configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist. The configuration
    /// is stored as pretty-printed JSON for easy manual editing if needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or_else(|| {
            Error::storage(
                "config path",
                std::io::Error::new(std::io::ErrorKind::NotFound, "no config directory"),
            )
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::storage("config dir", e))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::storage("config encode", e))?;
        std::fs::write(&path, content).map_err(|e| Error::storage("config write", e))?;

        Ok(())
    }

    /// Raises `max_page` to `page` if that is an increase.
    ///
    /// Returns `true` when the value changed. Discovery calls this for each
    /// confirmed page; a transient failure never lowers the value.
    pub fn raise_max_page(&mut self, page: u32) -> bool {
        if page > self.max_page {
            self.max_page = page;
            true
        } else {
            false
        }
    }
}

/// Configuration shared between the source, discovery, and the CLI.
///
/// Mutated only under the write lock; discovery is the sole writer of
/// `max_page` after startup.
pub type SharedConfig = Arc<RwLock<Config>>;

/// Returns the application's config directory
/// (`~/.config/simple-desktops-wallpaper`).
pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("simple-desktops-wallpaper"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.max_page >= MIN_PAGE);
        assert!(!config.wallpaper_dir.is_empty());
        assert!(!config.auto_change);
    }

    #[test]
    fn raise_max_page_is_monotonic() {
        let mut config = Config::default();
        let start = config.max_page;

        assert!(config.raise_max_page(start + 3));
        assert_eq!(config.max_page, start + 3);

        // Lower or equal values are ignored.
        assert!(!config.raise_max_page(start));
        assert!(!config.raise_max_page(start + 3));
        assert_eq!(config.max_page, start + 3);
    }
}
