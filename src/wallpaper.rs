//! # Wallpaper Application
//!
//! The boundary to the desktop environment: everything upstream of this
//! module only knows the [`WallpaperSetter`] trait.
//!
//! The COSMIC implementation writes the background configuration in RON
//! format to `~/.config/cosmic/com.system76.CosmicBackground/v1/all` and
//! restarts the `cosmic-bg` process; COSMIC has no reload API, so a
//! restart is the only way to make it pick up a new image.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

/// Port for applying a downloaded file as the desktop background.
pub trait WallpaperSetter: Send + Sync {
    /// Sets `path` as the current wallpaper. May block for a short while;
    /// call through `spawn_blocking` from async contexts.
    fn set_wallpaper(&self, path: &Path) -> Result<()>;
}

/// Checks if the application is running inside a Flatpak sandbox, in which
/// case host commands must go through `flatpak-spawn --host`.
pub fn is_flatpak() -> bool {
    Path::new("/.flatpak-info").exists()
}

/// Runs a command on the host system, handling Flatpak sandboxing.
fn run_host_command(cmd: &str, args: &[&str]) -> std::io::Result<std::process::Output> {
    if is_flatpak() {
        let mut spawn_args = vec!["--host", cmd];
        spawn_args.extend(args);
        std::process::Command::new("flatpak-spawn")
            .args(&spawn_args)
            .output()
    } else {
        std::process::Command::new(cmd).args(args).output()
    }
}

/// Like [`run_host_command`] but doesn't wait for the command to finish.
fn spawn_host_command(cmd: &str) -> std::io::Result<std::process::Child> {
    if is_flatpak() {
        std::process::Command::new("flatpak-spawn")
            .args(["--host", cmd])
            .spawn()
    } else {
        std::process::Command::new(cmd).spawn()
    }
}

/// [`WallpaperSetter`] for the COSMIC desktop.
pub struct CosmicBackground;

impl WallpaperSetter for CosmicBackground {
    fn set_wallpaper(&self, path: &Path) -> Result<()> {
        // home_dir instead of config_dir: under Flatpak, config_dir is the
        // sandboxed path, but COSMIC reads from the real ~/.config.
        let config_path = dirs::home_dir()
            .ok_or_else(|| Error::Wallpaper {
                context: "home directory",
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory"),
            })?
            .join(".config/cosmic/com.system76.CosmicBackground/v1/all");

        let config_content = format!(
            r#"(
    output: "all",
    source: Path("{}"),
    filter_by_theme: false,
    rotation_frequency: 300,
    filter_method: Lanczos,
    scaling_mode: Zoom,
    sampling_method: Alphanumeric,
)"#,
            path.display()
        );

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Wallpaper {
                context: "background config dir",
                source: e,
            })?;
        }
        std::fs::write(&config_path, config_content).map_err(|e| Error::Wallpaper {
            context: "background config write",
            source: e,
        })?;

        // SIGTERM makes COSMIC restart cosmic-bg with the new config.
        let _ = run_host_command("pkill", &["-TERM", "-x", "cosmic-bg"]);
        std::thread::sleep(Duration::from_millis(1000));

        // Verify cosmic-bg came back; start it ourselves if not.
        let check = run_host_command("pgrep", &["-x", "cosmic-bg"]);
        match check {
            Ok(output) if output.status.success() => {
                debug!("cosmic-bg restarted by the compositor");
                Ok(())
            }
            _ => {
                spawn_host_command("cosmic-bg").map_err(|e| Error::Wallpaper {
                    context: "cosmic-bg start",
                    source: e,
                })?;
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            }
        }
    }
}
