//! # Auto-Change Timer
//!
//! Drives the periodic wallpaper change in watch mode: a background task
//! ticks on a fixed interval and sends a message for every tick taken
//! while the timer is enabled. The consumer decides what a tick means
//! (fetch, download, apply).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Fixed-interval change timer.
#[derive(Debug)]
pub struct AutoChangeTimer {
    enabled: Arc<AtomicBool>,
    interval: Duration,
    /// Background task handle; aborted on stop/drop.
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutoChangeTimer {
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
            interval,
            handle: Mutex::new(None),
        }
    }

    /// Starts the background task.
    ///
    /// A message arrives on the returned receiver for every interval that
    /// elapses while the timer is enabled; disabled intervals pass
    /// silently. Calling `start` again replaces the previous task.
    pub fn start(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);

        let enabled = self.enabled.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                if enabled.load(Ordering::SeqCst) {
                    // A full channel just means the consumer is still busy
                    // with the previous change; skip the tick.
                    if tx.try_send(()).is_err() {
                        debug!("change tick skipped, consumer busy or gone");
                    }
                } else {
                    debug!("change tick skipped, timer disabled");
                }
            }
        });

        if let Ok(mut guard) = self.handle.lock() {
            if let Some(old) = guard.replace(handle) {
                old.abort();
            }
        }

        rx
    }

    /// Stops the background task.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl Drop for AutoChangeTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
