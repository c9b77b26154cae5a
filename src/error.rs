//! # Error Types
//!
//! One taxonomy for the whole application. Page-probe and HTML-extraction
//! failures never show up here; those are absorbed where they happen and
//! reported as boolean/empty outcomes, since a bad page is an expected,
//! frequent event that must not abort a caller's retry loop. Everything
//! else (storage, transfer, bad indices, collisions) is surfaced to the
//! caller of the operation that triggered it.

use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for wallpaper operations.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed or timed out.
    #[error("network request failed")]
    Network(#[from] reqwest::Error),

    /// Downloaded bytes are not a valid image.
    #[error("downloaded data is not a valid image")]
    Decode(#[from] image::ImageError),

    /// History or config persistence failed.
    #[error("storage operation failed: {context}")]
    Storage {
        /// What was being persisted or read.
        context: &'static str,
        /// Underlying I/O or serialization failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Candidate list index out of range.
    #[error("image index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Length of the list at the time of the call.
        len: usize,
    },

    /// A transfer of the same kind is already running.
    #[error("a {kind} is already in progress")]
    AlreadyInProgress {
        /// "fetch" or "download".
        kind: &'static str,
    },

    /// The transfer was cancelled by the user.
    #[error("transfer cancelled")]
    Cancelled,

    /// No full-resolution URL could be derived from the preview URL.
    #[error("no full-resolution reference for {preview_url}")]
    NoFullReference {
        /// The preview URL the derivation was attempted on.
        preview_url: String,
    },

    /// Destination path could not be prepared for a download.
    #[error("cannot write to {}", path.display())]
    Destination {
        /// The directory or file that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The desktop background could not be applied.
    #[error("could not apply wallpaper: {context}")]
    Wallpaper {
        /// Which step of the application failed.
        context: &'static str,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wraps an I/O or serialization failure as a storage error.
    pub fn storage<E>(context: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            context,
            source: Box::new(source),
        }
    }

    /// True for user-initiated cancellation, which callers typically
    /// suppress rather than report as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
