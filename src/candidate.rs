//! # Image Candidates
//!
//! The gallery at simpledesktops.com exposes preview-resolution URLs in its
//! browse pages. Everything else about an image is derived from that one
//! string:
//!
//! - **Full-resolution URL**: the preview's last path segment carries a size
//!   suffix, e.g. `sunrise.png.295x184_q100.png`. Stripping everything after
//!   the original extension yields `sunrise.png` in the same directory.
//! - **Name**: the path segments after the top-level `desktops/` folder,
//!   joined with `-`, e.g. `2020-01-30-sunrise.png`. This is the stable
//!   identity used for duplicate detection; the upload date is part of the
//!   path, so re-uploads of the same file get distinct names.

use once_cell::sync::Lazy;
use regex::Regex;

/// Path segment that precedes the identifying part of a full-resolution URL.
const NAME_MARKER: &str = "desktops";

/// Matches the original `<name>.<ext>.` prefix of a preview file name,
/// anchored at the start. The trailing dot separates the original extension
/// from the preview size suffix.
static PREVIEW_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^.+\.[a-z]{2,4}\.").expect("valid preview suffix pattern"));

/// A single image discovered from the browse listing.
///
/// Holds only the preview URL; the full-resolution URL and the dedup name
/// are derived on demand and may be absent when the preview URL does not
/// follow the site's naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdImage {
    /// Preview-resolution URL as found in the page's `img` tag.
    pub preview_url: String,
}

impl SdImage {
    pub fn new(preview_url: impl Into<String>) -> Self {
        Self {
            preview_url: preview_url.into(),
        }
    }

    /// Derives the full-resolution URL from the preview URL.
    ///
    /// Returns `None` when the last path segment does not match the
    /// `<name>.<ext>.<size-suffix>` pattern. Operations that need the full
    /// image must treat that as "no full reference" rather than requesting
    /// a malformed URL.
    pub fn full_url(&self) -> Option<String> {
        let (dir, file) = self.preview_url.rsplit_once('/')?;
        let matched = PREVIEW_SUFFIX.find(file)?;

        // The match includes the dot that separates name from suffix.
        let name = &file[..matched.end() - 1];
        Some(format!("{dir}/{name}"))
    }

    /// Derives the stable name used for duplicate detection.
    ///
    /// Joins the full URL's path segments after the `desktops` marker with
    /// `-`. Returns `None` when no full URL is derivable or the marker is
    /// absent; such candidates are treated as always-novel.
    pub fn name(&self) -> Option<String> {
        let full = self.full_url()?;
        let segments: Vec<&str> = full.split('/').collect();
        let index = segments.iter().position(|s| *s == NAME_MARKER)?;

        let rest = &segments[index + 1..];
        if rest.is_empty() {
            return None;
        }
        Some(rest.join("-"))
    }

    /// True when both images have a derivable name and the names match.
    ///
    /// Images without a name never equal anything, including themselves.
    pub fn same_image(&self, other: &Self) -> bool {
        match (self.name(), other.name()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// File name to store the full-resolution download under: the last
    /// path segment of the full URL, with path separators sanitized.
    pub fn file_name(&self) -> Option<String> {
        let full = self.full_url()?;
        let name = full.rsplit('/').next()?;
        if name.is_empty() {
            return None;
        }
        Some(name.replace(['\\', '/'], "_"))
    }
}
