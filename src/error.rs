//! Error types for the share-image library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ShareImageError`]: **Fatal** for the request that raised it. A capture
//!   that produced an empty canvas, timed out, or could not be encoded;
//!   malformed history imports; invalid pagination bounds. Returned as
//!   `Err(ShareImageError)` from the capture, history, and export entry points.
//!
//! * [`PageError`]: **Non-fatal**. A single page of a batch failed but the
//!   others are fine. Stored inside [`crate::output::PageOutcome`] so callers
//!   get a per-page summary rather than a single pass/fail verdict.

use crate::storage::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the share-image library.
#[derive(Debug, Error)]
pub enum ShareImageError {
    // ── Capture errors ────────────────────────────────────────────────────
    /// The rasterizer produced a zero-area result, even after the
    /// reduced-scale retry.
    #[error("Generated canvas is empty ({width}x{height}) after fallback\nTry again with a lower --scale.")]
    EmptyCanvas { width: u32, height: u32 },

    /// A single rasterization attempt exceeded the configured bound.
    #[error("Rendering timed out after {elapsed_ms}ms")]
    RenderTimeout { elapsed_ms: u64 },

    /// The target kept showing text other than the expected page text after
    /// a forced repair. Only surfaced when strict content checking is on.
    #[error("Displayed content does not match the expected page text (expected {expected} chars, found {found} chars)")]
    ContentMismatch { expected: usize, found: usize },

    /// Format conversion failed, including the downscaled retry.
    #[error("Failed to encode image as {format}: {detail}")]
    EncodingFailure { format: String, detail: String },

    /// The rasterizer backend reported an error of its own.
    #[error("Rasterization failed: {0}")]
    RasterFailed(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Imported history data is malformed.
    #[error("Invalid history file format: {0}")]
    InvalidFormat(String),

    /// Builder validation or a pagination bound failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No history entry carries the requested id.
    #[error("History entry '{id}' not found")]
    HistoryEntryNotFound { id: String },

    // ── Batch errors ──────────────────────────────────────────────────────
    /// Every page of a batch failed; there is nothing to bundle.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// The zip archive could not be assembled.
    #[error("Failed to build archive: {0}")]
    ArchiveFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Persisted state could not be read or written.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The system clipboard rejected the image.
    #[error("Copy to clipboard failed: {0}")]
    Clipboard(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShareImageError {
    /// The single line shown to the user when this error surfaces.
    pub fn notification_message(&self) -> String {
        match self {
            ShareImageError::EmptyCanvas { .. } => {
                "The image came out empty. Try a lower scale.".to_string()
            }
            ShareImageError::RenderTimeout { .. } => {
                "Rendering took too long. Please try again.".to_string()
            }
            ShareImageError::ContentMismatch { .. } => {
                "The preview did not show the expected text.".to_string()
            }
            ShareImageError::EncodingFailure { format, .. } => {
                format!("Could not save the image as {format}.")
            }
            ShareImageError::InvalidFormat(_) => "Invalid history file format.".to_string(),
            ShareImageError::AllPagesFailed { total, .. } => {
                format!("All {total} pages failed to export.")
            }
            other => other.to_string(),
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShareImageError::EmptyCanvas { .. } | ShareImageError::RenderTimeout { .. }
        )
    }
}

/// A non-fatal error for a single page of a batch.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The capture for this page failed.
    #[error("Page {page}: capture failed: {detail}")]
    CaptureFailed { page: usize, detail: String },

    /// The capture timed out.
    #[error("Page {page}: rendering timed out after {elapsed_ms}ms")]
    Timeout { page: usize, elapsed_ms: u64 },
}

impl PageError {
    /// Wrap a fatal capture error as the per-page record for 1-based `page`.
    pub fn from_capture(page: usize, err: &ShareImageError) -> Self {
        match err {
            ShareImageError::RenderTimeout { elapsed_ms } => PageError::Timeout {
                page,
                elapsed_ms: *elapsed_ms,
            },
            other => PageError::CaptureFailed {
                page,
                detail: other.to_string(),
            },
        }
    }

    /// 1-based page number this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::CaptureFailed { page, .. } | PageError::Timeout { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_canvas_display() {
        let e = ShareImageError::EmptyCanvas {
            width: 0,
            height: 0,
        };
        assert!(e.to_string().contains("0x0"));
        assert!(e.is_retryable());
    }

    #[test]
    fn render_timeout_display() {
        let e = ShareImageError::RenderTimeout { elapsed_ms: 30000 };
        assert!(e.to_string().contains("30000ms"));
        assert!(e.is_retryable());
    }

    #[test]
    fn encoding_failure_is_not_retryable() {
        let e = ShareImageError::EncodingFailure {
            format: "webp".into(),
            detail: "too large".into(),
        };
        assert!(!e.is_retryable());
        assert!(e.notification_message().contains("webp"));
    }

    #[test]
    fn page_error_from_timeout() {
        let e = PageError::from_capture(3, &ShareImageError::RenderTimeout { elapsed_ms: 10 });
        assert!(matches!(e, PageError::Timeout { page: 3, .. }));
        assert_eq!(e.page(), 3);
    }

    #[test]
    fn page_error_from_other() {
        let e = PageError::from_capture(2, &ShareImageError::EmptyCanvas { width: 0, height: 5 });
        assert!(e.to_string().starts_with("Page 2"));
    }
}
