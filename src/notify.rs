//! Notification sink for pipeline lifecycle events.
//!
//! The capture orchestrator, batch exporter and history store each receive an
//! [`Arc<dyn Notifier>`] at construction and report what they do through it:
//! capture start/rendering/success/error/end, content repairs and fallbacks,
//! batch progress, and history mutations. The presentation layer decides what
//! to show; the library never reaches for a global event bus.
//!
//! # Example
//!
//! ```rust
//! use share_image::{Event, FnNotifier, Notifier};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! let errors = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&errors);
//! let notifier = FnNotifier(move |event: &Event| {
//!     if matches!(event, Event::CaptureError { .. }) {
//!         seen.fetch_add(1, Ordering::SeqCst);
//!     }
//! });
//! notifier.notify(&Event::CaptureEnd { page: 1 });
//! assert_eq!(errors.load(Ordering::SeqCst), 0);
//! ```

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything the pipeline reports. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    // ── Capture lifecycle ────────────────────────────────────────────────
    CaptureStart { page: usize },
    Rendering { page: usize, scale: f32 },
    CaptureSuccess {
        page: usize,
        width: u32,
        height: u32,
        bytes: usize,
    },
    /// `message` is the single user-facing line for the failure.
    CaptureError { page: usize, message: String },
    CaptureEnd { page: usize },

    // ── Degraded paths ───────────────────────────────────────────────────
    /// The target showed stale text and was re-rendered with the page text.
    ContentRepaired { page: usize },
    /// The raster came out empty and was retried at `scale`.
    RasterFallback { page: usize, scale: f32 },
    /// The raster was too large to encode and was shrunk by `ratio`.
    Downscaled { ratio: f32, width: u32, height: u32 },

    // ── Batch export ─────────────────────────────────────────────────────
    BatchStart { total: usize },
    BatchProgress {
        current: usize,
        total: usize,
        error: Option<String>,
    },
    BatchComplete { succeeded: usize, failed: usize },

    // ── History ──────────────────────────────────────────────────────────
    HistoryAdded { id: String },
    HistoryRemoved { id: String },
    HistoryCleared,
    HistoryImported { count: usize },
    HistoryRestored { id: String },

    // ── Output ───────────────────────────────────────────────────────────
    Downloaded { path: PathBuf },
    Copied,
}

/// Receives [`Event`]s from the pipeline.
///
/// Implementations must be `Send + Sync`: events may come from whichever
/// task runs the capture.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Drops every event. The default when no sink is configured.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: &Event) {}
}

/// Adapts a closure into a [`Notifier`].
pub struct FnNotifier<F>(pub F);

impl<F> Notifier for FnNotifier<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn notify(&self, event: &Event) {
        (self.0)(event)
    }
}

/// Convenience alias for the shared sink handed to pipeline components.
pub type SharedNotifier = Arc<dyn Notifier>;

/// A sink that drops everything, ready to share.
pub fn noop() -> SharedNotifier {
    Arc::new(NoopNotifier)
}
