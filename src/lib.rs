//! # share-image
//!
//! Turn user-authored text into styled, shareable raster images.
//!
//! ## Why this crate?
//!
//! Capturing a live preview node as an image is racy: the preview may still
//! show stale text when the capture starts, offscreen layout collapses
//! heights, high device-pixel ratios produce empty canvases, and two
//! captures touching the same node at once corrupt each other. This crate is
//! the pipeline that makes capture reliable: it verifies content, locks
//! geometry, rasterizes an isolated clone, falls back on empty results,
//! always restores the preview, and serialises captures through a
//! single-flight queue. Successful captures land in a bounded, deduplicated
//! history.
//!
//! ## Pipeline Overview
//!
//! ```text
//! text
//!  │
//!  ├─ 1. Paginate  split into bounded pages (multi-page mode / batch)
//!  ├─ 2. Queue     FIFO, one capture in flight
//!  ├─ 3. Capture   verify → lock geometry → rasterize clone → restore → encode
//!  ├─ 4. History   dedup by (content, template), newest first, capped
//!  └─ 5. Output    data URL + bytes, download, clipboard, or a zip of pages
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use share_image::{noop, BlockRasterizer, CaptureRequest, DomTarget, Generator, PipelineConfig, Storage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let generator = Generator::new(
//!         Arc::new(BlockRasterizer),
//!         Storage::in_memory("share_image_"),
//!         PipelineConfig::default(),
//!         noop(),
//!     )?;
//!     let target = DomTarget::card("");
//!     let result = generator
//!         .generate(&target, &CaptureRequest::new("Hello, world", "template-minimal"))
//!         .await?;
//!     let path = generator.download(&result, "template-minimal", ".").await?;
//!     eprintln!("saved {}", path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature     | Default | Description |
//! |-------------|---------|-------------|
//! | `cli`       | on      | Enables the `share-image` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `clipboard` | off     | `Generator::copy_to_clipboard` via `arboard` |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! share-image = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod capture;
pub mod config;
pub mod dom;
pub mod error;
pub mod generate;
pub mod history;
pub mod naming;
pub mod notify;
pub mod output;
pub mod paginate;
pub mod pipeline;
pub mod queue;
pub mod raster;
pub mod storage;
pub mod target;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchExporter, PageStream};
pub use capture::CaptureOrchestrator;
pub use config::{GenerationOptions, ImageFormat, PipelineConfig, PipelineConfigBuilder, StyleSnapshot};
pub use error::{PageError, ShareImageError};
pub use generate::{CaptureRequest, Generator};
pub use history::{AddOutcome, HistoryEntry, HistoryExport, HistoryStats, HistoryStore, OutputMeta};
pub use notify::{noop, Event, FnNotifier, NoopNotifier, Notifier, SharedNotifier};
pub use output::{Archive, BatchOutput, BatchStats, GenerationResult, PageOutcome};
pub use paginate::{paginate, paginate_if, Page};
pub use queue::{QueuePhase, RenderQueue};
pub use raster::{BlockRasterizer, Geometry, RasterError, RasterOptions, Rasterizer};
pub use storage::{FileStore, KeyValueStore, MemoryStore, Storage, StoreError};
pub use target::{DomTarget, RenderTarget, TargetStyle};
