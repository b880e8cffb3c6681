//! The capture orchestrator: one page of text in, one encoded image out.
//!
//! ## Protocol
//!
//! ```text
//! fonts ready ─▶ verify content ─▶ lock geometry ─▶ clone + rasterize
//!                 (repair once)     (≥ min height)   (fallback on empty)
//!                                        │
//!                        restore style ◀─┘ ─▶ encode (downscale on size)
//! ```
//!
//! The orchestrator never persists anything and never queues. Callers that
//! share a target go through [`crate::queue::RenderQueue`] so captures do
//! not overlap.

use crate::config::{GenerationOptions, PipelineConfig, StyleSnapshot};
use crate::error::ShareImageError;
use crate::notify::{Event, SharedNotifier};
use crate::output::GenerationResult;
use crate::paginate::Page;
use crate::pipeline::geometry::GeometryLock;
use crate::pipeline::{encode, render, verify};
use crate::raster::{RasterOptions, Rasterizer};
use crate::target::RenderTarget;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Drives every stage of a single capture.
pub struct CaptureOrchestrator {
    rasterizer: Arc<dyn Rasterizer>,
    config: PipelineConfig,
    notifier: SharedNotifier,
}

impl CaptureOrchestrator {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, config: PipelineConfig, notifier: SharedNotifier) -> Self {
        Self {
            rasterizer,
            config,
            notifier,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Capture `page` as shown by `target`, styled by `snapshot`.
    ///
    /// Emits `CaptureStart`, `Rendering`, then `CaptureSuccess` or
    /// `CaptureError`, and always `CaptureEnd`.
    ///
    /// # Errors
    /// - `InvalidConfig`: `options` outside the configured bounds
    /// - `ContentMismatch`: stale content with strict checking on
    /// - `RenderTimeout` / `RasterFailed`: a rasterization attempt failed
    /// - `EmptyCanvas`: empty raster even after the fallback attempt
    /// - `EncodingFailure`: encoding failed, including the downscaled retry
    pub async fn capture(
        &self,
        target: &dyn RenderTarget,
        snapshot: &StyleSnapshot,
        page: &Page,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, ShareImageError> {
        let page_num = page.index + 1;
        let start = Instant::now();
        self.notifier.notify(&Event::CaptureStart { page: page_num });

        let result = self.run(target, snapshot, page, options).await;
        match &result {
            Ok(r) => {
                info!(
                    "Page {}: captured {}x{} {} ({} bytes) in {}ms",
                    page_num,
                    r.width,
                    r.height,
                    r.format,
                    r.byte_len(),
                    start.elapsed().as_millis()
                );
                self.notifier.notify(&Event::CaptureSuccess {
                    page: page_num,
                    width: r.width,
                    height: r.height,
                    bytes: r.byte_len(),
                });
            }
            Err(e) => {
                error!("Page {}: capture failed: {}", page_num, e);
                self.notifier.notify(&Event::CaptureError {
                    page: page_num,
                    message: e.notification_message(),
                });
            }
        }
        self.notifier.notify(&Event::CaptureEnd { page: page_num });
        result
    }

    async fn run(
        &self,
        target: &dyn RenderTarget,
        snapshot: &StyleSnapshot,
        page: &Page,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, ShareImageError> {
        let page_num = page.index + 1;
        options.validate(&self.config)?;

        // ── Step 1: Preflight ────────────────────────────────────────────
        target.fonts_ready().await;

        // ── Step 2: Content verification ─────────────────────────────────
        let check = verify::ensure_content(
            target,
            &page.text,
            page_num,
            Duration::from_millis(self.config.settle_delay_ms),
            self.config.strict_content_check,
            self.notifier.as_ref(),
        )
        .await?;
        debug!("Page {}: content check {:?}", page_num, check);

        // ── Step 3: Geometry lock ────────────────────────────────────────
        let lock = GeometryLock::acquire(target, snapshot, self.config.min_capture_height);
        let geometry = lock.geometry();

        // ── Steps 4–5: Isolated rasterization with fallback ──────────────
        let node = render::isolated_clone(target, &geometry);
        self.notifier.notify(&Event::Rendering {
            page: page_num,
            scale: options.scale,
        });
        let raster_options = RasterOptions {
            scale: options.scale,
            style: snapshot.clone(),
        };
        let rastered = render::rasterize_with_fallback(
            self.rasterizer.as_ref(),
            &node,
            &geometry,
            &raster_options,
            Duration::from_millis(options.timeout_ms),
            self.config.empty_canvas_fallback_scale,
            page_num,
            self.notifier.as_ref(),
        )
        .await;

        // ── Step 6: Restoration ──────────────────────────────────────────
        drop(lock);
        let render::Rastered { image, scale } = rastered?;

        // ── Step 7: Encoding ─────────────────────────────────────────────
        let opts = *options;
        let config = self.config.clone();
        let notifier = Arc::clone(&self.notifier);
        let (raster, bytes) = tokio::task::spawn_blocking(move || {
            encode::encode_with_downscale(image, &opts, &config, notifier.as_ref())
        })
        .await
        .map_err(|e| ShareImageError::Internal(format!("Encode task panicked: {}", e)))??;

        Ok(GenerationResult {
            data_url: encode::to_data_url(options.format, &bytes),
            width: raster.width(),
            height: raster.height(),
            raster: Arc::new(raster),
            bytes: bytes.into(),
            format: options.format,
            scale,
            created_at: Utc::now(),
        })
    }
}
