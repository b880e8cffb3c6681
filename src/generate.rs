//! The `Generator` facade: queue → capture → history, plus output helpers.
//!
//! This is what a presentation layer holds on to. It owns one render queue
//! shared by single captures and batch exports, so nothing ever captures
//! the target concurrently, and records each successful single capture in
//! the history store.
//!
//! # Example
//!
//! ```rust
//! use share_image::{
//!     noop, BlockRasterizer, CaptureRequest, DomTarget, Generator, PipelineConfig, Storage,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), share_image::ShareImageError> {
//! let generator = Generator::new(
//!     Arc::new(BlockRasterizer),
//!     Storage::in_memory("demo_"),
//!     PipelineConfig::default(),
//!     noop(),
//! )?;
//! let target = DomTarget::card("Type something...");
//! let request = CaptureRequest::new("Hello", "template-minimal").with_scale(1.0);
//!
//! let result = generator.generate(&target, &request).await?;
//! assert_eq!(result.width, 960);
//! assert_eq!(generator.history().len()?, 1);
//! # Ok(())
//! # }
//! ```

use crate::batch::BatchExporter;
use crate::capture::CaptureOrchestrator;
use crate::config::{GenerationOptions, ImageFormat, PipelineConfig, StyleSnapshot};
use crate::error::ShareImageError;
use crate::history::{AddOutcome, HistoryEntry, HistoryStore, OutputMeta};
use crate::naming;
use crate::notify::{Event, SharedNotifier};
use crate::output::{self, BatchOutput, GenerationResult};
use crate::paginate::{self, Page};
use crate::pipeline::thumbnail;
use crate::queue::RenderQueue;
use crate::raster::Rasterizer;
use crate::storage::Storage;
use crate::target::RenderTarget;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything one generation needs, snapshotted when the request is made.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub content: String,
    pub template_id: String,
    pub style: StyleSnapshot,
    pub options: GenerationOptions,
}

impl CaptureRequest {
    pub fn new(content: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            template_id: template_id.into(),
            style: StyleSnapshot::default(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_style(mut self, style: StyleSnapshot) -> Self {
        self.style = style;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.options.scale = scale;
        self
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.options.format = format;
        self
    }
}

pub struct Generator {
    config: PipelineConfig,
    queue: RenderQueue,
    orchestrator: Arc<CaptureOrchestrator>,
    batch: BatchExporter,
    history: HistoryStore,
    notifier: SharedNotifier,
}

impl Generator {
    /// Wire up the pipeline. History is persisted in `storage`.
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        storage: Storage,
        config: PipelineConfig,
        notifier: SharedNotifier,
    ) -> Result<Self, ShareImageError> {
        config.validate()?;
        let queue = RenderQueue::new(config.max_concurrent);
        let orchestrator = Arc::new(CaptureOrchestrator::new(
            rasterizer,
            config.clone(),
            Arc::clone(&notifier),
        ));
        let batch = BatchExporter::new(queue.clone(), Arc::clone(&orchestrator), Arc::clone(&notifier));
        let history = HistoryStore::new(storage, config.history_capacity, Arc::clone(&notifier));
        Ok(Self {
            config,
            queue,
            orchestrator,
            batch,
            history,
            notifier,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn queue(&self) -> &RenderQueue {
        &self.queue
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn batch(&self) -> &BatchExporter {
        &self.batch
    }

    /// Capture `request` as a single image and record it in history.
    ///
    /// In multi-page mode this is the first page; use
    /// [`Generator::generate_page`] for the others.
    pub async fn generate(
        &self,
        target: &dyn RenderTarget,
        request: &CaptureRequest,
    ) -> Result<GenerationResult, ShareImageError> {
        self.generate_page(target, request, 0).await
    }

    /// Capture page `index` (0-based) of `request.content`, paginated per
    /// the multi-page setting, and record it in history under the page's
    /// own text. A history write failure is logged, never surfaced: the
    /// image itself was produced.
    ///
    /// # Errors
    /// `InvalidConfig` when `index` is past the last page, plus anything
    /// [`CaptureOrchestrator::capture`] returns.
    pub async fn generate_page(
        &self,
        target: &dyn RenderTarget,
        request: &CaptureRequest,
        index: usize,
    ) -> Result<GenerationResult, ShareImageError> {
        let mut pages = self.pages(&request.content)?;
        let total = pages.len();
        if index >= total {
            return Err(ShareImageError::InvalidConfig(format!(
                "page {} requested but the text has {} page(s)",
                index + 1,
                total
            )));
        }
        let page = pages.swap_remove(index);

        let orchestrator = Arc::clone(&self.orchestrator);
        let captured = &page;
        let result = self
            .queue
            .submit(|| async move {
                orchestrator
                    .capture(target, &request.style, captured, &request.options)
                    .await
            })
            .await?;

        if let Err(e) = self.record(request, &page.text, &result) {
            warn!("Failed to record generation in history: {}", e);
        }
        Ok(result)
    }

    fn record(
        &self,
        request: &CaptureRequest,
        content: &str,
        result: &GenerationResult,
    ) -> Result<AddOutcome, ShareImageError> {
        let thumb = thumbnail::make_thumbnail(
            &result.raster,
            self.config.thumbnail_max_size,
            self.config.thumbnail_quality,
        )
        .unwrap_or_else(|e| {
            warn!("Thumbnail generation failed: {}", e);
            String::new()
        });
        let entry = HistoryEntry::new(
            content.to_string(),
            request.template_id.clone(),
            request.style.clone(),
            thumb,
            self.filename(&request.template_id, result),
            OutputMeta {
                format: result.format,
                width: result.width,
                height: result.height,
                scale: result.scale,
                bytes: result.byte_len(),
            },
        );
        self.history.add(entry)
    }

    /// Split `text` per the configured multi-page mode.
    pub fn pages(&self, text: &str) -> Result<Vec<Page>, ShareImageError> {
        paginate::paginate_if(self.config.multi_page, text, self.config.max_chars_per_page)
    }

    /// Paginate `request.content` and export every page into one archive.
    /// Pagination always applies here, whatever the multi-page setting.
    pub async fn export_pages(
        &self,
        target: &dyn RenderTarget,
        request: &CaptureRequest,
    ) -> Result<BatchOutput, ShareImageError> {
        let pages = paginate::paginate(&request.content, self.config.max_chars_per_page)?;
        info!("Exporting {} pages", pages.len());
        self.batch
            .export_all(target, &request.style, &pages, &request.options)
            .await
    }

    /// `share-image-<template>-<YYYY-MM-DD>.<ext>` for `result`.
    pub fn filename(&self, template_id: &str, result: &GenerationResult) -> String {
        naming::image_filename(template_id, result.created_at.date_naive(), result.format)
    }

    /// Write `result` into `dir` under its conventional filename.
    pub async fn download(
        &self,
        result: &GenerationResult,
        template_id: &str,
        dir: impl AsRef<Path>,
    ) -> Result<PathBuf, ShareImageError> {
        let path = dir.as_ref().join(self.filename(template_id, result));
        output::write_atomic(&path, &result.bytes).await?;
        info!("Saved {} ({} bytes)", path.display(), result.byte_len());
        self.notifier.notify(&Event::Downloaded { path: path.clone() });
        Ok(path)
    }

    /// Put the raster on the system clipboard.
    #[cfg(feature = "clipboard")]
    pub fn copy_to_clipboard(&self, result: &GenerationResult) -> Result<(), ShareImageError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| ShareImageError::Clipboard(e.to_string()))?;
        clipboard
            .set_image(arboard::ImageData {
                width: result.width as usize,
                height: result.height as usize,
                bytes: std::borrow::Cow::Borrowed(result.raster.as_raw()),
            })
            .map_err(|e| ShareImageError::Clipboard(e.to_string()))?;
        self.notifier.notify(&Event::Copied);
        Ok(())
    }
}
