//! Batch export: every page through the queue, one zip out.
//!
//! Pages are captured strictly in order through the shared
//! [`RenderQueue`], so a batch interleaves cleanly with single captures
//! submitted meanwhile. A failing page is recorded as a [`PageError`] and
//! the batch moves on; only a batch in which *every* page failed is an
//! error.

use crate::capture::CaptureOrchestrator;
use crate::config::{GenerationOptions, StyleSnapshot};
use crate::error::{PageError, ShareImageError};
use crate::naming;
use crate::notify::{Event, SharedNotifier};
use crate::output::{Archive, BatchOutput, BatchStats, PageOutcome};
use crate::paginate::Page;
use crate::queue::RenderQueue;
use crate::target::RenderTarget;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::io::{Cursor, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::Stream;
use tracing::{info, warn};
use zip::write::FileOptions;

/// A boxed stream of per-page outcomes, in page order.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = PageOutcome> + Send + 'a>>;

pub struct BatchExporter {
    queue: RenderQueue,
    orchestrator: Arc<CaptureOrchestrator>,
    notifier: SharedNotifier,
}

impl BatchExporter {
    pub fn new(
        queue: RenderQueue,
        orchestrator: Arc<CaptureOrchestrator>,
        notifier: SharedNotifier,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            notifier,
        }
    }

    /// Capture `pages` one after another, yielding each outcome as soon as
    /// it is known. Each page's text is rendered into `target` right before
    /// its capture. Emits `BatchProgress` per page.
    pub fn export_stream<'a>(
        &'a self,
        target: &'a dyn RenderTarget,
        snapshot: &'a StyleSnapshot,
        pages: Vec<Page>,
        options: GenerationOptions,
    ) -> PageStream<'a> {
        let total = pages.len();
        let s = stream::iter(pages.into_iter().enumerate()).then(move |(i, page)| async move {
            let page_num = page.index + 1;
            let orchestrator = Arc::clone(&self.orchestrator);
            let result = self
                .queue
                .submit(move || async move {
                    target.render_content(&page.text);
                    orchestrator.capture(target, snapshot, &page, &options).await
                })
                .await;

            let outcome = match result {
                Ok(r) => PageOutcome::success(page_num, r),
                Err(e) => {
                    warn!("Batch page {} failed: {}", page_num, e);
                    PageOutcome::failure(page_num, PageError::from_capture(page_num, &e))
                }
            };
            self.notifier.notify(&Event::BatchProgress {
                current: i + 1,
                total,
                error: outcome.error.as_ref().map(|e| e.to_string()),
            });
            outcome
        });
        Box::pin(s)
    }

    /// Capture every page and bundle the successes into a zip.
    ///
    /// # Errors
    /// - `InvalidConfig` when `pages` is empty
    /// - `AllPagesFailed` when no page produced an image
    /// - `ArchiveFailed` when the zip could not be written
    pub async fn export_all(
        &self,
        target: &dyn RenderTarget,
        snapshot: &StyleSnapshot,
        pages: &[Page],
        options: &GenerationOptions,
    ) -> Result<BatchOutput, ShareImageError> {
        if pages.is_empty() {
            return Err(ShareImageError::InvalidConfig("nothing to export".into()));
        }
        let start = Instant::now();
        let total = pages.len();
        self.notifier.notify(&Event::BatchStart { total });
        info!("Batch export of {} pages", total);

        let outcomes: Vec<PageOutcome> = self
            .export_stream(target, snapshot, pages.to_vec(), *options)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = total - succeeded;
        self.notifier.notify(&Event::BatchComplete { succeeded, failed });

        if succeeded == 0 {
            let first_error = outcomes
                .iter()
                .find_map(|o| o.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(ShareImageError::AllPagesFailed { total, first_error });
        }

        let archive = bundle(&outcomes, Utc::now().timestamp_millis())?;
        let stats = BatchStats {
            total_pages: total,
            succeeded,
            failed,
            archive_bytes: archive.bytes.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Batch complete: {}/{} pages, {} bytes in {}ms",
            succeeded, total, stats.archive_bytes, stats.duration_ms
        );

        Ok(BatchOutput {
            archive,
            pages: outcomes,
            stats,
        })
    }

    /// Export independent content strings, one image each.
    pub async fn export_contents(
        &self,
        target: &dyn RenderTarget,
        snapshot: &StyleSnapshot,
        contents: &[String],
        options: &GenerationOptions,
    ) -> Result<BatchOutput, ShareImageError> {
        let pages: Vec<Page> = contents
            .iter()
            .enumerate()
            .map(|(index, text)| Page {
                index,
                ..Page::whole(text)
            })
            .collect();
        self.export_all(target, snapshot, &pages, options).await
    }
}

fn archive_err(e: impl std::fmt::Display) -> ShareImageError {
    ShareImageError::ArchiveFailed(e.to_string())
}

/// Zip the successful outcomes as `page-<n>.<ext>`.
fn bundle(outcomes: &[PageOutcome], epoch_millis: i64) -> Result<Archive, ShareImageError> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut entries = Vec::new();

    for outcome in outcomes {
        let Some(result) = &outcome.result else {
            continue;
        };
        let name = naming::page_entry_name(outcome.page, result.format);
        zip.start_file(name.as_str(), options)
            .map_err(archive_err)?;
        zip.write_all(&result.bytes).map_err(archive_err)?;
        entries.push(name);
    }

    let bytes = zip.finish().map_err(archive_err)?.into_inner();
    Ok(Archive {
        filename: naming::archive_filename(epoch_millis),
        bytes,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::notify::noop;
    use crate::raster::BlockRasterizer;
    use crate::target::DomTarget;
    use std::io::Read;

    fn exporter() -> BatchExporter {
        let orchestrator = Arc::new(CaptureOrchestrator::new(
            Arc::new(BlockRasterizer),
            PipelineConfig::default(),
            noop(),
        ));
        BatchExporter::new(RenderQueue::new(1), orchestrator, noop())
    }

    #[tokio::test]
    async fn bundles_every_page_in_order() {
        let target = DomTarget::card("");
        let pages = crate::paginate("A\n\nB\n\nC", 3).unwrap();
        let out = exporter()
            .export_all(
                &target,
                &StyleSnapshot::default(),
                &pages,
                &GenerationOptions::default().with_scale(1.0),
            )
            .await
            .unwrap();

        assert_eq!(out.archive.entries, ["page-1.png", "page-2.png", "page-3.png"]);
        assert_eq!(out.stats.succeeded, 3);
        assert!(out.archive.filename.starts_with("share-images-"));

        let mut zip = zip::ZipArchive::new(Cursor::new(out.archive.bytes.clone())).unwrap();
        let mut png = Vec::new();
        zip.by_name("page-2.png").unwrap().read_to_end(&mut png).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
        // The target was left showing the last page.
        assert_eq!(target.rendered_text(), "C");
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let target = DomTarget::card("");
        let err = exporter()
            .export_contents(
                &target,
                &StyleSnapshot::default(),
                &[],
                &GenerationOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShareImageError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn all_pages_failing_is_fatal() {
        let target = DomTarget::card("");
        let snapshot = StyleSnapshot {
            text_color: "nope".into(),
            ..StyleSnapshot::default()
        };
        let err = exporter()
            .export_contents(
                &target,
                &snapshot,
                &["x".to_string(), "y".to_string()],
                &GenerationOptions::default().with_scale(1.0),
            )
            .await
            .unwrap_err();
        match err {
            ShareImageError::AllPagesFailed { total, first_error } => {
                assert_eq!(total, 2);
                assert!(first_error.starts_with("Page 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
