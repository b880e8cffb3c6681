//! End-to-end tests for the capture pipeline.
//!
//! Everything runs against the in-memory store and scripted rasterizers, so
//! no display, browser or network is needed.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use image::RgbaImage;
use share_image::dom::Node;
use share_image::{
    paginate, raster, BlockRasterizer, CaptureRequest, DomTarget, Event, FnNotifier, Generator,
    Geometry, PipelineConfig, RasterError, RasterOptions, Rasterizer, RenderTarget, SharedNotifier,
    Storage, StyleSnapshot,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Notifier that keeps every event for later assertions.
fn recorder() -> (SharedNotifier, Arc<Mutex<Vec<Event>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let notifier: SharedNotifier = Arc::new(FnNotifier(move |e: &Event| {
        sink.lock().unwrap().push(e.clone());
    }));
    (notifier, events)
}

fn generator(
    rasterizer: Arc<dyn Rasterizer>,
    config: PipelineConfig,
    notifier: SharedNotifier,
) -> Generator {
    Generator::new(rasterizer, Storage::in_memory("test_"), config, notifier).unwrap()
}

/// Returns an empty canvas above scale 1.5, otherwise renders normally.
struct HighDprBlank;

#[async_trait]
impl Rasterizer for HighDprBlank {
    async fn rasterize(
        &self,
        node: &Node,
        geometry: &Geometry,
        options: &RasterOptions,
    ) -> Result<RgbaImage, RasterError> {
        if options.scale > 1.5 {
            return Ok(RgbaImage::new(0, 0));
        }
        BlockRasterizer.rasterize(node, geometry, options).await
    }
}

/// Fails any card whose text contains `poison`.
struct FailOn {
    poison: &'static str,
}

#[async_trait]
impl Rasterizer for FailOn {
    async fn rasterize(
        &self,
        node: &Node,
        geometry: &Geometry,
        options: &RasterOptions,
    ) -> Result<RgbaImage, RasterError> {
        if node.card_text().contains(self.poison) {
            return Err(RasterError::Backend("simulated canvas failure".into()));
        }
        BlockRasterizer.rasterize(node, geometry, options).await
    }
}

/// Tracks how many rasterizations overlap.
#[derive(Default)]
struct Overlap {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Rasterizer for Overlap {
    async fn rasterize(
        &self,
        node: &Node,
        geometry: &Geometry,
        options: &RasterOptions,
    ) -> Result<RgbaImage, RasterError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let out = BlockRasterizer.rasterize(node, geometry, options).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stale_preview_is_repaired_before_capture() {
    let (notifier, events) = recorder();
    let g = generator(Arc::new(BlockRasterizer), PipelineConfig::default(), notifier);
    let target = DomTarget::card("Type something...");

    let result = g
        .generate(&target, &CaptureRequest::new("Hello", "template-minimal").with_scale(1.0))
        .await
        .unwrap();

    assert_eq!(target.rendered_text(), "Hello");
    assert_eq!(result.width, 960);
    assert!(events
        .lock()
        .unwrap()
        .contains(&Event::ContentRepaired { page: 1 }));
}

#[tokio::test]
async fn long_text_grows_the_card_instead_of_clipping() {
    let g = generator(Arc::new(BlockRasterizer), PipelineConfig::default(), share_image::noop());
    let target = DomTarget::card("");
    let text = "word ".repeat(600);
    let style = StyleSnapshot::default();

    let result = g
        .generate(&target, &CaptureRequest::new(text.as_str(), "t").with_scale(1.0))
        .await
        .unwrap();

    let needed = raster::content_height(&text, style.card_width, &style);
    assert!(needed > 540);
    assert_eq!(result.height, needed);

    // The last row carries ink: 3000 chars at 82 per row leaves 48 on row 37.
    let ink = raster::parse_color(&style.text_color).unwrap();
    let last_row_y = 32 + (36.0 * 28.8 + 10.0) as u32;
    assert_eq!(*result.raster.get_pixel(32 + 5, last_row_y), ink);
}

#[tokio::test]
async fn empty_canvas_at_high_scale_falls_back_to_scale_one() {
    let (notifier, events) = recorder();
    let g = generator(Arc::new(HighDprBlank), PipelineConfig::default(), notifier);
    let target = DomTarget::card("Hello");
    let before = target.style();

    let result = g
        .generate(&target, &CaptureRequest::new("Hello", "t").with_scale(3.0))
        .await
        .unwrap();

    assert_eq!(result.scale, 1.0);
    assert_eq!(result.width, 960);
    assert!(result.height > 0);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, Event::RasterFallback { page: 1, .. })));
    assert_eq!(target.style(), before);
}

#[tokio::test]
async fn concurrent_requests_never_overlap() {
    let rasterizer = Arc::new(Overlap::default());
    let g = generator(
        Arc::clone(&rasterizer) as Arc<dyn Rasterizer>,
        PipelineConfig::default(),
        share_image::noop(),
    );
    let target = DomTarget::card("");
    let a = CaptureRequest::new("first", "t").with_scale(1.0);
    let b = CaptureRequest::new("second", "t").with_scale(1.0);
    let c = CaptureRequest::new("third", "t").with_scale(1.0);

    let (ra, rb, rc) = tokio::join!(
        g.generate(&target, &a),
        g.generate(&target, &b),
        g.generate(&target, &c)
    );
    assert!(ra.is_ok() && rb.is_ok() && rc.is_ok());
    assert_eq!(rasterizer.peak.load(Ordering::SeqCst), 1);

    // Newest first: the queue ran them in submission order.
    let contents: Vec<String> = g
        .history()
        .list()
        .unwrap()
        .into_iter()
        .map(|e| e.content)
        .collect();
    assert_eq!(contents, ["third", "second", "first"]);
}

#[tokio::test]
async fn history_keeps_most_recent_within_capacity() {
    let config = PipelineConfig::builder().history_capacity(2).build().unwrap();
    let g = generator(Arc::new(BlockRasterizer), config, share_image::noop());
    let target = DomTarget::card("");

    for text in ["A", "B", "C"] {
        g.generate(&target, &CaptureRequest::new(text, "t").with_scale(1.0))
            .await
            .unwrap();
    }

    let contents: Vec<String> = g
        .history()
        .list()
        .unwrap()
        .into_iter()
        .map(|e| e.content)
        .collect();
    assert_eq!(contents, ["C", "B"]);
}

#[tokio::test]
async fn batch_skips_failed_pages_and_reports_them() {
    let (notifier, events) = recorder();
    let config = PipelineConfig::builder().max_chars_per_page(3).build().unwrap();
    let g = generator(Arc::new(FailOn { poison: "B" }), config, notifier);
    let target = DomTarget::card("");

    let out = g
        .export_pages(&target, &CaptureRequest::new("A\n\nB\n\nC", "t").with_scale(1.0))
        .await
        .unwrap();

    assert_eq!(out.archive.entries, ["page-1.png", "page-3.png"]);
    assert_eq!(out.stats.total_pages, 3);
    assert_eq!(out.stats.succeeded, 2);
    assert_eq!(out.stats.failed, 1);

    let failures: Vec<_> = out.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].page(), 2);
    assert!(out.pages[1].result.is_none());

    let events = events.lock().unwrap();
    assert!(events.contains(&Event::BatchStart { total: 3 }));
    assert!(events.contains(&Event::BatchComplete {
        succeeded: 2,
        failed: 1
    }));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::BatchProgress { current: 2, error: Some(_), .. })));
}

#[tokio::test]
async fn history_survives_export_and_import_into_a_fresh_store() {
    let source = generator(Arc::new(BlockRasterizer), PipelineConfig::default(), share_image::noop());
    let target = DomTarget::card("");
    for text in ["one", "two"] {
        source
            .generate(&target, &CaptureRequest::new(text, "t").with_scale(1.0))
            .await
            .unwrap();
    }
    let json = source.history().export_json().unwrap();

    let dest = generator(Arc::new(BlockRasterizer), PipelineConfig::default(), share_image::noop());
    assert_eq!(dest.history().import(&json).unwrap(), 2);
    assert_eq!(dest.history().list().unwrap(), source.history().list().unwrap());
}

#[test]
fn paragraphs_become_pages() {
    let pages = paginate("A\n\nB\n\nC", 3).unwrap();
    let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, ["A", "B", "C"]);
    assert_eq!(pages.iter().map(|p| p.index).collect::<Vec<_>>(), [0, 1, 2]);
}
