//! Isolated rasterization with a bounded wait and an empty-canvas fallback.
//!
//! ## Why a clone?
//!
//! Rasterizing the live node flickers on screen and lets sub-resources run
//! or load mid-capture. Every attempt therefore works on a deep copy with
//! `script`/`iframe`/`object`/`embed` removed and its size written into a
//! `style` attribute, so the rasterizer sees the locked geometry even when
//! it lays the copy out in a detached context.
//!
//! ## Why the fallback?
//!
//! Some layout engines report a zero-area box for detached nodes at high
//! device pixel ratios. One retry at the fallback scale with no height
//! constraint usually recovers; a second empty result is surfaced as
//! [`ShareImageError::EmptyCanvas`].

use crate::dom::Node;
use crate::error::ShareImageError;
use crate::notify::{Event, Notifier};
use crate::raster::{Geometry, RasterOptions, Rasterizer};
use crate::target::RenderTarget;
use image::RgbaImage;
use std::time::Duration;
use tracing::{debug, warn};

/// Write the locked size onto the clone's root.
fn apply_geometry(node: &mut Node, geometry: &Geometry) {
    let style = match geometry.height {
        Some(h) => format!("width:{}px;min-height:{}px;height:{}px", geometry.width, h, h),
        None => format!("width:{}px", geometry.width),
    };
    node.set_attr("style", style);
}

/// Detached, sanitised copy of the target sized to `geometry`.
pub fn isolated_clone(target: &dyn RenderTarget, geometry: &Geometry) -> Node {
    let mut node = target.snapshot();
    let removed = node.strip_disallowed();
    if removed > 0 {
        debug!("Stripped {} disallowed element(s) from capture clone", removed);
    }
    apply_geometry(&mut node, geometry);
    node
}

/// One bounded rasterization attempt.
pub async fn rasterize_once(
    rasterizer: &dyn Rasterizer,
    node: &Node,
    geometry: &Geometry,
    options: &RasterOptions,
    timeout: Duration,
) -> Result<RgbaImage, ShareImageError> {
    match tokio::time::timeout(timeout, rasterizer.rasterize(node, geometry, options)).await {
        Ok(Ok(img)) => Ok(img),
        Ok(Err(e)) => Err(ShareImageError::RasterFailed(e.to_string())),
        Err(_) => Err(ShareImageError::RenderTimeout {
            elapsed_ms: timeout.as_millis() as u64,
        }),
    }
}

fn is_empty(img: &RgbaImage) -> bool {
    img.width() == 0 || img.height() == 0
}

/// A successful raster and the scale it was actually produced at.
#[derive(Debug)]
pub struct Rastered {
    pub image: RgbaImage,
    pub scale: f32,
}

/// Rasterize `node`, retrying once at `fallback_scale` without a height
/// constraint when the first result has zero area.
#[allow(clippy::too_many_arguments)]
pub async fn rasterize_with_fallback(
    rasterizer: &dyn Rasterizer,
    node: &Node,
    geometry: &Geometry,
    options: &RasterOptions,
    timeout: Duration,
    fallback_scale: f32,
    page: usize,
    notifier: &dyn Notifier,
) -> Result<Rastered, ShareImageError> {
    let first = rasterize_once(rasterizer, node, geometry, options, timeout).await?;
    if !is_empty(&first) {
        return Ok(Rastered {
            image: first,
            scale: options.scale,
        });
    }

    warn!(
        "Page {}: empty raster ({}x{}) at scale {}, retrying at scale {} without height",
        page,
        first.width(),
        first.height(),
        options.scale,
        fallback_scale
    );
    notifier.notify(&Event::RasterFallback {
        page,
        scale: fallback_scale,
    });

    let relaxed = Geometry::unconstrained(geometry.width);
    let mut retry_node = node.clone();
    apply_geometry(&mut retry_node, &relaxed);
    let retry_options = RasterOptions {
        scale: fallback_scale,
        style: options.style.clone(),
    };

    let second = rasterize_once(rasterizer, &retry_node, &relaxed, &retry_options, timeout).await?;
    if is_empty(&second) {
        return Err(ShareImageError::EmptyCanvas {
            width: second.width(),
            height: second.height(),
        });
    }
    Ok(Rastered {
        image: second,
        scale: fallback_scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StyleSnapshot;
    use crate::notify::NoopNotifier;
    use crate::raster::{BlockRasterizer, RasterError};
    use crate::target::DomTarget;
    use async_trait::async_trait;

    struct Slow;

    #[async_trait]
    impl Rasterizer for Slow {
        async fn rasterize(
            &self,
            _node: &Node,
            _geometry: &Geometry,
            _options: &RasterOptions,
        ) -> Result<RgbaImage, RasterError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RgbaImage::new(1, 1))
        }
    }

    fn options(scale: f32) -> RasterOptions {
        RasterOptions {
            scale,
            style: StyleSnapshot::default(),
        }
    }

    #[test]
    fn clone_is_stripped_and_sized() {
        let target = DomTarget::new(
            crate::dom::card("hi").with_child(Node::element("script").with_child(Node::text("x"))),
        );
        let geometry = Geometry {
            width: 960,
            height: Some(540),
        };
        let node = isolated_clone(&target, &geometry);
        assert_eq!(node.text_content(), "hi");
        assert!(node.attr("style").unwrap().contains("min-height:540px"));
        // The live target is untouched.
        assert!(target.snapshot().attr("style").is_none());
        assert_eq!(target.snapshot().text_content(), "hix");
    }

    #[tokio::test]
    async fn timeout_surfaces_render_timeout() {
        let err = rasterize_once(
            &Slow,
            &Node::text("x"),
            &Geometry::unconstrained(10),
            &options(1.0),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ShareImageError::RenderTimeout { elapsed_ms: 10 }));
    }

    #[tokio::test]
    async fn empty_after_fallback_is_empty_canvas() {
        let err = rasterize_with_fallback(
            &BlockRasterizer,
            &crate::dom::card(""),
            &Geometry::unconstrained(960),
            &options(3.0),
            Duration::from_secs(5),
            1.0,
            1,
            &NoopNotifier,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ShareImageError::EmptyCanvas { height: 0, .. }));
    }
}
