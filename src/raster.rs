//! Rasterization capability and the built-in block rasterizer.
//!
//! The capture pipeline never talks to a concrete rendering engine. It hands
//! a detached [`Node`] plus a [`Geometry`] to whatever [`Rasterizer`] it was
//! built with and gets an RGBA buffer back. A browser canvas, a headless
//! renderer or an SVG pipeline can all sit behind the trait.
//!
//! [`BlockRasterizer`] is the dependency-free implementation used by the CLI
//! and the tests. It does real layout in the snapshot's font metrics but
//! paints every visible glyph as a solid cell, which is enough to produce
//! correctly sized, deterministic images.

use crate::config::StyleSnapshot;
use crate::dom::Node;
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use thiserror::Error;
use tracing::debug;

/// Largest raster the block rasterizer will allocate (16384²).
pub const MAX_RASTER_PIXELS: u64 = 16_384 * 16_384;

/// Width of one character cell as a fraction of the font size.
const CELL_WIDTH_EM: f32 = 0.6;

/// Locked layout box for one rasterization, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    /// `None` lets the node size itself to its content.
    pub height: Option<u32>,
}

impl Geometry {
    pub fn unconstrained(width: u32) -> Self {
        Self {
            width,
            height: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterOptions {
    /// Device pixel ratio.
    pub scale: f32,
    pub style: StyleSnapshot,
}

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Unsupported color '{0}'")]
    InvalidColor(String),

    #[error("Raster of {width}x{height} px exceeds the allocation limit")]
    TooLarge { width: u32, height: u32 },

    #[error("{0}")]
    Backend(String),
}

/// Renders a detached node into pixels.
///
/// Implementations may return a zero-width or zero-height image; the caller
/// treats that as an empty canvas and decides whether to retry.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(
        &self,
        node: &Node,
        geometry: &Geometry,
        options: &RasterOptions,
    ) -> Result<RgbaImage, RasterError>;
}

/// Monospace block layout of the node's text.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockRasterizer;

impl BlockRasterizer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Rasterizer for BlockRasterizer {
    async fn rasterize(
        &self,
        node: &Node,
        geometry: &Geometry,
        options: &RasterOptions,
    ) -> Result<RgbaImage, RasterError> {
        let text = node.text_content();
        let geometry = *geometry;
        let options = options.clone();

        // Painting is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || paint_blocks(&text, &geometry, &options))
            .await
            .map_err(|e| RasterError::Backend(format!("Raster task panicked: {}", e)))?
    }
}

/// Lines of at most `per_line` characters, honouring explicit newlines.
fn wrap(text: &str, per_line: usize) -> Vec<Vec<char>> {
    let mut rows = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            rows.push(Vec::new());
            continue;
        }
        rows.extend(chars.chunks(per_line).map(<[char]>::to_vec));
    }
    rows
}

/// Monospace block layout of some text at a fixed width.
struct Layout {
    padding: f32,
    cell_w: f32,
    row_h: f32,
    per_line: usize,
    rows: Vec<Vec<char>>,
}

impl Layout {
    fn new(text: &str, width: u32, style: &StyleSnapshot) -> Self {
        let padding = style.content_padding as f32;
        let cell_w = (style.font_size * CELL_WIDTH_EM).max(1.0);
        let row_h = (style.font_size * style.line_height).max(1.0);
        let inner_w = (width as f32 - 2.0 * padding).max(cell_w);
        let per_line = ((inner_w / cell_w).floor() as usize).max(1);
        let rows = if text.trim().is_empty() {
            Vec::new()
        } else {
            wrap(text, per_line)
        };
        Self {
            padding,
            cell_w,
            row_h,
            per_line,
            rows,
        }
    }

    /// Padding plus every row; 0 when there is nothing to show.
    fn content_height(&self) -> f32 {
        if self.rows.is_empty() {
            0.0
        } else {
            2.0 * self.padding + self.rows.len() as f32 * self.row_h
        }
    }
}

/// CSS height the block layout of `text` needs at `width`, rounded up.
///
/// # Example
/// ```rust
/// use share_image::{raster, StyleSnapshot};
///
/// let style = StyleSnapshot::default();
/// assert_eq!(raster::content_height("", 960, &style), 0);
/// // 32px padding top and bottom plus one 28.8px row.
/// assert_eq!(raster::content_height("Hi", 960, &style), 93);
/// ```
pub fn content_height(text: &str, width: u32, style: &StyleSnapshot) -> u32 {
    Layout::new(text, width, style).content_height().ceil() as u32
}

fn paint_blocks(
    text: &str,
    geometry: &Geometry,
    options: &RasterOptions,
) -> Result<RgbaImage, RasterError> {
    let style = &options.style;
    let bg = parse_color(&style.bg_color)?;
    let fg = parse_color(&style.text_color)?;

    let layout = Layout::new(text, geometry.width, style);
    let Layout {
        padding,
        cell_w,
        row_h,
        per_line,
        ref rows,
    } = layout;
    let css_h = geometry
        .height
        .map(|h| h as f32)
        .unwrap_or_else(|| layout.content_height());

    let scale = options.scale;
    let width = (geometry.width as f32 * scale).round() as u32;
    let height = (css_h * scale).round() as u32;
    if width as u64 * height as u64 > MAX_RASTER_PIXELS {
        return Err(RasterError::TooLarge { width, height });
    }

    let mut img = RgbaImage::from_pixel(width, height, bg);
    if width == 0 || height == 0 {
        debug!("Block raster is empty ({}x{})", width, height);
        return Ok(img);
    }

    // Glyph cells are inset so neighbouring characters stay distinguishable.
    let inset = (cell_w * 0.1 * scale).round() as u32;
    for (r, row) in rows.iter().enumerate() {
        let y0 = ((padding + r as f32 * row_h) * scale).round() as u32;
        let y1 = ((padding + (r + 1) as f32 * row_h) * scale).round() as u32;
        for (c, ch) in row.iter().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let x0 = ((padding + c as f32 * cell_w) * scale).round() as u32;
            let x1 = ((padding + (c + 1) as f32 * cell_w) * scale).round() as u32;
            fill_rect(
                &mut img,
                x0 + inset,
                y0 + inset,
                x1.saturating_sub(inset),
                y1.saturating_sub(inset),
                fg,
            );
        }
    }

    debug!(
        "Block raster {}x{} px ({} rows, {} per line)",
        width,
        height,
        rows.len(),
        per_line
    );
    Ok(img)
}

fn fill_rect(img: &mut RgbaImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgba<u8>) {
    let x1 = x1.min(img.width());
    let y1 = y1.min(img.height());
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, color);
        }
    }
}

/// Parse `#rgb`, `#rrggbb`, `#rrggbbaa` or `transparent`.
pub fn parse_color(value: &str) -> Result<Rgba<u8>, RasterError> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("transparent") {
        return Ok(Rgba([0, 0, 0, 0]));
    }
    let invalid = || RasterError::InvalidColor(value.to_string());
    let hex = v.strip_prefix('#').ok_or_else(invalid)?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let byte = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
    match hex.len() {
        3 => {
            let mut out = [0u8, 0, 0, 255];
            for (i, c) in hex.chars().enumerate() {
                let d = c.to_digit(16).ok_or_else(invalid)? as u8;
                out[i] = d * 17;
            }
            Ok(Rgba(out))
        }
        6 => Ok(Rgba([
            byte(&hex[0..2])?,
            byte(&hex[2..4])?,
            byte(&hex[4..6])?,
            255,
        ])),
        8 => Ok(Rgba([
            byte(&hex[0..2])?,
            byte(&hex[2..4])?,
            byte(&hex[4..6])?,
            byte(&hex[6..8])?,
        ])),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom;

    fn opts(scale: f32) -> RasterOptions {
        RasterOptions {
            scale,
            style: StyleSnapshot::default(),
        }
    }

    #[test]
    fn parses_supported_colors() {
        assert_eq!(parse_color("#fff").unwrap(), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_color("#1f2937").unwrap(), Rgba([0x1f, 0x29, 0x37, 255]));
        assert_eq!(parse_color("#00000080").unwrap(), Rgba([0, 0, 0, 0x80]));
        assert_eq!(parse_color("transparent").unwrap()[3], 0);
        assert!(parse_color("red").is_err());
        assert!(parse_color("#12").is_err());
    }

    #[test]
    fn wrap_respects_line_length_and_newlines() {
        let rows = wrap("abcdef\n\nxy", 4);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec!['a', 'b', 'c', 'd']);
        assert!(rows[2].is_empty());
    }

    #[tokio::test]
    async fn locked_height_is_honoured_at_scale() {
        let img = BlockRasterizer
            .rasterize(
                &dom::card("Hello"),
                &Geometry {
                    width: 960,
                    height: Some(540),
                },
                &opts(2.0),
            )
            .await
            .unwrap();
        assert_eq!(img.dimensions(), (1920, 1080));
        // Background in the padding, glyph ink inside the first cell.
        assert_eq!(*img.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        let ink = parse_color("#1f2937").unwrap();
        assert_eq!(*img.get_pixel(64 + 10, 64 + 10), ink);
    }

    #[tokio::test]
    async fn content_sized_text_has_height() {
        let img = BlockRasterizer
            .rasterize(&dom::card("Hi"), &Geometry::unconstrained(960), &opts(1.0))
            .await
            .unwrap();
        let row_h = 18.0f32 * 1.6;
        assert_eq!(img.height(), (64.0 + row_h).round() as u32);
    }

    #[tokio::test]
    async fn empty_node_without_height_is_empty() {
        let img = BlockRasterizer
            .rasterize(&dom::card(""), &Geometry::unconstrained(960), &opts(3.0))
            .await
            .unwrap();
        assert_eq!(img.height(), 0);
    }

    #[tokio::test]
    async fn oversized_raster_is_rejected() {
        let err = BlockRasterizer
            .rasterize(
                &dom::card("x"),
                &Geometry {
                    width: 20_000,
                    height: Some(20_000),
                },
                &opts(1.0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RasterError::TooLarge { .. }));
    }
}
