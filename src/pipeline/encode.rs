//! Image encoding: `RgbaImage` → PNG / JPEG / WebP bytes and data URLs.
//!
//! JPEG has no alpha channel, so the raster is flattened to RGB first and
//! the request's quality is applied. PNG and WebP are lossless and ignore
//! quality. A raster that is too large to encode gets one retry after
//! shrinking both sides by the configured downscale ratio.

use crate::config::{GenerationOptions, ImageFormat, PipelineConfig};
use crate::error::ShareImageError;
use crate::notify::{Event, Notifier};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::error::ImageError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("raster {width}x{height} exceeds the {max} pixel encoding limit")]
    TooLarge { width: u32, height: u32, max: u64 },

    #[error(transparent)]
    Image(#[from] ImageError),
}

impl EncodeError {
    /// Failures a smaller raster may avoid.
    pub fn is_size_related(&self) -> bool {
        matches!(
            self,
            EncodeError::TooLarge { .. } | EncodeError::Image(ImageError::Limits(_))
        )
    }
}

fn jpeg_quality(quality: f32) -> u8 {
    (quality.clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Encode `img` in `format`.
pub fn encode_raster(
    img: &RgbaImage,
    format: ImageFormat,
    quality: f32,
    max_pixels: u64,
) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = img.dimensions();
    if width as u64 * height as u64 > max_pixels {
        return Err(EncodeError::TooLarge {
            width,
            height,
            max: max_pixels,
        });
    }

    let mut buf = Vec::new();
    match format {
        ImageFormat::Png => img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?,
        ImageFormat::Webp => img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::WebP)?,
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, jpeg_quality(quality)))?;
        }
    }
    debug!("Encoded {}x{} raster → {} bytes {}", width, height, buf.len(), format);
    Ok(buf)
}

/// Wrap encoded bytes as a `data:` URL.
pub fn to_data_url(format: ImageFormat, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(bytes))
}

/// Shrink both sides by `ratio`, never below one pixel.
pub fn downscale(img: &RgbaImage, ratio: f32) -> RgbaImage {
    let w = ((img.width() as f32 * ratio).round() as u32).max(1);
    let h = ((img.height() as f32 * ratio).round() as u32).max(1);
    imageops::resize(img, w, h, FilterType::Triangle)
}

/// Encode, retrying once on a downscaled copy when the failure is
/// size-related. Returns the raster that was actually encoded with its bytes.
pub fn encode_with_downscale(
    img: RgbaImage,
    options: &GenerationOptions,
    config: &PipelineConfig,
    notifier: &dyn Notifier,
) -> Result<(RgbaImage, Vec<u8>), ShareImageError> {
    let failure = |detail: String| ShareImageError::EncodingFailure {
        format: options.format.to_string(),
        detail,
    };

    match encode_raster(&img, options.format, options.quality, config.max_encode_pixels) {
        Ok(bytes) => Ok((img, bytes)),
        Err(e) if e.is_size_related() => {
            let ratio = config.encode_downscale_ratio;
            let smaller = downscale(&img, ratio);
            warn!(
                "Encoding {}x{} failed ({}), retrying at {}x{}",
                img.width(),
                img.height(),
                e,
                smaller.width(),
                smaller.height()
            );
            notifier.notify(&Event::Downscaled {
                ratio,
                width: smaller.width(),
                height: smaller.height(),
            });
            let bytes = encode_raster(
                &smaller,
                options.format,
                options.quality,
                config.max_encode_pixels,
            )
            .map_err(|e| failure(e.to_string()))?;
            Ok((smaller, bytes))
        }
        Err(e) => Err(failure(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use image::Rgba;

    fn red(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255]))
    }

    #[test]
    fn encodes_each_format_with_its_signature() {
        let img = red(10, 10);
        let png = encode_raster(&img, ImageFormat::Png, 0.9, u64::MAX).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
        let jpeg = encode_raster(&img, ImageFormat::Jpeg, 0.9, u64::MAX).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let webp = encode_raster(&img, ImageFormat::Webp, 0.9, u64::MAX).unwrap();
        assert_eq!(&webp[..4], b"RIFF");
        assert_eq!(&webp[8..12], b"WEBP");
    }

    #[test]
    fn data_url_has_mime_prefix() {
        let url = to_data_url(ImageFormat::Jpeg, b"abc");
        assert_eq!(url, "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn oversized_raster_is_downscaled_once() {
        // 100x100 = 10_000 px; limit admits the 80x80 retry only.
        let config = PipelineConfig::builder().max_encode_pixels(8_000).build().unwrap();
        let options = GenerationOptions::default();
        let (img, bytes) = encode_with_downscale(red(100, 100), &options, &config, &NoopNotifier).unwrap();
        assert_eq!(img.dimensions(), (80, 80));
        assert!(!bytes.is_empty());
    }

    #[test]
    fn still_too_large_after_downscale_fails() {
        let config = PipelineConfig::builder().max_encode_pixels(1_000).build().unwrap();
        let options = GenerationOptions::default().with_format(ImageFormat::Webp);
        let err = encode_with_downscale(red(100, 100), &options, &config, &NoopNotifier).unwrap_err();
        match err {
            ShareImageError::EncodingFailure { format, .. } => assert_eq!(format, "webp"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn jpeg_quality_is_clamped() {
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(0.9), 90);
        assert_eq!(jpeg_quality(2.0), 100);
    }
}
