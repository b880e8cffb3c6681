//! History thumbnails: a small JPEG data URL of a finished raster.

use crate::config::ImageFormat;
use crate::pipeline::encode::{self, EncodeError};
use image::imageops::{self, FilterType};
use image::RgbaImage;

/// Scale `img` so its longest side is at most `max_size` (never upscaling)
/// and encode it as a JPEG data URL at `quality`.
pub fn make_thumbnail(img: &RgbaImage, max_size: u32, quality: f32) -> Result<String, EncodeError> {
    let (w, h) = img.dimensions();
    let ratio = (max_size as f32 / w.max(1) as f32)
        .min(max_size as f32 / h.max(1) as f32)
        .min(1.0);

    let bytes = if ratio < 1.0 {
        let tw = ((w as f32 * ratio).round() as u32).max(1);
        let th = ((h as f32 * ratio).round() as u32).max(1);
        let small = imageops::resize(img, tw, th, FilterType::Triangle);
        encode::encode_raster(&small, ImageFormat::Jpeg, quality, u64::MAX)?
    } else {
        encode::encode_raster(img, ImageFormat::Jpeg, quality, u64::MAX)?
    };
    Ok(encode::to_data_url(ImageFormat::Jpeg, &bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::Rgba;

    fn decode(url: &str) -> RgbaImage {
        let b64 = url.strip_prefix("data:image/jpeg;base64,").unwrap();
        let bytes = STANDARD.decode(b64).unwrap();
        image::load_from_memory(&bytes).unwrap().to_rgba8()
    }

    #[test]
    fn longest_side_is_bounded() {
        let img = RgbaImage::from_pixel(2000, 1000, Rgba([10, 20, 30, 255]));
        let thumb = decode(&make_thumbnail(&img, 200, 0.7).unwrap());
        assert_eq!(thumb.dimensions(), (200, 100));
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let img = RgbaImage::from_pixel(50, 40, Rgba([10, 20, 30, 255]));
        let thumb = decode(&make_thumbnail(&img, 200, 0.7).unwrap());
        assert_eq!(thumb.dimensions(), (50, 40));
    }
}
