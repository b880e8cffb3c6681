//! Configuration types for capture, history and export.
//!
//! Pipeline-wide behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Per-request knobs (scale, format, quality,
//! timeout) live in [`GenerationOptions`], and the visual parameters captured
//! at request time live in [`StyleSnapshot`].

use crate::error::ShareImageError;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage key under which the pipeline configuration is persisted.
pub const CONFIG_KEY: &str = "config";

/// Configuration shared by every capture, the render queue and the history.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use share_image::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .history_capacity(20)
///     .default_scale(2.0)
///     .build()
///     .unwrap();
/// assert_eq!(config.history_capacity, 20);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of history entries kept. Default: 50.
    pub history_capacity: usize,

    /// Captures allowed in flight at once. Default: 1 (single-flight).
    pub max_concurrent: usize,

    /// Scale used when a request does not name one. Default: 3.0.
    pub default_scale: f32,

    /// Inclusive bounds for any requested scale. Default: (1.0, 4.0).
    pub scale_range: (f32, f32),

    /// Lower bound for the locked capture height, in CSS pixels. Default: 540.
    ///
    /// Offscreen layout can collapse a node to zero height; the lock keeps
    /// the rasterized card at least this tall.
    pub min_capture_height: u32,

    /// Scale for the retry after an empty raster. Default: 1.0.
    pub empty_canvas_fallback_scale: f32,

    /// Factor applied to the raster before the encoding retry. Default: 0.8.
    pub encode_downscale_ratio: f32,

    /// Encoded rasters above this pixel count fail as too large. Default: 64 Mpx.
    pub max_encode_pixels: u64,

    /// Per-attempt rasterization bound in milliseconds. Default: 30000.
    pub raster_timeout_ms: u64,

    /// Wait after a forced content repair before re-checking. Default: 100.
    pub settle_delay_ms: u64,

    /// Fail a capture whose displayed text stays wrong after repair. Default: false.
    pub strict_content_check: bool,

    /// Split long text into pages before capture. Default: false.
    pub multi_page: bool,

    /// Page bound used when `multi_page` is on. Default: 800.
    pub max_chars_per_page: usize,

    /// Longest side of history thumbnails in pixels. Default: 200.
    pub thumbnail_max_size: u32,

    /// JPEG quality (0.0–1.0) of history thumbnails. Default: 0.7.
    pub thumbnail_quality: f32,

    /// Prefix applied to every persisted key. Default: "share_image_".
    pub storage_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            max_concurrent: 1,
            default_scale: 3.0,
            scale_range: (1.0, 4.0),
            min_capture_height: 540,
            empty_canvas_fallback_scale: 1.0,
            encode_downscale_ratio: 0.8,
            max_encode_pixels: 64 * 1024 * 1024,
            raster_timeout_ms: 30_000,
            settle_delay_ms: 100,
            strict_content_check: false,
            multi_page: false,
            max_chars_per_page: 800,
            thumbnail_max_size: 200,
            thumbnail_quality: 0.7,
            storage_prefix: "share_image_".to_string(),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("history_capacity", &self.history_capacity)
            .field("max_concurrent", &self.max_concurrent)
            .field("default_scale", &self.default_scale)
            .field("scale_range", &self.scale_range)
            .field("min_capture_height", &self.min_capture_height)
            .field("raster_timeout_ms", &self.raster_timeout_ms)
            .field("multi_page", &self.multi_page)
            .field("max_chars_per_page", &self.max_chars_per_page)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check every constraint the builder enforces.
    pub fn validate(&self) -> Result<(), ShareImageError> {
        let (lo, hi) = self.scale_range;
        if !(lo > 0.0 && lo <= hi) {
            return Err(ShareImageError::InvalidConfig(format!(
                "scale range must satisfy 0 < min <= max, got {lo}..{hi}"
            )));
        }
        if self.default_scale < lo || self.default_scale > hi {
            return Err(ShareImageError::InvalidConfig(format!(
                "default scale {} outside {lo}..{hi}",
                self.default_scale
            )));
        }
        if self.history_capacity == 0 {
            return Err(ShareImageError::InvalidConfig(
                "history capacity must be ≥ 1".into(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(ShareImageError::InvalidConfig(
                "max concurrent captures must be ≥ 1".into(),
            ));
        }
        if self.multi_page && self.max_chars_per_page == 0 {
            return Err(ShareImageError::InvalidConfig(
                "max chars per page must be ≥ 1".into(),
            ));
        }
        if !(self.encode_downscale_ratio > 0.0 && self.encode_downscale_ratio < 1.0) {
            return Err(ShareImageError::InvalidConfig(format!(
                "encode downscale ratio must be in (0, 1), got {}",
                self.encode_downscale_ratio
            )));
        }
        if self.empty_canvas_fallback_scale <= 0.0 {
            return Err(ShareImageError::InvalidConfig(
                "empty-canvas fallback scale must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Load the persisted configuration, falling back to defaults when none
    /// is stored or the stored value has expired.
    pub fn load(storage: &Storage) -> Result<Self, ShareImageError> {
        let config: Option<Self> = storage.get_json(CONFIG_KEY)?;
        let config = config.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Persist this configuration.
    pub fn save(&self, storage: &Storage) -> Result<(), ShareImageError> {
        self.validate()?;
        storage.set_json(CONFIG_KEY, self, None)?;
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn history_capacity(mut self, n: usize) -> Self {
        self.config.history_capacity = n.max(1);
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n.max(1);
        self
    }

    pub fn default_scale(mut self, scale: f32) -> Self {
        self.config.default_scale = scale;
        self
    }

    pub fn scale_range(mut self, min: f32, max: f32) -> Self {
        self.config.scale_range = (min, max);
        self
    }

    pub fn min_capture_height(mut self, px: u32) -> Self {
        self.config.min_capture_height = px;
        self
    }

    pub fn empty_canvas_fallback_scale(mut self, scale: f32) -> Self {
        self.config.empty_canvas_fallback_scale = scale;
        self
    }

    pub fn encode_downscale_ratio(mut self, ratio: f32) -> Self {
        self.config.encode_downscale_ratio = ratio;
        self
    }

    pub fn max_encode_pixels(mut self, px: u64) -> Self {
        self.config.max_encode_pixels = px.max(1);
        self
    }

    pub fn raster_timeout_ms(mut self, ms: u64) -> Self {
        self.config.raster_timeout_ms = ms;
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn strict_content_check(mut self, v: bool) -> Self {
        self.config.strict_content_check = v;
        self
    }

    pub fn multi_page(mut self, v: bool) -> Self {
        self.config.multi_page = v;
        self
    }

    pub fn max_chars_per_page(mut self, n: usize) -> Self {
        self.config.max_chars_per_page = n;
        self
    }

    pub fn thumbnail_max_size(mut self, px: u32) -> Self {
        self.config.thumbnail_max_size = px.max(1);
        self
    }

    pub fn thumbnail_quality(mut self, q: f32) -> Self {
        self.config.thumbnail_quality = q.clamp(0.0, 1.0);
        self
    }

    pub fn storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.storage_prefix = prefix.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ShareImageError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Request values ───────────────────────────────────────────────────────

/// Output image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// File extension, also used in artifact names.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = ShareImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(ShareImageError::InvalidConfig(format!(
                "unknown image format '{other}' (expected png, jpeg or webp)"
            ))),
        }
    }
}

/// Per-request capture options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    /// Device pixel ratio for the raster, within the configured scale range.
    pub scale: f32,
    pub format: ImageFormat,
    /// Lossy quality in 0.0–1.0; only JPEG honours it.
    pub quality: f32,
    /// Per-attempt rasterization bound.
    pub timeout_ms: u64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl GenerationOptions {
    /// Defaults derived from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            scale: config.default_scale,
            format: ImageFormat::Png,
            quality: 0.9,
            timeout_ms: config.raster_timeout_ms,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Reject options outside the configured bounds.
    pub fn validate(&self, config: &PipelineConfig) -> Result<(), ShareImageError> {
        let (lo, hi) = config.scale_range;
        if !(self.scale >= lo && self.scale <= hi) {
            return Err(ShareImageError::InvalidConfig(format!(
                "scale must be {lo}–{hi}, got {}",
                self.scale
            )));
        }
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(ShareImageError::InvalidConfig(format!(
                "quality must be 0.0–1.0, got {}",
                self.quality
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ShareImageError::InvalidConfig(
                "timeout must be ≥ 1ms".into(),
            ));
        }
        Ok(())
    }
}

/// Immutable copy of the visual style taken when a request starts.
///
/// Each capture reads exactly one snapshot, so later edits in the
/// presentation layer never leak into a capture already in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleSnapshot {
    pub font_family: String,
    /// Font size in CSS pixels.
    pub font_size: f32,
    /// Line height as a multiple of `font_size`.
    pub line_height: f32,
    /// `#rrggbb` or `#rgb`.
    pub text_color: String,
    pub bg_color: String,
    /// Card width in CSS pixels.
    pub card_width: u32,
    pub content_padding: u32,
}

impl Default for StyleSnapshot {
    fn default() -> Self {
        Self {
            font_family: "system-ui".to_string(),
            font_size: 18.0,
            line_height: 1.6,
            text_color: "#1f2937".to_string(),
            bg_color: "#ffffff".to_string(),
            card_width: 960,
            content_padding: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let c = PipelineConfig::default();
        assert_eq!(c.history_capacity, 50);
        assert_eq!(c.max_concurrent, 1);
        assert_eq!(c.default_scale, 3.0);
        assert_eq!(c.scale_range, (1.0, 4.0));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn builder_rejects_default_scale_outside_range() {
        let err = PipelineConfig::builder().default_scale(5.0).build().unwrap_err();
        assert!(matches!(err, ShareImageError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_page_bound_in_multi_page_mode() {
        let err = PipelineConfig::builder()
            .multi_page(true)
            .max_chars_per_page(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("per page"));
    }

    #[test]
    fn options_validate_scale_range() {
        let config = PipelineConfig::default();
        assert!(GenerationOptions::default().validate(&config).is_ok());
        assert!(GenerationOptions::default()
            .with_scale(0.5)
            .validate(&config)
            .is_err());
        assert!(GenerationOptions::default()
            .with_scale(4.5)
            .validate(&config)
            .is_err());
    }

    #[test]
    fn format_parsing() {
        assert_eq!("JPG".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!("webp".parse::<ImageFormat>().unwrap(), ImageFormat::Webp);
        assert!("gif".parse::<ImageFormat>().is_err());
        assert_eq!(ImageFormat::Jpeg.mime_type(), "image/jpeg");
    }

    #[test]
    fn style_snapshot_serialises_camel_case() {
        let json = serde_json::to_value(StyleSnapshot::default()).unwrap();
        assert!(json.get("cardWidth").is_some());
        assert!(json.get("bgColor").is_some());
    }
}
