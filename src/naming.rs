//! Artifact naming conventions.

use crate::config::ImageFormat;
use chrono::NaiveDate;

/// Prefix the presentation layer puts on template ids.
const TEMPLATE_PREFIX: &str = "template-";

/// `share-image-<template>-<YYYY-MM-DD>.<ext>`.
///
/// ```rust
/// use chrono::NaiveDate;
/// use share_image::{naming, ImageFormat};
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
/// assert_eq!(
///     naming::image_filename("template-minimal", date, ImageFormat::Png),
///     "share-image-minimal-2024-03-09.png"
/// );
/// ```
pub fn image_filename(template_id: &str, date: NaiveDate, format: ImageFormat) -> String {
    let name = template_id
        .strip_prefix(TEMPLATE_PREFIX)
        .unwrap_or(template_id);
    let name = if name.is_empty() { "default" } else { name };
    format!(
        "share-image-{}-{}.{}",
        name,
        date.format("%Y-%m-%d"),
        format.extension()
    )
}

pub fn archive_filename(epoch_millis: i64) -> String {
    format!("share-images-{}.zip", epoch_millis)
}

/// Entry name of 1-based `page` inside a batch archive.
pub fn page_entry_name(page: usize, format: ImageFormat) -> String {
    format!("page-{}.{}", page, format.extension())
}

pub fn history_export_filename(epoch_millis: i64) -> String {
    format!("history-export-{}.json", epoch_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_prefix_is_optional() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        assert_eq!(
            image_filename("gradient", date, ImageFormat::Webp),
            "share-image-gradient-2025-12-01.webp"
        );
        assert_eq!(
            image_filename("template-", date, ImageFormat::Jpeg),
            "share-image-default-2025-12-01.jpeg"
        );
    }

    #[test]
    fn batch_names() {
        assert_eq!(archive_filename(1700000000123), "share-images-1700000000123.zip");
        assert_eq!(page_entry_name(3, ImageFormat::Png), "page-3.png");
        assert_eq!(history_export_filename(42), "history-export-42.json");
    }
}
