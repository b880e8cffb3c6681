//! Output types for captures and batch exports.

use crate::config::ImageFormat;
use crate::error::{PageError, ShareImageError};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The product of one successful capture. Immutable once produced; clones
/// share the raster and the encoded bytes.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    /// Decoded pixels, possibly downscaled during encoding.
    #[serde(skip)]
    pub raster: Arc<RgbaImage>,
    /// `data:<mime>;base64,...` of `bytes`.
    #[serde(skip)]
    pub data_url: String,
    /// Encoded image file contents.
    #[serde(skip)]
    pub bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    /// Scale the raster was actually produced at (the fallback scale when
    /// the first attempt came out empty).
    pub scale: f32,
    pub created_at: DateTime<Utc>,
}

impl GenerationResult {
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

impl fmt::Debug for GenerationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationResult")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("scale", &self.scale)
            .field("bytes", &self.bytes.len())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Outcome of one page of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct PageOutcome {
    /// 1-based page number.
    pub page: usize,
    #[serde(skip)]
    pub result: Option<GenerationResult>,
    /// Set when this page failed.
    pub error: Option<PageError>,
}

impl PageOutcome {
    pub fn success(page: usize, result: GenerationResult) -> Self {
        Self {
            page,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(page: usize, error: PageError) -> Self {
        Self {
            page,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }
}

/// Aggregate statistics for a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub total_pages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub archive_bytes: usize,
    pub duration_ms: u64,
}

/// A zip of page images held in memory.
#[derive(Debug, Clone)]
pub struct Archive {
    /// `share-images-<epochMillis>.zip`.
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Entry names in archive order.
    pub entries: Vec<String>,
}

impl Archive {
    /// Write the archive into `dir` under its own filename.
    ///
    /// Uses atomic write (temp file + rename) so a partial zip is never
    /// left behind.
    pub async fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ShareImageError> {
        let path = dir.as_ref().join(&self.filename);
        write_atomic(&path, &self.bytes).await?;
        Ok(path)
    }
}

/// Everything a batch export produced.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub archive: Archive,
    /// One outcome per input page, in page order.
    pub pages: Vec<PageOutcome>,
    pub stats: BatchStats,
}

impl BatchOutput {
    pub fn failures(&self) -> impl Iterator<Item = &PageError> {
        self.pages.iter().filter_map(|p| p.error.as_ref())
    }
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ShareImageError> {
    let write_err = |e: std::io::Error| ShareImageError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    let written = match tokio::fs::write(&tmp_path, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        // Best effort; the original error is the one worth reporting.
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn archive_write_is_atomic_and_named() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive {
            filename: "share-images-1.zip".into(),
            bytes: b"PK".to_vec(),
            entries: vec![],
        };
        let path = archive.write_to(dir.path().join("out")).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "share-images-1.zip");
        assert_eq!(std::fs::read(&path).unwrap(), b"PK");
        assert!(!dir.path().join("out/share-images-1.zip.tmp").exists());
    }

    #[tokio::test]
    async fn failed_rename_removes_the_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory at the destination makes the rename fail.
        let path = dir.path().join("page.png");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let err = write_atomic(&path, b"PNG").await.unwrap_err();
        assert!(matches!(err, ShareImageError::OutputWriteFailed { .. }));
        assert!(!dir.path().join("page.png.tmp").exists());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn page_outcome_serialises_error_only() {
        let outcome = PageOutcome::failure(
            2,
            PageError::CaptureFailed {
                page: 2,
                detail: "boom".into(),
            },
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["page"], 2);
        assert!(json["error"].is_object());
        assert!(!outcome.is_success());
    }
}
