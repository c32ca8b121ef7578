//! Chaos Image Pipeline - Thumbnail Stage
//!
//! Downscales large originals before etc encryption.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, GenericImageView};

use crate::config::{DEFAULT_THUMBNAIL_BOX, DEFAULT_THUMBNAIL_QUALITY};
use crate::error::{PipelineError, PipelineResult};
use crate::layout::split_name;

/// Thumbnail stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailStage {
    /// Bounding box edge
    box_edge: u32,
    /// JPEG quality
    quality: u8,
}

impl Default for ThumbnailStage {
    fn default() -> Self {
        Self::new(DEFAULT_THUMBNAIL_BOX, DEFAULT_THUMBNAIL_QUALITY)
    }
}

impl ThumbnailStage {
    pub fn new(box_edge: u32, quality: u8) -> Self {
        Self {
            box_edge: box_edge.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    /// Only images more than twice the box in both dimensions are shrunk
    pub fn needs_resize(&self, width: u32, height: u32) -> bool {
        let limit = self.box_edge.saturating_mul(2);
        width > limit && height > limit
    }

    /// `N.ext` -> `N_thumbnail.jpg`
    pub fn thumbnail_name(source_name: &str) -> String {
        let (stem, _) = split_name(source_name);
        format!("{}_thumbnail.jpg", stem)
    }

    /// Fit the image into the box (keeping aspect ratio) and encode as JPEG
    pub fn generate(&self, image_data: &[u8]) -> PipelineResult<Vec<u8>> {
        let img = image::load_from_memory(image_data)?;
        let thumb = self.resize_to_box(&img);

        let mut output = Vec::new();
        JpegEncoder::new_with_quality(Cursor::new(&mut output), self.quality)
            .encode_image(&thumb.into_rgb8())?;

        Ok(output)
    }

    fn resize_to_box(&self, img: &DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();
        if width <= self.box_edge && height <= self.box_edge {
            return img.clone();
        }
        img.resize(self.box_edge, self.box_edge, FilterType::Lanczos3)
    }

    /// Path to encrypt for `source`: a thumbnail in `thumbnails_dir` if the
    /// source is large, the source itself otherwise
    ///
    /// An existing non-empty thumbnail is reused.
    pub async fn prepare(&self, source: &Path, thumbnails_dir: &Path) -> PipelineResult<PathBuf> {
        let probe = source.to_path_buf();
        let (width, height) = tokio::task::spawn_blocking(move || image::image_dimensions(&probe))
            .await??;

        if !self.needs_resize(width, height) {
            return Ok(source.to_path_buf());
        }

        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::InvalidJob(format!("no file name in {}", source.display())))?;
        let target = thumbnails_dir.join(Self::thumbnail_name(&name));

        if let Ok(meta) = tokio::fs::metadata(&target).await {
            if meta.is_file() && meta.len() > 0 {
                log::debug!("Reusing thumbnail {}", target.display());
                return Ok(target);
            }
        }

        let data = tokio::fs::read(source).await?;
        let stage = *self;
        let thumb = tokio::task::spawn_blocking(move || stage.generate(&data)).await??;

        tokio::fs::create_dir_all(thumbnails_dir).await?;
        tokio::fs::write(&target, &thumb).await?;
        log::info!(
            "Thumbnail {} ({}x{} -> box {})",
            target.display(),
            width,
            height,
            self.box_edge
        );
        Ok(target)
    }
}
