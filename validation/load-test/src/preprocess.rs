//! Texture preprocessing: shrink source images once before any job is built.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use render_protocol::{TexturePayload, Textures};
use thiserror::Error;
use tracing::debug;

use crate::error::LoadTestError;

/// Errors from decoding or re-encoding a texture.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("decode failed: {0}")]
    Decode(#[source] image::ImageError),

    #[error("encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// A re-encoded texture.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl PreparedImage {
    pub fn content_type(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "image/jpeg",
            _ => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "jpg",
            _ => "png",
        }
    }
}

/// Turns raw image bytes into a payload no larger than `max_dimension` on either side.
pub trait ImagePreprocessor: Send + Sync {
    fn resize(&self, raw: &[u8], max_dimension: u32) -> Result<PreparedImage, PreprocessError>;
}

/// [`ImagePreprocessor`] backed by the `image` crate.
///
/// Preserves aspect ratio and never upscales. JPEG input stays JPEG (alpha is
/// dropped); everything else is re-encoded as PNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThumbnailResizer;

impl ImagePreprocessor for ThumbnailResizer {
    fn resize(&self, raw: &[u8], max_dimension: u32) -> Result<PreparedImage, PreprocessError> {
        let source_format = image::guess_format(raw).map_err(PreprocessError::Decode)?;
        let img = image::load_from_memory_with_format(raw, source_format)
            .map_err(PreprocessError::Decode)?;

        let img = if img.width() > max_dimension || img.height() > max_dimension {
            img.thumbnail(max_dimension, max_dimension)
        } else {
            img
        };

        let (format, img) = match source_format {
            ImageFormat::Jpeg => (ImageFormat::Jpeg, DynamicImage::ImageRgb8(img.to_rgb8())),
            _ => (ImageFormat::Png, img),
        };

        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format)
            .map_err(PreprocessError::Encode)?;

        Ok(PreparedImage {
            bytes: Bytes::from(out.into_inner()),
            format,
            width: img.width(),
            height: img.height(),
        })
    }
}

/// Read and resize every slot's image, once per distinct path.
pub fn prepare_textures(
    slots: &BTreeMap<u32, PathBuf>,
    max_dimension: u32,
    preprocessor: &dyn ImagePreprocessor,
) -> Result<Textures, LoadTestError> {
    let mut cache: HashMap<&Path, PreparedImage> = HashMap::new();
    let mut textures = Textures::new();

    for (slot, path) in slots {
        let prepared = match cache.get(path.as_path()) {
            Some(prepared) => prepared.clone(),
            None => {
                let prepared = load_and_resize(path, max_dimension, preprocessor).map_err(
                    |source| LoadTestError::Preprocess {
                        path: path.clone(),
                        source,
                    },
                )?;
                debug!(
                    path = %path.display(),
                    width = prepared.width,
                    height = prepared.height,
                    size = prepared.bytes.len(),
                    "Prepared texture"
                );
                cache.insert(path.as_path(), prepared.clone());
                prepared
            }
        };

        textures.insert(
            *slot,
            TexturePayload::new(
                format!("canvas-{}.{}", slot, prepared.extension()),
                prepared.content_type(),
                prepared.bytes,
            ),
        );
    }

    Ok(textures)
}

fn load_and_resize(
    path: &Path,
    max_dimension: u32,
    preprocessor: &dyn ImagePreprocessor,
) -> Result<PreparedImage, PreprocessError> {
    let raw = std::fs::read(path)?;
    preprocessor.resize(&raw, max_dimension)
}
