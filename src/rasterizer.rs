//! Frame rasterization and JPEG encoding.
//!
//! The [`Rasterizer`] turns a decoded picture into the two rasters an
//! extraction produces: a full-resolution preview for display and a small,
//! low-quality copy sized for an external classification API. It holds no
//! retry logic; it either encodes the picture it is given or fails.

use std::path::Path;

use image::{DynamicImage, codecs::jpeg::JpegEncoder, imageops::FilterType};

use crate::{configuration::RasterOptions, error::SnapError};

/// A JPEG-encoded image buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRaster {
    /// JPEG bytes.
    pub bytes: Vec<u8>,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// JPEG quality used for encoding (1–100).
    pub quality: u8,
}

impl EncodedRaster {
    /// Length of the encoded buffer.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write the JPEG bytes to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapError::IoError`] if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapError> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// The pair of rasters produced by one successful capture.
#[derive(Debug, Clone)]
pub struct Rasters {
    /// Full-resolution preview.
    pub preview: EncodedRaster,
    /// Downsized raster for the classification API.
    pub api: EncodedRaster,
}

/// Encodes decoded pictures into preview and API rasters.
///
/// The preview is captured at most once per rasterizer: later captures
/// reuse the first one and only produce a fresh API raster.
#[derive(Debug)]
pub struct Rasterizer {
    options: RasterOptions,
    preview: Option<EncodedRaster>,
}

impl Rasterizer {
    /// Create a rasterizer with the given encoding settings.
    pub fn new(options: RasterOptions) -> Self {
        Self {
            options,
            preview: None,
        }
    }

    /// The preview captured so far, if any.
    pub fn preview(&self) -> Option<&EncodedRaster> {
        self.preview.as_ref()
    }

    /// Rasterize `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapError::RasterizationUnavailable`] for zero-sized
    /// pictures and [`SnapError::ImageError`] if encoding fails.
    pub fn capture(&mut self, frame: &DynamicImage) -> Result<Rasters, SnapError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(SnapError::RasterizationUnavailable(format!(
                "cannot rasterize a {width}x{height} frame"
            )));
        }

        let preview = match &self.preview {
            Some(preview) => preview.clone(),
            None => {
                let preview = encode_jpeg(frame, self.options.preview_quality)?;
                log::debug!(
                    "Captured preview raster {}x{} ({} bytes)",
                    preview.width,
                    preview.height,
                    preview.len()
                );
                self.preview = Some(preview.clone());
                preview
            }
        };

        let (api_width, api_height) =
            fit_within(width, height, self.options.api_max_dimension);
        let api = if (api_width, api_height) == (width, height) {
            encode_jpeg(frame, self.options.api_quality)?
        } else {
            let scaled = frame.resize_exact(api_width, api_height, FilterType::Triangle);
            encode_jpeg(&scaled, self.options.api_quality)?
        };
        log::debug!(
            "Captured API raster {}x{} ({} bytes)",
            api.width,
            api.height,
            api.len()
        );

        Ok(Rasters { preview, api })
    }
}

/// Dimensions that fit within `max_dimension`, preserving aspect ratio.
///
/// Only ever scales down; frames already within bounds keep their size.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width == 0 || height == 0 || max_dimension == 0 {
        return (width, height);
    }
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    let scale = max_dimension as f64 / width.max(height) as f64;
    let new_width = ((width as f64) * scale).round() as u32;
    let new_height = ((height as f64) * scale).round() as u32;
    (
        new_width.clamp(1, max_dimension),
        new_height.clamp(1, max_dimension),
    )
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<EncodedRaster, SnapError> {
    let quality = quality.clamp(1, 100);
    // JPEG has no alpha channel.
    let rgb = image.to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&rgb)?;
    Ok(EncodedRaster {
        bytes,
        width: rgb.width(),
        height: rgb.height(),
        quality,
    })
}
