//! Output of the assembled image.
//!
//! The sink receives the finished canvas and encodes it to its destination.
//! Encoding is CPU-bound and synchronous; async callers run it on the
//! blocking pool.

use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::RgbImage;
use tracing::info;

use crate::error::SinkError;
use crate::tile::AssembledImage;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Consumes an assembled image.
pub trait OutputSink: Send + Sync {
    fn write(&self, image: &AssembledImage, destination: &Path) -> Result<(), SinkError>;
}

// =============================================================================
// Output Format
// =============================================================================

/// Encoding chosen from the destination's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    /// `.png` selects PNG; `.jpg`, `.jpeg` and anything else select JPEG.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => OutputFormat::Png,
            _ => OutputFormat::Jpeg,
        }
    }
}

// =============================================================================
// Image File Sink
// =============================================================================

/// Writes the canvas to an image file.
#[derive(Debug, Clone)]
pub struct ImageFileSink {
    quality: u8,
}

impl Default for ImageFileSink {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl ImageFileSink {
    /// Create a sink; `quality` is clamped to 1-100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    fn encode(
        &self,
        canvas: &RgbImage,
        format: OutputFormat,
        writer: &mut BufWriter<File>,
    ) -> image::ImageResult<()> {
        match format {
            OutputFormat::Jpeg => {
                canvas.write_with_encoder(JpegEncoder::new_with_quality(writer, self.quality))
            }
            OutputFormat::Png => canvas.write_with_encoder(PngEncoder::new(writer)),
        }
    }
}

impl OutputSink for ImageFileSink {
    /// Encode into a sibling `.part` file and rename it over `destination`
    /// once complete; on failure the destination is left untouched.
    fn write(&self, image: &AssembledImage, destination: &Path) -> Result<(), SinkError> {
        let format = OutputFormat::from_path(destination);
        let partial = partial_path(destination);
        let file = File::create(&partial).map_err(|source| SinkError::Create {
            path: destination.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        let encoded = self
            .encode(&image.canvas, format, &mut writer)
            .map_err(|e| e.to_string())
            .and_then(|()| writer.flush().map_err(|e| e.to_string()));
        drop(writer);

        if let Err(message) = encoded {
            let _ = fs::remove_file(&partial);
            return Err(SinkError::Encode {
                path: destination.to_path_buf(),
                message,
            });
        }

        if let Err(source) = fs::rename(&partial, destination) {
            let _ = fs::remove_file(&partial);
            return Err(SinkError::Create {
                path: destination.to_path_buf(),
                source,
            });
        }

        info!(
            path = %destination.display(),
            width = image.width(),
            height = image.height(),
            format = ?format,
            "Wrote image"
        );
        Ok(())
    }
}

/// Sibling path the image is encoded to before it is moved into place.
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(destination.file_name().unwrap_or_else(|| OsStr::new("untiled")));
    name.push(".part");
    destination.with_file_name(name)
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
