//! Decode downloaded bytes into fixed-size RGB thumbnails.
//!
//! The format is sniffed from the bytes, never from the URL or the declared
//! content type. Alpha is dropped rather than composited, so transparent
//! regions come out with whatever color the source stored under them.
//! Resizing is exact: the aspect ratio is not preserved.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageError, ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors from decoding or resizing an image.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not in a supported image format.
    #[error("unsupported image format: {reason}")]
    Unsupported {
        /// What the decoder reported.
        reason: String,
    },

    /// The format was recognized but the data is damaged or truncated.
    #[error("corrupt image data: {reason}")]
    Corrupt {
        /// What the decoder reported.
        reason: String,
    },

    /// Requested thumbnail size has a zero side.
    #[error("invalid target size {width}x{height}")]
    InvalidTarget {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },

    /// PNG encoding for hand-off failed.
    #[error("PNG encoding failed: {reason}")]
    Encode {
        /// What the encoder reported.
        reason: String,
    },
}

impl From<ImageError> for DecodeError {
    fn from(error: ImageError) -> Self {
        match error {
            ImageError::Unsupported(inner) => Self::Unsupported {
                reason: inner.to_string(),
            },
            other => Self::Corrupt {
                reason: other.to_string(),
            },
        }
    }
}

/// Pixel layout of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// 8-bit RGB, the only layout a [`Bitmap`] holds.
    Rgb8,
    /// 8-bit RGB with alpha.
    Rgba8,
    /// 8-bit grayscale.
    Luma8,
    /// 8-bit grayscale with alpha.
    LumaA8,
    /// Anything else (16-bit, float).
    Other,
}

impl From<ColorType> for ColorMode {
    fn from(color: ColorType) -> Self {
        match color {
            ColorType::Rgb8 => Self::Rgb8,
            ColorType::Rgba8 => Self::Rgba8,
            ColorType::L8 => Self::Luma8,
            ColorType::La8 => Self::LumaA8,
            _ => Self::Other,
        }
    }
}

/// Thumbnail dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl TargetSize {
    /// Spreadsheet cell thumbnail.
    pub const CELL: Self = Self::new(179, 135);

    /// Slide-deck image.
    pub const SLIDE: Self = Self::new(800, 600);

    /// Creates a target size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        Self::CELL
    }
}

/// A decoded, resized 8-bit RGB image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pixels: RgbImage,
    source_mode: ColorMode,
}

impl Bitmap {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Always [`ColorMode::Rgb8`].
    #[must_use]
    pub fn color_mode(&self) -> ColorMode {
        ColorMode::Rgb8
    }

    /// Layout of the image before conversion.
    #[must_use]
    pub fn source_mode(&self) -> ColorMode {
        self.source_mode
    }

    /// Borrows the pixel buffer.
    #[must_use]
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Encodes as PNG.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Encode`] if the encoder fails.
    pub fn to_png(&self) -> Result<Vec<u8>, DecodeError> {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(self.pixels.clone())
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| DecodeError::Encode {
                reason: e.to_string(),
            })?;
        Ok(png)
    }
}

/// Decodes `bytes` and resizes to exactly `width` x `height` RGB pixels.
///
/// # Errors
///
/// [`DecodeError::InvalidTarget`] for a zero dimension (checked before
/// decoding), [`DecodeError::Unsupported`] when the format cannot be
/// identified, [`DecodeError::Corrupt`] when decoding fails.
#[instrument(skip(bytes), fields(bytes = bytes.len()))]
pub fn normalize(bytes: &[u8], width: u32, height: u32) -> Result<Bitmap, DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidTarget { width, height });
    }

    let format = image::guess_format(bytes).map_err(|e| DecodeError::Unsupported {
        reason: e.to_string(),
    })?;
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let source_mode = ColorMode::from(decoded.color());

    debug!(
        ?format,
        ?source_mode,
        src_width = decoded.width(),
        src_height = decoded.height(),
        width,
        height,
        "normalizing image"
    );

    let rgb = decoded.to_rgb8();
    let pixels = image::imageops::resize(&rgb, width, height, FilterType::Lanczos3);

    Ok(Bitmap {
        pixels,
        source_mode,
    })
}

/// [`normalize`] with a [`TargetSize`].
///
/// # Errors
///
/// Same as [`normalize`].
pub fn normalize_to(bytes: &[u8], target: TargetSize) -> Result<Bitmap, DecodeError> {
    normalize(bytes, target.width, target.height)
}
