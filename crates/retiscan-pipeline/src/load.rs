//! Image loading and normalization.
//!
//! Reads raw bytes from an [`ImageSource`], sniffs and decodes the raster
//! format, converts any color mode to 8-bit RGB and resizes to the square
//! model input resolution.
//!
//! This is the first step in the pipeline: raw bytes in, `RgbImage` out.

use std::borrow::Cow;

use image::{ColorType, DynamicImage, ImageFormat};

use crate::config::{AnalyzerConfig, ResizeFilter};
use crate::error::StageError;
use crate::types::{Dimensions, ImageSource, RgbImage};

/// Raster formats accepted for analysis.
pub const ACCEPTED_FORMATS: [ImageFormat; 5] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::WebP,
];

/// Output of the load stage.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// 3-channel image at the model input resolution.
    pub image: RgbImage,
    /// Dimensions of the decoded source before resizing.
    pub source_dimensions: Dimensions,
    /// Detected source format.
    pub format: ImageFormat,
    /// Size of the encoded input in bytes.
    pub input_bytes: usize,
}

/// Run the whole load stage: read, decode, convert to RGB, resize.
///
/// # Errors
///
/// Returns [`StageError::Read`] if a path source cannot be read,
/// [`StageError::EmptyInput`] or [`StageError::InputTooLarge`] for inputs
/// outside the accepted size range, [`StageError::ImageDecode`] if the
/// bytes are not a decodable raster, and [`StageError::UnsupportedFormat`]
/// if the format or color mode cannot be used.
pub fn load(source: &ImageSource, config: &AnalyzerConfig) -> Result<LoadedImage, StageError> {
    let bytes = read_source(source)?;
    let (decoded, format) = decode(&bytes, config.max_input_bytes)?;
    let source_dimensions = Dimensions {
        width: decoded.width(),
        height: decoded.height(),
    };
    let rgb = to_rgb(&decoded)?;
    let image = resize_to_input(&rgb, config.input_size, config.resize_filter);
    Ok(LoadedImage {
        image,
        source_dimensions,
        format,
        input_bytes: bytes.len(),
    })
}

/// Obtain the encoded bytes of a source, reading the file for path sources.
///
/// # Errors
///
/// Returns [`StageError::Read`] if the file cannot be read.
pub fn read_source(source: &ImageSource) -> Result<Cow<'_, [u8]>, StageError> {
    match source {
        ImageSource::Path(path) => std::fs::read(path)
            .map(Cow::Owned)
            .map_err(|source| StageError::Read {
                path: path.clone(),
                source,
            }),
        ImageSource::Memory { bytes, .. } => Ok(Cow::Borrowed(bytes)),
    }
}

/// Decode raw image bytes after checking size and format.
///
/// The format is detected from the leading magic bytes, never from a file
/// extension.
///
/// # Errors
///
/// Returns [`StageError::EmptyInput`] if `bytes` is empty,
/// [`StageError::InputTooLarge`] if it exceeds `max_input_bytes`,
/// [`StageError::ImageDecode`] if the format is unrecognized or the data is
/// corrupt, and [`StageError::UnsupportedFormat`] if the format is
/// recognized but not accepted.
pub fn decode(bytes: &[u8], max_input_bytes: usize) -> Result<(DynamicImage, ImageFormat), StageError> {
    if bytes.is_empty() {
        return Err(StageError::EmptyInput);
    }
    if bytes.len() > max_input_bytes {
        return Err(StageError::InputTooLarge {
            size: bytes.len(),
            limit: max_input_bytes,
        });
    }

    let format = image::guess_format(bytes)?;
    if !ACCEPTED_FORMATS.contains(&format) {
        return Err(StageError::UnsupportedFormat(format!(
            "{format:?} images are not accepted"
        )));
    }

    let image = image::load_from_memory_with_format(bytes, format)?;
    Ok((image, format))
}

/// Convert a decoded image of any supported color mode to 8-bit RGB.
///
/// Alpha channels are dropped and 16-bit or float samples are scaled down.
///
/// # Errors
///
/// Returns [`StageError::UnsupportedFormat`] for color modes that have no
/// defined RGB conversion.
pub fn to_rgb(image: &DynamicImage) -> Result<RgbImage, StageError> {
    match image.color() {
        ColorType::L8
        | ColorType::La8
        | ColorType::Rgb8
        | ColorType::Rgba8
        | ColorType::L16
        | ColorType::La16
        | ColorType::Rgb16
        | ColorType::Rgba16
        | ColorType::Rgb32F
        | ColorType::Rgba32F => Ok(image.to_rgb8()),
        other => Err(StageError::UnsupportedFormat(format!(
            "color mode {other:?} cannot be converted to RGB"
        ))),
    }
}

/// Resize to exactly `size` x `size` pixels.
///
/// The aspect ratio is not preserved: the model expects a square input.
/// Resampling is deterministic for identical input pixels.
#[must_use = "returns the resized image"]
pub fn resize_to_input(image: &RgbImage, size: u32, filter: ResizeFilter) -> RgbImage {
    if image.width() == size && image.height() == size {
        return image.clone();
    }
    image::imageops::resize(image, size, size, filter.to_image_filter())
}
