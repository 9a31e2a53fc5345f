//! Image content analysis
//!
//! Extracts geometry, color mode and container format from raw upload bytes
//! using the `image` crate. Only the container header is read; pixel data is
//! never decompressed, so truncated or oversized images still report their
//! declared geometry.
//!
//! Analysis never fails the caller: corrupt or unsupported content yields
//! zero geometry with `"unknown"` color mode and format, and the extension
//! falls back to the filename suffix (or `.unknown`).

use image::{ColorType, ExtendedColorType, ImageDecoder, ImageFormat, ImageReader};
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Placeholder for unreadable fields
pub const UNKNOWN: &str = "unknown";

/// Extension used when neither filename nor format provides one
pub const UNKNOWN_EXTENSION: &str = ".unknown";

/// Decode failures (recovered locally, never returned from [`analyze`])
#[derive(Debug, Error)]
enum DecodeError {
    /// Content does not start with a recognised image signature
    #[error("Unrecognised image format")]
    UnknownFormat,

    /// Container recognised but its header could not be parsed
    #[error("Header parse failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extracted image metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageAnalysis {
    /// Width in pixels (0 when undecodable)
    pub width: u32,

    /// Height in pixels (0 when undecodable)
    pub height: u32,

    /// Color mode name: "RGB", "RGBA", "L", "LA", "CMYK", ...
    pub color_mode: String,

    /// Lowercase extension with leading dot, e.g. ".jpg"
    pub extension: String,

    /// Canonical container tag: "JPEG", "PNG", ...
    pub format: String,

    /// Size of the raw content in bytes
    pub file_size: u64,
}

impl ImageAnalysis {
    /// Metadata for content that could not be decoded
    pub fn undecodable(content_len: usize, filename: Option<&str>) -> Self {
        Self {
            width: 0,
            height: 0,
            color_mode: UNKNOWN.to_string(),
            extension: filename
                .and_then(extension_from_filename)
                .unwrap_or_else(|| UNKNOWN_EXTENSION.to_string()),
            format: UNKNOWN.to_string(),
            file_size: content_len as u64,
        }
    }

    pub fn is_decoded(&self) -> bool {
        self.format != UNKNOWN
    }
}

/// Analyze image content.
///
/// **Algorithm:**
/// 1. Guess the container from the leading bytes
/// 2. Parse the header for dimensions and source color type
/// 3. Extension from filename suffix, else from the detected format
///
/// Any failure substitutes [`ImageAnalysis::undecodable`].
pub fn analyze(content: &[u8], filename: Option<&str>) -> ImageAnalysis {
    match read_header(content, filename) {
        Ok(analysis) => {
            tracing::debug!(
                width = analysis.width,
                height = analysis.height,
                color_mode = %analysis.color_mode,
                format = %analysis.format,
                "Analyzed image content"
            );
            analysis
        }
        Err(e) => {
            tracing::debug!(
                filename = filename.unwrap_or(""),
                size = content.len(),
                error = %e,
                "Image content not decodable, using defaults"
            );
            ImageAnalysis::undecodable(content.len(), filename)
        }
    }
}

fn read_header(content: &[u8], filename: Option<&str>) -> Result<ImageAnalysis, DecodeError> {
    let reader = ImageReader::new(Cursor::new(content)).with_guessed_format()?;
    let format = reader.format().ok_or(DecodeError::UnknownFormat)?;
    let decoder = reader.into_decoder()?;
    let (width, height) = decoder.dimensions();

    // The JPEG decoder reports CMYK sources as RGB
    let color_mode = if format == ImageFormat::Jpeg && jpeg_is_cmyk(content) {
        "CMYK"
    } else {
        color_mode_name(decoder.original_color_type(), decoder.color_type())
    };

    let extension = filename
        .and_then(extension_from_filename)
        .or_else(|| {
            format
                .extensions_str()
                .first()
                .map(|ext| format!(".{}", ext))
        })
        .unwrap_or_else(|| UNKNOWN_EXTENSION.to_string());

    Ok(ImageAnalysis {
        width,
        height,
        color_mode: color_mode.to_string(),
        extension,
        format: format_name(format),
        file_size: content.len() as u64,
    })
}

/// Lowercase suffix including the dot, `None` when the name has no suffix
pub fn extension_from_filename(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

/// Mode name in the usual PIL vocabulary ("1", "L", "LA", "P", "RGB", ...)
fn color_mode_name(original: ExtendedColorType, decoded: ColorType) -> &'static str {
    match original {
        ExtendedColorType::L1 => "1",
        ExtendedColorType::L2 | ExtendedColorType::L4 | ExtendedColorType::L8 | ExtendedColorType::A8 => "L",
        ExtendedColorType::L16 => "I;16",
        ExtendedColorType::La1
        | ExtendedColorType::La2
        | ExtendedColorType::La4
        | ExtendedColorType::La8
        | ExtendedColorType::La16 => "LA",
        ExtendedColorType::Rgb1
        | ExtendedColorType::Rgb2
        | ExtendedColorType::Rgb4
        | ExtendedColorType::Rgb5x1
        | ExtendedColorType::Rgb8
        | ExtendedColorType::Rgb16
        | ExtendedColorType::Rgb32F
        | ExtendedColorType::Bgr8 => "RGB",
        ExtendedColorType::Rgba1
        | ExtendedColorType::Rgba2
        | ExtendedColorType::Rgba4
        | ExtendedColorType::Rgba8
        | ExtendedColorType::Rgba16
        | ExtendedColorType::Rgba32F
        | ExtendedColorType::Bgra8 => "RGBA",
        ExtendedColorType::Cmyk8 | ExtendedColorType::Cmyk16 => "CMYK",
        // Palette indices
        ExtendedColorType::Unknown(_) => "P",
        _ => match decoded.channel_count() {
            1 => "L",
            2 => "LA",
            3 => "RGB",
            _ => "RGBA",
        },
    }
}

/// Whether the first JPEG frame header declares four color components
fn jpeg_is_cmyk(content: &[u8]) -> bool {
    let mut pos = 2; // after SOI
    while pos + 4 <= content.len() {
        if content[pos] != 0xFF {
            return false;
        }
        let marker = content[pos + 1];
        // Fill bytes and standalone markers carry no length
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        let length = usize::from(u16::from_be_bytes([content[pos + 2], content[pos + 3]]));
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // length(2) precision(1) height(2) width(2) components(1)
            return content.get(pos + 9) == Some(&4);
        }
        if marker == 0xDA || length < 2 {
            return false;
        }
        pos += 2 + length;
    }
    false
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::Gif => "GIF".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        ImageFormat::WebP => "WEBP".to_string(),
        ImageFormat::Tiff => "TIFF".to_string(),
        other => format!("{:?}", other).to_uppercase(),
    }
}
