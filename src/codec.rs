use std::fmt;
use std::io::Cursor;

use image::{ColorType, DynamicImage, GenericImageView, ImageFormat, ImageReader};
use serde::{Serialize, Serializer};

use crate::errors::{ClothSegError, Result};

/// Channel layout of an image, tagged the way PIL names its modes so existing
/// consumers of the metadata keep seeing the same strings.
///
/// PIL has no 16-bit or float RGB modes; those collapse onto `RGB`/`RGBA`, and
/// 16-bit gray-alpha onto `LA`. Only 16-bit gray keeps its own tag, `I;16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    L,
    La,
    I16,
    Rgb,
    Rgba,
    /// Palette-indexed.
    P,
}

impl ColorMode {
    /// Mode of decoded pixels. Never [`ColorMode::P`]: decoders expand palettes,
    /// see [`source_mode`] for the mode the upload was stored in.
    pub fn of(image: &DynamicImage) -> Self {
        match image.color() {
            ColorType::L8 => Self::L,
            ColorType::L16 => Self::I16,
            ColorType::La8 | ColorType::La16 => Self::La,
            other if other.has_alpha() => Self::Rgba,
            _ => Self::Rgb,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::L => "L",
            Self::La => "LA",
            Self::I16 => "I;16",
            Self::Rgb => "RGB",
            Self::Rgba => "RGBA",
            Self::P => "P",
        }
    }

    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::La | Self::Rgba)
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ColorMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Descriptive metadata of an uploaded image.
///
/// Built once from the decoded image and the raw payload; `size_bytes` is the length
/// of the upload as received, never a re-encoded size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub mode: ColorMode,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub metadata: ImageMetadata,
    pub image: DynamicImage,
}

/// Decode an upload, sniffing its format from the content rather than any file name.
pub fn decode(bytes: &[u8]) -> Result<DecodedImage> {
    if bytes.is_empty() {
        return Err(ClothSegError::invalid_input(
            "image decoding",
            "empty payload",
        ));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ClothSegError::invalid_input("image format detection", e))?;
    let format = reader.format().ok_or_else(|| {
        ClothSegError::invalid_input("image format detection", "cannot identify image file")
    })?;
    let image = reader
        .decode()
        .map_err(|e| ClothSegError::invalid_input("image decoding", e))?;

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ClothSegError::invalid_input(
            "image decoding",
            format!("image has no pixels ({width}x{height})"),
        ));
    }

    let metadata = ImageMetadata {
        width,
        height,
        format: format_tag(format),
        mode: source_mode(bytes, format).unwrap_or_else(|| ColorMode::of(&image)),
        size_bytes: bytes.len() as u64,
    };
    Ok(DecodedImage { metadata, image })
}

/// Mode of the encoded upload where it differs from what decoding yields.
///
/// PNG keeps its palette flag in the header, which `image` discards while
/// expanding indexed pixels. GIF is palette-based throughout.
pub fn source_mode(bytes: &[u8], format: ImageFormat) -> Option<ColorMode> {
    match format {
        ImageFormat::Gif => Some(ColorMode::P),
        ImageFormat::Png => {
            let reader = png::Decoder::new(Cursor::new(bytes)).read_info().ok()?;
            (reader.info().color_type == png::ColorType::Indexed).then_some(ColorMode::P)
        }
        _ => None,
    }
}

pub fn format_tag(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::WebP => "WEBP".to_string(),
        ImageFormat::Gif => "GIF".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        ImageFormat::Tiff => "TIFF".to_string(),
        ImageFormat::Avif => "AVIF".to_string(),
        other => other
            .extensions_str()
            .first()
            .map(|ext| ext.to_uppercase())
            .unwrap_or_else(|| format!("{other:?}").to_uppercase()),
    }
}
