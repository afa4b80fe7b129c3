use image::{ColorType, DynamicImage, GenericImageView, GrayImage, ImageBuffer, RgbImage};

use crate::codec::ColorMode;
use crate::palette::Palette;

/// What a segmentation model hands back.
#[derive(Debug, Clone)]
pub enum SegmentedImage {
    /// One class index per pixel, rendered through `palette`.
    Indexed { indices: GrayImage, palette: Palette },
    Direct(DynamicImage),
}

impl SegmentedImage {
    pub fn mode(&self) -> ColorMode {
        match self {
            Self::Indexed { .. } => ColorMode::P,
            Self::Direct(image) => ColorMode::of(image),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Indexed { indices, .. } => indices.dimensions(),
            Self::Direct(image) => image.dimensions(),
        }
    }
}

/// Whether JPEG can encode `color` as is. Only 8-bit gray and RGB qualify.
pub const fn is_jpeg_compatible(color: ColorType) -> bool {
    matches!(color, ColorType::L8 | ColorType::Rgb8)
}

/// Bring a model output into a mode the JPEG encoder accepts.
///
/// Indexed outputs are expanded through their palette, alpha channels are dropped
/// (not composited) and wide sample types are narrowed to 8-bit RGB. Outputs that
/// are already compatible pass through untouched.
pub fn normalize(output: SegmentedImage) -> DynamicImage {
    match output {
        SegmentedImage::Indexed { indices, palette } => {
            DynamicImage::ImageRgb8(expand_palette(&indices, &palette))
        }
        SegmentedImage::Direct(image) if is_jpeg_compatible(image.color()) => image,
        SegmentedImage::Direct(image) => DynamicImage::ImageRgb8(image.to_rgb8()),
    }
}

pub fn expand_palette(indices: &GrayImage, palette: &Palette) -> RgbImage {
    ImageBuffer::from_fn(indices.width(), indices.height(), |x, y| {
        palette.color(indices.get_pixel(x, y)[0])
    })
}
