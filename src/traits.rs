use image::DynamicImage;
use ndarray::prelude::*;

use crate::auth::Identity;
use crate::errors::Result;
use crate::model::Device;
use crate::output::SegmentedImage;
use crate::palette::Palette;

/// Image segmentation model abstraction.
///
/// The serving code depends on this trait instead of the ONNX session, so the
/// pipeline can be exercised with mock models.
pub trait SegmentationModel: Send + Sync {
    /// Segment `img`, rendering class indices through `palette`.
    fn segment_image(&self, img: &DynamicImage, palette: &Palette) -> Result<SegmentedImage>;

    /// Side length of the square input the model expects.
    fn get_image_size(&self) -> u32;

    /// Device the model was loaded on.
    fn device(&self) -> Device;

    /// Raw tensor prediction (low-level API).
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>>;
}

/// Verifies a bearer token and resolves the caller behind it.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
