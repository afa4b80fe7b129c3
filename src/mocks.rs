use std::sync::atomic::{AtomicUsize, Ordering};

use crate::auth::Identity;
use crate::errors::{ClothSegError, Result};
use crate::model::Device;
use crate::output::SegmentedImage;
use crate::palette::Palette;
use crate::traits::{SegmentationModel, TokenVerifier};
use image::{DynamicImage, Luma};
use ndarray::prelude::*;

/// Mock segmentation model for tests.
///
/// Buckets the input's luminance into four classes, so outputs have the input's
/// size and exercise the palette path. Counts how often it was invoked.
#[derive(Debug, Default)]
pub struct MockSegmentationModel {
    pub image_size: u32,
    invocations: AtomicUsize,
}

impl MockSegmentationModel {
    pub const fn new(image_size: u32) -> Self {
        Self {
            image_size,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn segment_image(&self, img: &DynamicImage, palette: &Palette) -> Result<SegmentedImage> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let mut indices = img.to_luma8();
        for pixel in indices.pixels_mut() {
            *pixel = Luma([pixel[0] / 64]);
        }
        Ok(SegmentedImage::Indexed {
            indices,
            palette: palette.clone(),
        })
    }

    fn get_image_size(&self) -> u32 {
        self.image_size
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let shape = tensor.shape();
        Ok(Array4::<f32>::zeros((shape[0], 4, shape[2], shape[3])))
    }
}

/// Model whose forward pass always errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSegmentationModel;

impl SegmentationModel for FailingSegmentationModel {
    fn segment_image(&self, _img: &DynamicImage, _palette: &Palette) -> Result<SegmentedImage> {
        Err(ClothSegError::model("inference", "simulated device failure"))
    }

    fn get_image_size(&self) -> u32 {
        768
    }

    fn device(&self) -> Device {
        Device::Cuda(0)
    }

    fn predict(&self, _tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        Err(ClothSegError::model("inference", "simulated device failure"))
    }
}

/// Model that panics mid-inference.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingSegmentationModel;

impl SegmentationModel for PanickingSegmentationModel {
    fn segment_image(&self, _img: &DynamicImage, _palette: &Palette) -> Result<SegmentedImage> {
        panic!("simulated out of memory")
    }

    fn get_image_size(&self) -> u32 {
        768
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn predict(&self, _tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        panic!("simulated out of memory")
    }
}

/// Verifier that accepts exactly one token.
#[derive(Debug, Clone)]
pub struct StaticTokenVerifier {
    pub token: String,
}

impl StaticTokenVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<Identity> {
        if token == self.token {
            Ok(Identity::new("test-user"))
        } else {
            Err(ClothSegError::forbidden("Invalid token."))
        }
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn mock_model_keeps_dimensions_and_counts() -> Result<()> {
        let mock = MockSegmentationModel::new(768);
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 20, Rgb([255, 255, 255])));

        let output = mock.segment_image(&image, &Palette::default())?;

        assert_eq!(output.dimensions(), (30, 20));
        assert_eq!(mock.invocations(), 1);
        match output {
            SegmentedImage::Indexed { indices, .. } => assert_eq!(indices.get_pixel(0, 0)[0], 3),
            SegmentedImage::Direct(_) => panic!("expected an indexed output"),
        }
        Ok(())
    }

    #[test]
    fn mock_model_predict() -> Result<()> {
        let mock = MockSegmentationModel::new(768);
        let input_tensor = Array4::<f32>::zeros((1, 3, 64, 64));

        let result = mock.predict(input_tensor.view())?;
        assert_eq!(result.shape(), &[1, 4, 64, 64]);
        Ok(())
    }

    #[test]
    fn static_verifier() {
        let verifier = StaticTokenVerifier::new("letmein");
        assert!(verifier.verify("letmein").is_ok());
        assert!(verifier.verify("nope").is_err());
    }
}
