use std::{fmt, path::Path, str::FromStr};

use crate::{
    errors::{ClothSegError, Result},
    output::SegmentedImage,
    palette::Palette,
    traits::SegmentationModel,
};
use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, GrayImage, Luma, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Input side length of the U2Net cloth checkpoint, used when the exported graph
/// leaves its spatial axes dynamic.
pub const DEFAULT_IMAGE_SIZE: u32 = 768;

const NORMALIZE_MEAN: f32 = 0.5;
const NORMALIZE_STD: f32 = 0.5;

/// Compute device an ONNX session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(i32),
    TensorRt(i32),
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        let (name, id) = match tag.split_once(':') {
            Some((name, id)) => {
                let id = id
                    .parse::<i32>()
                    .ok()
                    .filter(|id| *id >= 0)
                    .ok_or_else(|| format!("invalid device id in `{s}`"))?;
                (name, Some(id))
            }
            None => (tag.as_str(), None),
        };

        match (name, id) {
            ("cpu", None) => Ok(Self::Cpu),
            ("cuda" | "gpu", id) => Ok(Self::Cuda(id.unwrap_or(0))),
            ("tensorrt" | "trt", id) => Ok(Self::TensorRt(id.unwrap_or(0))),
            _ => Err(format!(
                "unsupported device `{s}`. Supported devices: `cpu`, `cuda[:id]`, `tensorrt[:id]`"
            )),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
            Self::TensorRt(id) => write!(f, "tensorrt:{id}"),
        }
    }
}

/// ONNX Runtime backed cloth segmentation model.
///
/// The session is created once and kept behind a mutex: `Session::run` needs
/// exclusive access, and concurrent callers simply queue on the lock.
pub struct Model {
    pub image_size: u32,
    device: Device,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl Model {
    pub fn new(model_path: &Path, device: Device) -> Result<Self> {
        let builder = SessionBuilder::new()
            .map_err(|e| ClothSegError::model("session builder initialization", e))?;

        let builder = match device {
            Device::Cpu => builder,
            Device::Cuda(device_id) => builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build()])
                .map_err(|e| ClothSegError::model("execution provider setup", e))?,
            Device::TensorRt(device_id) => builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ])
                .map_err(|e| ClothSegError::model("execution provider setup", e))?,
        };

        let mut session = builder
            .with_memory_pattern(true)
            .map_err(|e| ClothSegError::model("memory pattern setup", e))?
            .commit_from_file(model_path)
            .map_err(|e| {
                ClothSegError::model(
                    format!("checkpoint loading: {}", model_path.display()),
                    e,
                )
            })?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| ClothSegError::model("model input lookup", "model has no inputs"))?;
        let input_name = input.name.clone();
        let image_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(2).copied())
            .filter(|size| *size > 0)
            .map_or(DEFAULT_IMAGE_SIZE, |size| size as u32);
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| ClothSegError::model("model output lookup", "model has no outputs"))?;

        // warm up
        let data = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)?])
            .map_err(|e| ClothSegError::model("model warm-up", e))?;

        info!(
            checkpoint = %model_path.display(),
            %device,
            image_size,
            input = %input_name,
            output = %output_name,
            "segmentation model loaded"
        );

        Ok(Self {
            image_size,
            device,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl SegmentationModel for Model {
    fn segment_image(&self, img: &DynamicImage, palette: &Palette) -> Result<SegmentedImage> {
        let (width, height) = img.dimensions();
        let tensor = preprocess(&img.to_rgb8(), self.image_size);
        let logits = self.predict(tensor.view())?;
        let indices = postprocess(logits.view(), width, height)?;
        debug!(width, height, classes = logits.shape()[1], "segmentation finished");

        Ok(SegmentedImage::Indexed {
            indices,
            palette: palette.clone(),
        })
    }

    fn get_image_size(&self) -> u32 {
        self.image_size
    }

    fn device(&self) -> Device {
        self.device
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

/// Resize to the model's square input and normalize to `[-1, 1]`, channels first.
pub fn preprocess(image: &RgbImage, image_size: u32) -> Array4<f32> {
    let image = imageops::resize(image, image_size, image_size, FilterType::CatmullRom);
    image
        .as_ndarray3()
        .mapv(|v| (f32::from(v) / 255.0 - NORMALIZE_MEAN) / NORMALIZE_STD)
        .insert_axis(Axis(0))
}

/// Collapse `[1, classes, h, w]` logits into a class-index map and scale it back to
/// the source size. Nearest-neighbour keeps the indices intact.
pub fn postprocess(logits: ArrayView4<f32>, width: u32, height: u32) -> Result<GrayImage> {
    let (batch, classes, h, w) = logits.dim();
    if batch == 0 || classes == 0 || h == 0 || w == 0 {
        return Err(ClothSegError::model(
            "output postprocessing",
            format!("unexpected output shape {:?}", logits.shape()),
        ));
    }
    if classes > 256 {
        return Err(ClothSegError::model(
            "output postprocessing",
            format!("{classes} classes do not fit in an 8-bit index map"),
        ));
    }

    let scores = logits.index_axis(Axis(0), 0);
    let mut mask = GrayImage::new(w as u32, h as u32);
    for (x, y, pixel) in mask.enumerate_pixels_mut() {
        let class = scores
            .slice(s![.., y as usize, x as usize])
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (class, &score)| {
                if score > best.1 {
                    (class, score)
                } else {
                    best
                }
            })
            .0;
        *pixel = Luma([class as u8]);
    }

    Ok(imageops::resize(&mask, width, height, FilterType::Nearest))
}
