use std::path::{Path, PathBuf};

use axum::body::Bytes;
use image::ImageFormat;
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::error;
use walkdir::WalkDir;

use crate::codec::ImageMetadata;
use crate::errors::ClothSegError;
use crate::pipeline::{Pipeline, PipelineOutput, PipelineState};

/// Per-image report printed by the `segment` command.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingDetails {
    pub input_path: PathBuf,
    pub original_size: (u32, u32),
    pub processed_size: (u32, u32),
    pub output_path: PathBuf,
    pub device: String,
    pub metadata: ImageMetadata,
}

impl ProcessingDetails {
    fn new(input_path: &Path, output: PipelineOutput, device: String) -> Self {
        Self {
            input_path: input_path.to_path_buf(),
            original_size: (output.metadata.width, output.metadata.height),
            processed_size: output.output_dimensions,
            output_path: output.output_path,
            device,
            metadata: output.metadata,
        }
    }
}

#[derive(Debug, Default)]
pub struct SegmentReport {
    pub processed: Vec<ProcessingDetails>,
    pub failed: Vec<(PathBuf, String)>,
}

/// A single file is returned as is; directories are walked for files with a
/// known image extension, in a stable order.
pub fn collect_image_files(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }

    let mut image_paths = WalkDir::new(input)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file() && ImageFormat::from_path(e.path()).is_ok())
        .map(|e| e.into_path())
        .collect::<Vec<_>>();
    image_paths.sort();
    image_paths
}

/// Push every file through the same pipeline the HTTP endpoint uses. A failing
/// image is recorded and the batch carries on.
pub async fn segment_files(
    pipeline: &Pipeline,
    files: &[PathBuf],
    progress_bar: &ProgressBar,
) -> SegmentReport {
    let device = pipeline.device().to_string();
    let mut report = SegmentReport::default();

    for path in files {
        let outcome = match tokio::fs::read(path).await {
            Ok(contents) => {
                pipeline
                    .run(Bytes::from(contents), PipelineState::Received)
                    .await
            }
            Err(e) => Err(ClothSegError::invalid_input(
                format!("reading {}", path.display()),
                e,
            )),
        };

        match outcome {
            Ok(output) => {
                let details = ProcessingDetails::new(path, output, device.clone());
                if let Ok(line) = serde_json::to_string(&details) {
                    progress_bar.println(line);
                }
                report.processed.push(details);
            }
            Err(err) => {
                error!(path = %path.display(), error_kind = err.kind().as_str(), "{err}");
                let message = format!("Error processing image: {err}");
                progress_bar.println(format!("{}: {message}", path.display()));
                report.failed.push((path.clone(), message));
            }
        }
        progress_bar.inc(1);
    }

    report
}
