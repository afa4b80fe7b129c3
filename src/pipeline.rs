use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, error, info};

use crate::codec::{self, ImageMetadata};
use crate::errors::{ClothSegError, ErrorBody, ErrorKind, Result};
use crate::model::Device;
use crate::output;
use crate::palette::Palette;
use crate::store::ResultStore;
use crate::traits::SegmentationModel;

/// Marker the success body carries in its `path` field.
pub const SUCCESS_MARKER: &str = "DONE";

/// Lifecycle of one request. A failure ends the request from whichever state it
/// was in; there are no retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Authenticated,
    Decoded,
    Inferred,
    Normalized,
    Stored,
}

impl PipelineState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Authenticated => "authenticated",
            Self::Decoded => "decoded",
            Self::Inferred => "inferred",
            Self::Normalized => "normalized",
            Self::Stored => "stored",
        }
    }
}

impl PipelineState {
    pub fn advance(&mut self, next: Self) {
        debug!(from = %self, to = %next, "pipeline state transition");
        *self = next;
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Metadata of the uploaded image, not of the stored result.
    pub metadata: ImageMetadata,
    pub output_path: PathBuf,
    pub output_dimensions: (u32, u32),
}

/// Upload → decode → segment → normalize → store.
///
/// Holds the model and palette for the lifetime of the process. Inference is
/// bounded by a semaphore so the device never sees more concurrent forward passes
/// than configured; the other stages run freely on the blocking pool.
pub struct Pipeline {
    model: Arc<dyn SegmentationModel>,
    palette: Palette,
    store: ResultStore,
    inference_permits: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        model: Arc<dyn SegmentationModel>,
        palette: Palette,
        store: ResultStore,
        max_concurrent_inferences: usize,
    ) -> Self {
        Self {
            model,
            palette,
            store,
            inference_permits: Arc::new(Semaphore::new(max_concurrent_inferences.max(1))),
        }
    }

    pub fn device(&self) -> Device {
        self.model.device()
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Side length of the square input the model is fed.
    pub fn input_size(&self) -> u32 {
        self.model.get_image_size()
    }

    /// Run the stages and assemble the response. Never fails: every stage error
    /// ends up as the failure shape of [`PipelineResult`].
    ///
    /// `state` is where the request already is when the upload arrives, as
    /// tracked by whatever ran before (the token gate on the HTTP path).
    pub async fn process(&self, upload: Bytes, mut state: PipelineState) -> PipelineResult {
        let result = self.run_stages(upload, &mut state).await;
        PipelineResult::assemble(result, state)
    }

    /// Run the stages without assembling a response, starting from `state`.
    pub async fn run(&self, upload: Bytes, mut state: PipelineState) -> Result<PipelineOutput> {
        self.run_stages(upload, &mut state).await
    }

    async fn run_stages(
        &self,
        upload: Bytes,
        state: &mut PipelineState,
    ) -> Result<PipelineOutput> {
        let decoded = tokio::task::spawn_blocking(move || codec::decode(&upload))
            .await
            .map_err(|e| join_failure("image decoding", e))??;
        state.advance(PipelineState::Decoded);
        let metadata = decoded.metadata;

        let permit = Arc::clone(&self.inference_permits)
            .acquire_owned()
            .await
            .map_err(ClothSegError::internal)?;
        let model = Arc::clone(&self.model);
        let palette = self.palette.clone();
        let image = decoded.image;
        let segmented = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            model.segment_image(&image, &palette)
        })
        .await
        .map_err(|e| ClothSegError::model("inference", describe_join_error(&e)))??;
        state.advance(PipelineState::Inferred);
        debug!(mode = %segmented.mode(), "model output received");

        let normalized = tokio::task::spawn_blocking(move || output::normalize(segmented))
            .await
            .map_err(|e| join_failure("output normalization", e))?;
        state.advance(PipelineState::Normalized);
        let output_dimensions = (normalized.width(), normalized.height());

        let store = self.store.clone();
        let output_path = tokio::task::spawn_blocking(move || store.store(&normalized))
            .await
            .map_err(|e| join_failure("result storage", e))??;
        state.advance(PipelineState::Stored);

        Ok(PipelineOutput {
            metadata,
            output_path,
            output_dimensions,
        })
    }
}

fn describe_join_error(err: &JoinError) -> String {
    if err.is_panic() {
        "inference task panicked".to_string()
    } else {
        err.to_string()
    }
}

fn join_failure(operation: &str, err: JoinError) -> ClothSegError {
    ClothSegError::internal(format!("{operation} task failed: {}", describe_join_error(&err)))
}

/// The single outcome of a request: either the success body or a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResult {
    Success {
        metadata: ImageMetadata,
        output_path: PathBuf,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Serialize)]
struct SuccessBody<'a> {
    status: u16,
    path: &'static str,
    metadata: &'a ImageMetadata,
    output_path: String,
}

impl PipelineResult {
    /// Response boundary: logs failures with the state the request had reached and
    /// converts them into the client-visible shape.
    pub fn assemble(result: Result<PipelineOutput>, state: PipelineState) -> Self {
        match result {
            Ok(output) => {
                info!(
                    output_path = %output.output_path.display(),
                    width = output.metadata.width,
                    height = output.metadata.height,
                    size_bytes = output.metadata.size_bytes,
                    "image processed"
                );
                Self::Success {
                    metadata: output.metadata,
                    output_path: output.output_path,
                }
            }
            Err(err) => Self::failure(err, state),
        }
    }

    pub fn failure(err: ClothSegError, state: PipelineState) -> Self {
        let kind = err.kind();
        error!(
            %state,
            error_kind = kind.as_str(),
            "error processing image: {err}"
        );
        Self::Failure {
            kind,
            message: format!("Error processing image: {err}"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Success { .. } => StatusCode::OK,
            Self::Failure { kind, .. } => kind.status_code(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl IntoResponse for PipelineResult {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Success {
                metadata,
                output_path,
            } => (
                status,
                Json(SuccessBody {
                    status: status.as_u16(),
                    path: SUCCESS_MARKER,
                    metadata,
                    output_path: output_path.display().to_string(),
                }),
            )
                .into_response(),
            Self::Failure { kind, message } => (
                status,
                Json(ErrorBody {
                    message,
                    error_kind: *kind,
                }),
            )
                .into_response(),
        }
    }
}
