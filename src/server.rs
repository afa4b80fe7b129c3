use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{token_gate_middleware, Identity, TokenGate};
use crate::errors::{ClothSegError, Result};
use crate::pipeline::{Pipeline, PipelineResult, PipelineState};

pub const SERVICE_NAME: &str = "cloth-segmenter-api";
pub const UPLOAD_FIELD: &str = "file";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub gate: TokenGate,
    pub service_version: String,
    pub environment: String,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, gate: TokenGate) -> Self {
        Self {
            pipeline,
            gate,
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "local".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_service_info(
        mut self,
        service_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        self.service_version = service_version.into();
        self.environment = environment.into();
        self
    }

    pub const fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

/// `/health` and `/ready` are open; everything else sits behind the token gate.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", get(root_handler))
        .route("/api/v1/get-cloth", post(get_cloth_handler))
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            token_gate_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        bind = %addr,
        version = %state.service_version,
        environment = %state.environment,
        device = %state.pipeline.device(),
        input_size = state.pipeline.input_size(),
        output_dir = %state.pipeline.store().output_dir().display(),
        verifier = state.gate.verifier_name(),
        "starting {SERVICE_NAME}"
    );
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

async fn root_handler(State(state): State<AppState>) -> Json<Value> {
    info!("Get request at /");
    Json(json!({
        "message": SERVICE_NAME,
        "version": state.service_version,
        "environment": state.environment,
    }))
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// The pipeline is built before the listener binds, so being able to answer
/// means being ready.
async fn ready_handler() -> StatusCode {
    StatusCode::OK
}

async fn get_cloth_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Extension(request_state): Extension<PipelineState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> PipelineResult {
    info!(subject = %identity.subject, "Post request at /api/v1/get-cloth");
    match read_upload(multipart).await {
        Ok(upload) => state.pipeline.process(upload, request_state).await,
        Err(err) => PipelineResult::failure(err, request_state),
    }
}

/// Take the `file` field, or failing that the first field that carries a file name.
async fn read_upload(
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Bytes> {
    let mut multipart =
        multipart.map_err(|e| ClothSegError::invalid_input("multipart parsing", e.body_text()))?;

    let mut fallback = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ClothSegError::invalid_input("multipart parsing", e.body_text()))?
    {
        let is_upload_field = field.name() == Some(UPLOAD_FIELD);
        if !is_upload_field && (fallback.is_some() || field.file_name().is_none()) {
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ClothSegError::invalid_input("upload reading", e.body_text()))?;
        if is_upload_field {
            return Ok(bytes);
        }
        fallback = Some(bytes);
    }

    fallback.ok_or_else(|| {
        ClothSegError::invalid_input(
            "multipart parsing",
            format!("missing form field `{UPLOAD_FIELD}`"),
        )
    })
}
