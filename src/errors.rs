use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Client-visible classification of a failure.
///
/// Every [`ClothSegError`] maps to exactly one kind, and every kind maps to exactly
/// one HTTP status. Pipeline failures stay on 400 so existing clients keep working;
/// the kind is reported next to the message so they no longer have to parse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    InvalidInput,
    ModelFailure,
    StorageFailure,
    Internal,
}

impl ErrorKind {
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::InvalidInput | Self::ModelFailure | Self::StorageFailure | Self::Internal => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::InvalidInput => "invalid_input",
            Self::ModelFailure => "model_failure",
            Self::StorageFailure => "storage_failure",
            Self::Internal => "internal",
        }
    }
}

/// Structured error types for the cloth segmentation service.
///
/// Each variant carries the context of the stage that produced it (which operation,
/// which file) so the response boundary can log a diagnosable message without
/// inspecting error strings.
#[derive(Error, Debug)]
pub enum ClothSegError {
    #[error("Not authenticated: {reason}")]
    Unauthenticated { reason: String },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Invalid input: {operation} failed: {message}")]
    InvalidInput { operation: String, message: String },

    #[error("Model error: {operation} failed: {message}")]
    Model { operation: String, message: String },

    #[error("Storage error: {operation} failed for {path:?}: {source}")]
    Storage {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, ClothSegError>;

impl ClothSegError {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn invalid_input(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidInput {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn model(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Model {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn storage(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    pub fn internal(message: impl ToString) -> Self {
        Self::Internal {
            message: message.to_string(),
        }
    }

    /// Configuration problems only surface at startup; if one ever reaches a
    /// request it is reported as an unclassified failure.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Model { .. } => ErrorKind::ModelFailure,
            Self::Storage { .. } => ErrorKind::StorageFailure,
            Self::Configuration { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

/// Body shared by every failure response.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub message: &'a str,
    pub error_kind: ErrorKind,
}

impl IntoResponse for ClothSegError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match &self {
            Self::Unauthenticated { reason } | Self::Forbidden { reason } => reason.clone(),
            other => other.to_string(),
        };
        (
            kind.status_code(),
            Json(ErrorBody {
                message: &message,
                error_kind: kind,
            }),
        )
            .into_response()
    }
}

/// Convert anyhow errors to configuration errors.
///
/// anyhow only appears at the binary's edges (argument checks, startup), so anything
/// arriving through this conversion is a configuration problem.
impl From<anyhow::Error> for ClothSegError {
    fn from(err: anyhow::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for ClothSegError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors come out of tensor conversions around the forward pass, so they are
/// reported as model failures rather than a separate tensor category.
impl From<ndarray::ShapeError> for ClothSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}
