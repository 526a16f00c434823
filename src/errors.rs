use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Every way an ingest request can terminate early.
///
/// Client-facing variants carry a message that is safe to return verbatim;
/// server-side variants keep their detail for the logs only.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unsupported media type `{0}`")]
    UnsupportedMediaType(String),
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("scratch storage failure: {0}")]
    StorageIo(#[from] io::Error),
    #[error("media inspection failed: {0}")]
    InspectionFailed(String),
    #[error("media inspection reported no streams")]
    NoStreamData,
    #[error("media transform failed: {0}")]
    TransformFailed(String),
    #[error("secure randomness unavailable: {0}")]
    RandomnessUnavailable(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error(transparent)]
    Metadata(#[from] sqlx::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            PipelineError::Forbidden(_) => StatusCode::FORBIDDEN,
            PipelineError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            PipelineError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::StorageIo(_)
            | PipelineError::InspectionFailed(_)
            | PipelineError::NoStreamData
            | PipelineError::TransformFailed(_)
            | PipelineError::RandomnessUnavailable(_)
            | PipelineError::PublishFailed(_)
            | PipelineError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller.
    fn public_message(&self) -> String {
        match self {
            PipelineError::StorageIo(_) => "Unable to stage upload".into(),
            PipelineError::InspectionFailed(_) | PipelineError::NoStreamData => {
                "Unable to inspect media".into()
            }
            PipelineError::TransformFailed(_) => "Unable to process video for fast start".into(),
            PipelineError::RandomnessUnavailable(_) => "Unable to generate storage key".into(),
            PipelineError::PublishFailed(_) => "Unable to publish media".into(),
            PipelineError::Metadata(_) => "Unable to update video".into(),
            other => other.to_string(),
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError::new(status, err.public_message())
    }
}
