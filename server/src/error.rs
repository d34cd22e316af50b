use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gan_core::SynthError;
use serde::Serialize;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthError),

    #[error("Transcription error: {0}")]
    Transcription(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Body rejections from [`AppJson`](crate::extract::AppJson) become 400s.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Synthesis(e) => match e {
                SynthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                SynthError::UnknownStage(_) => StatusCode::NOT_FOUND,
                SynthError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
                SynthError::Evaluation { .. } | SynthError::Storage { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Transcription(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            ApiError::InvalidInput(msg) | ApiError::NotFound(msg) => msg,
            ApiError::Synthesis(SynthError::UnknownStage(name)) => {
                format!("Layer '{name}' not found")
            }
            other => {
                if status.is_server_error() {
                    tracing::error!("{}", other);
                }
                other.to_string()
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
