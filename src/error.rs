use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Service-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes as `{ error, kind }` so dashboard clients get structured messages.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or malformed configuration (e.g. no record store token).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An action record failed the ingestion boundary checks.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The record store answered with a non-2xx status.
    #[error("Record store error ({status}): {body}")]
    Store { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "configuration",
            AppError::Validation(_) => "validation",
            AppError::Store { .. } => "store",
            AppError::Network(_) => "network",
            AppError::Timeout(_) => "timeout",
            AppError::Serde(_) => "serde",
            AppError::Io(_) => "io",
            AppError::Internal(_) => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else {
            AppError::Network(e.to_string())
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind())?;
        s.end()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}
