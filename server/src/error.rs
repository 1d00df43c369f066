//! Error types for the fleet server

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the fleet server
#[derive(Debug, Error)]
pub enum Error {
    // Instance errors (2000-2999)
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    // Credential errors (3000-3999)
    #[error("Credential file not found: {0}")]
    CredentialNotFound(String),

    #[error("Credential file is invalid: {0}")]
    CredentialInvalid(String),

    #[error("Token refresh failed: {0}")]
    CredentialRefreshFailed(String),

    // Process errors (4000-4099)
    #[error("Instance already running: {0}")]
    AlreadyRunning(String),

    #[error("Port {port} is in use: {reason}")]
    PortConflict { port: u16, reason: String },

    #[error("Failed to spawn worker: {0}")]
    SpawnFailure(String),

    // Provider errors (5000-5999)
    #[error("Quota fetch failed: {0}")]
    QuotaFetchFailure(String),

    // Infrastructure errors (6000-6999)
    #[error("Instance store unavailable: {0}")]
    ConfigUnavailable(String),

    // General errors (1000-1999)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code
    pub fn code(&self) -> u32 {
        match self {
            // Instance errors (2000-2999)
            Error::InstanceNotFound(_) => 2001,

            // Credential errors (3000-3999)
            Error::CredentialNotFound(_) => 3001,
            Error::CredentialInvalid(_) => 3002,
            Error::CredentialRefreshFailed(_) => 3003,

            // Process errors (4000-4099)
            Error::AlreadyRunning(_) => 4001,
            Error::PortConflict { .. } => 4002,
            Error::SpawnFailure(_) => 4003,

            // Provider errors (5000-5999)
            Error::QuotaFetchFailure(_) => 5001,

            // Infrastructure errors (6000-6999)
            Error::ConfigUnavailable(_) => 6001,

            // General errors (1000-1999)
            Error::InvalidRequest(_) => 1001,
            Error::InvalidParameter(_) => 1002,
            Error::Internal(_) => 1003,
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InstanceNotFound(_) | Error::CredentialNotFound(_) => StatusCode::NOT_FOUND,

            Error::AlreadyRunning(_) | Error::PortConflict { .. } => StatusCode::CONFLICT,

            Error::InvalidRequest(_) | Error::InvalidParameter(_) | Error::CredentialInvalid(_) => {
                StatusCode::BAD_REQUEST
            }

            Error::CredentialRefreshFailed(_) | Error::QuotaFetchFailure(_) => {
                StatusCode::BAD_GATEWAY
            }

            Error::ConfigUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

// Implement From for common error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::QuotaFetchFailure(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidRequest(rejection.body_text())
    }
}
