//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered as an HTTP response.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::Engine;
use schedule_rpa_core::{ErrorCode, Failure, RpaError};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A failure reported by the scheduling core, with the diagnostics capture
    /// taken before the session was released.
    #[error("{error}")]
    Rpa {
        error: RpaError,
        screenshot: Option<Vec<u8>>,
    },

    /// Missing headers, unparsable dates and other caller mistakes.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RpaError> for ApiError {
    fn from(error: RpaError) -> Self {
        ApiError::Rpa {
            error,
            screenshot: None,
        }
    }
}

impl From<Failure> for ApiError {
    fn from(failure: Failure) -> Self {
        ApiError::Rpa {
            error: failure.error,
            screenshot: failure.screenshot,
        }
    }
}

//=========================================================================================
// HTTP rendering
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct ErrorDetail {
    /// Canonical code, e.g. `DUPLICATE_RESERVATION`.
    pub code: String,
    pub message: String,
}

/// Body of every non-2xx response.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
    /// Base64 PNG, only with `X-RPA-Test-Mode: true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::AuthFailed => StatusCode::UNAUTHORIZED,
        ErrorCode::ShopNotFound | ErrorCode::ReservationNotFound => StatusCode::NOT_FOUND,
        ErrorCode::DuplicateReservation | ErrorCode::SlotNotAvailable => StatusCode::CONFLICT,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::SystemError | ErrorCode::PartialFailure | ErrorCode::AllFailed => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn encode_screenshot(png: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(png)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, screenshot) = match &self {
            ApiError::Rpa { error, screenshot } => {
                let code = error.code();
                (status_for(code), code.as_str(), screenshot.as_deref())
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", None),
            ApiError::Config(_) | ApiError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::SystemError.as_str(),
                None,
            ),
        };
        let message = match &self {
            ApiError::Rpa { error, .. } => error.to_string(),
            ApiError::BadRequest(message) => message.clone(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            error!(%status, code, %message, "Request failed.");
        } else {
            warn!(%status, code, %message, "Request rejected.");
        }

        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
            screenshot: screenshot.map(encode_screenshot),
        };
        (status, Json(body)).into_response()
    }
}
