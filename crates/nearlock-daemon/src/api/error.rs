//! API error types and response handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nearlock_core::NearlockError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to one HTTP status code and renders as an
/// [`ErrorResponse`].
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - The monitor or the radio cannot serve the request.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ApiError {
    /// Shorthand for a [`Self::BadRequest`].
    pub fn bad_request(error_code: &str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            error_code: error_code.to_string(),
            message: message.into(),
        }
    }

    /// HTTP status this error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_target",
    "message": "Target identifier must not be empty"
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "invalid_target")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Target identifier must not be empty")]
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, message) = match self {
            Self::BadRequest {
                error_code,
                message,
            }
            | Self::ServiceUnavailable {
                error_code,
                message,
            } => (error_code, message),
            Self::InternalError {
                error_code,
                message,
            } => {
                tracing::error!(error_code = %error_code, message = %message, "Internal server error");
                (error_code, message)
            }
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl From<NearlockError> for ApiError {
    fn from(err: NearlockError) -> Self {
        let error_code = err.error_code().to_lowercase();
        let message = err.to_string();
        match err {
            NearlockError::InvalidPeripheralId(_) => Self::BadRequest {
                error_code,
                message,
            },
            NearlockError::MonitorStopped
            | NearlockError::BluetoothAdapterNotFound
            | NearlockError::BluetoothAdapterPoweredOff
            | NearlockError::BluetoothUnavailable(_) => Self::ServiceUnavailable {
                error_code,
                message,
            },
            NearlockError::ConfigNotFound(_)
            | NearlockError::ConfigParseError(_)
            | NearlockError::ConfigValidationError(_)
            | NearlockError::ConfigWriteFailed(_)
            | NearlockError::IoError(_) => Self::InternalError {
                error_code,
                message,
            },
        }
    }
}
