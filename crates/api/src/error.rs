use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use manara_core::error::CoreError;
use serde_json::json;

/// Non-standard status used when the client went away mid-request.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `manara_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// The request outlived the server-side request timeout.
    #[error("Request timed out")]
    RequestTimeout,
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => classify_core_error(core),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::RequestTimeout => {
                tracing::warn!("Request exceeded the server timeout");
                (
                    StatusCode::REQUEST_TIMEOUT,
                    "REQUEST_TIMEOUT",
                    "Request timed out, please try again".to_string(),
                )
            }
        };

        let body = json!({
            "status": "error",
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map errors raised by tower middleware into the JSON error envelope.
pub async fn handle_middleware_error(err: tower::BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::RequestTimeout
    } else {
        AppError::InternalError(format!("Unhandled middleware error: {err}"))
    }
}

/// Classify a core error into an HTTP status, error code, and user-facing
/// message. Provider and storage details are logged, never returned.
fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Configuration(msg) => {
            tracing::error!(error = %msg, "Service misconfigured");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
                "Generation service is not configured".to_string(),
            )
        }
        CoreError::Upstream { .. } => {
            tracing::warn!(error = %err, "Provider error");
            (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_ERROR",
                "Generation failed, please try again".to_string(),
            )
        }
        CoreError::Timeout { .. } => {
            tracing::warn!(error = %err, "Generation timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                "Generation timed out, please try again".to_string(),
            )
        }
        CoreError::Download(msg) => {
            tracing::error!(error = %msg, "Generated artifact could not be downloaded");
            (
                StatusCode::BAD_GATEWAY,
                "DOWNLOAD_ERROR",
                "Generated model could not be retrieved".to_string(),
            )
        }
        CoreError::Storage(msg) => {
            tracing::error!(error = %msg, "Generated artifact could not be stored");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Generated model could not be saved".to_string(),
            )
        }
        CoreError::Cancelled => (
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST),
            "CANCELLED",
            "Request cancelled".to_string(),
        ),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
