//! Shared HTTP helpers for provider clients.
//!
//! Converts transport failures and non-2xx responses into [`CoreError`]
//! so each provider reports one consistent error taxonomy.

use std::time::Duration;

use manara_core::error::CoreError;

use crate::config::DEFAULT_CONNECT_TIMEOUT;

/// Upper bound on how much of an error body is kept in messages.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Build the HTTP client used by a provider.
///
/// Only the connect phase is bounded here. Whole-request bounds are applied
/// per call, since the event stream must outlive any single-request timeout.
pub fn build_client() -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| CoreError::Internal(format!("Failed to build HTTP client: {e}")))
}

/// Map a transport error raised during `operation` into a [`CoreError`].
pub fn transport_error(
    operation: &'static str,
    timeout: Duration,
    err: reqwest::Error,
) -> CoreError {
    if err.is_timeout() {
        CoreError::Timeout {
            operation,
            after: timeout,
        }
    } else {
        CoreError::Upstream {
            status: err.status().map(|s| s.as_u16()),
            message: format!("{operation}: {err}"),
        }
    }
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or an [`CoreError::Upstream`] carrying the status
/// and (truncated) body text on failure.
pub async fn ensure_success(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, CoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(CoreError::upstream(
        status.as_u16(),
        format!("{operation} returned {status}: {}", truncate(&body)),
    ))
}

/// Parse a successful JSON response body into the expected type.
pub async fn parse_json<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    timeout: Duration,
    response: reqwest::Response,
) -> Result<T, CoreError> {
    let response = ensure_success(operation, response).await?;
    let status = response.status().as_u16();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(operation, timeout, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        CoreError::upstream(status, format!("{operation} returned an unexpected body: {e}"))
    })
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_bodies() {
        assert_eq!(truncate("bad request"), "bad request");
    }

    #[test]
    fn truncate_cuts_on_char_boundary() {
        let long = "é".repeat(MAX_ERROR_BODY_CHARS + 10);
        assert_eq!(truncate(&long).chars().count(), MAX_ERROR_BODY_CHARS);
    }

    #[test]
    fn client_builds() {
        assert!(build_client().is_ok());
    }
}
