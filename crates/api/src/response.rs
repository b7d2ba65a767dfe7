//! Shared response envelope types for API handlers.
//!
//! Successful responses use a `{ "status": "success", "data": ... }`
//! envelope; errors use `{ "status": "error", "code", "error" }` (see
//! [`crate::error::AppError`]).

use serde::Serialize;

/// Standard success envelope.
///
/// # Example
///
/// ```ignore
/// Ok(Json(SuccessResponse::new(model)))
/// ```
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub status: &'static str,
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: "success",
            data,
        }
    }
}
