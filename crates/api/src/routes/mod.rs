pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the API route tree.
///
/// Route hierarchy:
///
/// ```text
/// /3d/generate          generate a model from an uploaded image (POST)
/// /download-proxy       stream a remote file back as an attachment (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/3d/generate", post(handlers::generation::generate_model))
        .route("/download-proxy", get(handlers::download::download_proxy))
}
