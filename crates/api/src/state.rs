use std::sync::Arc;

use manara_providers::provider::GenerationProvider;
use manara_storage::materializer::Materializer;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration, read-only after startup.
    pub config: Arc<ServerConfig>,
    /// The configured 3D generation provider.
    pub provider: Arc<dyn GenerationProvider>,
    /// Downloads and persists generated artifacts.
    pub materializer: Arc<Materializer>,
    /// Client for the download proxy.
    pub http: reqwest::Client,
}
