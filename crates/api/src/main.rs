use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manara_api::config::ServerConfig;
use manara_api::handlers::download::proxy_client;
use manara_api::router::build_app_router;
use manara_api::state::AppState;
use manara_providers::provider::build_provider;
use manara_storage::materializer::Materializer;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "manara_api=debug,manara_providers=debug,manara_storage=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        provider = %config.providers.kind,
        upload_root = %config.storage.upload_root.display(),
        request_timeout_secs = config.request_timeout_secs,
        "Loaded server configuration",
    );

    // --- Provider and storage ---
    let provider = build_provider(&config.providers).expect("Failed to build generation provider");
    let materializer =
        Materializer::new(config.storage.clone()).expect("Failed to build artifact materializer");
    let http = proxy_client(config.proxy_allow_private).expect("Failed to build HTTP client");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        provider,
        materializer: Arc::new(materializer),
        http,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
