use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use manara_core::job::ProviderKind;
use manara_providers::config::{
    GradioConfig, MeshyConfig, ProviderConfig, DEFAULT_MESHY_API_URL, DEFAULT_REQUEST_TIMEOUT,
};
use manara_storage::config::{CloudinaryCredentials, StorageConfig};

/// Slack on top of the pipeline budget for upload parsing and file writes.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(60);

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// Provider and Cloudinary credentials are optional at startup; the first
/// request that needs a missing one fails with a configuration error.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Defaults to [`pipeline_budget`] plus
    /// a margin, so the layer never fires before the pipeline's own timeouts.
    pub request_timeout_secs: u64,
    /// Largest accepted image upload in bytes (default: 10 MiB).
    pub max_upload_bytes: usize,
    /// How many times materialization runs after a download failure (default: `2`).
    pub materialize_attempts: u32,
    /// Let the download proxy reach private and loopback hosts (default: `false`).
    pub proxy_allow_private: bool,
    pub providers: ProviderConfig,
    pub storage: StorageConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                           |
    /// |--------------------------------|-----------------------------------|
    /// | `HOST`                         | `0.0.0.0`                         |
    /// | `PORT`                         | `5000`                            |
    /// | `CORS_ORIGINS`                 | `http://localhost:5173`           |
    /// | `REQUEST_TIMEOUT_SECS`         | pipeline budget + 60 s            |
    /// | `PUBLIC_BASE_URL`              | `http://localhost:5000`           |
    /// | `UPLOAD_DIR`                   | `uploads`                         |
    /// | `MAX_UPLOAD_BYTES`             | `10485760`                        |
    /// | `MATERIALIZE_ATTEMPTS`         | `2`                               |
    /// | `DOWNLOAD_PROXY_ALLOW_PRIVATE` | `false`                           |
    /// | `GENERATION_PROVIDER`          | `hf-queue`                        |
    /// | `MESHY_API_KEY`                | unset                             |
    /// | `MESHY_API_URL`                | `https://api.meshy.ai/openapi/v1` |
    /// | `MESHY_POLL_INTERVAL_SECS`     | `5`                               |
    /// | `MESHY_MAX_WAIT_SECS`          | `600`                             |
    /// | `HF_SPACE_URL`                 | unset                             |
    /// | `HF_TOKEN`                     | unset                             |
    /// | `HF_FN_INDEX`                  | unset                             |
    /// | `HF_STREAM_TIMEOUT_SECS`       | `600`                             |
    /// | `CLOUDINARY_CLOUD_NAME`        | unset                             |
    /// | `CLOUDINARY_API_KEY`           | unset                             |
    /// | `CLOUDINARY_API_SECRET`        | unset                             |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_var("PORT", "5000");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let max_upload_bytes: usize = parse_var("MAX_UPLOAD_BYTES", "10485760");
        let materialize_attempts: u32 = parse_var("MATERIALIZE_ATTEMPTS", "2");
        let proxy_allow_private: bool = std::env::var("DOWNLOAD_PROXY_ALLOW_PRIVATE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let provider_name =
            std::env::var("GENERATION_PROVIDER").unwrap_or_else(|_| "hf-queue".into());
        let kind = ProviderKind::from_name(&provider_name)
            .unwrap_or_else(|e| panic!("GENERATION_PROVIDER is invalid: {e}"));

        let meshy = MeshyConfig {
            api_key: optional_var("MESHY_API_KEY"),
            api_url: std::env::var("MESHY_API_URL")
                .unwrap_or_else(|_| DEFAULT_MESHY_API_URL.into()),
            poll_interval: Duration::from_secs(parse_var("MESHY_POLL_INTERVAL_SECS", "5")),
            max_wait: Duration::from_secs(parse_var("MESHY_MAX_WAIT_SECS", "600")),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        };

        let gradio = GradioConfig {
            space_url: optional_var("HF_SPACE_URL"),
            token: optional_var("HF_TOKEN"),
            fn_index: optional_var("HF_FN_INDEX")
                .map(|v| v.parse().expect("HF_FN_INDEX must be a valid u32")),
            stream_timeout: Duration::from_secs(parse_var("HF_STREAM_TIMEOUT_SECS", "600")),
            ..Default::default()
        };

        let storage = StorageConfig {
            upload_root: PathBuf::from(
                std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()),
            ),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5000".into()),
            cloudinary: CloudinaryCredentials {
                cloud_name: optional_var("CLOUDINARY_CLOUD_NAME"),
                api_key: optional_var("CLOUDINARY_API_KEY"),
                api_secret: optional_var("CLOUDINARY_API_SECRET"),
                ..Default::default()
            },
            ..Default::default()
        };

        let providers = ProviderConfig {
            kind,
            meshy,
            gradio,
        };
        let budget = pipeline_budget(&providers, &storage, materialize_attempts);
        let default_timeout = (budget + REQUEST_TIMEOUT_MARGIN).as_secs();
        let request_timeout_secs: u64 =
            parse_var("REQUEST_TIMEOUT_SECS", &default_timeout.to_string());
        if request_timeout_secs < budget.as_secs() {
            tracing::warn!(
                request_timeout_secs,
                pipeline_budget_secs = budget.as_secs(),
                "REQUEST_TIMEOUT_SECS is shorter than the generation pipeline can take",
            );
        }

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            max_upload_bytes,
            materialize_attempts,
            proxy_allow_private,
            providers,
            storage,
        }
    }
}

/// Longest a single generation request can legitimately take.
///
/// Covers the active provider's submit and wait timeouts plus every
/// materialization attempt and the Cloudinary mirror.
pub fn pipeline_budget(
    providers: &ProviderConfig,
    storage: &StorageConfig,
    materialize_attempts: u32,
) -> Duration {
    let provider = match providers.kind {
        ProviderKind::Meshy => providers.meshy.request_timeout * 2 + providers.meshy.max_wait,
        ProviderKind::HfQueue => {
            providers.gradio.request_timeout * 2 + providers.gradio.stream_timeout
        }
    };
    let materialize = storage.download_timeout * materialize_attempts.max(1);
    provider + materialize + storage.cloudinary.timeout
}

/// Parse `name` (or `default` when unset), panicking on a malformed value.
fn parse_var<T>(name: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .unwrap_or_else(|_| default.into())
        .parse()
        .unwrap_or_else(|e| panic!("{name} must be a valid number: {e}"))
}

/// A set, non-blank variable.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
