//! Explicit provider configuration.
//!
//! Credentials are held as `Option`s so a process can start without them;
//! the first operation that needs a missing value fails with
//! [`CoreError::Configuration`] naming the environment variable.

use std::time::Duration;

use manara_core::error::CoreError;
use manara_core::job::ProviderKind;

pub const DEFAULT_MESHY_API_URL: &str = "https://api.meshy.ai/openapi/v1";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Meshy image-to-3D settings.
#[derive(Debug, Clone)]
pub struct MeshyConfig {
    /// `MESHY_API_KEY`.
    pub api_key: Option<String>,
    /// Base URL, e.g. `https://api.meshy.ai/openapi/v1`.
    pub api_url: String,
    /// Delay between status requests.
    pub poll_interval: Duration,
    /// Upper bound on the whole polling loop.
    pub max_wait: Duration,
    /// Bound on each individual HTTP request.
    pub request_timeout: Duration,
}

impl Default for MeshyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_MESHY_API_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl MeshyConfig {
    pub fn api_key(&self) -> Result<&str, CoreError> {
        require("MESHY_API_KEY", self.api_key.as_deref())
    }
}

/// Hugging Face Space (Gradio queue) settings.
#[derive(Debug, Clone)]
pub struct GradioConfig {
    /// `HF_SPACE_URL`, e.g. `https://jeffreyxiang-trellis.hf.space`.
    pub space_url: Option<String>,
    /// `HF_TOKEN`. Optional; public Spaces accept anonymous calls.
    pub token: Option<String>,
    /// `HF_FN_INDEX`: index of the Gradio function to invoke.
    pub fn_index: Option<u32>,
    /// Index into `output.data` holding the generated artifact.
    pub output_index: usize,
    /// Global bound on the event stream, independent of traffic.
    pub stream_timeout: Duration,
    /// Bound on upload and queue-join requests.
    pub request_timeout: Duration,
}

impl Default for GradioConfig {
    fn default() -> Self {
        Self {
            space_url: None,
            token: None,
            fn_index: None,
            output_index: 0,
            stream_timeout: DEFAULT_MAX_WAIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl GradioConfig {
    /// Space base URL without a trailing slash.
    pub fn space_url(&self) -> Result<&str, CoreError> {
        require("HF_SPACE_URL", self.space_url.as_deref()).map(|url| url.trim_end_matches('/'))
    }

    pub fn fn_index(&self) -> Result<u32, CoreError> {
        self.fn_index.ok_or_else(|| CoreError::missing_config("HF_FN_INDEX"))
    }
}

/// Which provider to run, plus the settings for each.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub meshy: MeshyConfig,
    pub gradio: GradioConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::HfQueue,
            meshy: MeshyConfig::default(),
            gradio: GradioConfig::default(),
        }
    }
}

/// Return the value if present and non-blank, else a configuration error.
fn require<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str, CoreError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CoreError::missing_config(name)),
    }
}
