use std::time::Duration;

/// Domain error shared by every generation component.
///
/// Each variant corresponds to one failure class the HTTP layer maps to a
/// distinct status code. Components never swallow terminal failures: a
/// generation always resolves to a result or exactly one of these.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Missing or invalid credentials / identifiers. Not retryable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider rejected the request or reported job failure.
    #[error("Upstream error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// No terminal result within the allotted window. Safe to retry.
    #[error("Timed out after {}s while {operation}", after.as_secs_f64())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Fetching a generated artifact failed after a successful generation.
    #[error("Download failed: {0}")]
    Download(String),

    /// Persisting a generated artifact failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The caller cancelled the operation (client disconnect, shutdown).
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for an [`CoreError::Upstream`] carrying an HTTP status.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Shorthand for an [`CoreError::Upstream`] reported inside a payload
    /// rather than through an HTTP status.
    pub fn upstream_message(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: message.into(),
        }
    }

    /// Error for a required configuration value that is absent.
    pub fn missing_config(name: &str) -> Self {
        Self::Configuration(format!("{name} is not set"))
    }

    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Download(_) | Self::Upstream { .. }
        )
    }
}
