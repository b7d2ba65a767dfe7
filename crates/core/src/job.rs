//! Generation job lifecycle.
//!
//! A [`GenerationJob`] is owned by the request that created it and lives only
//! in process memory. Its status moves strictly forward:
//! `queued -> running -> {succeeded | failed | timed_out}`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Provider kind
// ---------------------------------------------------------------------------

/// The third-party service family that executes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Meshy image-to-3D REST API (status polling).
    #[serde(rename = "meshy")]
    Meshy,
    /// Hugging Face Space behind a Gradio queue (server-sent events).
    #[serde(rename = "hf-queue")]
    HfQueue,
}

impl ProviderKind {
    /// Parse from a configuration value.
    ///
    /// Accepts `meshy`, `hf-queue`, and the alias `trellis`, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "meshy" => Ok(Self::Meshy),
            "hf-queue" | "hf_queue" | "trellis" => Ok(Self::HfQueue),
            other => Err(CoreError::Configuration(format!(
                "Unknown generation provider '{other}'. Must be one of: meshy, hf-queue"
            ))),
        }
    }

    /// Stable name used in file names, logs and responses.
    pub fn name(self) -> &'static str {
        match self {
            Self::Meshy => "meshy",
            Self::HfQueue => "hf-queue",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Position in the forward-only lifecycle. All terminal states share a rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed | Self::TimedOut => 2,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Re-asserting the same non-terminal status is allowed (a poll that
    /// reports "running" twice). Nothing leaves a terminal state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

// ---------------------------------------------------------------------------
// Job handle
// ---------------------------------------------------------------------------

/// Provider-specific correlation handle returned by a submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobHandle {
    /// A task id to poll (Meshy).
    Task { task_id: String },
    /// A Gradio queue session whose join request was accepted.
    Session {
        session_hash: String,
        event_id: Option<String>,
    },
}

impl JobHandle {
    /// The identifier used to correlate progress and logs.
    pub fn id(&self) -> &str {
        match self {
            Self::Task { task_id } => task_id,
            Self::Session { session_hash, .. } => session_hash,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
    pub provider: ProviderKind,
    pub job_id: String,
    pub handle: JobHandle,
    /// Opaque reference to the uploaded input (temp path or data-URI marker).
    pub input_asset_ref: String,
    pub status: JobStatus,
    pub created_at: Timestamp,
}

impl GenerationJob {
    /// Create a job in the `queued` state from a freshly submitted handle.
    pub fn new(provider: ProviderKind, handle: &JobHandle, input_asset_ref: String) -> Self {
        Self {
            provider,
            job_id: handle.id().to_string(),
            handle: handle.clone(),
            input_asset_ref,
            status: JobStatus::Queued,
            created_at: chrono::Utc::now(),
        }
    }

    /// Move the job to `next`, rejecting any backward or post-terminal move.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Internal(format!(
                "Illegal job transition for {}: {:?} -> {:?}",
                self.job_id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn job() -> GenerationJob {
        let handle = JobHandle::Task {
            task_id: "task-1".into(),
        };
        GenerationJob::new(ProviderKind::Meshy, &handle, "data-uri".into())
    }

    #[test]
    fn provider_from_name() {
        assert_eq!(ProviderKind::from_name("meshy").unwrap(), ProviderKind::Meshy);
        assert_eq!(ProviderKind::from_name("HF-Queue").unwrap(), ProviderKind::HfQueue);
        assert_eq!(ProviderKind::from_name("trellis").unwrap(), ProviderKind::HfQueue);
        assert_matches!(ProviderKind::from_name("tripo"), Err(CoreError::Configuration(_)));
    }

    #[test]
    fn provider_serializes_with_wire_names() {
        assert_eq!(serde_json::to_string(&ProviderKind::HfQueue).unwrap(), "\"hf-queue\"");
        assert_eq!(ProviderKind::Meshy.to_string(), "meshy");
    }

    #[test]
    fn new_job_is_queued() {
        let job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.job_id, "task-1");
    }

    #[test]
    fn forward_transitions_succeed() {
        let mut job = job();
        job.advance(JobStatus::Running).unwrap();
        job.advance(JobStatus::Running).unwrap();
        job.advance(JobStatus::Succeeded).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[test]
    fn queued_may_jump_to_terminal() {
        let mut job = job();
        job.advance(JobStatus::Failed).unwrap();
        assert!(job.status.is_terminal());
    }

    #[test]
    fn backward_transition_rejected() {
        let mut job = job();
        job.advance(JobStatus::Running).unwrap();
        assert_matches!(job.advance(JobStatus::Queued), Err(CoreError::Internal(_)));
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn terminal_state_is_final() {
        let mut job = job();
        job.advance(JobStatus::TimedOut).unwrap();
        assert!(job.advance(JobStatus::Succeeded).is_err());
        assert!(job.advance(JobStatus::TimedOut).is_err());
        assert_eq!(job.status, JobStatus::TimedOut);
    }

    #[test]
    fn session_handle_id_is_session_hash() {
        let handle = JobHandle::Session {
            session_hash: "abc123".into(),
            event_id: Some("evt".into()),
        };
        assert_eq!(handle.id(), "abc123");
    }
}
