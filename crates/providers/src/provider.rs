//! The generation provider contract.
//!
//! [`GenerationProvider`] hides the difference between polling and
//! streaming providers: the orchestrator submits, waits for a terminal
//! state, and receives an [`ArtifactDescriptor`] without branching on
//! provider internals. [`build_provider`] selects the implementation from
//! configuration.

use std::sync::Arc;

use async_trait::async_trait;
use manara_core::asset::ArtifactDescriptor;
use manara_core::error::CoreError;
use manara_core::generation::{GenerationParams, ImageInput};
use manara_core::job::{GenerationJob, JobHandle, JobStatus, ProviderKind};
use manara_core::progress::ProgressEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;
use crate::gradio::GradioQueueProvider;
use crate::meshy::MeshyProvider;

/// Outcome of a successful submit.
#[derive(Debug, Clone)]
pub struct Submission {
    pub handle: JobHandle,
    /// Opaque reference to the uploaded input.
    pub input_asset_ref: String,
}

impl Submission {
    /// Start tracking the submitted job.
    pub fn into_job(self, provider: ProviderKind) -> GenerationJob {
        GenerationJob::new(provider, &self.handle, self.input_asset_ref)
    }
}

/// A third-party 3D generation service.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Bearer credential needed to fetch artifacts with `requires_auth` set.
    fn artifact_bearer(&self) -> Option<&str> {
        None
    }

    /// Upload the input and create a job. Never retries.
    async fn submit(
        &self,
        input: &ImageInput,
        params: &GenerationParams,
    ) -> Result<Submission, CoreError>;

    /// Wait until `job` reaches a terminal state, reporting progress.
    ///
    /// Implementations move the job to `running` when the provider reports
    /// it; the terminal status is recorded by [`wait_for_terminal`].
    async fn wait_for_result(
        &self,
        job: &mut GenerationJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ArtifactDescriptor, CoreError>;
}

/// Wait for `job` via `provider` and record the terminal status.
///
/// Success maps to `succeeded`, a timeout to `timed_out`, anything else
/// (including cancellation) to `failed`.
pub async fn wait_for_terminal(
    provider: &dyn GenerationProvider,
    job: &mut GenerationJob,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<ArtifactDescriptor, CoreError> {
    let result = provider.wait_for_result(job, progress, cancel).await;

    let terminal = match &result {
        Ok(_) => JobStatus::Succeeded,
        Err(CoreError::Timeout { .. }) => JobStatus::TimedOut,
        Err(_) => JobStatus::Failed,
    };
    if let Err(e) = job.advance(terminal) {
        tracing::warn!(job_id = %job.job_id, error = %e, "Terminal status not recorded");
    }

    match &result {
        Ok(descriptor) => tracing::info!(
            job_id = %job.job_id,
            provider = %job.provider,
            url = %descriptor.url,
            "Generation succeeded",
        ),
        Err(e) => tracing::warn!(
            job_id = %job.job_id,
            provider = %job.provider,
            status = ?job.status,
            error = %e,
            "Generation did not succeed",
        ),
    }
    result
}

/// Build the provider selected by `config.kind`.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn GenerationProvider>, CoreError> {
    let provider: Arc<dyn GenerationProvider> = match config.kind {
        ProviderKind::Meshy => Arc::new(MeshyProvider::new(config.meshy.clone())?),
        ProviderKind::HfQueue => Arc::new(GradioQueueProvider::new(config.gradio.clone())?),
    };
    tracing::info!(provider = %config.kind, "Generation provider configured");
    Ok(provider)
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Fan-out point for [`ProgressEvent`]s.
///
/// Every event is logged; when a channel is attached it is also forwarded.
/// A closed receiver is not an error: progress is advisory.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// A reporter that only logs.
    pub fn log_only() -> Self {
        Self::default()
    }

    /// A reporter that also forwards events to the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn report(&self, event: ProgressEvent) {
        tracing::debug!(
            job_id = %event.job_id,
            phase = %event.phase,
            percent = ?event.percent_complete,
            message = ?event.message,
            "Generation progress",
        );
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
