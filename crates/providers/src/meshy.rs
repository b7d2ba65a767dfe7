//! Meshy image-to-3D provider (polling).
//!
//! Submits the image inline as a data URI, then polls the task on a fixed
//! interval until it reaches a terminal status or the overall deadline
//! passes.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use manara_core::asset::ArtifactDescriptor;
use manara_core::error::CoreError;
use manara_core::generation::{GenerationParams, ImageInput};
use manara_core::job::{GenerationJob, JobHandle, JobStatus, ProviderKind};
use manara_core::progress::ProgressEvent;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::MeshyConfig;
use crate::http::{build_client, parse_json, transport_error};
use crate::provider::{GenerationProvider, ProgressReporter, Submission};

/// Response of `POST /image-to-3d`.
#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    #[serde(default)]
    result: String,
}

/// Task payload returned by `GET /image-to-3d/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshyTask {
    #[serde(default)]
    pub status: String,
    /// Completion percentage, 0-100.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub model_urls: Option<ModelUrls>,
    #[serde(default)]
    pub task_error: Option<TaskError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelUrls {
    #[serde(default)]
    pub glb: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskError {
    #[serde(default)]
    pub message: Option<String>,
}

/// Map a Meshy task status onto the job lifecycle.
///
/// Unknown values are treated as still running so a new intermediate status
/// does not abort an otherwise healthy task.
pub fn map_status(status: &str) -> JobStatus {
    match status {
        "PENDING" => JobStatus::Queued,
        "IN_PROGRESS" => JobStatus::Running,
        "SUCCEEDED" => JobStatus::Succeeded,
        "FAILED" | "CANCELED" | "EXPIRED" => JobStatus::Failed,
        other => {
            tracing::warn!(status = other, "Unknown Meshy task status, treating as running");
            JobStatus::Running
        }
    }
}

/// Turn a terminal task payload into the job outcome.
///
/// Returns `None` while the task is still queued or running.
pub fn task_outcome(task: &MeshyTask) -> Option<Result<ArtifactDescriptor, CoreError>> {
    match map_status(&task.status) {
        JobStatus::Queued | JobStatus::Running => None,
        JobStatus::Succeeded => {
            let url = task
                .model_urls
                .as_ref()
                .and_then(|urls| urls.glb.clone())
                .filter(|url| !url.is_empty());
            Some(match url {
                Some(url) => Ok(ArtifactDescriptor::model(url, false)),
                None => Err(CoreError::upstream_message(
                    "Meshy task succeeded without a GLB model URL",
                )),
            })
        }
        JobStatus::Failed | JobStatus::TimedOut => {
            let message = task
                .task_error
                .as_ref()
                .and_then(|e| e.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("Meshy task ended with status {}", task.status));
            Some(Err(CoreError::upstream_message(message)))
        }
    }
}

/// Client for the Meshy OpenAPI.
pub struct MeshyProvider {
    client: reqwest::Client,
    config: MeshyConfig,
}

impl MeshyProvider {
    pub fn new(config: MeshyConfig) -> Result<Self, CoreError> {
        Ok(Self::with_client(build_client()?, config))
    }

    /// Create a provider reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: MeshyConfig) -> Self {
        Self { client, config }
    }

    fn api_url(&self) -> &str {
        self.config.api_url.trim_end_matches('/')
    }

    /// Fetch the current state of a task. One request, bounded by the
    /// per-request timeout.
    pub async fn fetch_task(&self, task_id: &str) -> Result<MeshyTask, CoreError> {
        const OP: &str = "fetching Meshy task";
        let timeout = self.config.request_timeout;
        let response = self
            .client
            .get(format!("{}/image-to-3d/{task_id}", self.api_url()))
            .bearer_auth(self.config.api_key()?)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(OP, timeout, e))?;
        parse_json(OP, timeout, response).await
    }

    fn deadline_error(&self) -> CoreError {
        CoreError::Timeout {
            operation: "waiting for the Meshy task",
            after: self.config.max_wait,
        }
    }
}

#[async_trait]
impl GenerationProvider for MeshyProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Meshy
    }

    async fn submit(
        &self,
        input: &ImageInput,
        params: &GenerationParams,
    ) -> Result<Submission, CoreError> {
        const OP: &str = "creating Meshy task";
        params.validate()?;
        let api_key = self.config.api_key()?;
        let timeout = self.config.request_timeout;

        let encoded = base64::engine::general_purpose::STANDARD.encode(&input.bytes);
        let body = serde_json::json!({
            "image_url": format!("data:{};base64,{encoded}", input.mime_type),
            "enable_pbr": params.enable_pbr,
            "should_remesh": params.should_remesh,
        });

        let response = self
            .client
            .post(format!("{}/image-to-3d", self.api_url()))
            .bearer_auth(api_key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(OP, timeout, e))?;
        let created: CreateTaskResponse = parse_json(OP, timeout, response).await?;

        let task_id = created.result.trim().to_string();
        if task_id.is_empty() {
            return Err(CoreError::upstream_message("Meshy returned an empty task id"));
        }
        tracing::info!(task_id = %task_id, bytes = input.len(), "Meshy task created");

        Ok(Submission {
            handle: JobHandle::Task { task_id },
            input_asset_ref: format!("data:{};base64 ({} bytes)", input.mime_type, input.len()),
        })
    }

    async fn wait_for_result(
        &self,
        job: &mut GenerationJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ArtifactDescriptor, CoreError> {
        let deadline = tokio::time::Instant::now() + self.config.max_wait;
        let task_id = job.job_id.clone();

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(self.deadline_error()),
                fetched = self.fetch_task(&task_id) => fetched,
            };

            match fetched {
                Ok(task) => {
                    let mut event = ProgressEvent::new(&task_id, task.status.clone());
                    if let Some(percent) = task.progress {
                        event = event.with_percent(percent as f32);
                    }
                    progress.report(event);

                    if map_status(&task.status) == JobStatus::Running
                        && job.status == JobStatus::Queued
                    {
                        job.advance(JobStatus::Running)?;
                    }
                    if let Some(outcome) = task_outcome(&task) {
                        return outcome;
                    }
                }
                Err(e @ CoreError::Configuration(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        task_id = %task_id,
                        error = %e,
                        "Meshy status request failed, retrying",
                    );
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let pause: Duration = self.config.poll_interval.min(remaining);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use manara_core::asset::AssetKind;

    use super::*;

    fn task(status: &str) -> MeshyTask {
        MeshyTask {
            status: status.to_string(),
            progress: None,
            model_urls: None,
            task_error: None,
        }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(map_status("PENDING"), JobStatus::Queued);
        assert_eq!(map_status("IN_PROGRESS"), JobStatus::Running);
        assert_eq!(map_status("SUCCEEDED"), JobStatus::Succeeded);
        assert_eq!(map_status("FAILED"), JobStatus::Failed);
        assert_eq!(map_status("CANCELED"), JobStatus::Failed);
        assert_eq!(map_status("EXPIRED"), JobStatus::Failed);
        assert_eq!(map_status("WARMING_UP"), JobStatus::Running);
    }

    #[test]
    fn running_task_has_no_outcome() {
        assert!(task_outcome(&task("PENDING")).is_none());
        assert!(task_outcome(&task("IN_PROGRESS")).is_none());
    }

    #[test]
    fn succeeded_task_yields_glb_url() {
        let mut t = task("SUCCEEDED");
        t.model_urls = Some(ModelUrls {
            glb: Some("https://assets.meshy.ai/t/model.glb".into()),
        });
        let descriptor = task_outcome(&t).unwrap().unwrap();
        assert_eq!(descriptor.url, "https://assets.meshy.ai/t/model.glb");
        assert!(!descriptor.requires_auth);
        assert_eq!(descriptor.kind, AssetKind::Model);
    }

    #[test]
    fn succeeded_without_glb_is_upstream_error() {
        assert_matches!(
            task_outcome(&task("SUCCEEDED")),
            Some(Err(CoreError::Upstream { .. }))
        );
    }

    #[test]
    fn failed_task_carries_provider_message() {
        let mut t = task("FAILED");
        t.task_error = Some(TaskError {
            message: Some("Image has no object".into()),
        });
        assert_matches!(
            task_outcome(&t),
            Some(Err(CoreError::Upstream { message, .. })) if message == "Image has no object"
        );
        assert_matches!(
            task_outcome(&task("EXPIRED")),
            Some(Err(CoreError::Upstream { message, .. })) if message.contains("EXPIRED")
        );
    }

    #[test]
    fn task_payload_deserializes() {
        let json = r#"{"id":"t1","status":"SUCCEEDED","progress":100,"model_urls":{"glb":"https://x/m.glb","fbx":"https://x/m.fbx"},"task_error":{"message":""}}"#;
        let t: MeshyTask = serde_json::from_str(json).unwrap();
        assert_eq!(t.progress, Some(100.0));
        assert_eq!(t.model_urls.unwrap().glb.as_deref(), Some("https://x/m.glb"));
    }
}
