//! Hugging Face Space provider speaking the Gradio queue protocol.
//!
//! A job is three HTTP exchanges:
//!
//! 1. `POST {space}/upload` stores the image in the Space's temp storage.
//! 2. `POST {space}/queue/join` enqueues the function call for a session.
//! 3. `GET {space}/queue/data?session_hash=` streams queue messages as SSE
//!    until a terminal message arrives.
//!
//! The stream is read under one global deadline that does not reset on
//! traffic. Returning from [`GradioQueueProvider::wait_for_result`] drops the
//! response body, which closes the connection.

use async_trait::async_trait;
use futures::StreamExt;
use manara_core::asset::ArtifactDescriptor;
use manara_core::error::CoreError;
use manara_core::generation::{GenerationParams, ImageInput};
use manara_core::job::{GenerationJob, JobHandle, ProviderKind};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::GradioConfig;
use crate::http::{build_client, ensure_success, parse_json, transport_error};
use crate::processor::QueueEventHandler;
use crate::provider::{GenerationProvider, ProgressReporter, Submission};
use crate::sse::SseParser;

/// Length of a generated session hash, matching the Gradio JS client.
const SESSION_HASH_LEN: usize = 11;

/// Number of image inputs the generation function takes: the primary image
/// followed by the multi-view slots.
const IMAGE_SLOTS: usize = 4;

#[derive(Debug, Deserialize)]
struct JoinResponse {
    #[serde(default)]
    event_id: Option<String>,
}

/// A fresh random session hash: lowercase alphanumerics.
pub fn new_session_hash() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SESSION_HASH_LEN)
        .collect()
}

/// Build the positional `data` array for the queue join.
///
/// The uploaded file is passed for every image slot; the Space has no
/// separate multi-view input from this client.
pub fn build_join_data(file_path: &str, params: &GenerationParams) -> Vec<Value> {
    let file = json!({
        "path": file_path,
        "meta": { "_type": "gradio.FileData" },
    });
    let mut data: Vec<Value> = std::iter::repeat(file).take(IMAGE_SLOTS).collect();
    data.extend([
        json!(params.seed),
        json!(params.randomize_seed),
        json!(params.ss_guidance_strength),
        json!(params.ss_sampling_steps),
        json!(params.slat_guidance_strength),
        json!(params.slat_sampling_steps),
        json!(params.multiimage_algo),
        json!(params.mesh_simplify),
        json!(params.texture_size),
    ]);
    data
}

/// Client for one Gradio Space.
pub struct GradioQueueProvider {
    client: reqwest::Client,
    config: GradioConfig,
}

impl GradioQueueProvider {
    pub fn new(config: GradioConfig) -> Result<Self, CoreError> {
        Ok(Self::with_client(build_client()?, config))
    }

    /// Create a provider reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: GradioConfig) -> Self {
        Self { client, config }
    }

    /// The configured bearer token, ignoring blank values.
    fn token(&self) -> Option<&str> {
        self.config
            .token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Upload the image and return the Space-side temp path.
    pub async fn upload(&self, space: &str, input: &ImageInput) -> Result<String, CoreError> {
        const OP: &str = "uploading image to the Space";
        let timeout = self.config.request_timeout;

        let part = reqwest::multipart::Part::bytes(input.bytes.to_vec())
            .file_name(input.file_name.clone())
            .mime_str(&input.mime_type)
            .map_err(|e| CoreError::Internal(format!("Invalid upload MIME type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("files", part);

        let response = self
            .authorized(self.client.post(format!("{space}/upload")))
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(OP, timeout, e))?;
        let paths: Vec<String> = parse_json(OP, timeout, response).await?;

        paths
            .into_iter()
            .find(|path| !path.is_empty())
            .ok_or_else(|| CoreError::upstream_message("Space upload returned no file path"))
    }

    /// Enqueue the generation call. Returns the event id when the Space
    /// reports one.
    pub async fn join(
        &self,
        space: &str,
        fn_index: u32,
        session_hash: &str,
        data: Vec<Value>,
    ) -> Result<Option<String>, CoreError> {
        const OP: &str = "joining the Space queue";
        let timeout = self.config.request_timeout;
        let body = json!({
            "data": data,
            "fn_index": fn_index,
            "session_hash": session_hash,
            "event_data": null,
            "trigger_id": null,
        });

        let response = self
            .authorized(self.client.post(format!("{space}/queue/join")))
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(OP, timeout, e))?;
        let joined: JoinResponse = parse_json(OP, timeout, response).await?;
        Ok(joined.event_id.filter(|id| !id.is_empty()))
    }

    /// Open the event stream and feed it to the queue handler until a
    /// terminal message. Not bounded on its own; see `wait_for_result`.
    async fn read_stream(
        &self,
        space: &str,
        session_hash: &str,
        event_id: Option<&str>,
        job: &mut GenerationJob,
        progress: &ProgressReporter,
    ) -> Result<ArtifactDescriptor, CoreError> {
        const OP: &str = "reading the Space event stream";
        let timeout = self.config.stream_timeout;

        let response = self
            .authorized(self.client.get(format!("{space}/queue/data")))
            .query(&[("session_hash", session_hash)])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| transport_error(OP, timeout, e))?;
        let response = ensure_success(OP, response).await?;
        tracing::debug!(session_hash, "Event stream opened");

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut handler = QueueEventHandler::new(
            job,
            progress,
            space,
            event_id,
            self.config.output_index,
            self.token().is_some(),
        );

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport_error(OP, timeout, e))?;
            for event in parser.feed(&chunk) {
                if let Some(outcome) = handler.handle_event(&event) {
                    return outcome;
                }
            }
        }

        if parser.has_partial() {
            tracing::debug!(session_hash, "Discarding incomplete event at end of stream");
        }
        Err(CoreError::upstream_message(
            "Event stream ended before the job completed",
        ))
    }
}

#[async_trait]
impl GenerationProvider for GradioQueueProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HfQueue
    }

    fn artifact_bearer(&self) -> Option<&str> {
        self.token()
    }

    async fn submit(
        &self,
        input: &ImageInput,
        params: &GenerationParams,
    ) -> Result<Submission, CoreError> {
        params.validate()?;
        let space = self.config.space_url()?;
        let fn_index = self.config.fn_index()?;

        let file_path = self.upload(space, input).await?;
        tracing::debug!(file_path = %file_path, "Image uploaded to Space");

        let session_hash = new_session_hash();
        let data = build_join_data(&file_path, params);
        let event_id = self.join(space, fn_index, &session_hash, data).await?;
        tracing::info!(
            session_hash = %session_hash,
            event_id = ?event_id,
            fn_index,
            "Joined Space queue",
        );

        Ok(Submission {
            handle: JobHandle::Session {
                session_hash,
                event_id,
            },
            input_asset_ref: file_path,
        })
    }

    async fn wait_for_result(
        &self,
        job: &mut GenerationJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ArtifactDescriptor, CoreError> {
        let space = self.config.space_url()?;
        let (session_hash, event_id) = match &job.handle {
            JobHandle::Session {
                session_hash,
                event_id,
            } => (session_hash.clone(), event_id.clone()),
            JobHandle::Task { .. } => {
                return Err(CoreError::Internal(
                    "Gradio provider cannot wait on a task handle".into(),
                ))
            }
        };
        let timeout = self.config.stream_timeout;

        let read = self.read_stream(space, &session_hash, event_id.as_deref(), job, progress);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(
                    session_hash = %session_hash,
                    "Stream cancelled, closing connection",
                );
                Err(CoreError::Cancelled)
            }
            outcome = tokio::time::timeout(timeout, read) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        session_hash = %session_hash,
                        ?timeout,
                        "No terminal event before deadline, closing connection",
                    );
                    Err(CoreError::Timeout {
                        operation: "waiting for the Space queue",
                        after: timeout,
                    })
                }
            },
        }
    }
}
