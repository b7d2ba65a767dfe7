//! Gradio queue event processing.
//!
//! Interprets parsed SSE blocks for one job: updates the job status,
//! reports progress, and decides when the stream has reached a terminal
//! message. Malformed payloads are logged and skipped.

use manara_core::asset::ArtifactDescriptor;
use manara_core::error::CoreError;
use manara_core::job::{GenerationJob, JobStatus};
use manara_core::progress::{percent_of, ProgressEvent};

use crate::messages::{
    parse_message, CompletedData, EstimationData, GradioMessage, LogData, ProgressData,
};
use crate::provider::ProgressReporter;
use crate::sse::SseEvent;

/// Longest raw payload echoed into a parse-failure log line.
const MAX_LOGGED_PAYLOAD: usize = 200;

/// Per-job interpreter for queue messages.
pub struct QueueEventHandler<'a> {
    job: &'a mut GenerationJob,
    progress: &'a ProgressReporter,
    space_url: &'a str,
    /// Event id returned by the queue join, used to ignore other jobs' frames.
    event_id: Option<&'a str>,
    output_index: usize,
    /// Whether a bearer token is configured for the Space.
    has_token: bool,
}

impl<'a> QueueEventHandler<'a> {
    pub fn new(
        job: &'a mut GenerationJob,
        progress: &'a ProgressReporter,
        space_url: &'a str,
        event_id: Option<&'a str>,
        output_index: usize,
        has_token: bool,
    ) -> Self {
        Self {
            job,
            progress,
            space_url,
            event_id,
            output_index,
            has_token,
        }
    }

    /// Handle one SSE block. Returns `Some` once a terminal message arrives.
    pub fn handle_event(
        &mut self,
        event: &SseEvent,
    ) -> Option<Result<ArtifactDescriptor, CoreError>> {
        let message = match parse_message(event.event_type.as_deref(), &event.data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job.job_id,
                    error = %e,
                    raw_message = %truncate(&event.data),
                    "Failed to parse queue message, skipping",
                );
                return None;
            }
        };

        if let (Some(expected), Some(actual)) = (self.event_id, message.event_id()) {
            if expected != actual {
                tracing::trace!(
                    job_id = %self.job.job_id,
                    event_id = actual,
                    "Ignoring message for another event",
                );
                return None;
            }
        }

        match message {
            GradioMessage::Estimation(data) => {
                self.handle_estimation(&data);
                None
            }
            GradioMessage::ProcessStarts(_) => {
                self.mark_running();
                self.progress.report(
                    ProgressEvent::new(&self.job.job_id, "process_starts")
                        .with_message("Processing started"),
                );
                None
            }
            GradioMessage::Progress(data) => {
                self.handle_progress(&data);
                None
            }
            GradioMessage::ProcessGenerating(_) => {
                self.mark_running();
                self.progress
                    .report(ProgressEvent::new(&self.job.job_id, "process_generating"));
                None
            }
            GradioMessage::Log(data) => {
                self.handle_log(&data);
                None
            }
            GradioMessage::Heartbeat | GradioMessage::SendHash | GradioMessage::SendData => {
                tracing::trace!(job_id = %self.job.job_id, "Queue keep-alive");
                None
            }
            GradioMessage::Unknown => {
                tracing::debug!(
                    job_id = %self.job.job_id,
                    raw_message = %truncate(&event.data),
                    "Unknown queue message",
                );
                None
            }
            GradioMessage::ProcessCompleted(data) => Some(self.handle_completed(&data)),
            GradioMessage::QueueFull => {
                tracing::warn!(job_id = %self.job.job_id, "Provider queue is full");
                Some(Err(CoreError::upstream_message("Provider queue is full")))
            }
            GradioMessage::UnexpectedError(data) => {
                let message = data
                    .message
                    .unwrap_or_else(|| "Unexpected provider error".to_string());
                tracing::error!(
                    job_id = %self.job.job_id,
                    error = %message,
                    "Provider reported an unexpected error",
                );
                Some(Err(CoreError::upstream_message(message)))
            }
            GradioMessage::CloseStream => Some(Err(CoreError::upstream_message(
                "Provider closed the stream before the job completed",
            ))),
        }
    }

    // ---- individual message handlers ----

    fn mark_running(&mut self) {
        if self.job.status == JobStatus::Queued {
            if let Err(e) = self.job.advance(JobStatus::Running) {
                tracing::warn!(
                    job_id = %self.job.job_id,
                    error = %e,
                    "Could not mark job running",
                );
            }
        }
    }

    fn handle_estimation(&self, data: &EstimationData) {
        let mut event = ProgressEvent::new(&self.job.job_id, "queued");
        if let Some(rank) = data.rank {
            let position = rank.saturating_add(1);
            let position = match data.queue_size {
                Some(size) => format!("Queue position {position} of {size}"),
                None => format!("Queue position {position}"),
            };
            event = event.with_message(position);
        }
        self.progress.report(event);
    }

    fn handle_progress(&mut self, data: &ProgressData) {
        self.mark_running();
        let Some(unit) = data.progress_data.first() else {
            return;
        };
        let mut event = ProgressEvent::new(&self.job.job_id, "progress");
        let percent = match (unit.index, unit.length, unit.progress) {
            (Some(index), Some(length), _) => percent_of(index, length),
            (_, _, Some(fraction)) => Some((fraction * 100.0) as f32),
            _ => None,
        };
        if let Some(percent) = percent {
            event = event.with_percent(percent);
        }
        if let Some(desc) = &unit.desc {
            event = event.with_message(desc.clone());
        }
        self.progress.report(event);
    }

    fn handle_log(&self, data: &LogData) {
        tracing::debug!(
            job_id = %self.job.job_id,
            level = ?data.level,
            log = %data.log,
            "Provider log",
        );
        self.progress
            .report(ProgressEvent::new(&self.job.job_id, "log").with_message(data.log.clone()));
    }

    fn handle_completed(&self, data: &CompletedData) -> Result<ArtifactDescriptor, CoreError> {
        if !data.success {
            let message = data
                .output
                .error_message()
                .unwrap_or_else(|| "Generation failed".to_string());
            tracing::error!(
                job_id = %self.job.job_id,
                error = %message,
                "Provider reported job failure",
            );
            return Err(CoreError::upstream_message(message));
        }
        extract_artifact(
            &data.output.data,
            self.output_index,
            self.space_url,
            self.has_token,
        )
    }
}

/// Resolve the artifact descriptor at `index` of a completion's `output.data`.
///
/// Accepts a bare string (URL or server path), a file object with `url`,
/// `path` or `name`, a Gradio update wrapper (`{"__type__": "update",
/// "value": ...}`), or a list whose first element is any of those. Server
/// paths resolve to `{space_url}/file={path}`. Only URLs with the Space's
/// own origin are marked as needing the Space token.
pub fn extract_artifact(
    data: &[serde_json::Value],
    index: usize,
    space_url: &str,
    has_token: bool,
) -> Result<ArtifactDescriptor, CoreError> {
    let value = data.get(index).ok_or_else(|| {
        CoreError::upstream_message(format!(
            "Completion carried {} outputs, expected an artifact at index {index}",
            data.len()
        ))
    })?;
    let reference = artifact_reference(value).ok_or_else(|| {
        CoreError::upstream_message("Completion output did not contain a file reference")
    })?;

    let url = if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        format!("{space_url}/file={reference}")
    };
    let requires_auth = has_token && same_origin(&url, space_url);
    Ok(ArtifactDescriptor::from_url(url, requires_auth))
}

/// Whether `url` and `base` share scheme, host and effective port.
pub fn same_origin(url: &str, base: &str) -> bool {
    match (reqwest::Url::parse(url), reqwest::Url::parse(base)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str().is_some()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}

fn artifact_reference(value: &serde_json::Value) -> Option<&str> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Object(obj) => {
            if let Some(inner) = obj.get("value").filter(|_| obj.contains_key("__type__")) {
                return artifact_reference(inner);
            }
            ["url", "path", "name"]
                .iter()
                .filter_map(|key| obj.get(*key).and_then(|v| v.as_str()))
                .find(|s| !s.is_empty())
        }
        serde_json::Value::Array(items) => items.first().and_then(artifact_reference),
        _ => None,
    }
}

fn truncate(raw: &str) -> &str {
    match raw.char_indices().nth(MAX_LOGGED_PAYLOAD) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use manara_core::asset::AssetKind;
    use manara_core::job::{JobHandle, ProviderKind};
    use serde_json::json;

    use super::*;

    const SPACE: &str = "https://trellis.hf.space";

    fn job() -> GenerationJob {
        let handle = JobHandle::Session {
            session_hash: "sess".into(),
            event_id: Some("e1".into()),
        };
        GenerationJob::new(ProviderKind::HfQueue, &handle, "/tmp/gradio/in.png".into())
    }

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
            id: None,
        }
    }

    #[test]
    fn extract_from_url_object() {
        let data = vec![json!({"path": "/tmp/x.glb", "url": "https://cdn.example.com/x.glb"})];
        let d = extract_artifact(&data, 0, SPACE, true).unwrap();
        assert_eq!(d.url, "https://cdn.example.com/x.glb");
        assert!(!d.requires_auth);
        assert_eq!(d.kind, AssetKind::Model);
    }

    #[test]
    fn extract_from_server_path() {
        let data = vec![json!("/tmp/gradio/abc/model.glb")];
        let d = extract_artifact(&data, 0, SPACE, true).unwrap();
        assert_eq!(d.url, "https://trellis.hf.space/file=/tmp/gradio/abc/model.glb");
        assert!(d.requires_auth);
    }

    #[test]
    fn extract_from_update_wrapper_and_list() {
        let data = vec![
            json!(null),
            json!({"__type__": "update", "value": [{"name": "/tmp/preview.png"}]}),
        ];
        let d = extract_artifact(&data, 1, SPACE, false).unwrap();
        assert_eq!(d.url, "https://trellis.hf.space/file=/tmp/preview.png");
        assert_eq!(d.kind, AssetKind::Image);
        assert!(!d.requires_auth);
    }

    #[test]
    fn extract_missing_index_is_upstream_error() {
        assert_matches!(
            extract_artifact(&[], 0, SPACE, false),
            Err(CoreError::Upstream { .. })
        );
        assert_matches!(
            extract_artifact(&[json!(42)], 0, SPACE, false),
            Err(CoreError::Upstream { .. })
        );
    }

    #[test]
    fn token_is_not_sent_to_lookalike_hosts() {
        for url in [
            "https://trellis.hf.space.attacker.example/model.glb",
            "https://trellis.hf.spacex.io/model.glb",
            "http://trellis.hf.space/model.glb",
            "https://trellis.hf.space:8443/model.glb",
        ] {
            let d = extract_artifact(&[json!(url)], 0, SPACE, true).unwrap();
            assert!(!d.requires_auth, "{url} must not receive the Space token");
        }
    }

    #[test]
    fn token_is_sent_to_the_space_origin() {
        let data = [json!("https://trellis.hf.space:443/file=/tmp/m.glb")];
        let d = extract_artifact(&data, 0, SPACE, true).unwrap();
        assert!(d.requires_auth);
        assert!(same_origin("http://127.0.0.1:7860/file=/x", "http://127.0.0.1:7860"));
        assert!(!same_origin("http://127.0.0.1:7861/file=/x", "http://127.0.0.1:7860"));
        assert!(!same_origin("not a url", SPACE));
    }

    #[test]
    fn estimation_with_max_rank_does_not_overflow() {
        let mut job = job();
        let (reporter, mut rx) = ProgressReporter::channel();
        let mut handler = QueueEventHandler::new(&mut job, &reporter, SPACE, None, 0, false);
        let frame = format!(r#"{{"msg":"estimation","rank":{},"queue_size":3}}"#, u32::MAX);
        assert!(handler.handle_event(&event(&frame)).is_none());
        let progress = rx.try_recv().unwrap();
        assert_eq!(progress.phase, "queued");
        assert_eq!(
            progress.message.as_deref(),
            Some(format!("Queue position {} of 3", u32::MAX).as_str())
        );
    }

    #[test]
    fn process_starts_marks_running() {
        let mut job = job();
        let reporter = ProgressReporter::log_only();
        let mut handler = QueueEventHandler::new(&mut job, &reporter, SPACE, Some("e1"), 0, false);
        assert!(handler
            .handle_event(&event(r#"{"msg":"process_starts","event_id":"e1"}"#))
            .is_none());
        drop(handler);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn progress_reports_percent_and_description() {
        let mut job = job();
        let (reporter, mut rx) = ProgressReporter::channel();
        let mut handler = QueueEventHandler::new(&mut job, &reporter, SPACE, None, 0, false);
        handler.handle_event(&event(
            r#"{"msg":"progress","progress_data":[{"index":6,"length":12,"desc":"Sampling"}]}"#,
        ));
        let progress = rx.try_recv().unwrap();
        assert_eq!(progress.percent_complete, Some(50.0));
        assert_eq!(progress.message.as_deref(), Some("Sampling"));
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let mut job = job();
        let reporter = ProgressReporter::log_only();
        let mut handler = QueueEventHandler::new(&mut job, &reporter, SPACE, None, 0, false);
        assert!(handler.handle_event(&event("{not json")).is_none());
    }

    #[test]
    fn other_event_ids_are_ignored() {
        let mut job = job();
        let reporter = ProgressReporter::log_only();
        let mut handler = QueueEventHandler::new(&mut job, &reporter, SPACE, Some("e1"), 0, false);
        let frame = r#"{"msg":"process_completed","event_id":"other","success":true,
            "output":{"data":["/tmp/x.glb"]}}"#;
        assert!(handler.handle_event(&event(frame)).is_none());
    }

    #[test]
    fn terminal_messages() {
        let mut job = job();
        let reporter = ProgressReporter::log_only();
        let mut handler = QueueEventHandler::new(&mut job, &reporter, SPACE, None, 0, false);

        assert_matches!(
            handler.handle_event(&event(r#"{"msg":"queue_full"}"#)),
            Some(Err(CoreError::Upstream { .. }))
        );
        assert_matches!(
            handler.handle_event(&event(
                r#"{"msg":"process_completed","success":false,"output":{"error":"boom"}}"#
            )),
            Some(Err(CoreError::Upstream { message, .. })) if message == "boom"
        );
        assert_matches!(
            handler.handle_event(&event(r#"{"msg":"close_stream"}"#)),
            Some(Err(CoreError::Upstream { .. }))
        );
        assert_matches!(
            handler.handle_event(&event(
                r#"{"msg":"process_completed","success":true,"output":{"data":["/tmp/m.glb"]}}"#
            )),
            Some(Ok(ArtifactDescriptor { .. }))
        );
    }

    #[test]
    fn labeled_block_without_msg_field() {
        let mut job = job();
        let reporter = ProgressReporter::log_only();
        let mut handler = QueueEventHandler::new(&mut job, &reporter, SPACE, None, 0, false);
        let block = SseEvent {
            event_type: Some("queue_full".into()),
            data: "{}".into(),
            id: None,
        };
        assert_matches!(
            handler.handle_event(&block),
            Some(Err(CoreError::Upstream { .. }))
        );
    }
}
