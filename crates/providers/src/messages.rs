//! Gradio queue message types and parser.
//!
//! Gradio streams JSON payloads shaped `{"msg": "<kind>", ...}` over
//! `GET /queue/data`. Some deployments instead label each SSE block with an
//! `event:` line and omit `msg`; [`parse_message`] accepts both.

use serde::Deserialize;

/// All known Gradio queue message kinds.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum GradioMessage {
    /// Queue position estimate.
    Estimation(EstimationData),

    /// Server asks for the session hash (legacy websocket-era handshake).
    SendHash,

    /// Server asks for input data (legacy handshake).
    SendData,

    /// The job left the queue and started running.
    ProcessStarts(EventRef),

    /// Step-level progress from `gr.Progress` trackers.
    Progress(ProgressData),

    /// Intermediate output from a generator function.
    ProcessGenerating(EventRef),

    /// Log line emitted by the app (`gr.Info`, `gr.Warning`).
    Log(LogData),

    Heartbeat,

    /// Terminal: success flag plus output or error payload.
    ProcessCompleted(CompletedData),

    /// Terminal: the Space's queue is at capacity.
    QueueFull,

    /// Terminal: the server hit an error outside the app function.
    UnexpectedError(UnexpectedErrorData),

    /// The server is closing the stream.
    CloseStream,

    /// Any kind this client does not know about.
    #[serde(other)]
    Unknown,
}

impl GradioMessage {
    /// Event id the message refers to, when the payload carries one.
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Estimation(d) => d.event_id.as_deref(),
            Self::ProcessStarts(d) | Self::ProcessGenerating(d) => d.event_id.as_deref(),
            Self::Progress(d) => d.event_id.as_deref(),
            Self::ProcessCompleted(d) => d.event_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRef {
    #[serde(default)]
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EstimationData {
    #[serde(default)]
    pub event_id: Option<String>,
    /// Zero-based position in the queue.
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub queue_size: Option<u32>,
    /// Estimated seconds until processing starts.
    #[serde(default)]
    pub rank_eta: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress_data: Vec<ProgressUnit>,
}

/// One tracker entry. Either `index/length` or a fractional `progress` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressUnit {
    #[serde(default)]
    pub index: Option<f64>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub desc: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogData {
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletedData {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: CompletedOutput,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletedOutput {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<serde_json::Value>,
    /// Usually a string; some apps send an object or `null`.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl CompletedOutput {
    /// The error payload rendered as text, if any.
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnexpectedErrorData {
    #[serde(default)]
    pub message: Option<String>,
}

/// Gradio sends `null` where an empty list or object is meant.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Parse one SSE block into a typed message.
///
/// `event_type` is the block's `event:` label; it supplies the message kind
/// when the JSON payload has no `msg` field. Returns `Err` for malformed
/// JSON. Callers should log and continue.
pub fn parse_message(
    event_type: Option<&str>,
    data: &str,
) -> Result<GradioMessage, serde_json::Error> {
    let mut value: serde_json::Value = serde_json::from_str(data)?;
    if let (Some(kind), Some(obj)) = (event_type, value.as_object_mut()) {
        obj.entry("msg")
            .or_insert_with(|| serde_json::Value::String(kind.to_string()));
    }
    serde_json::from_value(value)
}
