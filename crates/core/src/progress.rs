use serde::Serialize;

/// Transient progress notification for a running job.
///
/// Drives logging and UI feedback only; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    /// Short phase label, e.g. `queued`, `process_starts`, `IN_PROGRESS`.
    pub phase: String,
    /// Completion percentage (0-100) when the provider reports one.
    pub percent_complete: Option<f32>,
    /// Human-readable description from the provider.
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(job_id: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            phase: phase.into(),
            percent_complete: None,
            message: None,
        }
    }

    /// Attach a percentage, clamped into `0..=100`. Non-finite values are dropped.
    pub fn with_percent(mut self, percent: f32) -> Self {
        self.percent_complete = percent.is_finite().then(|| percent.clamp(0.0, 100.0));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Percentage from a `value / max` step counter. Returns `None` when `max` is zero.
pub fn percent_of(value: f64, max: f64) -> Option<f32> {
    if max > 0.0 {
        Some(((value / max) * 100.0).clamp(0.0, 100.0) as f32)
    } else {
        None
    }
}
