use serde::{Deserialize, Serialize};

use crate::result::DetectionResult;

/// Which submission path a job took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Sync,
    Async,
}

impl JobMode {
    /// Payloads at or below `threshold` bytes go through the synchronous path.
    pub fn for_size(size: u64, threshold: u64) -> Self {
        if size > threshold {
            JobMode::Async
        } else {
            JobMode::Sync
        }
    }
}

/// Lifecycle of a detection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitting,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Submitting => write!(f, "Submitting"),
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Processing => write!(f, "Processing"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub percentage: f64,
    pub stage: String,
    pub detail: String,
}

impl JobProgress {
    /// Applies a newer reading. The percentage never moves backwards; stage
    /// and detail always take the latest non-empty value.
    pub fn advance(&mut self, percentage: Option<f64>, stage: Option<&str>, detail: Option<&str>) {
        if let Some(p) = percentage {
            self.percentage = self.percentage.max(p.clamp(0.0, 100.0));
        }
        if let Some(stage) = stage.filter(|s| !s.is_empty()) {
            self.stage = stage.to_string();
        }
        if let Some(detail) = detail.filter(|d| !d.is_empty()) {
            self.detail = detail.to_string();
        }
    }
}

/// One unit of detection work from submission to a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionJob {
    /// Local correlation id, present for every job.
    pub local_id: String,
    /// Remote task id, present only for asynchronous jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub mode: JobMode,
    pub filename: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DetectionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DetectionJob {
    pub fn new(mode: JobMode, filename: &str) -> Self {
        Self {
            local_id: uuid::Uuid::new_v4().to_string(),
            id: None,
            mode,
            filename: filename.to_string(),
            status: JobStatus::Submitting,
            progress: JobProgress::default(),
            result: None,
            error_message: None,
        }
    }

    /// Identifier used in events: the remote task id when known.
    pub fn reference(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.local_id)
    }

    pub fn complete(&mut self, result: DetectionResult) {
        self.status = JobStatus::Completed;
        self.progress.advance(Some(100.0), None, None);
        self.result = Some(result);
        self.error_message = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.result = None;
        self.error_message = Some(message.into());
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.result = None;
        self.error_message = None;
    }
}
