use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::DetectionPayload;
use crate::job::{DetectionJob, JobMode, JobStatus};

/// Metadata needed to redraw the preview after a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// The persisted, UI-visible state of the currently active job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub is_open: bool,
    pub is_loading: bool,
    pub status_text: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub preview_meta: Option<PreviewMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_meta: Option<FileMeta>,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Captures the state for a job that was just submitted.
    pub fn for_submission(payload: &DetectionPayload, mode: JobMode) -> Self {
        let name = payload.display_name();
        let mime_type = payload.mime_type().map(str::to_string);
        Self {
            is_open: true,
            is_loading: true,
            status_text: JobStatus::Submitting.to_string(),
            job_id: None,
            progress: 0.0,
            stage: String::new(),
            detail: String::new(),
            is_async: mode == JobMode::Async,
            preview_meta: Some(PreviewMeta {
                name: name.clone(),
                mime_type: mime_type.clone(),
            }),
            result: None,
            file_meta: Some(FileMeta {
                name,
                size: payload.size(),
                mime_type,
            }),
            saved_at: Utc::now(),
        }
    }

    /// Mirrors the observable fields of `job` into the snapshot.
    pub fn apply_job(&mut self, job: &DetectionJob) {
        self.job_id = job.id.clone();
        self.status_text = job.status.to_string();
        self.is_loading = !job.status.is_terminal();
        self.progress = job.progress.percentage;
        self.stage = job.progress.stage.clone();
        self.detail = job.progress.detail.clone();
        self.result = job.result.as_ref().map(|r| r.raw.clone());
    }

    /// A finished job whose result is already known must not reopen.
    pub fn is_finished_with_result(&self) -> bool {
        !self.is_loading && self.result.is_some()
    }
}
