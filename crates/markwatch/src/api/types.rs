use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What gets submitted for detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionPayload {
    File {
        name: String,
        bytes: Vec<u8>,
        mime: Option<String>,
    },
    Text {
        content: String,
    },
}

impl DetectionPayload {
    /// Creates a file payload, guessing the MIME type from the name.
    pub fn file(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime = mime_guess::from_path(&name).first().map(|m| m.to_string());
        DetectionPayload::File { name, bytes, mime }
    }

    pub fn text(content: impl Into<String>) -> Self {
        DetectionPayload::Text {
            content: content.into(),
        }
    }

    /// Size in bytes, used to choose between the sync and async paths.
    pub fn size(&self) -> u64 {
        match self {
            DetectionPayload::File { bytes, .. } => bytes.len() as u64,
            DetectionPayload::Text { content } => content.len() as u64,
        }
    }

    /// Name shown in progress UI and recorded in history.
    pub fn display_name(&self) -> String {
        match self {
            DetectionPayload::File { name, .. } => name.clone(),
            DetectionPayload::Text { .. } => "text-snippet.txt".to_string(),
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            DetectionPayload::File { mime, .. } => mime.as_deref(),
            DetectionPayload::Text { .. } => Some("text/plain"),
        }
    }

    /// Task type understood by the async endpoint.
    pub fn task_type(&self) -> &'static str {
        match self {
            DetectionPayload::Text { .. } => "text",
            DetectionPayload::File { mime, .. } => match mime.as_deref() {
                Some(m) if m.starts_with("video/") => "video",
                _ => "image",
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskSubmitResponse {
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Remote task status as reported by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TaskProgressWire {
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl TaskProgressWire {
    /// Percentage in `0..=100`, derived from `current/total` when absent.
    pub fn percentage(&self) -> Option<f64> {
        let pct = match (self.percentage, self.current, self.total) {
            (Some(p), _, _) => Some(p),
            (None, Some(current), Some(total)) if total > 0.0 => Some(current / total * 100.0),
            _ => None,
        };
        pct.filter(|p| p.is_finite()).map(|p| p.clamp(0.0, 100.0))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskStatusResponse {
    pub status: RemoteTaskStatus,
    #[serde(default)]
    pub progress: Option<TaskProgressWire>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub records: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_size_and_mime() {
        let payload = DetectionPayload::file("photo.jpg", vec![0u8; 1024]);
        assert_eq!(payload.size(), 1024);
        assert_eq!(payload.mime_type(), Some("image/jpeg"));
        assert_eq!(payload.task_type(), "image");

        let video = DetectionPayload::file("clip.mp4", vec![]);
        assert_eq!(video.task_type(), "video");

        let text = DetectionPayload::text("hello");
        assert_eq!(text.size(), 5);
        assert_eq!(text.task_type(), "text");
        assert_eq!(text.display_name(), "text-snippet.txt");
    }

    #[test]
    fn test_status_response_parses_service_shape() {
        let raw = json!({
            "task_id": "task_abc",
            "status": "processing",
            "progress": {"current": 40, "total": 100, "percentage": 40.0, "stage": "matching", "detail": "comparing"},
            "result": null,
            "error_message": null,
            "created_at": 1700000000.0
        });
        let parsed: TaskStatusResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.status, RemoteTaskStatus::Processing);
        let progress = parsed.progress.unwrap();
        assert_eq!(progress.percentage(), Some(40.0));
        assert_eq!(progress.stage.as_deref(), Some("matching"));
        assert!(parsed.result.is_none());
    }

    #[test]
    fn test_percentage_derived_from_current_total() {
        let progress = TaskProgressWire {
            current: Some(3.0),
            total: Some(4.0),
            ..Default::default()
        };
        assert_eq!(progress.percentage(), Some(75.0));

        let progress = TaskProgressWire {
            current: Some(3.0),
            total: Some(0.0),
            ..Default::default()
        };
        assert_eq!(progress.percentage(), None);
    }

    #[test]
    fn test_submit_response_without_id() {
        let parsed: TaskSubmitResponse = serde_json::from_value(json!({"success": true})).unwrap();
        assert!(parsed.task_id.is_none());
    }
}
