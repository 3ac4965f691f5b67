use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::DetectionPayload;
use crate::result::DetectionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl BatchItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchItemStatus::Done | BatchItemStatus::Error)
    }
}

/// One file inside a batch run.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub payload: Arc<DetectionPayload>,
    pub status: BatchItemStatus,
    pub result: Option<DetectionResult>,
    pub error_message: Option<String>,
}

impl BatchItem {
    pub fn new(payload: DetectionPayload) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), payload)
    }

    pub fn with_id(id: impl Into<String>, payload: DetectionPayload) -> Self {
        Self {
            id: id.into(),
            payload: Arc::new(payload),
            status: BatchItemStatus::Pending,
            result: None,
            error_message: None,
        }
    }

    pub fn filename(&self) -> String {
        self.payload.display_name()
    }

    /// Items that already succeeded are never picked up again.
    pub fn is_candidate(&self) -> bool {
        self.status != BatchItemStatus::Done
    }

    /// Marks the item as claimed. Returns false for a finished item.
    pub(crate) fn start(&mut self) -> bool {
        if self.status == BatchItemStatus::Done {
            return false;
        }
        self.status = BatchItemStatus::Processing;
        self.error_message = None;
        true
    }

    pub(crate) fn succeed(&mut self, result: DetectionResult) {
        self.status = BatchItemStatus::Done;
        self.result = Some(result);
        self.error_message = None;
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.status = BatchItemStatus::Error;
        self.result = None;
        self.error_message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_done_item_is_never_restarted() {
        let mut item = BatchItem::with_id("1", DetectionPayload::file("a.png", vec![1]));
        assert!(item.is_candidate());
        assert!(item.start());
        item.succeed(DetectionResult::normalize(json!({"has_watermark": true})));
        assert!(!item.is_candidate());
        assert!(!item.start());
        assert_eq!(item.status, BatchItemStatus::Done);
    }

    #[test]
    fn test_error_item_can_be_retried() {
        let mut item = BatchItem::new(DetectionPayload::file("b.png", vec![1]));
        item.start();
        item.fail("boom");
        assert!(item.status.is_terminal());
        assert!(item.is_candidate());
        assert!(item.start());
        assert!(item.error_message.is_none());
    }
}
