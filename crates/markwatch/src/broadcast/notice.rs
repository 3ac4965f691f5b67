//! User-visible notifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::DetectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Completed,
    Error,
    /// Inline notice that the usage allowance is depleted.
    QuotaExhausted,
    /// Prompt to move to a larger plan; always follows a quota notice.
    UpgradePrompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NoticeBroadcaster {
    sender: Arc<broadcast::Sender<Notice>>,
}

impl NoticeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    pub fn notify(&self, kind: NoticeKind, message: &str, job_ref: Option<&str>) {
        let _ = self.sender.send(Notice {
            kind,
            message: message.to_string(),
            job_ref: job_ref.map(str::to_string),
            timestamp: Utc::now(),
        });
    }

    /// Quota exhaustion: one inline notice, then one upgrade prompt.
    pub fn quota_exhausted(&self, message: &str, job_ref: Option<&str>) {
        self.notify(NoticeKind::QuotaExhausted, message, job_ref);
        self.notify(
            NoticeKind::UpgradePrompt,
            "Upgrade your plan to continue detecting",
            job_ref,
        );
    }

    /// Reports a terminal failure with exactly one notice (or the quota pair).
    pub fn failure(&self, error: &DetectError, job_ref: Option<&str>) {
        if error.is_quota_exhausted() {
            self.quota_exhausted(&error.user_message(), job_ref);
        } else {
            self.notify(NoticeKind::Error, &error.user_message(), job_ref);
        }
    }
}

impl Default for NoticeBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
