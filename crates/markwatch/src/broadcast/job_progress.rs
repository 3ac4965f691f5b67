//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{JobProgress, JobStatus};

/// Progress event for a single detection job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Remote task id, or the local id for synchronous jobs.
    pub job_ref: String,
    /// Name of the file (or text snippet) being checked.
    pub filename: String,
    pub status: JobStatus,
    pub percentage: f64,
    pub stage: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    /// Whether a match was found (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_match: Option<bool>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_ref: &str, filename: &str, status: JobStatus, progress: &JobProgress) -> Self {
        Self {
            job_ref: job_ref.to_string(),
            filename: filename.to_string(),
            status,
            percentage: progress.percentage,
            stage: progress.stage.clone(),
            detail: progress.detail.clone(),
            timestamp: Utc::now(),
            has_match: None,
            error: None,
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker bound to one job.
    pub fn track(&self, job_ref: &str, filename: &str) -> JobProgressTracker {
        JobProgressTracker {
            job_ref: job_ref.to_string(),
            filename: filename.to_string(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
#[derive(Clone)]
pub struct JobProgressTracker {
    job_ref: String,
    filename: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn job_ref(&self) -> &str {
        &self.job_ref
    }

    /// Re-binds the tracker once the remote task id is known.
    pub fn rebind(&mut self, job_ref: &str) {
        self.job_ref = job_ref.to_string();
    }

    pub fn update(&self, status: JobStatus, progress: &JobProgress) {
        let event = JobProgressEvent::new(&self.job_ref, &self.filename, status, progress);
        let _ = self.sender.send(event);
    }

    pub fn completed(&self, progress: &JobProgress, has_match: bool) {
        let mut event =
            JobProgressEvent::new(&self.job_ref, &self.filename, JobStatus::Completed, progress);
        event.has_match = Some(has_match);
        let _ = self.sender.send(event);
    }

    pub fn failed(&self, progress: &JobProgress, error: &str) {
        let mut event =
            JobProgressEvent::new(&self.job_ref, &self.filename, JobStatus::Failed, progress);
        event.error = Some(error.to_string());
        let _ = self.sender.send(event);
    }

    pub fn cancelled(&self, progress: &JobProgress) {
        self.update(JobStatus::Cancelled, progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let progress = JobProgress {
            percentage: 40.0,
            stage: "matching".into(),
            detail: "comparing fingerprints".into(),
        };
        broadcaster.send(JobProgressEvent::new(
            "t1",
            "photo.png",
            JobStatus::Processing,
            &progress,
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_ref, "t1");
        assert_eq!(received.status, JobStatus::Processing);
        assert_eq!(received.percentage, 40.0);
    }

    #[test]
    fn test_tracker_completion_and_failure() {
        let broadcaster = JobProgressBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        let mut tracker = broadcaster.track("local-1", "doc.png");
        tracker.rebind("task_1");
        assert_eq!(tracker.job_ref(), "task_1");

        tracker.completed(&JobProgress::default(), true);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Completed);
        assert_eq!(received.has_match, Some(true));
        assert_eq!(received.job_ref, "task_1");

        tracker.failed(&JobProgress::default(), "service unavailable");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Failed);
        assert_eq!(received.error.as_deref(), Some("service unavailable"));
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobProgressBroadcaster::new(1);
        broadcaster.track("j", "f").cancelled(&JobProgress::default());
    }
}
