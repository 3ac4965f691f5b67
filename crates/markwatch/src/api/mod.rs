//! The remote detection service surface.

pub mod http;
pub mod types;

pub use http::HttpDetectionService;
pub use types::{
    DetectionPayload, HistoryResponse, RemoteTaskStatus, TaskProgressWire, TaskStatusResponse,
    TaskSubmitResponse,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DetectError;

/// Operations consumed from the detection service.
///
/// Every call is a suspension point; implementations must be usable from a
/// single cooperative runtime without blocking it.
#[async_trait]
pub trait DetectionService: Send + Sync {
    /// Submits a payload for asynchronous processing.
    async fn submit_async_task(
        &self,
        payload: &DetectionPayload,
    ) -> Result<TaskSubmitResponse, DetectError>;

    /// Probes the current state of an asynchronous task.
    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatusResponse, DetectError>;

    /// Asks the service to cancel an asynchronous task.
    async fn cancel_task(&self, task_id: &str) -> Result<(), DetectError>;

    /// Runs a detection in a single blocking call and returns the raw result.
    async fn detect_sync(&self, payload: &DetectionPayload) -> Result<Value, DetectError>;

    /// Fetches the caller's most recent remote history records.
    async fn fetch_history(&self, limit: usize) -> Result<HistoryResponse, DetectError>;
}
