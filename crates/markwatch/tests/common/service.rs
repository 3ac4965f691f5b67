//! Scripted detection service.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use markwatch::api::{
    DetectionPayload, DetectionService, HistoryResponse, RemoteTaskStatus, TaskProgressWire,
    TaskStatusResponse, TaskSubmitResponse,
};
use markwatch::DetectError;

/// Canned response for one payload name.
#[derive(Clone)]
struct SyncScript {
    delay: Option<Duration>,
    response: Result<Value, DetectError>,
}

#[derive(Default)]
pub struct ScriptedService {
    task_ids: Mutex<VecDeque<Option<String>>>,
    statuses: Mutex<HashMap<String, VecDeque<TaskStatusResponse>>>,
    sync_scripts: Mutex<HashMap<String, SyncScript>>,
    sync_delay: Mutex<Duration>,
    history: Mutex<Vec<Value>>,
    cancelled: Mutex<Vec<String>>,
    submits: AtomicUsize,
    sync_calls: AtomicUsize,
    probes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_task(&self, task_id: &str) {
        self.task_ids
            .lock()
            .unwrap()
            .push_back(Some(task_id.to_string()));
    }

    pub fn reject_task_without_id(&self) {
        self.task_ids.lock().unwrap().push_back(None);
    }

    pub fn push_status(&self, task_id: &str, response: TaskStatusResponse) {
        self.statuses
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn sync_delay(&self, delay: Duration) {
        *self.sync_delay.lock().unwrap() = delay;
    }

    /// Answers detections of `name` immediately with `response`.
    pub fn sync_response(&self, name: &str, response: Result<Value, DetectError>) {
        self.sync_scripts.lock().unwrap().insert(
            name.to_string(),
            SyncScript {
                delay: Some(Duration::ZERO),
                response,
            },
        );
    }

    pub fn set_history(&self, records: Vec<Value>) {
        *self.history.lock().unwrap() = records;
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

pub fn processing(percentage: f64, stage: &str) -> TaskStatusResponse {
    TaskStatusResponse {
        status: RemoteTaskStatus::Processing,
        progress: Some(TaskProgressWire {
            percentage: Some(percentage),
            stage: Some(stage.to_string()),
            ..Default::default()
        }),
        result: None,
        error_message: None,
    }
}

pub fn completed(result: Value) -> TaskStatusResponse {
    TaskStatusResponse {
        status: RemoteTaskStatus::Completed,
        progress: None,
        result: Some(result),
        error_message: None,
    }
}

fn queued() -> TaskStatusResponse {
    TaskStatusResponse {
        status: RemoteTaskStatus::Queued,
        progress: None,
        result: None,
        error_message: None,
    }
}

#[async_trait]
impl DetectionService for ScriptedService {
    async fn submit_async_task(
        &self,
        _payload: &DetectionPayload,
    ) -> Result<TaskSubmitResponse, DetectError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        let task_id = self
            .task_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Some(format!("task-{}", n)));
        Ok(TaskSubmitResponse { task_id })
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatusResponse, DetectError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let next = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(VecDeque::pop_front);
        Ok(next.unwrap_or_else(queued))
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), DetectError> {
        self.cancelled.lock().unwrap().push(task_id.to_string());
        Ok(())
    }

    async fn detect_sync(&self, payload: &DetectionPayload) -> Result<Value, DetectError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .sync_scripts
            .lock()
            .unwrap()
            .get(&payload.display_name())
            .cloned();
        let delay = script
            .as_ref()
            .and_then(|s| s.delay)
            .unwrap_or_else(|| *self.sync_delay.lock().unwrap());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match script {
            Some(script) => script.response,
            None => Ok(json!({"has_watermark": true, "confidence": 0.87})),
        }
    }

    async fn fetch_history(&self, limit: usize) -> Result<HistoryResponse, DetectError> {
        let records = self
            .history
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect();
        Ok(HistoryResponse { records })
    }
}
