//! Scripted service double for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{
    DetectionPayload, DetectionService, HistoryResponse, RemoteTaskStatus, TaskStatusResponse,
    TaskSubmitResponse,
};
use crate::error::DetectError;
use crate::job::{JobObserver, PollState};

type Scripted<T> = Result<T, DetectError>;

#[derive(Default)]
pub struct FakeService {
    submits: Mutex<VecDeque<Scripted<TaskSubmitResponse>>>,
    statuses: Mutex<HashMap<String, VecDeque<Scripted<TaskStatusResponse>>>>,
    probes: Mutex<HashMap<String, usize>>,
    syncs: Mutex<VecDeque<Scripted<Value>>>,
    syncs_by_name: Mutex<HashMap<String, Scripted<Value>>>,
    sync_delay: Mutex<Duration>,
    sync_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancel_error: Mutex<Option<DetectError>>,
    cancelled: Mutex<Vec<String>>,
    history: Mutex<Vec<Value>>,
    next_task: AtomicUsize,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_submit(&self, response: Scripted<TaskSubmitResponse>) {
        self.submits.lock().unwrap().push_back(response);
    }

    /// Queues a probe response. With the queue empty, probes report `queued`.
    pub fn push_status(&self, task_id: &str, response: Scripted<TaskStatusResponse>) {
        self.statuses
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn push_sync(&self, response: Scripted<Value>) {
        self.syncs.lock().unwrap().push_back(response);
    }

    /// Fixes the synchronous response for one payload name.
    pub fn script_sync(&self, name: &str, response: Scripted<Value>) {
        self.syncs_by_name
            .lock()
            .unwrap()
            .insert(name.to_string(), response);
    }

    pub fn set_sync_delay(&self, delay: Duration) {
        *self.sync_delay.lock().unwrap() = delay;
    }

    pub fn fail_cancel(&self, error: DetectError) {
        *self.cancel_error.lock().unwrap() = Some(error);
    }

    pub fn set_history(&self, records: Vec<Value>) {
        *self.history.lock().unwrap() = records;
    }

    pub fn status_probes(&self, task_id: &str) -> usize {
        self.probes.lock().unwrap().get(task_id).copied().unwrap_or(0)
    }

    pub fn status_probes_total(&self) -> usize {
        self.probes.lock().unwrap().values().sum()
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl DetectionService for FakeService {
    async fn submit_async_task(
        &self,
        _payload: &DetectionPayload,
    ) -> Result<TaskSubmitResponse, DetectError> {
        if let Some(response) = self.submits.lock().unwrap().pop_front() {
            return response;
        }
        let n = self.next_task.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TaskSubmitResponse {
            task_id: Some(format!("task-{}", n)),
        })
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatusResponse, DetectError> {
        *self
            .probes
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default() += 1;
        let scripted = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or(Ok(TaskStatusResponse {
            status: RemoteTaskStatus::Queued,
            progress: None,
            result: None,
            error_message: None,
        }))
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), DetectError> {
        if let Some(e) = self.cancel_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.cancelled.lock().unwrap().push(task_id.to_string());
        Ok(())
    }

    async fn detect_sync(&self, payload: &DetectionPayload) -> Result<Value, DetectError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.sync_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let by_name = self
            .syncs_by_name
            .lock()
            .unwrap()
            .get(&payload.display_name())
            .cloned();
        if let Some(response) = by_name {
            return response;
        }
        let queued = self.syncs.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(json!({"has_watermark": false, "confidence": 0.1})))
    }

    async fn fetch_history(&self, limit: usize) -> Result<HistoryResponse, DetectError> {
        let records = self.history.lock().unwrap().iter().take(limit).cloned().collect();
        Ok(HistoryResponse { records })
    }
}

/// Collects every state it is shown.
#[derive(Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<PollState>>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<PollState> {
        self.states.lock().unwrap().clone()
    }
}

impl JobObserver for RecordingObserver {
    fn on_state(&self, _job_id: &str, state: &PollState) {
        self.states.lock().unwrap().push(state.clone());
    }
}
