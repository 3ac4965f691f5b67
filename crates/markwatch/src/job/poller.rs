//! Progress poller: drives an asynchronous job to a terminal state by probing
//! the remote task status on a fixed interval.
//!
//! There is at most one probe loop per job id. Starting a poll for an id that
//! is already being polled replaces the running loop; existing subscribers
//! keep receiving updates through the same watch channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use super::model::JobProgress;
use crate::api::{DetectionService, RemoteTaskStatus, TaskStatusResponse};
use crate::error::DetectError;
use crate::result::DetectionResult;

const GENERIC_FAILURE_MESSAGE: &str = "Detection failed";

/// Observable state of a polled job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Submitted,
    Queued,
    Processing(JobProgress),
    Completed(DetectionResult),
    Failed(String),
    /// Failed because the usage allowance is depleted.
    QuotaExhausted(String),
    Cancelled,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Completed(_)
                | PollState::Failed(_)
                | PollState::QuotaExhausted(_)
                | PollState::Cancelled
        )
    }

    pub(crate) fn from_error(error: &DetectError) -> Self {
        if error.is_quota_exhausted() {
            PollState::QuotaExhausted(error.user_message())
        } else {
            PollState::Failed(error.user_message())
        }
    }
}

/// Receives every state change of a polled job, including terminal ones.
///
/// Called from the probe task, so implementations must not block.
pub trait JobObserver: Send + Sync {
    fn on_state(&self, job_id: &str, state: &PollState);
}

struct PollHandle {
    generation: u64,
    task: JoinHandle<()>,
    state: Arc<watch::Sender<PollState>>,
    observer: Arc<dyn JobObserver>,
}

type HandleMap = Arc<Mutex<HashMap<String, PollHandle>>>;

pub struct ProgressPoller {
    service: Arc<dyn DetectionService>,
    interval: Duration,
    handles: HandleMap,
    generation: AtomicU64,
}

impl ProgressPoller {
    pub fn new(service: Arc<dyn DetectionService>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            handles: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts polling `job_id`, stopping any loop already running for it.
    ///
    /// The first probe is issued immediately, then one per interval until a
    /// terminal state is observed. Must be called inside a tokio runtime.
    pub fn start(&self, job_id: &str, observer: Arc<dyn JobObserver>) -> watch::Receiver<PollState> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut handles = lock(&self.handles);

        let state = match handles.remove(job_id) {
            Some(previous) => {
                debug!("Restarting poll for job {}", job_id);
                previous.task.abort();
                previous.state
            }
            None => Arc::new(watch::channel(PollState::Submitted).0),
        };
        let receiver = state.subscribe();

        let seed = match &*state.borrow() {
            PollState::Processing(progress) => progress.clone(),
            _ => JobProgress::default(),
        };

        let probe_loop = ProbeLoop {
            service: Arc::clone(&self.service),
            job_id: job_id.to_string(),
            interval: self.interval,
            state: Arc::clone(&state),
            observer: Arc::clone(&observer),
            handles: Arc::clone(&self.handles),
            generation,
        };
        let span = tracing::info_span!("job.poll", job_id = %job_id, generation);
        let task = tokio::spawn(probe_loop.run(seed).instrument(span));

        handles.insert(
            job_id.to_string(),
            PollHandle {
                generation,
                task,
                state,
                observer,
            },
        );
        receiver
    }

    /// Stops the local probe loop without touching the remote job.
    /// Returns false if `job_id` was not being polled.
    pub fn stop(&self, job_id: &str) -> bool {
        match lock(&self.handles).remove(job_id) {
            Some(handle) => {
                handle.task.abort();
                debug!("Stopped polling job {}", job_id);
                true
            }
            None => false,
        }
    }

    /// Requests remote cancellation. On success the probe loop is stopped and
    /// subscribers observe [`PollState::Cancelled`]. If the remote call fails
    /// the loop keeps running so the real terminal state is still seen.
    pub async fn cancel(&self, job_id: &str) -> Result<(), DetectError> {
        if let Err(e) = self
            .service
            .cancel_task(job_id)
            .instrument(tracing::info_span!("job.cancel", job_id = %job_id))
            .await
        {
            warn!("Cancel request for job {} failed: {}", job_id, e);
            return Err(e);
        }

        let handle = lock(&self.handles).remove(job_id);
        if let Some(handle) = handle {
            handle.task.abort();
            // A probe may have landed a terminal state before the abort took effect.
            if !handle.state.borrow().is_terminal() {
                publish(&handle.state, handle.observer.as_ref(), job_id, PollState::Cancelled);
            }
        }
        info!("Cancelled job {}", job_id);
        Ok(())
    }

    /// A fresh receiver for a job that is currently being polled.
    pub fn subscribe(&self, job_id: &str) -> Option<watch::Receiver<PollState>> {
        lock(&self.handles).get(job_id).map(|h| h.state.subscribe())
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        lock(&self.handles).contains_key(job_id)
    }

    pub fn active_polls(&self) -> usize {
        lock(&self.handles).len()
    }

    pub fn stop_all(&self) {
        for (_, handle) in lock(&self.handles).drain() {
            handle.task.abort();
        }
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn lock(handles: &HandleMap) -> MutexGuard<'_, HashMap<String, PollHandle>> {
    match handles.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Poll handle map lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn publish(
    state: &watch::Sender<PollState>,
    observer: &dyn JobObserver,
    job_id: &str,
    next: PollState,
) {
    if *state.borrow() == next {
        return;
    }
    // Observer side effects land before any subscriber wakes.
    observer.on_state(job_id, &next);
    state.send_replace(next);
}

/// Maps one probe response onto the next state, folding any progress
/// reading into `progress`.
pub(crate) fn next_state(response: TaskStatusResponse, progress: &mut JobProgress) -> PollState {
    match response.status {
        RemoteTaskStatus::Pending | RemoteTaskStatus::Queued => PollState::Queued,
        RemoteTaskStatus::Processing => {
            if let Some(wire) = &response.progress {
                progress.advance(wire.percentage(), wire.stage.as_deref(), wire.detail.as_deref());
            }
            PollState::Processing(progress.clone())
        }
        RemoteTaskStatus::Completed => match response.result {
            Some(raw) => PollState::Completed(DetectionResult::normalize(raw)),
            None => PollState::Failed(
                DetectError::MalformedResponse("completed task carried no result".to_string())
                    .user_message(),
            ),
        },
        RemoteTaskStatus::Failed => PollState::Failed(
            response
                .error_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
        ),
        RemoteTaskStatus::Cancelled => PollState::Cancelled,
    }
}

struct ProbeLoop {
    service: Arc<dyn DetectionService>,
    job_id: String,
    interval: Duration,
    state: Arc<watch::Sender<PollState>>,
    observer: Arc<dyn JobObserver>,
    handles: HandleMap,
    generation: u64,
}

impl ProbeLoop {
    async fn run(self, mut progress: JobProgress) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let next = match self.service.get_task_status(&self.job_id).await {
                Ok(response) => next_state(response, &mut progress),
                Err(e) if e.is_retryable() => {
                    warn!("Status probe for job {} failed, retrying: {}", self.job_id, e);
                    continue;
                }
                Err(e) => {
                    warn!("Status probe for job {} was rejected: {}", self.job_id, e);
                    PollState::from_error(&e)
                }
            };

            let terminal = next.is_terminal();
            publish(&self.state, self.observer.as_ref(), &self.job_id, next);
            if terminal {
                break;
            }
        }

        let mut handles = lock(&self.handles);
        if handles
            .get(&self.job_id)
            .is_some_and(|h| h.generation == self.generation)
        {
            handles.remove(&self.job_id);
        }
        debug!("Polling finished for job {}", self.job_id);
    }
}
