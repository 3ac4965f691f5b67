//! Job dispatcher: picks the submission path for a payload and carries the
//! job to a terminal state, mirroring it into the session slot on the way.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tracing::Instrument;

use super::model::{DetectionJob, JobMode, JobStatus};
use super::poller::{JobObserver, PollState, ProgressPoller};
use crate::api::{DetectionPayload, DetectionService};
use crate::broadcast::{JobProgressBroadcaster, JobProgressTracker, NoticeBroadcaster, NoticeKind};
use crate::config::schema::DEFAULT_SYNC_THRESHOLD_BYTES;
use crate::error::{DetectError, StorageError};
use crate::history::HistoryReconciler;
use crate::identity::Identity;
use crate::result::DetectionResult;
use crate::session::{RestoreOutcome, SessionSnapshot, SessionStore};

/// Issues one blocking detection call and normalizes the result.
pub async fn sync_detect(
    service: &dyn DetectionService,
    payload: &DetectionPayload,
) -> Result<DetectionResult, DetectError> {
    let raw = service.detect_sync(payload).await?;
    Ok(DetectionResult::normalize(raw))
}

/// A session recovered after a restart.
pub struct ResumedSession {
    /// The UI-visible fields exactly as they were persisted.
    pub snapshot: SessionSnapshot,
    /// Live updates, present when the snapshot referenced a remote job.
    pub updates: Option<watch::Receiver<PollState>>,
}

/// Side effects shared by the dispatcher and its poll observers.
#[derive(Clone)]
struct Sinks {
    session: Arc<SessionStore>,
    history: Arc<HistoryReconciler>,
    identity: Identity,
    notices: NoticeBroadcaster,
}

impl Sinks {
    fn save_session(&self, snapshot: &SessionSnapshot) {
        if let Err(e) = self.session.save(snapshot) {
            warn!("Failed to save detection session: {}", e);
        }
    }

    fn clear_session(&self) {
        if let Err(e) = self.session.clear() {
            warn!("Failed to clear detection session: {}", e);
        }
    }

    fn record_history(&self, job: &DetectionJob) {
        let Some(result) = &job.result else {
            return;
        };
        if let Err(e) = self.history.record_detection(&self.identity, &job.filename, result) {
            error!("Failed to record history for {}: {}", job.filename, e);
        }
    }

    /// Emits the terminal event and notice for `job` and clears the slot.
    /// A quota failure gets the quota notice and upgrade prompt instead of
    /// a plain error.
    fn finish(&self, job: &DetectionJob, tracker: &JobProgressTracker, quota_exhausted: bool) {
        match job.status {
            JobStatus::Completed => {
                self.record_history(job);
                let has_match = job.result.as_ref().is_some_and(|r| r.has_match);
                tracker.completed(&job.progress, has_match);
                self.notices.notify(
                    NoticeKind::Completed,
                    &format!("Detection finished for {}", job.filename),
                    Some(job.reference()),
                );
            }
            JobStatus::Failed => {
                let message = job.error_message.as_deref().unwrap_or_default();
                tracker.failed(&job.progress, message);
                if quota_exhausted {
                    self.notices.quota_exhausted(message, Some(job.reference()));
                } else {
                    self.notices
                        .notify(NoticeKind::Error, message, Some(job.reference()));
                }
            }
            JobStatus::Cancelled => tracker.cancelled(&job.progress),
            _ => return,
        }
        self.clear_session();
    }
}

struct ActiveJob {
    job: DetectionJob,
    snapshot: SessionSnapshot,
}

/// Applies poll states to the active job, its session snapshot and the
/// progress stream.
struct ActiveJobObserver {
    sinks: Sinks,
    tracker: JobProgressTracker,
    active: Mutex<ActiveJob>,
}

impl ActiveJobObserver {
    fn new(sinks: Sinks, tracker: JobProgressTracker, job: DetectionJob, snapshot: SessionSnapshot) -> Self {
        Self {
            sinks,
            tracker,
            active: Mutex::new(ActiveJob { job, snapshot }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActiveJob> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn job(&self) -> DetectionJob {
        self.lock().job.clone()
    }
}

impl JobObserver for ActiveJobObserver {
    fn on_state(&self, job_id: &str, state: &PollState) {
        let mut active = self.lock();
        let ActiveJob { job, snapshot } = &mut *active;
        if job.status.is_terminal() {
            return;
        }

        match state {
            PollState::Submitted => return,
            PollState::Queued => job.status = JobStatus::Queued,
            PollState::Processing(progress) => {
                job.status = JobStatus::Processing;
                job.progress.advance(
                    Some(progress.percentage),
                    Some(&progress.stage),
                    Some(&progress.detail),
                );
            }
            PollState::Completed(result) => job.complete(result.clone()),
            PollState::Failed(message) | PollState::QuotaExhausted(message) => {
                job.fail(message.clone())
            }
            PollState::Cancelled => job.cancel(),
        }
        debug!("Job {} is now {}", job_id, job.status);

        snapshot.apply_job(job);
        if job.status.is_terminal() {
            let quota_exhausted = matches!(state, PollState::QuotaExhausted(_));
            self.sinks.finish(job, &self.tracker, quota_exhausted);
        } else {
            self.tracker.update(job.status, &job.progress);
            self.sinks.save_session(snapshot);
        }
    }
}

pub struct JobDispatcher {
    service: Arc<dyn DetectionService>,
    poller: Arc<ProgressPoller>,
    sinks: Sinks,
    progress: JobProgressBroadcaster,
    sync_threshold: u64,
}

impl JobDispatcher {
    pub fn new(
        service: Arc<dyn DetectionService>,
        poller: Arc<ProgressPoller>,
        session: Arc<SessionStore>,
        history: Arc<HistoryReconciler>,
        identity: Identity,
    ) -> Self {
        Self {
            service,
            poller,
            sinks: Sinks {
                session,
                history,
                identity,
                notices: NoticeBroadcaster::default(),
            },
            progress: JobProgressBroadcaster::default(),
            sync_threshold: DEFAULT_SYNC_THRESHOLD_BYTES,
        }
    }

    pub fn with_sync_threshold(mut self, bytes: u64) -> Self {
        self.sync_threshold = bytes;
        self
    }

    pub fn with_progress(mut self, progress: JobProgressBroadcaster) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_notices(mut self, notices: NoticeBroadcaster) -> Self {
        self.sinks.notices = notices;
        self
    }

    pub fn progress(&self) -> &JobProgressBroadcaster {
        &self.progress
    }

    pub fn notices(&self) -> &NoticeBroadcaster {
        &self.sinks.notices
    }

    pub fn identity(&self) -> &Identity {
        &self.sinks.identity
    }

    pub fn poller(&self) -> &Arc<ProgressPoller> {
        &self.poller
    }

    pub fn mode_for(&self, payload: &DetectionPayload) -> JobMode {
        JobMode::for_size(payload.size(), self.sync_threshold)
    }

    /// Runs `payload` to a terminal state and returns the finished job.
    ///
    /// Once an asynchronous job has been handed to the poller, dropping this
    /// future only stops observing: polling, history recording and session
    /// cleanup continue in the background.
    pub async fn dispatch(&self, payload: DetectionPayload) -> DetectionJob {
        let mode = self.mode_for(&payload);
        let filename = payload.display_name();
        let span = tracing::info_span!("job.dispatch", filename = %filename, ?mode, size = payload.size());

        async {
            info!("Dispatching {} ({} bytes, {:?})", filename, payload.size(), mode);
            let job = DetectionJob::new(mode, &filename);
            let snapshot = SessionSnapshot::for_submission(&payload, mode);
            self.sinks.save_session(&snapshot);

            let tracker = self.progress.track(job.reference(), &filename);
            tracker.update(job.status, &job.progress);

            match mode {
                JobMode::Sync => self.run_sync(job, &payload, tracker).await,
                JobMode::Async => self.run_async(job, snapshot, &payload, tracker).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn run_sync(
        &self,
        mut job: DetectionJob,
        payload: &DetectionPayload,
        tracker: JobProgressTracker,
    ) -> DetectionJob {
        match sync_detect(self.service.as_ref(), payload).await {
            Ok(result) => {
                job.complete(result);
                self.sinks.finish(&job, &tracker, false);
            }
            Err(e) => self.fail(&mut job, &e, &tracker),
        }
        job
    }

    async fn run_async(
        &self,
        mut job: DetectionJob,
        mut snapshot: SessionSnapshot,
        payload: &DetectionPayload,
        mut tracker: JobProgressTracker,
    ) -> DetectionJob {
        let task_id = match self.service.submit_async_task(payload).await {
            Ok(response) => response.task_id.filter(|id| !id.trim().is_empty()),
            Err(e) => {
                self.fail(&mut job, &e, &tracker);
                return job;
            }
        };
        let Some(task_id) = task_id else {
            let e = DetectError::MalformedResponse("submit response carried no task id".to_string());
            self.fail(&mut job, &e, &tracker);
            return job;
        };

        info!("Submitted {} as task {}", job.filename, task_id);
        job.id = Some(task_id.clone());
        tracker.rebind(&task_id);
        snapshot.apply_job(&job);
        self.sinks.save_session(&snapshot);

        let observer = Arc::new(ActiveJobObserver::new(
            self.sinks.clone(),
            tracker,
            job,
            snapshot,
        ));
        let mut updates = self.poller.start(&task_id, observer.clone());
        if updates.wait_for(PollState::is_terminal).await.is_err() {
            warn!("Polling for task {} stopped before a terminal state", task_id);
        }
        observer.job()
    }

    fn fail(&self, job: &mut DetectionJob, error: &DetectError, tracker: &JobProgressTracker) {
        warn!("Detection of {} failed: {}", job.filename, error);
        job.fail(error.user_message());
        tracker.failed(&job.progress, &error.user_message());
        self.sinks.notices.failure(error, Some(job.reference()));
        self.sinks.clear_session();
    }

    /// Restores the persisted session, if any, and resumes polling its job.
    pub fn resume(&self) -> Result<Option<ResumedSession>, StorageError> {
        let snapshot = match self.sinks.session.restore()? {
            RestoreOutcome::Restored(snapshot) => snapshot,
            RestoreOutcome::Nothing(reason) => {
                debug!("No detection session to resume ({:?})", reason);
                return Ok(None);
            }
        };

        let updates = snapshot.job_id.clone().map(|job_id| {
            let filename = snapshot
                .file_meta
                .as_ref()
                .map(|m| m.name.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let mut job = DetectionJob::new(JobMode::Async, &filename);
            job.id = Some(job_id.clone());
            let tracker = self.progress.track(&job_id, &filename);

            info!("Resuming poll for task {}", job_id);
            let observer = Arc::new(ActiveJobObserver::new(
                self.sinks.clone(),
                tracker,
                job,
                snapshot.clone(),
            ));
            self.poller.start(&job_id, observer)
        });

        Ok(Some(ResumedSession { snapshot, updates }))
    }

    /// Cancels a remote job. On failure the job keeps being polled.
    pub async fn cancel(&self, job_id: &str) -> Result<(), DetectError> {
        self.poller.cancel(job_id).await
    }
}
