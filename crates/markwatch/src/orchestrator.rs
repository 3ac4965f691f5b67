//! Facade wiring configuration, identity, stores and the job components.

use std::sync::Arc;

use log::info;
use secrecy::{ExposeSecret, SecretString};

use crate::api::{DetectionPayload, DetectionService, HttpDetectionService};
use crate::batch::{BatchItem, BatchReport, BatchScheduler};
use crate::broadcast::{BatchProgressBroadcaster, JobProgressBroadcaster, NoticeBroadcaster};
use crate::config::ClientConfig;
use crate::error::{DetectError, MarkwatchError, StorageError};
use crate::history::{HistoryReconciler, HistoryRecord};
use crate::identity::Identity;
use crate::job::{DetectionJob, JobDispatcher, ProgressPoller, ResumedSession};
use crate::plan::{PlanLimits, PlanPolicy, StaticPlanPolicy};
use crate::session::SessionStore;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};

pub struct Orchestrator {
    config: ClientConfig,
    identity: Identity,
    plan: PlanLimits,
    service: Arc<dyn DetectionService>,
    history: Arc<HistoryReconciler>,
    session: Arc<SessionStore>,
    dispatcher: JobDispatcher,
    batch: BatchScheduler,
}

impl Orchestrator {
    /// Builds an orchestrator talking to the HTTP service.
    ///
    /// State is kept under the configured data directory, or in memory when
    /// no directory can be determined.
    pub fn new(
        config: ClientConfig,
        credential: Option<SecretString>,
        plan_tier: &str,
    ) -> Result<Self, MarkwatchError> {
        let identity = Identity::resolve(credential.as_ref().map(|c| c.expose_secret()));
        let service: Arc<dyn DetectionService> =
            Arc::new(HttpDetectionService::new(&config, credential)?);

        let store: Arc<dyn KeyValueStore> = match config.resolved_data_dir() {
            Some(dir) => {
                info!("Using data directory {}", dir.display());
                Arc::new(FileStore::new(dir))
            }
            None => {
                log::warn!("No data directory available, state will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let policy = StaticPlanPolicy::from_config(&config);
        Ok(Self::with_parts(config, identity, service, store, &policy, plan_tier))
    }

    /// Builds an orchestrator from explicit parts.
    pub fn with_parts(
        config: ClientConfig,
        identity: Identity,
        service: Arc<dyn DetectionService>,
        store: Arc<dyn KeyValueStore>,
        policy: &dyn PlanPolicy,
        plan_tier: &str,
    ) -> Self {
        let plan = policy.limits(plan_tier);
        let history = Arc::new(HistoryReconciler::new(
            Arc::clone(&store),
            plan.history_limits(),
        ));
        let session = Arc::new(SessionStore::new(store, config.session_ttl()));
        let poller = Arc::new(ProgressPoller::new(
            Arc::clone(&service),
            config.poll_interval(),
        ));
        let notices = NoticeBroadcaster::default();

        let dispatcher = JobDispatcher::new(
            Arc::clone(&service),
            poller,
            Arc::clone(&session),
            Arc::clone(&history),
            identity.clone(),
        )
        .with_sync_threshold(config.sync_threshold_bytes)
        .with_progress(JobProgressBroadcaster::default())
        .with_notices(notices.clone());

        let batch = BatchScheduler::new(Arc::clone(&service), Arc::clone(&history), identity.clone())
            .with_width(config.batch_width)
            .with_events(BatchProgressBroadcaster::default())
            .with_notices(notices);

        info!(
            "Orchestrator ready for {} (history cap {}, batch width {})",
            identity.storage_key(),
            plan.local_history_cap,
            batch.width()
        );

        Self {
            config,
            identity,
            plan,
            service,
            history,
            session,
            dispatcher,
            batch,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn plan(&self) -> &PlanLimits {
        &self.plan
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn progress(&self) -> &JobProgressBroadcaster {
        self.dispatcher.progress()
    }

    pub fn batch_events(&self) -> &BatchProgressBroadcaster {
        self.batch.events()
    }

    pub fn notices(&self) -> &NoticeBroadcaster {
        self.dispatcher.notices()
    }

    /// Applies a new plan tier. The history cap takes effect on the next write.
    pub fn set_plan(&mut self, policy: &dyn PlanPolicy, plan_tier: &str) {
        self.plan = policy.limits(plan_tier);
        self.history.set_limits(self.plan.history_limits());
    }

    pub async fn detect(&self, payload: DetectionPayload) -> DetectionJob {
        self.dispatcher.dispatch(payload).await
    }

    pub async fn run_batch(&self, items: Vec<BatchItem>) -> BatchReport {
        self.batch.run(items).await
    }

    /// Recovers the session saved before a restart, resuming its poll.
    pub fn resume(&self) -> Result<Option<ResumedSession>, StorageError> {
        self.dispatcher.resume()
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), DetectError> {
        self.dispatcher.cancel(job_id).await
    }

    pub fn history(&self) -> Result<Vec<HistoryRecord>, StorageError> {
        self.history.list(&self.identity)
    }

    pub async fn sync_history(&self) -> Result<Vec<HistoryRecord>, MarkwatchError> {
        self.history
            .sync_remote(&self.identity, self.service.as_ref())
            .await
    }

    pub fn clear_history(&self) -> Result<(), StorageError> {
        self.history.clear(&self.identity)
    }
}
