pub mod api;
pub mod batch;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod history;
pub mod identity;
pub mod job;
pub mod orchestrator;
pub mod plan;
pub mod result;
pub mod session;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use api::{DetectionPayload, DetectionService, HttpDetectionService};
pub use batch::{BatchItem, BatchItemStatus, BatchReport, BatchScheduler};
pub use broadcast::{
    BatchEvent, BatchProgressBroadcaster, JobProgressBroadcaster, JobProgressEvent, Notice,
    NoticeBroadcaster, NoticeKind,
};
pub use config::{load_config, ClientConfig, PlanConfig};
pub use error::{ConfigError, DetectError, MarkwatchError, Result, StorageError};
pub use history::{HistoryLimits, HistoryReconciler, HistoryRecord, Origin};
pub use identity::Identity;
pub use job::{DetectionJob, JobDispatcher, JobMode, JobStatus, PollState, ProgressPoller};
pub use orchestrator::Orchestrator;
pub use plan::{PlanLimits, PlanPolicy, StaticPlanPolicy};
pub use result::{DetectionResult, MatchedAsset};
pub use session::{RestoreOutcome, SessionSnapshot, SessionStore, SkipReason};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use telemetry::init_tracing;
