//! Single-job lifecycle: model, progress poller and dispatcher.

pub mod dispatcher;
pub mod model;
pub mod poller;

pub use dispatcher::{sync_detect, JobDispatcher, ResumedSession};
pub use model::{DetectionJob, JobMode, JobProgress, JobStatus};
pub use poller::{JobObserver, PollState, ProgressPoller};
