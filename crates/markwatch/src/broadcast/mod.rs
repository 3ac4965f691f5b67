//! Broadcasting modules for real-time event streaming.
//!
//! Embedding applications subscribe to these to drive progress UI and
//! notifications; nothing in the orchestrator blocks on a subscriber.

pub mod batch_progress;
pub mod job_progress;
pub mod notice;

pub use batch_progress::{BatchEvent, BatchProgressBroadcaster};
pub use job_progress::{JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
pub use notice::{Notice, NoticeBroadcaster, NoticeKind};
