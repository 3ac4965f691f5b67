//! Crash/reload continuity for the single active job.

pub mod snapshot;
pub mod store;

pub use snapshot::{FileMeta, PreviewMeta, SessionSnapshot};
pub use store::{RestoreOutcome, SessionStore, SkipReason, SESSION_SLOT_KEY};
