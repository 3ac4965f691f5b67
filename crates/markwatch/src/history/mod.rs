//! Identity-scoped detection history.

pub mod reconciler;
pub mod record;

pub use reconciler::{HistoryLimits, HistoryReconciler};
pub use record::{DedupKey, HistoryRecord, Origin};
