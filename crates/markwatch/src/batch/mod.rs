//! Bounded-width batch detection with cooperative abort on quota exhaustion.

pub mod item;
pub mod scheduler;

pub use item::{BatchItem, BatchItemStatus};
pub use scheduler::{BatchReport, BatchScheduler, DEFAULT_BATCH_WIDTH};
