//! Batch scheduler.
//!
//! `W` workers share one cursor over the candidate list. Each worker claims
//! the next index, runs the synchronous detection path on it and records the
//! outcome, until the candidates run out or the abort flag is raised. The
//! workers are futures joined on the caller's task, so at most `W` remote
//! calls are outstanding at any time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::join_all;
use log::{error, info, warn};
use tracing::Instrument;

use super::item::{BatchItem, BatchItemStatus};
use crate::api::DetectionService;
use crate::broadcast::{BatchEvent, BatchProgressBroadcaster, NoticeBroadcaster};
use crate::history::HistoryReconciler;
use crate::identity::Identity;
use crate::job::sync_detect;

pub const DEFAULT_BATCH_WIDTH: usize = 5;

/// Outcome of a batch run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    pub aborted: bool,
    /// Global progress in whole percent.
    pub progress: u8,
    /// Candidates that reached `done` or `error` during the run.
    pub completed: usize,
    pub total: usize,
}

impl BatchReport {
    pub fn count(&self, status: BatchItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }
}

fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

/// Shared state of one run.
struct BatchRun {
    items: Mutex<Vec<BatchItem>>,
    candidates: Vec<usize>,
    cursor: AtomicUsize,
    abort: AtomicBool,
    completed: AtomicUsize,
}

impl BatchRun {
    fn items(&self) -> MutexGuard<'_, Vec<BatchItem>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claims the next candidate, or `None` once the run is exhausted or aborted.
    fn claim(&self) -> Option<usize> {
        if self.abort.load(Ordering::Acquire) {
            return None;
        }
        let slot = self.cursor.fetch_add(1, Ordering::AcqRel);
        self.candidates.get(slot).copied()
    }

    fn into_items(self) -> Vec<BatchItem> {
        match self.items.into_inner() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct BatchScheduler {
    service: Arc<dyn DetectionService>,
    history: Arc<HistoryReconciler>,
    identity: Identity,
    width: usize,
    events: BatchProgressBroadcaster,
    notices: NoticeBroadcaster,
}

impl BatchScheduler {
    pub fn new(
        service: Arc<dyn DetectionService>,
        history: Arc<HistoryReconciler>,
        identity: Identity,
    ) -> Self {
        Self {
            service,
            history,
            identity,
            width: DEFAULT_BATCH_WIDTH,
            events: BatchProgressBroadcaster::default(),
            notices: NoticeBroadcaster::default(),
        }
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(1);
        self
    }

    pub fn with_events(mut self, events: BatchProgressBroadcaster) -> Self {
        self.events = events;
        self
    }

    pub fn with_notices(mut self, notices: NoticeBroadcaster) -> Self {
        self.notices = notices;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn events(&self) -> &BatchProgressBroadcaster {
        &self.events
    }

    pub fn notices(&self) -> &NoticeBroadcaster {
        &self.notices
    }

    /// Runs every item whose status is not `done`.
    pub async fn run(&self, items: Vec<BatchItem>) -> BatchReport {
        let candidates: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_candidate())
            .map(|(index, _)| index)
            .collect();
        let total = candidates.len();

        if total == 0 {
            self.events.send(BatchEvent::Finished {
                aborted: false,
                percentage: 100,
            });
            return BatchReport {
                items,
                aborted: false,
                progress: 100,
                completed: 0,
                total: 0,
            };
        }

        let width = self.width.min(total);
        let span = tracing::info_span!("batch.run", total, width);
        info!("Starting batch of {} items with {} workers", total, width);

        let run = BatchRun {
            items: Mutex::new(items),
            candidates,
            cursor: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
        };

        join_all((0..width).map(|worker| self.work(worker, &run, total)))
            .instrument(span)
            .await;

        let aborted = run.abort.load(Ordering::Acquire);
        let completed = run.completed.load(Ordering::Acquire);
        let progress = if aborted {
            percentage(completed, total)
        } else {
            100
        };
        self.events.send(BatchEvent::Finished {
            aborted,
            percentage: progress,
        });
        info!(
            "Batch finished: {}/{} items completed{}",
            completed,
            total,
            if aborted { " (aborted)" } else { "" }
        );

        BatchReport {
            items: run.into_items(),
            aborted,
            progress,
            completed,
            total,
        }
    }

    async fn work(&self, worker: usize, run: &BatchRun, total: usize) {
        while let Some(index) = run.claim() {
            let claimed = {
                let mut items = run.items();
                let item = &mut items[index];
                item.start().then(|| (item.id.clone(), Arc::clone(&item.payload)))
            };
            let Some((item_id, payload)) = claimed else {
                continue;
            };
            self.events.send(BatchEvent::ItemStarted {
                item_id: item_id.clone(),
                worker,
            });

            let outcome = sync_detect(self.service.as_ref(), &payload).await;

            let (status, message) = match outcome {
                Ok(result) => {
                    let filename = payload.display_name();
                    if let Err(e) = self.history.record_detection(&self.identity, &filename, &result) {
                        error!("Failed to record history for {}: {}", filename, e);
                    }
                    run.items()[index].succeed(result);
                    (BatchItemStatus::Done, None)
                }
                Err(e) => {
                    let message = e.user_message();
                    warn!("Batch item {} failed: {}", item_id, e);
                    if e.is_quota_exhausted() && !run.abort.swap(true, Ordering::AcqRel) {
                        self.notices.quota_exhausted(&message, Some(&item_id));
                        self.events.send(BatchEvent::Aborted {
                            reason: message.clone(),
                        });
                    }
                    run.items()[index].fail(message.clone());
                    (BatchItemStatus::Error, Some(message))
                }
            };

            let completed = run.completed.fetch_add(1, Ordering::AcqRel) + 1;
            self.events.send(BatchEvent::ItemFinished {
                item_id,
                status,
                error: message,
            });
            self.events.send(BatchEvent::Progress {
                percentage: percentage(completed, total),
                completed,
                total,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DetectionPayload;
    use crate::error::DetectError;
    use crate::history::HistoryLimits;
    use crate::storage::MemoryStore;
    use crate::testing::FakeService;
    use serde_json::json;
    use std::time::Duration;

    fn scheduler(service: Arc<FakeService>, width: usize) -> (BatchScheduler, Arc<HistoryReconciler>) {
        let history = Arc::new(HistoryReconciler::new(
            Arc::new(MemoryStore::new()),
            HistoryLimits {
                local_cap: 100,
                cloud_fetch_limit: 100,
            },
        ));
        let scheduler =
            BatchScheduler::new(service, history.clone(), Identity::User("u".into())).with_width(width);
        (scheduler, history)
    }

    fn items(n: usize) -> Vec<BatchItem> {
        (1..=n)
            .map(|i| BatchItem::with_id(i.to_string(), DetectionPayload::file(format!("{}.png", i), vec![0; 8])))
            .collect()
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(0, 3), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(0, 0), 100);
    }

    #[tokio::test]
    async fn test_empty_batch_is_complete() {
        let (scheduler, _) = scheduler(Arc::new(FakeService::new()), 5);
        let report = scheduler.run(Vec::new()).await;
        assert_eq!(report.progress, 100);
        assert!(!report.aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_items_are_skipped() {
        let service = Arc::new(FakeService::new());
        let (scheduler, history) = scheduler(service.clone(), 5);
        let mut batch = items(3);
        batch[0].start();
        batch[0].succeed(crate::result::DetectionResult::normalize(json!({})));

        let report = scheduler.run(batch).await;
        assert_eq!(report.total, 2);
        assert_eq!(report.count(BatchItemStatus::Done), 3);
        assert_eq!(service.sync_calls(), 2);
        assert_eq!(history.list(&Identity::User("u".into())).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_width_is_clamped_to_total() {
        let service = Arc::new(FakeService::new());
        service.set_sync_delay(Duration::from_millis(100));
        let (scheduler, _) = scheduler(service.clone(), 5);

        let report = scheduler.run(items(2)).await;
        assert_eq!(report.count(BatchItemStatus::Done), 2);
        assert_eq!(service.max_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_errors_do_not_stop_batch() {
        let service = Arc::new(FakeService::new());
        service.set_sync_delay(Duration::from_millis(50));
        service.script_sync("2.png", Err(DetectError::from_status(500, "bad image")));
        let (scheduler, _) = scheduler(service.clone(), 2);
        let mut events = scheduler.events().subscribe();

        let report = scheduler.run(items(4)).await;
        assert!(!report.aborted);
        assert_eq!(report.progress, 100);
        assert_eq!(report.count(BatchItemStatus::Done), 3);
        assert_eq!(report.items[1].error_message.as_deref(), Some("bad image"));

        let mut last = 0u8;
        while let Ok(event) = events.try_recv() {
            if let BatchEvent::Progress { percentage, .. } = event {
                assert!(percentage >= last);
                last = percentage;
            }
        }
        assert_eq!(last, 100);
    }
}
