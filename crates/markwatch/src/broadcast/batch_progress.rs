//! Batch run events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::batch::BatchItemStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BatchEvent {
    /// A worker claimed an item.
    ItemStarted { item_id: String, worker: usize },
    /// An item reached `done` or `error`.
    ItemFinished {
        item_id: String,
        status: BatchItemStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Global progress after an item finished, in whole percent.
    Progress { percentage: u8, completed: usize, total: usize },
    /// Quota exhaustion stopped further claims.
    Aborted { reason: String },
    /// All workers exited.
    Finished { aborted: bool, percentage: u8 },
}

#[derive(Clone)]
pub struct BatchProgressBroadcaster {
    sender: Arc<broadcast::Sender<BatchEvent>>,
}

impl BatchProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: BatchEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for BatchProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = BatchEvent::Progress {
            percentage: 50,
            completed: 6,
            total: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percentage"], 50);
    }

    #[test]
    fn test_send_receive() {
        let broadcaster = BatchProgressBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        broadcaster.send(BatchEvent::Finished {
            aborted: false,
            percentage: 100,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            BatchEvent::Finished {
                aborted: false,
                percentage: 100
            }
        );
    }
}
