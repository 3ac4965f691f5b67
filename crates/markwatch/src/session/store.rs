use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::snapshot::SessionSnapshot;
use crate::error::StorageError;
use crate::storage::{get_json, set_json, KeyValueStore};

/// Single slot holding the active job's snapshot.
pub const SESSION_SLOT_KEY: &str = "markwatch.detect_session";

/// Why a restore produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Stale,
    AlreadyCompleted,
    Corrupt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Nothing(SkipReason),
    Restored(SessionSnapshot),
}

impl RestoreOutcome {
    pub fn snapshot(&self) -> Option<&SessionSnapshot> {
        match self {
            RestoreOutcome::Restored(snapshot) => Some(snapshot),
            RestoreOutcome::Nothing(_) => None,
        }
    }
}

pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persists `snapshot`, stamping it with the current time.
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let mut stamped = snapshot.clone();
        stamped.saved_at = Utc::now();
        set_json(self.store.as_ref(), SESSION_SLOT_KEY, &stamped)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(SESSION_SLOT_KEY)
    }

    pub fn restore(&self) -> Result<RestoreOutcome, StorageError> {
        self.restore_at(Utc::now())
    }

    /// Loads the snapshot as of `now`. Stale, finished and unreadable
    /// snapshots are discarded and the slot is cleared. The restored snapshot
    /// is returned exactly as persisted.
    pub fn restore_at(&self, now: DateTime<Utc>) -> Result<RestoreOutcome, StorageError> {
        if self.store.get(SESSION_SLOT_KEY)?.is_none() {
            return Ok(RestoreOutcome::Nothing(SkipReason::Empty));
        }

        let Some(snapshot) = get_json::<SessionSnapshot>(self.store.as_ref(), SESSION_SLOT_KEY)?
        else {
            self.clear()?;
            return Ok(RestoreOutcome::Nothing(SkipReason::Corrupt));
        };

        if now - snapshot.saved_at > self.ttl {
            log::info!(
                "Discarding detection session saved at {} (older than {} minutes)",
                snapshot.saved_at,
                self.ttl.num_minutes()
            );
            self.clear()?;
            return Ok(RestoreOutcome::Nothing(SkipReason::Stale));
        }

        if snapshot.is_finished_with_result() {
            self.clear()?;
            return Ok(RestoreOutcome::Nothing(SkipReason::AlreadyCompleted));
        }

        log::debug!("Restored detection session (job {:?})", snapshot.job_id);
        Ok(RestoreOutcome::Restored(snapshot))
    }
}
