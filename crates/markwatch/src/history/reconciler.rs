//! History reconciler: one capacity-bounded, time-ordered log per identity.
//!
//! Local detections are recorded as they complete; remote records are merged
//! in on sync. Every mutation is a single read-modify-write of the persisted
//! log, serialized by a lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use tracing::Instrument;

use super::record::{DedupKey, HistoryRecord, Origin};
use crate::api::DetectionService;
use crate::error::{MarkwatchError, StorageError};
use crate::identity::Identity;
use crate::result::DetectionResult;
use crate::storage::{get_json, set_json, KeyValueStore};

const HISTORY_KEY_PREFIX: &str = "markwatch.history";

/// The two integers the reconciler consumes from plan policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub local_cap: usize,
    pub cloud_fetch_limit: usize,
}

pub struct HistoryReconciler {
    store: Arc<dyn KeyValueStore>,
    limits: RwLock<HistoryLimits>,
    write_lock: Mutex<()>,
}

impl HistoryReconciler {
    pub fn new(store: Arc<dyn KeyValueStore>, limits: HistoryLimits) -> Self {
        Self {
            store,
            limits: RwLock::new(limits),
            write_lock: Mutex::new(()),
        }
    }

    /// Slot holding `identity`'s log. User keys are tagged and base64
    /// encoded so no user key can collide with another or with the
    /// anonymous slot.
    pub fn storage_key(identity: &Identity) -> String {
        match identity {
            Identity::User(key) => format!(
                "{}.user.{}",
                HISTORY_KEY_PREFIX,
                URL_SAFE_NO_PAD.encode(key.as_bytes())
            ),
            Identity::Anonymous => format!("{}.anonymous", HISTORY_KEY_PREFIX),
        }
    }

    pub fn limits(&self) -> HistoryLimits {
        match self.limits.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Replaces the limits, e.g. after the caller's plan changes. The next
    /// write enforces the new cap.
    pub fn set_limits(&self, limits: HistoryLimits) {
        let mut guard = match self.limits.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("History limits lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = limits;
    }

    pub fn list(&self, identity: &Identity) -> Result<Vec<HistoryRecord>, StorageError> {
        let key = Self::storage_key(identity);
        Ok(get_json::<Vec<HistoryRecord>>(self.store.as_ref(), &key)?.unwrap_or_default())
    }

    /// Records a completed detection and returns the stored record.
    pub fn record_detection(
        &self,
        identity: &Identity,
        filename: &str,
        result: &DetectionResult,
    ) -> Result<HistoryRecord, StorageError> {
        let record = HistoryRecord::from_detection(filename, result);
        self.record(identity, record.clone())?;
        Ok(record)
    }

    /// Adds a record at its place in the descending order (the front, for a
    /// fresh detection), replacing any record with the same dedup key, then
    /// truncates to the local cap and persists.
    pub fn record(
        &self,
        identity: &Identity,
        record: HistoryRecord,
    ) -> Result<Vec<HistoryRecord>, StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        let cap = self.limits().local_cap;

        let key = record.dedup_key();
        let mut log = self.list(identity)?;
        log.retain(|r| r.dedup_key() != key);

        let position = log
            .iter()
            .position(|r| r.timestamp <= record.timestamp)
            .unwrap_or(log.len());
        log.insert(position, record);
        log.truncate(cap);

        self.persist(identity, &log)?;
        log::debug!(
            "Recorded history entry for {} ({} entries)",
            identity.storage_key(),
            log.len()
        );
        Ok(log)
    }

    /// Unions `incoming` with the stored log under the dedup key, incoming
    /// entries winning ties, then sorts newest first, truncates and persists.
    ///
    /// Idempotent: merging the same set again yields the same log.
    pub fn merge(
        &self,
        identity: &Identity,
        incoming: &[Value],
    ) -> Result<Vec<HistoryRecord>, StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        let cap = self.limits().local_cap;

        let mut by_key: HashMap<DedupKey, HistoryRecord> = HashMap::new();
        for record in self.list(identity)? {
            by_key.insert(record.dedup_key(), record);
        }

        let mut skipped = 0usize;
        for raw in incoming {
            match HistoryRecord::normalize(raw, Origin::Cloud) {
                Some(record) => {
                    by_key.insert(record.dedup_key(), record);
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            log::warn!("Skipped {} unusable incoming history records", skipped);
        }

        let mut merged: Vec<HistoryRecord> = by_key.into_values().collect();
        merged.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.filename.cmp(&b.filename))
                .then_with(|| a.has_match.cmp(&b.has_match))
        });
        merged.truncate(cap);

        self.persist(identity, &merged)?;
        Ok(merged)
    }

    /// Fetches remote records (up to the cloud fetch limit) and merges them.
    /// Anonymous identities have no remote history; their log is returned as is.
    pub async fn sync_remote(
        &self,
        identity: &Identity,
        service: &dyn DetectionService,
    ) -> Result<Vec<HistoryRecord>, MarkwatchError> {
        if identity.is_anonymous() {
            log::debug!("Skipping remote history sync for anonymous identity");
            return Ok(self.list(identity)?);
        }

        let limit = self.limits().cloud_fetch_limit;
        if limit == 0 {
            return Ok(self.list(identity)?);
        }

        let response = service
            .fetch_history(limit)
            .instrument(tracing::info_span!("history.sync", limit))
            .await?;
        log::info!("Fetched {} remote history records", response.records.len());
        Ok(self.merge(identity, &response.records)?)
    }

    pub fn clear(&self, identity: &Identity) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        self.store.remove(&Self::storage_key(identity))
    }

    fn persist(&self, identity: &Identity, log: &[HistoryRecord]) -> Result<(), StorageError> {
        set_json(self.store.as_ref(), &Self::storage_key(identity), &log)
    }
}
