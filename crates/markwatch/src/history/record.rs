use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::{DetectionResult, MatchedAsset};

/// Where a history record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Cloud,
}

/// A user-visible detection outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub has_match: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub matched_asset: Option<MatchedAsset>,
    pub origin: Origin,
}

/// Composite key under which logically identical records collapse.
///
/// Two distinct detections of the same file within the same timestamp and
/// with the same outcome share a key and are kept as one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub has_match: bool,
}

impl HistoryRecord {
    /// Builds a local record for a detection that just completed.
    pub fn from_detection(filename: &str, result: &DetectionResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            filename: filename.to_string(),
            has_match: result.has_match,
            confidence: result.confidence,
            matched_asset: result.matched_asset.clone(),
            origin: Origin::Local,
        }
    }

    /// Normalizes a stored or remote record. Accepts both the canonical
    /// field names and the remote store's (`created_at`, `input_filename`,
    /// `has_watermark`). Returns `None` when no usable timestamp is present.
    pub fn normalize(raw: &Value, default_origin: Origin) -> Option<Self> {
        let obj = raw.as_object()?;

        let timestamp = ["timestamp", "created_at", "createdAt"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .and_then(parse_timestamp)?;

        let filename = ["filename", "input_filename", "fileName"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();

        let origin = obj
            .get("origin")
            .and_then(|o| serde_json::from_value(o.clone()).ok())
            .unwrap_or(default_origin);

        let result = DetectionResult::normalize(raw.clone());

        let id = match obj.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            // Deterministic so re-merging the same record yields the same id.
            _ => format!(
                "{}|{}|{}",
                timestamp.to_rfc3339(),
                filename,
                result.has_match
            ),
        };

        Some(Self {
            id,
            timestamp,
            filename,
            has_match: result.has_match,
            confidence: result.confidence,
            matched_asset: result.matched_asset,
            origin,
        })
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            timestamp: self.timestamp,
            filename: self.filename.clone(),
            has_match: self.has_match,
        }
    }
}

/// RFC 3339, or a naive ISO timestamp read as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            log::warn!("Skipping history record with unparseable timestamp '{}': {}", s, e);
            None
        }
    }
}
