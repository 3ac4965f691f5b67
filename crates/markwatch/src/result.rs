//! Canonical detection result.
//!
//! The service has reported matches in two shapes over time: an explicit
//! `matched_asset` object, and an older `best_match` object with different
//! field names. [`DetectionResult::normalize`] is the only place that looks at
//! either shape; everything downstream reads the canonical fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The asset a detection was matched against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedAsset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Similarity in percent, as reported by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub has_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_asset: Option<MatchedAsset>,
    /// The untouched service payload, kept for report rendering.
    #[serde(default)]
    pub raw: Value,
}

impl DetectionResult {
    /// Normalizes a raw service payload into the canonical shape.
    pub fn normalize(raw: Value) -> Self {
        let (has_match, confidence, matched_asset) = match raw.as_object() {
            Some(obj) => (
                read_bool(obj, &["has_watermark", "hasMatch", "has_match"]),
                read_confidence(obj),
                matched_asset_from(obj),
            ),
            None => (false, None, None),
        };

        Self {
            has_match,
            confidence,
            matched_asset,
            raw,
        }
    }
}

fn read_bool(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_bool))
        .unwrap_or(false)
}

fn read_confidence(obj: &Map<String, Value>) -> Option<f64> {
    obj.get("confidence")
        .and_then(value_as_f64)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(value_as_string))
}

/// Prefers an explicit `matched_asset`, else synthesizes one from `best_match`.
pub(crate) fn matched_asset_from(obj: &Map<String, Value>) -> Option<MatchedAsset> {
    let explicit = obj
        .get("matched_asset")
        .or_else(|| obj.get("matchedAsset"))
        .and_then(Value::as_object);
    if let Some(asset) = explicit {
        return Some(asset_from_object(asset));
    }

    obj.get("best_match")
        .and_then(Value::as_object)
        .map(asset_from_object)
}

fn asset_from_object(asset: &Map<String, Value>) -> MatchedAsset {
    MatchedAsset {
        id: string_field(asset, &["id", "asset_id"]),
        filename: string_field(asset, &["filename", "file_name"]),
        author: string_field(asset, &["author", "author_name"]),
        similarity: asset.get("similarity").and_then(value_as_f64),
    }
}
