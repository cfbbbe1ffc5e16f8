use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{RawRow, SessionMetadata};

pub const COL_TWEET: &str = "Tweet";
pub const COL_DATETIME: &str = "Datetime";
pub const COL_SIMILARITY: &str = "Similarity";
pub const COL_DATASET: &str = "datasetName";
pub const COL_LIKES: &str = "LikesCount";
pub const COL_SHARES: &str = "SharesCount";
pub const COL_COMMENTS: &str = "CommentsCount";
pub const COL_VIEWS: &str = "ViewsCount";

const KNOWN_COLUMNS: [&str; 8] = [
    COL_TWEET,
    COL_DATETIME,
    COL_SIMILARITY,
    COL_DATASET,
    COL_LIKES,
    COL_SHARES,
    COL_COMMENTS,
    COL_VIEWS,
];

/// Engagement counters for one post. Invalid or missing source values
/// coerce to zero, negatives clamp to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub likes: u64,
    pub shares: u64,
    pub comments: u64,
    pub views: u64,
}

/// One scored observation on the timeline.
///
/// `datetime` keeps the source string for display; ordering always goes
/// through `timestamp_ms`. A string that fails to parse sorts as the epoch
/// and is flagged via `timestamp_valid` rather than dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub tweet: String,
    pub datetime: String,
    pub timestamp_ms: i64,
    pub timestamp_valid: bool,
    pub similarity: f64,
    pub dataset_name: String,
    pub engagement: Engagement,
    /// Unrecognized source columns, passed through unchanged.
    pub extra: RawRow,
    /// Present only on records reconstructed from a saved session; attached
    /// at decode time and regenerated (not copied) on re-save.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_metadata: Option<SessionMetadata>,
}

impl AnalysisRecord {
    /// Canonical row shape for this record: known columns first in a fixed
    /// order, then the passthrough extras in their original order.
    /// `session_metadata` is intentionally not part of the row.
    pub fn to_raw(&self) -> RawRow {
        let mut row = RawRow::new();
        row.insert(COL_TWEET.to_string(), Value::from(self.tweet.clone()));
        row.insert(COL_DATETIME.to_string(), Value::from(self.datetime.clone()));
        row.insert(COL_SIMILARITY.to_string(), Value::from(self.similarity));
        row.insert(
            COL_DATASET.to_string(),
            Value::from(self.dataset_name.clone()),
        );
        row.insert(COL_LIKES.to_string(), Value::from(self.engagement.likes));
        row.insert(COL_SHARES.to_string(), Value::from(self.engagement.shares));
        row.insert(
            COL_COMMENTS.to_string(),
            Value::from(self.engagement.comments),
        );
        row.insert(COL_VIEWS.to_string(), Value::from(self.engagement.views));
        for (key, value) in &self.extra {
            row.insert(key.clone(), value.clone());
        }
        row
    }
}

/// Coerce a heterogeneous raw row into a well-typed record. Applied
/// independently per field and never fails; idempotent over `to_raw`.
pub fn normalize(raw: &RawRow) -> AnalysisRecord {
    let tweet = string_field(raw, COL_TWEET);
    let datetime = match raw.get(COL_DATETIME) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Number(value)) => value.to_string(),
        _ => String::new(),
    };
    let (timestamp_ms, timestamp_valid) = match raw.get(COL_DATETIME) {
        Some(Value::Number(value)) => match value.as_i64() {
            Some(ms) => (ms, true),
            None => (0, false),
        },
        Some(Value::String(value)) => match parse_timestamp_ms(value) {
            Some(ms) => (ms, true),
            None => (0, false),
        },
        _ => (0, false),
    };

    AnalysisRecord {
        tweet,
        datetime,
        timestamp_ms,
        timestamp_valid,
        similarity: similarity_field(raw.get(COL_SIMILARITY)),
        dataset_name: string_field(raw, COL_DATASET),
        engagement: Engagement {
            likes: count_field(raw.get(COL_LIKES)),
            shares: count_field(raw.get(COL_SHARES)),
            comments: count_field(raw.get(COL_COMMENTS)),
            views: count_field(raw.get(COL_VIEWS)),
        },
        extra: raw
            .iter()
            .filter(|(key, _)| !KNOWN_COLUMNS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        session_metadata: None,
    }
}

/// Parse a timestamp into epoch milliseconds. Accepted shapes:
/// `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, full RFC 3339, and a bare integer
/// taken as epoch milliseconds (the shape a numeric source value takes
/// after a trip through the session codec).
pub fn parse_timestamp_ms(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ms) = trimmed.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.timestamp_millis());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(parsed.and_utc().timestamp_millis());
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(parsed.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

fn string_field(raw: &RawRow, key: &str) -> String {
    match raw.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Number(value)) => value.to_string(),
        Some(Value::Bool(value)) => value.to_string(),
        _ => String::new(),
    }
}

fn similarity_field(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(value)) => value.as_f64().unwrap_or(0.0),
        Some(Value::String(value)) => value.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if parsed.is_nan() {
        return 0.0;
    }
    parsed.clamp(0.0, 1.0)
}

fn count_field(value: Option<&Value>) -> u64 {
    let parsed = match value {
        Some(Value::Number(value)) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|v| v as i64))
            .unwrap_or(0),
        Some(Value::String(value)) => {
            let trimmed = value.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|v| v as i64))
                .unwrap_or(0)
        }
        _ => 0,
    };
    parsed.max(0) as u64
}
