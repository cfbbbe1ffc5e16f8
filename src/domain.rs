use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NarrascopeError;

/// A raw row as returned by the scoring service, parsed from an uploaded
/// CSV, or recovered from a saved session. Key order is preserved so the
/// session codec can emit the header in first-row key order.
pub type RawRow = serde_json::Map<String, Value>;

/// Name of a dataset, either hosted by the scoring service or uploaded
/// locally. Provenance tags on merged records use this exact string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetName(String);

impl DatasetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetName {
    type Err = NarrascopeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        // Session files list selected names separated by ", "; a name
        // containing the separator could not be read back intact.
        if normalized.is_empty() || normalized.contains(", ") {
            return Err(NarrascopeError::InvalidDatasetName(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Target narrative text, sanitized at construction. Parsing rejects empty
/// input, input outside 3..=500 characters, and input that falls under the
/// 3-character floor once markup tags are stripped. Rejection is a hard
/// failure, never a silent truncation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetNarrative(String);

impl TargetNarrative {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetNarrative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TargetNarrative {
    type Err = NarrascopeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let len = trimmed.chars().count();
        if len < 3 || len > 500 {
            return Err(NarrascopeError::InvalidNarrative);
        }
        let tag_re = Regex::new(r"<[^>]*>").unwrap();
        let stripped = tag_re.replace_all(trimmed, "").trim().to_string();
        if stripped.chars().count() < 3 {
            return Err(NarrascopeError::NarrativeTooShortAfterStrip(stripped));
        }
        Ok(Self(stripped))
    }
}

/// Parameters for one analysis run. The narrative is sanitized by
/// construction, so holding an `AnalysisParams` implies the run may issue
/// requests.
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    pub start_date: String,
    pub end_date: String,
    pub target_narrative: TargetNarrative,
    pub threshold: f64,
    pub selected_datasets: Vec<DatasetName>,
}

/// Parameters that produced a saved record set. Written once at save time,
/// immutable afterwards; `total_records` must equal the number of data rows
/// in the same file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub start_date: String,
    pub end_date: String,
    pub target_narrative: String,
    pub threshold: f64,
    pub selected_datasets: Vec<String>,
    pub generated_at: String,
    pub total_records: usize,
}

impl SessionMetadata {
    pub fn from_params(params: &AnalysisParams, total_records: usize) -> Self {
        Self {
            start_date: params.start_date.clone(),
            end_date: params.end_date.clone(),
            target_narrative: params.target_narrative.as_str().to_string(),
            threshold: params.threshold,
            selected_datasets: params
                .selected_datasets
                .iter()
                .map(|name| name.as_str().to_string())
                .collect(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            total_records,
        }
    }
}

/// One pair of generated narrative summaries, as returned by the scoring
/// service's generate-narratives operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativePair {
    pub narrative_1: String,
    pub narrative_2: String,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_dataset_name_trims() {
        let name: DatasetName = " full_tweets.csv ".parse().unwrap();
        assert_eq!(name.as_str(), "full_tweets.csv");
    }

    #[test]
    fn parse_dataset_name_empty() {
        let err = "   ".parse::<DatasetName>().unwrap_err();
        assert_matches!(err, NarrascopeError::InvalidDatasetName(_));
    }

    #[test]
    fn parse_dataset_name_rejects_list_separator() {
        let err = "tweets, batch2.csv".parse::<DatasetName>().unwrap_err();
        assert_matches!(err, NarrascopeError::InvalidDatasetName(_));
        // A bare comma without the trailing space survives the codec.
        assert!("tweets,batch2.csv".parse::<DatasetName>().is_ok());
    }

    #[test]
    fn narrative_length_bounds() {
        let err = "ab".parse::<TargetNarrative>().unwrap_err();
        assert_matches!(err, NarrascopeError::InvalidNarrative);

        let long = "x".repeat(501);
        let err = long.parse::<TargetNarrative>().unwrap_err();
        assert_matches!(err, NarrascopeError::InvalidNarrative);

        let ok: TargetNarrative = "The 2020 election was a hoax".parse().unwrap();
        assert_eq!(ok.as_str(), "The 2020 election was a hoax");
    }

    #[test]
    fn narrative_strips_markup() {
        let ok: TargetNarrative = "<b>ballots</b> were <i>lost</i>".parse().unwrap();
        assert_eq!(ok.as_str(), "ballots were lost");
    }

    #[test]
    fn narrative_rejected_when_only_markup_survives() {
        // "<b>x</b>" passes the raw length check but strips down to "x".
        let err = "<b>x</b>".parse::<TargetNarrative>().unwrap_err();
        assert_matches!(err, NarrascopeError::NarrativeTooShortAfterStrip(_));
    }
}
