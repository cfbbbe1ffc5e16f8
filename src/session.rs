//! Session codec: a record table as standard CSV preceded by a fixed,
//! order-sensitive block of `# `-prefixed metadata lines. The block is a
//! serialization contract, not a freeform comment convention; decode
//! accepts exactly what encode produces.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{AnalysisParams, DatasetName, RawRow, SessionMetadata};
use crate::error::NarrascopeError;
use crate::record::{normalize, AnalysisRecord};

const INTRO_PREFIX: &str = "Narrative Analysis Session - Generated ";
const LABEL_TARGET: &str = "Target:";
const LABEL_DATE_RANGE: &str = "Date Range:";
const LABEL_THRESHOLD: &str = "Threshold:";
const LABEL_DATASETS: &str = "Datasets:";
const LABEL_TOTAL: &str = "Total Records:";

/// A decoded session file: the raw record rows plus the parameters that
/// produced them.
#[derive(Debug, Clone)]
pub struct SessionFile {
    pub rows: Vec<RawRow>,
    pub metadata: SessionMetadata,
}

impl SessionFile {
    /// Normalize every row and attach the session metadata to each record.
    /// The metadata is read once by the caller to restore parameters and is
    /// regenerated from current parameters on any re-save.
    pub fn records(&self) -> Vec<AnalysisRecord> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = normalize(row);
                record.session_metadata = Some(self.metadata.clone());
                record
            })
            .collect()
    }
}

/// Encode rows and parameters into the annotated-CSV session format.
/// `total_records` is computed from the rows, never trusted from input.
pub fn encode(rows: &[RawRow], params: &AnalysisParams) -> String {
    let metadata = SessionMetadata::from_params(params, rows.len());
    encode_with_metadata(rows, &metadata)
}

pub fn encode_with_metadata(rows: &[RawRow], metadata: &SessionMetadata) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {INTRO_PREFIX}{}\n", metadata.generated_at));
    out.push_str(&format!("# {LABEL_TARGET} {}\n", metadata.target_narrative));
    out.push_str(&format!(
        "# {LABEL_DATE_RANGE} {} to {}\n",
        metadata.start_date, metadata.end_date
    ));
    out.push_str(&format!("# {LABEL_THRESHOLD} {}\n", metadata.threshold));
    out.push_str(&format!(
        "# {LABEL_DATASETS} {}\n",
        metadata.selected_datasets.join(", ")
    ));
    out.push_str(&format!("# {LABEL_TOTAL} {}\n", rows.len()));
    out.push('\n');

    let header: Vec<String> = match rows.first() {
        Some(first) => first.keys().cloned().collect(),
        None => Vec::new(),
    };
    out.push_str(
        &header
            .iter()
            .map(|name| csv_escape(name))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');
    for row in rows {
        let line = header
            .iter()
            .map(|name| csv_escape(&field_to_string(row.get(name))))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Decode a session file: leading `#` lines are metadata, the first
/// non-comment, non-blank line begins the CSV table.
pub fn decode(text: &str) -> Result<SessionFile, NarrascopeError> {
    let mut generated_at = String::new();
    let mut target_narrative = None;
    let mut start_date = None;
    let mut end_date = None;
    let mut threshold = None;
    let mut selected_datasets = None;
    let mut total_records = None;

    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if let Some(comment) = trimmed.strip_prefix('#') {
            let comment = comment.trim();
            if let Some(value) = comment.strip_prefix(INTRO_PREFIX) {
                generated_at = value.trim().to_string();
            } else if let Some(value) = comment.strip_prefix(LABEL_TARGET) {
                target_narrative = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix(LABEL_DATE_RANGE) {
                let range = value.trim();
                match range.split_once(" to ") {
                    Some((start, end)) => {
                        start_date = Some(start.trim().to_string());
                        end_date = Some(end.trim().to_string());
                    }
                    None => {
                        return Err(NarrascopeError::SessionParse(format!(
                            "malformed date range: {range:?}"
                        )));
                    }
                }
            } else if let Some(value) = comment.strip_prefix(LABEL_THRESHOLD) {
                let parsed = value.trim().parse::<f64>().map_err(|_| {
                    NarrascopeError::SessionParse(format!("malformed threshold: {value:?}"))
                })?;
                threshold = Some(parsed);
            } else if let Some(value) = comment.strip_prefix(LABEL_DATASETS) {
                selected_datasets = Some(
                    value
                        .trim()
                        .split(", ")
                        .filter(|name| !name.is_empty())
                        .map(|name| name.to_string())
                        .collect::<Vec<_>>(),
                );
            } else if let Some(value) = comment.strip_prefix(LABEL_TOTAL) {
                let parsed = value.trim().parse::<usize>().map_err(|_| {
                    NarrascopeError::SessionParse(format!("malformed record count: {value:?}"))
                })?;
                total_records = Some(parsed);
            }
            // Unknown comment lines are not tolerated mid-format but a
            // stray one before the table should not corrupt the rows.
            offset += line.len();
        } else if trimmed.is_empty() {
            offset += line.len();
        } else {
            break;
        }
    }

    let metadata = SessionMetadata {
        start_date: start_date
            .ok_or_else(|| NarrascopeError::SessionParse("missing Date Range".to_string()))?,
        end_date: end_date
            .ok_or_else(|| NarrascopeError::SessionParse("missing Date Range".to_string()))?,
        target_narrative: target_narrative
            .ok_or_else(|| NarrascopeError::SessionParse("missing Target".to_string()))?,
        threshold: threshold
            .ok_or_else(|| NarrascopeError::SessionParse("missing Threshold".to_string()))?,
        selected_datasets: selected_datasets
            .ok_or_else(|| NarrascopeError::SessionParse("missing Datasets".to_string()))?,
        generated_at,
        total_records: total_records
            .ok_or_else(|| NarrascopeError::SessionParse("missing Total Records".to_string()))?,
    };

    let table = parse_csv(&text[offset..]);
    let mut table = table.into_iter();
    let header = match table.next() {
        Some(header) => header,
        // A zero-row session carries an empty header line, which the CSV
        // reader folds away with the trailing blanks.
        None if metadata.total_records == 0 => {
            return Ok(SessionFile {
                rows: Vec::new(),
                metadata,
            });
        }
        None => {
            return Err(NarrascopeError::SessionParse(
                "missing CSV header".to_string(),
            ));
        }
    };
    let mut rows = Vec::new();
    for record in table {
        if record.len() != header.len() {
            return Err(NarrascopeError::SessionParse(format!(
                "row has {} fields, header has {}",
                record.len(),
                header.len()
            )));
        }
        let row: RawRow = header
            .iter()
            .cloned()
            .zip(record.into_iter().map(Value::String))
            .collect();
        rows.push(row);
    }

    Ok(SessionFile { rows, metadata })
}

/// File naming convention for client-side exports:
/// `analysis_<datasets>_<timestamp>.csv` with dataset names reduced to
/// alphanumerics and underscores and the RFC 3339 timestamp stripped of
/// colons and dots.
pub fn session_filename(datasets: &[DatasetName], generated_at: DateTime<Utc>) -> String {
    let joined = datasets
        .iter()
        .map(|name| {
            name.as_str()
                .chars()
                .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("_");
    let stamp: String = generated_at
        .to_rfc3339()
        .chars()
        .filter(|ch| *ch != ':' && *ch != '.')
        .collect();
    format!("analysis_{joined}_{stamp}.csv")
}

/// RFC 4180 quoting: wrap when the value carries a comma, quote, or
/// newline, doubling internal quotes.
pub fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn field_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Minimal CSV reader honoring quoted fields with embedded commas, quotes,
/// and newlines. Trailing blank lines do not produce records.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if record.len() > 1 || !record[0].is_empty() {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            _ => field.push(ch),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}
