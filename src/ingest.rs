//! Validation gate for user-supplied CSV. Structural and semantic defects
//! reject the whole file; the only rows silently discarded are those with
//! an empty `Tweet` cell.

use serde_json::Value;

use crate::domain::RawRow;
use crate::error::NarrascopeError;
use crate::record::{parse_timestamp_ms, COL_DATETIME, COL_TWEET};
use crate::session::parse_csv;

const REQUIRED_COLUMNS: [&str; 2] = [COL_TWEET, COL_DATETIME];
const DATE_SAMPLE_ROWS: usize = 5;

/// An upload that passed validation and may enter the dataset registry.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub rows: Vec<RawRow>,
    pub total_rows: usize,
    pub columns: Vec<String>,
    pub file_name: String,
}

/// Validate raw CSV text against the upload contract:
/// a non-empty table, both `Tweet` and `Datetime` headers present, at least
/// one row with tweet text, and a parseable `Datetime` in the first
/// surviving rows.
pub fn validate_upload(text: &str, file_name: &str) -> Result<ValidatedUpload, NarrascopeError> {
    let mut table = parse_csv(text).into_iter();
    let header = table.next().ok_or(NarrascopeError::EmptyCsv)?;
    let data: Vec<Vec<String>> = table.collect();
    if data.is_empty() {
        return Err(NarrascopeError::EmptyCsv);
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !header.iter().any(|column| column == *required))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(NarrascopeError::MissingColumns(missing.join(", ")));
    }

    // Present by the check above.
    let tweet_idx = header
        .iter()
        .position(|column| column == COL_TWEET)
        .unwrap_or(0);

    let rows: Vec<RawRow> = data
        .into_iter()
        .filter(|record| {
            record
                .get(tweet_idx)
                .is_some_and(|tweet| !tweet.trim().is_empty())
        })
        .map(|record| {
            header
                .iter()
                .cloned()
                .zip(
                    record
                        .into_iter()
                        .map(Value::String)
                        .chain(std::iter::repeat(Value::String(String::new()))),
                )
                .collect()
        })
        .collect();
    if rows.is_empty() {
        return Err(NarrascopeError::NoTweetData);
    }

    for row in rows.iter().take(DATE_SAMPLE_ROWS) {
        let raw_date = match row.get(COL_DATETIME) {
            Some(Value::String(value)) => value.clone(),
            _ => String::new(),
        };
        if parse_timestamp_ms(&raw_date).is_none() {
            return Err(NarrascopeError::InvalidDate(raw_date));
        }
    }

    Ok(ValidatedUpload {
        total_rows: rows.len(),
        columns: header,
        file_name: file_name.to_string(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn accepts_well_formed_upload() {
        let text = "Tweet,Datetime,ChannelName\n\
                    \"The 2020 election results were questionable\",2020-11-15 14:30:00,ExampleUser\n\
                    \"Voting machines had irregularities\",2020-11-16 09:15:00,NewsSource\n";
        let upload = validate_upload(text, "sample.csv").unwrap();
        assert_eq!(upload.total_rows, 2);
        assert_eq!(upload.columns, vec!["Tweet", "Datetime", "ChannelName"]);
        assert_eq!(upload.file_name, "sample.csv");
    }

    #[test]
    fn rejects_empty_file() {
        assert_matches!(
            validate_upload("", "empty.csv").unwrap_err(),
            NarrascopeError::EmptyCsv
        );
        // Header only, no data rows.
        assert_matches!(
            validate_upload("Tweet,Datetime\n", "empty.csv").unwrap_err(),
            NarrascopeError::EmptyCsv
        );
    }

    #[test]
    fn rejects_missing_columns_naming_each() {
        let err = validate_upload("Text,Timestamp\na,b\n", "bad.csv").unwrap_err();
        assert_matches!(
            err,
            NarrascopeError::MissingColumns(ref cols) if cols == "Tweet, Datetime"
        );

        let err = validate_upload("Tweet,Timestamp\na,b\n", "bad.csv").unwrap_err();
        assert_matches!(
            err,
            NarrascopeError::MissingColumns(ref cols) if cols == "Datetime"
        );
    }

    #[test]
    fn rejects_when_all_tweets_empty() {
        let text = "Tweet,Datetime\n,2020-11-15\n   ,2020-11-16\n";
        assert_matches!(
            validate_upload(text, "blank.csv").unwrap_err(),
            NarrascopeError::NoTweetData
        );
    }

    #[test]
    fn empty_tweet_rows_are_filtered_not_fatal() {
        let text = "Tweet,Datetime\n,2020-11-15\nreal tweet,2020-11-16\n";
        let upload = validate_upload(text, "mixed.csv").unwrap();
        assert_eq!(upload.total_rows, 1);
    }

    #[test]
    fn rejects_bad_date_naming_value() {
        let text = "Tweet,Datetime\nhello,15/11/2020\n";
        let err = validate_upload(text, "dates.csv").unwrap_err();
        assert_matches!(
            err,
            NarrascopeError::InvalidDate(ref value) if value == "15/11/2020"
        );
    }

    #[test]
    fn date_check_samples_first_five_rows_only() {
        let mut text = String::from("Tweet,Datetime\n");
        for day in 1..=5 {
            text.push_str(&format!("tweet {day},2020-11-0{day}\n"));
        }
        text.push_str("late bad row,not-a-date\n");
        // Row six is beyond the sample window.
        assert!(validate_upload(&text, "six.csv").is_ok());
    }
}
