use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use serde_json::{json, Map};

use narrascope::analysis::{App, ProgressEvent, ProgressSink};
use narrascope::domain::{AnalysisParams, DatasetName, NarrativePair, RawRow, SessionMetadata};
use narrascope::error::NarrascopeError;
use narrascope::registry::DatasetRegistry;
use narrascope::scoring::{SavedSession, ScoreRequest, ScoringClient};

struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: ProgressEvent) {}
}

fn row(tweet: &str, datetime: &str, similarity: f64) -> RawRow {
    let mut map = Map::new();
    map.insert("Tweet".to_string(), json!(tweet));
    map.insert("Datetime".to_string(), json!(datetime));
    map.insert("Similarity".to_string(), json!(similarity));
    map
}

/// Scoring stub serving canned rows per dataset name, counting how each
/// endpoint was hit.
#[derive(Default)]
struct MockScoring {
    by_dataset: HashMap<String, Vec<RawRow>>,
    failing: Option<String>,
    auth_expired: bool,
    dataset_calls: Mutex<Vec<String>>,
    upload_calls: Mutex<usize>,
}

impl MockScoring {
    fn with_dataset(mut self, name: &str, rows: Vec<RawRow>) -> Self {
        self.by_dataset.insert(name.to_string(), rows);
        self
    }
}

impl ScoringClient for MockScoring {
    fn score_dataset(
        &self,
        _request: &ScoreRequest,
        dataset: &DatasetName,
    ) -> Result<Vec<RawRow>, NarrascopeError> {
        self.dataset_calls
            .lock()
            .unwrap()
            .push(dataset.as_str().to_string());
        if self.failing.as_deref() == Some(dataset.as_str()) {
            return Err(NarrascopeError::ScoringStatus {
                status: 500,
                message: "scorer fell over".to_string(),
            });
        }
        self.by_dataset
            .get(dataset.as_str())
            .cloned()
            .ok_or_else(|| NarrascopeError::ScoringStatus {
                status: 404,
                message: format!("unknown dataset {dataset}"),
            })
    }

    fn score_upload(
        &self,
        _request: &ScoreRequest,
        rows: &[RawRow],
    ) -> Result<Vec<RawRow>, NarrascopeError> {
        *self.upload_calls.lock().unwrap() += 1;
        Ok(rows.to_vec())
    }

    fn list_datasets(&self) -> Result<Vec<String>, NarrascopeError> {
        if self.auth_expired {
            return Err(NarrascopeError::AuthExpired);
        }
        let mut names: Vec<String> = self.by_dataset.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn generate_narratives(
        &self,
        rows: &[RawRow],
        num_narratives: usize,
    ) -> Result<Vec<NarrativePair>, NarrascopeError> {
        assert!(!rows.is_empty());
        Ok((0..num_narratives)
            .map(|i| NarrativePair {
                narrative_1: format!("theme {i}"),
                narrative_2: format!("countertheme {i}"),
            })
            .collect())
    }

    fn save_session(
        &self,
        rows: &[RawRow],
        metadata: &SessionMetadata,
    ) -> Result<SavedSession, NarrascopeError> {
        assert_eq!(metadata.total_records, rows.len());
        Ok(SavedSession {
            filename: "analysis_mock.csv".to_string(),
            row_count: rows.len(),
        })
    }

    fn list_sessions(&self) -> Result<Vec<String>, NarrascopeError> {
        Ok(vec!["analysis_mock.csv".to_string()])
    }

    fn load_session(&self, filename: &str) -> Result<Vec<RawRow>, NarrascopeError> {
        if filename != "analysis_mock.csv" {
            return Err(NarrascopeError::SessionNotFound(filename.to_string()));
        }
        Ok(vec![row("hello", "2020-11-01 00:00:00", 0.7)])
    }
}

fn params(datasets: &[&str]) -> AnalysisParams {
    AnalysisParams {
        start_date: "2020-11-01".to_string(),
        end_date: "2020-12-01".to_string(),
        target_narrative: "election fraud claims".parse().unwrap(),
        threshold: 0.5,
        selected_datasets: datasets.iter().map(|n| n.parse().unwrap()).collect(),
    }
}

#[test]
fn merge_orders_across_datasets_by_timestamp() {
    let scoring = MockScoring::default()
        .with_dataset("alpha", vec![row("late", "2020-11-02 00:00:00", 0.9)])
        .with_dataset("beta", vec![row("early", "2020-11-01 00:00:00", 0.2)]);
    let app = App::new(scoring, DatasetRegistry::new());

    let outcome = app
        .run_analysis(&params(&["alpha", "beta"]), &NullSink)
        .unwrap();

    let tweets: Vec<&str> = outcome.records.iter().map(|r| r.tweet.as_str()).collect();
    assert_eq!(tweets, vec!["early", "late"]);
    assert_eq!(outcome.records[0].dataset_name, "beta");
    assert_eq!(outcome.records[1].dataset_name, "alpha");

    // Grouped views come back in selection order, each sorted on its own.
    assert_eq!(outcome.grouped.len(), 2);
    assert_eq!(outcome.grouped[0].name, "alpha");
    assert_eq!(outcome.grouped[0].records.len(), 1);
    assert_eq!(outcome.grouped[1].name, "beta");
    assert_eq!(outcome.grouped[1].records[0].tweet, "early");
}

#[test]
fn identical_rows_keep_distinct_provenance() {
    let shared = row("same text", "2020-11-01 12:00:00", 0.8);
    let scoring = MockScoring::default()
        .with_dataset("alpha", vec![shared.clone()])
        .with_dataset("beta", vec![shared]);
    let app = App::new(scoring, DatasetRegistry::new());

    let outcome = app
        .run_analysis(&params(&["alpha", "beta"]), &NullSink)
        .unwrap();

    assert_eq!(outcome.records.len(), 2);
    let names: Vec<&str> = outcome
        .records
        .iter()
        .map(|r| r.dataset_name.as_str())
        .collect();
    // Equal timestamps: the stable sort preserves selection order.
    assert_eq!(names, vec!["alpha", "beta"]);
}

#[test]
fn one_failed_dataset_fails_the_run() {
    let scoring = MockScoring {
        failing: Some("beta".to_string()),
        ..MockScoring::default()
    }
    .with_dataset("alpha", vec![row("ok", "2020-11-01 00:00:00", 0.9)])
    .with_dataset("beta", Vec::new());
    let app = App::new(scoring, DatasetRegistry::new());

    let result = app.run_analysis(&params(&["alpha", "beta"]), &NullSink);
    assert_matches!(
        result,
        Err(NarrascopeError::ScoringStatus { status: 500, .. })
    );
    assert!(app.current().is_none());
}

#[test]
fn empty_selection_is_rejected() {
    let app = App::new(MockScoring::default(), DatasetRegistry::new());
    let result = app.run_analysis(&params(&[]), &NullSink);
    assert_matches!(result, Err(NarrascopeError::NoDatasetsSelected));
}

#[test]
fn uploaded_rows_shadow_the_remote_dataset() {
    let scoring = MockScoring::default()
        .with_dataset("alpha", vec![row("remote", "2020-11-01 00:00:00", 0.1)]);
    let app = App::new(scoring, DatasetRegistry::new());

    let name: DatasetName = "alpha".parse().unwrap();
    app.registry()
        .register(&name, vec![row("local", "2020-11-05 00:00:00", 0.9)]);

    let outcome = app.run_analysis(&params(&["alpha"]), &NullSink).unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].tweet, "local");
}

#[test]
fn stale_run_does_not_overwrite_newer_result() {
    let scoring = MockScoring::default()
        .with_dataset("alpha", vec![row("first", "2020-11-01 00:00:00", 0.5)]);
    let app = App::new(scoring, DatasetRegistry::new());

    let stale = app.begin_run();
    let fresh = app.begin_run();

    let outcome = app.run_analysis(&params(&["alpha"]), &NullSink).unwrap();
    assert!(app.apply(fresh, outcome.clone()));
    assert!(!app.apply(stale, outcome));
    assert_eq!(app.current().unwrap().records[0].tweet, "first");
}

#[test]
fn run_and_apply_installs_the_outcome() {
    let scoring = MockScoring::default()
        .with_dataset("alpha", vec![row("only", "2020-11-01 00:00:00", 0.5)]);
    let app = App::new(scoring, DatasetRegistry::new());

    let (outcome, applied) = app.run_and_apply(&params(&["alpha"]), &NullSink).unwrap();
    assert!(applied);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(app.current().unwrap().records[0].tweet, "only");
}

#[test]
fn listing_unions_uploads_with_remote_names() {
    let scoring = MockScoring::default().with_dataset("remote_a", Vec::new());
    let app = App::new(scoring, DatasetRegistry::new());
    let name: DatasetName = "uploaded".parse().unwrap();
    app.registry().register(&name, vec![row("x", "2020-11-01", 0.3)]);

    let names = app.list_datasets().unwrap();
    assert_eq!(names, vec!["uploaded".to_string(), "remote_a".to_string()]);
}

#[test]
fn listing_propagates_auth_failure() {
    let scoring = MockScoring {
        auth_expired: true,
        ..MockScoring::default()
    };
    let app = App::new(scoring, DatasetRegistry::new());
    assert_matches!(app.list_datasets(), Err(NarrascopeError::AuthExpired));
}

#[test]
fn loaded_remote_rows_are_normalized() {
    let app = App::new(MockScoring::default(), DatasetRegistry::new());
    let records = app.load_remote_session("analysis_mock.csv").unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].timestamp_valid);
    assert_eq!(records[0].similarity, 0.7);
}

#[test]
fn narratives_pass_through_requested_count() {
    let scoring = MockScoring::default()
        .with_dataset("alpha", vec![row("seed", "2020-11-01 00:00:00", 0.9)]);
    let app = App::new(scoring, DatasetRegistry::new());
    let outcome = app.run_analysis(&params(&["alpha"]), &NullSink).unwrap();

    let narratives = app.generate_narratives(&outcome.records, 2).unwrap();
    assert_eq!(narratives.len(), 2);
    assert_eq!(narratives[0].narrative_1, "theme 0");
}

#[test]
fn save_remote_regenerates_metadata_from_params() {
    let scoring = MockScoring::default()
        .with_dataset("alpha", vec![row("a", "2020-11-01 00:00:00", 0.6)]);
    let app = App::new(scoring, DatasetRegistry::new());
    let p = params(&["alpha"]);
    let outcome = app.run_analysis(&p, &NullSink).unwrap();

    let saved = app.save_remote(&outcome.records, &p).unwrap();
    assert_eq!(saved.row_count, 1);
    assert_eq!(saved.filename, "analysis_mock.csv");
}

#[test]
fn similarity_values_are_clamped_during_merge() {
    let mut hot = row("hot", "2020-11-01 00:00:00", 0.0);
    hot.insert("Similarity".to_string(), json!(3.5));
    let mut cold = row("cold", "2020-11-02 00:00:00", 0.0);
    cold.insert("Similarity".to_string(), json!(-1.0));
    let scoring = MockScoring::default().with_dataset("alpha", vec![hot, cold]);
    let app = App::new(scoring, DatasetRegistry::new());

    let outcome = app.run_analysis(&params(&["alpha"]), &NullSink).unwrap();
    assert_eq!(outcome.records[0].similarity, 1.0);
    assert_eq!(outcome.records[1].similarity, 0.0);
}
