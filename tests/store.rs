use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{json, Map};

use narrascope::domain::{AnalysisParams, RawRow};
use narrascope::error::NarrascopeError;
use narrascope::store::SessionStore;

fn params() -> AnalysisParams {
    AnalysisParams {
        start_date: "2020-11-01".to_string(),
        end_date: "2020-12-01".to_string(),
        target_narrative: "stolen ballots".parse().unwrap(),
        threshold: 0.4,
        selected_datasets: vec!["alpha".parse().unwrap(), "beta two".parse().unwrap()],
    }
}

fn rows() -> Vec<RawRow> {
    let mut first = Map::new();
    first.insert("Tweet".to_string(), json!("hello, world"));
    first.insert("Datetime".to_string(), json!("2020-11-03 08:00:00"));
    first.insert("Similarity".to_string(), json!(0.61));
    let mut second = Map::new();
    second.insert("Tweet".to_string(), json!("plain"));
    second.insert("Datetime".to_string(), json!("2020-11-04 09:30:00"));
    second.insert("Similarity".to_string(), json!(0.42));
    vec![first, second]
}

fn temp_store(temp: &tempfile::TempDir) -> SessionStore {
    let root = Utf8PathBuf::from_path_buf(temp.path().join("sessions")).unwrap();
    SessionStore::new_with_root(root)
}

#[test]
fn save_then_load_round_trips() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);

    let path = store.save(&rows(), &params()).unwrap();
    assert!(path.as_str().ends_with(".csv"));
    let filename = path.file_name().unwrap();
    assert!(filename.starts_with("analysis_alpha_beta_two_"));

    let session = store.load(filename).unwrap();
    assert_eq!(session.metadata.threshold, 0.4);
    assert_eq!(session.metadata.target_narrative, "stolen ballots");
    assert_eq!(session.metadata.total_records, 2);
    assert_eq!(
        session.metadata.selected_datasets,
        vec!["alpha".to_string(), "beta two".to_string()]
    );

    let records = session.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tweet, "hello, world");
    assert!(records[0].session_metadata.is_some());
}

#[test]
fn list_reports_newest_first() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    store.ensure_root().unwrap();

    std::fs::write(store.root().join("analysis_old.csv").as_std_path(), b"x").unwrap();
    // Distinct mtimes; filesystem timestamps can be coarse.
    std::thread::sleep(std::time::Duration::from_millis(20));
    std::fs::write(store.root().join("analysis_new.csv").as_std_path(), b"y").unwrap();
    std::fs::write(store.root().join("notes.txt").as_std_path(), b"z").unwrap();

    let listed = store.list().unwrap();
    assert_eq!(
        listed,
        vec!["analysis_new.csv".to_string(), "analysis_old.csv".to_string()]
    );
}

#[test]
fn list_of_missing_root_is_empty() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn load_of_unknown_session_is_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    store.ensure_root().unwrap();

    let result = store.load("analysis_nope.csv");
    assert_matches!(result, Err(NarrascopeError::SessionNotFound(_)));
}

#[test]
fn tampered_session_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    store.ensure_root().unwrap();

    std::fs::write(
        store.root().join("analysis_bad.csv").as_std_path(),
        b"Tweet,Datetime\nhi,2020-11-01\n",
    )
    .unwrap();

    let result = store.load("analysis_bad.csv");
    assert_matches!(result, Err(NarrascopeError::SessionParse(_)));
}
