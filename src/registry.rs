use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::{DatasetName, RawRow};

/// Registry of locally uploaded datasets. Clonable handle over shared
/// state; registration is atomic with respect to readers, so an analysis
/// running concurrently with an upload sees either the old rows or the new
/// ones, never a torn write.
///
/// Uploaded entries shadow same-named server-side datasets: a name present
/// in both sources is always treated as local.
#[derive(Clone, Default)]
pub struct DatasetRegistry {
    uploads: Arc<RwLock<Vec<(String, Vec<RawRow>)>>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or overwrite) the uploaded rows for `name`. Subsequent
    /// fetches for that name use these rows until overwritten.
    pub fn register(&self, name: &DatasetName, rows: Vec<RawRow>) {
        let mut uploads = self.uploads.write();
        match uploads.iter_mut().find(|(n, _)| n == name.as_str()) {
            Some(entry) => entry.1 = rows,
            None => uploads.push((name.as_str().to_string(), rows)),
        }
    }

    pub fn is_local(&self, name: &DatasetName) -> bool {
        self.uploads
            .read()
            .iter()
            .any(|(n, _)| n == name.as_str())
    }

    /// Snapshot of the uploaded rows for `name`, or `None` when the name is
    /// not local. Callers branch on `is_local` first; `None` here means the
    /// dataset must be fetched from the service by name.
    pub fn rows_for(&self, name: &DatasetName) -> Option<Vec<RawRow>> {
        self.uploads
            .read()
            .iter()
            .find(|(n, _)| n == name.as_str())
            .map(|(_, rows)| rows.clone())
    }

    /// Union of uploaded names (in upload order) and a remote listing,
    /// deduplicated. Uploads come first so a same-named remote file never
    /// shadows local data.
    pub fn list_available(&self, remote: &[String]) -> Vec<String> {
        let uploads = self.uploads.read();
        let mut names: Vec<String> = uploads.iter().map(|(n, _)| n.clone()).collect();
        for name in remote {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.clone());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn name(value: &str) -> DatasetName {
        value.parse().unwrap()
    }

    fn row(tweet: &str) -> RawRow {
        let mut row = RawRow::new();
        row.insert("Tweet".to_string(), json!(tweet));
        row
    }

    #[test]
    fn register_and_read_back() {
        let registry = DatasetRegistry::new();
        let uploaded = name("uploaded.csv");
        assert!(!registry.is_local(&uploaded));
        assert!(registry.rows_for(&uploaded).is_none());

        registry.register(&uploaded, vec![row("a"), row("b")]);
        assert!(registry.is_local(&uploaded));
        assert_eq!(registry.rows_for(&uploaded).unwrap().len(), 2);
    }

    #[test]
    fn register_overwrites() {
        let registry = DatasetRegistry::new();
        let uploaded = name("uploaded.csv");
        registry.register(&uploaded, vec![row("old")]);
        registry.register(&uploaded, vec![row("new"), row("rows")]);
        assert_eq!(registry.rows_for(&uploaded).unwrap().len(), 2);
    }

    #[test]
    fn local_takes_precedence_over_remote() {
        let registry = DatasetRegistry::new();
        let shared = name("full_tweets.csv");
        registry.register(&shared, vec![row("local copy")]);

        let remote = vec!["full_tweets.csv".to_string(), "other.csv".to_string()];
        let names = registry.list_available(&remote);
        assert_eq!(names, vec!["full_tweets.csv", "other.csv"]);
        assert!(registry.is_local(&shared));
        assert_eq!(registry.rows_for(&shared).unwrap().len(), 1);
    }

    #[test]
    fn remote_failure_degrades_to_uploads_only() {
        let registry = DatasetRegistry::new();
        registry.register(&name("mine.csv"), vec![row("x")]);
        // The orchestrator passes an empty remote listing when the service
        // call fails; listing must still work.
        assert_eq!(registry.list_available(&[]), vec!["mine.csv"]);
    }
}
