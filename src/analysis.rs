use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::domain::{AnalysisParams, DatasetName, NarrativePair, RawRow, SessionMetadata};
use crate::error::NarrascopeError;
use crate::record::{normalize, AnalysisRecord, COL_DATASET};
use crate::registry::DatasetRegistry;
use crate::scoring::{SavedSession, ScoreRequest, ScoringClient};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// One per-dataset series from the grouped view, in selection order.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSeries {
    pub name: String,
    pub records: Vec<AnalysisRecord>,
}

/// Result of one analysis run: the merged, time-ordered record set and its
/// per-dataset grouping. Replaces any previous outcome wholesale.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub records: Vec<AnalysisRecord>,
    pub grouped: Vec<DatasetSeries>,
}

/// Ticket for one issued run. An outcome is applied only while its ticket
/// is still the latest issued, so racing runs resolve last-applied-wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken(u64);

#[derive(Clone)]
pub struct App<S: ScoringClient> {
    scoring: S,
    registry: DatasetRegistry,
    generation: Arc<AtomicU64>,
    current: Arc<Mutex<Option<AnalysisOutcome>>>,
}

impl<S: ScoringClient> App<S> {
    pub fn new(scoring: S, registry: DatasetRegistry) -> Self {
        Self {
            scoring,
            registry,
            generation: Arc::new(AtomicU64::new(0)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    /// Issue a run ticket. Tickets are monotonically increasing; issuing a
    /// new one supersedes every earlier ticket.
    pub fn begin_run(&self) -> RunToken {
        RunToken(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Install `outcome` as the current result if `token` is still the
    /// latest issued. Superseded outcomes are discarded.
    pub fn apply(&self, token: RunToken, outcome: AnalysisOutcome) -> bool {
        let mut current = self.current.lock();
        if token.0 == self.generation.load(Ordering::SeqCst) {
            *current = Some(outcome);
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<AnalysisOutcome> {
        self.current.lock().clone()
    }

    /// Fetch and merge scored rows for every selected dataset.
    ///
    /// One request per dataset runs concurrently; every returned row is
    /// tagged with its dataset name before flattening, so provenance
    /// survives even when two datasets return identically shaped rows. The
    /// merged set is stable-sorted by timestamp and regrouped per dataset.
    /// Any per-dataset failure fails the whole run.
    pub fn run_analysis(
        &self,
        params: &AnalysisParams,
        sink: &dyn ProgressSink,
    ) -> Result<AnalysisOutcome, NarrascopeError> {
        if params.selected_datasets.is_empty() {
            return Err(NarrascopeError::NoDatasetsSelected);
        }
        let request = ScoreRequest {
            start_date: params.start_date.clone(),
            end_date: params.end_date.clone(),
            target_narrative: params.target_narrative.as_str().to_string(),
            threshold: params.threshold,
        };

        sink.event(ProgressEvent {
            message: format!(
                "phase=Score; {} dataset(s) selected",
                params.selected_datasets.len()
            ),
            elapsed: None,
        });
        let start = std::time::Instant::now();
        let results: Vec<Result<Vec<RawRow>, NarrascopeError>> = thread::scope(|scope| {
            let handles: Vec<_> = params
                .selected_datasets
                .iter()
                .map(|name| {
                    let request = &request;
                    scope.spawn(move || self.score_one(request, name))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(NarrascopeError::ScoringHttp(
                            "scoring worker panicked".to_string(),
                        ))
                    })
                })
                .collect()
        });
        sink.event(ProgressEvent {
            message: "scoring.response".to_string(),
            elapsed: Some(start.elapsed()),
        });

        // First failure in selection order fails the whole run; results of
        // the other in-flight requests are discarded.
        let mut tagged: Vec<Vec<RawRow>> = Vec::with_capacity(results.len());
        for (name, result) in params.selected_datasets.iter().zip(results) {
            let mut rows = result?;
            for row in &mut rows {
                row.insert(
                    COL_DATASET.to_string(),
                    serde_json::Value::from(name.as_str()),
                );
            }
            tagged.push(rows);
        }

        let mut records: Vec<AnalysisRecord> = tagged
            .into_iter()
            .flatten()
            .map(|row| normalize(&row))
            .collect();
        records.sort_by_key(|record| record.timestamp_ms);

        let grouped = params
            .selected_datasets
            .iter()
            .map(|name| {
                let mut group: Vec<AnalysisRecord> = records
                    .iter()
                    .filter(|record| record.dataset_name == name.as_str())
                    .cloned()
                    .collect();
                // Groups are consumed in isolation downstream; sort each
                // independently of the parent collection.
                group.sort_by_key(|record| record.timestamp_ms);
                DatasetSeries {
                    name: name.as_str().to_string(),
                    records: group,
                }
            })
            .collect();

        Ok(AnalysisOutcome { records, grouped })
    }

    /// `run_analysis` wrapped in the last-applied-wins protocol: the ticket
    /// is issued before any request, the outcome applied after. Returns the
    /// outcome plus whether it became current.
    pub fn run_and_apply(
        &self,
        params: &AnalysisParams,
        sink: &dyn ProgressSink,
    ) -> Result<(AnalysisOutcome, bool), NarrascopeError> {
        let token = self.begin_run();
        let outcome = self.run_analysis(params, sink)?;
        let applied = self.apply(token, outcome.clone());
        if !applied {
            warn!("analysis run superseded; discarding results");
        }
        Ok((outcome, applied))
    }

    fn score_one(
        &self,
        request: &ScoreRequest,
        name: &DatasetName,
    ) -> Result<Vec<RawRow>, NarrascopeError> {
        if self.registry.is_local(name) {
            match self.registry.rows_for(name) {
                Some(rows) => self.scoring.score_upload(request, &rows),
                None => self.scoring.score_dataset(request, name),
            }
        } else {
            self.scoring.score_dataset(request, name)
        }
    }

    /// Names a fetch may target: the remote listing unioned with uploads.
    /// A failed remote listing degrades to uploads-only, except auth
    /// failures, which always propagate.
    pub fn list_datasets(&self) -> Result<Vec<String>, NarrascopeError> {
        let remote = match self.scoring.list_datasets() {
            Ok(files) => files,
            Err(err) if err.is_auth() => return Err(err),
            Err(err) => {
                warn!(error = %err, "dataset listing unavailable, using uploads only");
                Vec::new()
            }
        };
        Ok(self.registry.list_available(&remote))
    }

    pub fn generate_narratives(
        &self,
        records: &[AnalysisRecord],
        num_narratives: usize,
    ) -> Result<Vec<NarrativePair>, NarrascopeError> {
        let rows: Vec<RawRow> = records.iter().map(AnalysisRecord::to_raw).collect();
        self.scoring.generate_narratives(&rows, num_narratives)
    }

    /// Persist a record set server-side. Metadata is regenerated from the
    /// current parameters, never copied from a loaded session.
    pub fn save_remote(
        &self,
        records: &[AnalysisRecord],
        params: &AnalysisParams,
    ) -> Result<SavedSession, NarrascopeError> {
        let rows: Vec<RawRow> = records.iter().map(AnalysisRecord::to_raw).collect();
        let metadata = SessionMetadata::from_params(params, rows.len());
        self.scoring.save_session(&rows, &metadata)
    }

    pub fn list_remote_sessions(&self) -> Result<Vec<String>, NarrascopeError> {
        self.scoring.list_sessions()
    }

    /// Load a server-side session; rows pass through the same normalizer as
    /// every other source.
    pub fn load_remote_session(
        &self,
        filename: &str,
    ) -> Result<Vec<AnalysisRecord>, NarrascopeError> {
        let rows = self.scoring.load_session(filename)?;
        Ok(rows.iter().map(normalize).collect())
    }
}
