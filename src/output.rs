use std::io::{self, Write};

use serde::Serialize;

use crate::analysis::AnalysisOutcome;
use crate::domain::{NarrativePair, SessionMetadata};
use crate::scoring::SavedSession;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_outcome(outcome: &AnalysisOutcome) -> io::Result<()> {
        #[derive(Serialize)]
        struct OutcomeSummary<'a> {
            total_records: usize,
            datasets: Vec<SeriesSummary<'a>>,
        }
        #[derive(Serialize)]
        struct SeriesSummary<'a> {
            name: &'a str,
            records: usize,
        }

        Self::print_json(&OutcomeSummary {
            total_records: outcome.records.len(),
            datasets: outcome
                .grouped
                .iter()
                .map(|series| SeriesSummary {
                    name: &series.name,
                    records: series.records.len(),
                })
                .collect(),
        })
    }

    pub fn print_records(outcome: &AnalysisOutcome) -> io::Result<()> {
        Self::print_json(&outcome.records)
    }

    pub fn print_names(names: &[String]) -> io::Result<()> {
        Self::print_json(&names)
    }

    pub fn print_narratives(narratives: &[NarrativePair]) -> io::Result<()> {
        Self::print_json(&narratives)
    }

    pub fn print_saved(saved: &SavedSession) -> io::Result<()> {
        #[derive(Serialize)]
        struct Saved<'a> {
            filename: &'a str,
            row_count: usize,
        }
        Self::print_json(&Saved {
            filename: &saved.filename,
            row_count: saved.row_count,
        })
    }

    pub fn print_metadata(metadata: &SessionMetadata) -> io::Result<()> {
        Self::print_json(metadata)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::analysis::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::analysis::ProgressEvent) {}
}
