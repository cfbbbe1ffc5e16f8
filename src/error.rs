use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum NarrascopeError {
    #[error("invalid dataset name: {0}")]
    InvalidDatasetName(String),

    #[error("target narrative must be text between 3 and 500 characters")]
    InvalidNarrative,

    #[error("target narrative too short after removing markup: {0:?}")]
    NarrativeTooShortAfterStrip(String),

    #[error("no datasets selected")]
    NoDatasetsSelected,

    #[error("CSV file is empty")]
    EmptyCsv,

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("No valid tweet data found. Make sure the Tweet column contains text.")]
    NoTweetData,

    #[error("Invalid date format: {0:?}. Please use YYYY-MM-DD HH:MM:SS or YYYY-MM-DD format.")]
    InvalidDate(String),

    #[error("authentication failed: please log in again")]
    AuthExpired,

    #[error("scoring service request failed: {0}")]
    ScoringHttp(String),

    #[error("scoring service returned status {status}: {message}")]
    ScoringStatus { status: u16, message: String },

    #[error("failed to parse session file: {0}")]
    SessionParse(String),

    #[error("session file not found: {0}")]
    SessionNotFound(String),

    #[error("failed to read config file at {}", .0.display())]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl NarrascopeError {
    /// Validation errors abort an operation before any request is issued
    /// and leave no partial state behind.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NarrascopeError::InvalidDatasetName(_)
                | NarrascopeError::InvalidNarrative
                | NarrascopeError::NarrativeTooShortAfterStrip(_)
                | NarrascopeError::NoDatasetsSelected
                | NarrascopeError::EmptyCsv
                | NarrascopeError::MissingColumns(_)
                | NarrascopeError::NoTweetData
                | NarrascopeError::InvalidDate(_)
        )
    }

    /// Auth errors must terminate the user session wherever they surface.
    pub fn is_auth(&self) -> bool {
        matches!(self, NarrascopeError::AuthExpired)
    }
}
