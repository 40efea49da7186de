//! Error types for smile-sync

use thiserror::Error;

/// Errors that can occur while loading or synchronizing a trial collection
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Ambiguous source content: expected one top-level record, found {keys:?}")]
    AmbiguousSourceContent { keys: Vec<String> },

    #[error("Trial {trial_id}: missing required field {field}")]
    MissingField { trial_id: i64, field: String },

    #[error("Trial {trial_id}: degenerate signal: {reason}")]
    DegenerateSignal { trial_id: i64, reason: String },

    #[error("Trial {trial_id}: unsupported trial result code {code}")]
    UnsupportedResultCode { trial_id: i64, code: i64 },

    #[error("Trial {trial_id}: state id {state_id} not present in state table")]
    UnknownState { trial_id: i64, state_id: i64 },

    #[error("Duplicate trial id: {0}")]
    DuplicateTrial(i64),

    #[error("Failed to load trial collection: {0}")]
    FormatLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse field: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ExtractError {
    pub(crate) fn missing(trial_id: i64, field: impl Into<String>) -> Self {
        ExtractError::MissingField {
            trial_id,
            field: field.into(),
        }
    }

    pub(crate) fn degenerate(trial_id: i64, reason: impl Into<String>) -> Self {
        ExtractError::DegenerateSignal {
            trial_id,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
