use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

/// The main error type for labelport operations.
///
/// Per-record problems (unparsable annotations, out-of-bounds boxes, labels
/// outside the target vocabulary) are *not* represented here: those are
/// absorbed locally with counters and log entries. Only run-terminating
/// conditions surface as `LabelportError`.
#[derive(Debug, Error)]
pub enum LabelportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{format}' validation failed for {}: {reason}", .path.display())]
    FormatValidation {
        format: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Unknown format: '{0}'")]
    UnknownFormat(String),

    #[error("No registered format accepted {}: {}", .path.display(), summarize_attempts(.attempts))]
    FormatProbeFailed {
        path: PathBuf,
        attempts: Vec<(&'static str, String)>,
    },

    #[error("Failed to parse payload from {}: {source}", .path.display())]
    PayloadParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize payload: {0}")]
    PayloadSerialize(#[from] serde_json::Error),

    #[error("Failed to write {}: {source}", .path.display())]
    PayloadWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to parse VOC XML from {}: {message}", .path.display())]
    VocXmlParse { path: PathBuf, message: String },

    #[error("alias '{alias}' is claimed by both '{first}' and '{second}'")]
    AliasConflict {
        alias: String,
        first: String,
        second: String,
    },

    #[error("annotation store error: {0}")]
    Store(#[from] StoreError),
}

fn summarize_attempts(attempts: &[(&'static str, String)]) -> String {
    attempts
        .iter()
        .map(|(name, reason)| format!("{name} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}
