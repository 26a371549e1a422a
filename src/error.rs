//! Error taxonomy for the worker's subsystems.
//!
//! Call sites (the worker loop, HTTP handlers, `main`) compose these into
//! `anyhow::Result`; module boundaries return the typed variants so a log
//! line or an HTTP error body can name the failing subsystem.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to fetch model artifact {name}: {source}")]
    Fetch {
        name: &'static str,
        #[source]
        source: ureq::Error,
    },
    #[error("failed to write model artifact to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to construct inference session for {0}: {1}")]
    SessionInit(&'static str, String),
}

/// The outcome of one pipeline stage for a single photo.
///
/// Per the Design Notes, a stage never silently swallows a failure into an
/// undifferentiated `Result<(), anyhow::Error>` — the worker loop matches on
/// this explicitly so a tagging failure isn't logged or counted as a
/// face-detection failure.
#[derive(Debug, Clone)]
pub enum StageOutcome<T> {
    Ok(T),
    Skipped { reason: &'static str },
    Failed { stage: &'static str, message: String },
}

impl<T> StageOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }

    pub fn ok(self) -> Option<T> {
        match self {
            StageOutcome::Ok(v) => Some(v),
            _ => None,
        }
    }
}
