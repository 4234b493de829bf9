//! Error taxonomy for the ingestion pipeline.
//!
//! Per-item problems never show up here: they become
//! [`ClassifiedRecord::Quarantined`](crate::ingest::types::ClassifiedRecord)
//! values. Schema drift in a page envelope is a stop reason, not an error.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single outbound call, as reported by the request executor.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS, timeout or body-read failure.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status (the body is truncated for logging).
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The provider answered 429.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// All attempts failed; `last` is the final underlying cause.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::RateLimited { .. } => true,
            FetchError::Http { status, .. } => *status >= 500,
            FetchError::Exhausted { .. } => false,
        }
    }

    /// The innermost cause, unwrapping `Exhausted`.
    pub fn root(&self) -> &FetchError {
        match self {
            FetchError::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or invalid configuration; raised before any request is made.
    #[error("configuration error: {0}")]
    Config(String),

    /// The very first page could not be fetched.
    #[error("first page fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// An output file could not be written. `written` lists files that were
    /// already replaced in this flush.
    #[error("failed to write {}: {source}{}", file.display(), replaced_note(written))]
    Persist {
        file: PathBuf,
        written: Vec<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {name}: {source}")]
    Encode {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn replaced_note(written: &[PathBuf]) -> String {
    if written.is_empty() {
        return " (no file replaced)".to_string();
    }
    let names: Vec<String> = written.iter().map(|p| p.display().to_string()).collect();
    format!(" (already replaced: {})", names.join(", "))
}
