// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::config::{IngestConfig, ProviderConfig};
pub use crate::error::{FetchError, IngestError};
pub use crate::ingest::sink::{FileSink, MockSink, OutputSink};
pub use crate::ingest::{run_ingest, IngestContext, RunOutcome, RunReport};
