pub mod ingest;
pub mod provider;

pub use ingest::{
    load_config_default, load_config_from, EnvelopeSettings, IngestConfig, RetrySettings,
};
pub use provider::{ApiCredentials, ProviderConfig};
