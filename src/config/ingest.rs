// src/config/ingest.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";

/// Knobs of one ingestion run. Every field has a default so a partial file
/// (or no file at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Upper bound on items handed to the classifier in one run.
    pub fetch_limit: usize,
    /// Hard ceiling on listing requests, independent of cursor behaviour.
    pub max_pages: usize,
    /// Directory receiving the three output files.
    pub out_dir: PathBuf,
    /// Issue per-market detail lookups.
    pub enrich: bool,
    /// Flush after every page in addition to the final flush.
    pub checkpoint_each_page: bool,
    /// Wall-clock budget, checked between pages.
    pub deadline_secs: Option<u64>,
    /// Route `archived: true` markets to the skipped set.
    pub skip_archived: bool,
    pub request_timeout_secs: u64,
    pub retry: RetrySettings,
    pub envelope: EnvelopeSettings,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 500,
            max_pages: 100,
            out_dir: PathBuf::from("."),
            enrich: true,
            checkpoint_each_page: false,
            deadline_secs: None,
            skip_archived: false,
            request_timeout_secs: 20,
            retry: RetrySettings::default(),
            envelope: EnvelopeSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Cap applied to provider-supplied `Retry-After` values.
    pub max_retry_after_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_retry_after_secs: 60,
        }
    }
}

/// Field names of the paginated listing envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeSettings {
    pub items_field: String,
    pub cursor_field: String,
    /// Cursor value the provider returns on the last page.
    pub terminal_cursor: String,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            items_field: "data".to_string(),
            cursor_field: "next_cursor".to_string(),
            terminal_cursor: "LTE=".to_string(),
        }
    }
}

impl IngestConfig {
    /// Clamp values that would make a run meaningless or unbounded.
    pub fn sanitized(mut self) -> Self {
        if self.max_pages == 0 {
            self.max_pages = 1;
        }
        if self.retry.max_attempts == 0 {
            self.retry.max_attempts = 1;
        }
        if self.envelope.items_field.trim().is_empty() {
            self.envelope.items_field = EnvelopeSettings::default().items_field;
        }
        if self.envelope.cursor_field.trim().is_empty() {
            self.envelope.cursor_field = EnvelopeSettings::default().cursor_field;
        }
        self
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing ingest config {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $INGEST_CONFIG_PATH
/// 2) config/ingest.toml
/// 3) config/ingest.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<IngestConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/ingest.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/ingest.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(IngestConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<IngestConfig> {
    let cfg = match hint_ext {
        "json" => serde_json::from_str::<IngestConfig>(s)?,
        "toml" => toml::from_str::<IngestConfig>(s)?,
        // Unknown extension: JSON documents start with '{'.
        _ if s.trim_start().starts_with('{') => serde_json::from_str::<IngestConfig>(s)?,
        _ => toml::from_str::<IngestConfig>(s)?,
    };
    Ok(cfg.sanitized())
}
