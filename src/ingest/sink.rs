// src/ingest/sink.rs
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result as AnyResult;
use serde::Serialize;

use crate::error::IngestError;
use crate::ingest::aggregate::OutputSnapshot;

pub const MARKET_METADATA_FILE: &str = "market_metadata.json";
pub const MARKET_LIST_FILE: &str = "market_list.json";
pub const SKIPPED_MARKETS_FILE: &str = "skipped_markets.json";

#[async_trait::async_trait]
pub trait OutputSink: Send + Sync {
    /// Persist a full snapshot, replacing whatever the previous flush wrote.
    async fn store(&self, snapshot: &OutputSnapshot) -> Result<(), IngestError>;
}

/// Writes the three output files into one directory. Each file is replaced
/// through a temp file + rename, so a reader never sees a half-written file.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self) -> [PathBuf; 3] {
        [
            self.dir.join(MARKET_METADATA_FILE),
            self.dir.join(MARKET_LIST_FILE),
            self.dir.join(SKIPPED_MARKETS_FILE),
        ]
    }
}

#[async_trait::async_trait]
impl OutputSink for FileSink {
    async fn store(&self, snapshot: &OutputSnapshot) -> Result<(), IngestError> {
        // Encode everything up front so an encoding failure touches no file.
        let files = [
            (MARKET_METADATA_FILE, encode("market_metadata", &snapshot.market_metadata)?),
            (MARKET_LIST_FILE, encode("market_list", &snapshot.market_list)?),
            (SKIPPED_MARKETS_FILE, encode("skipped_markets", &snapshot.skipped_markets)?),
        ];

        fs::create_dir_all(&self.dir).map_err(|source| IngestError::Persist {
            file: self.dir.clone(),
            written: Vec::new(),
            source,
        })?;

        let mut written = Vec::with_capacity(files.len());
        for (name, bytes) in files {
            let path = self.dir.join(name);
            if let Err(source) = write_atomic(&path, &bytes) {
                tracing::error!(file = %path.display(), error = %source, written = written.len(), "failed to save output");
                return Err(IngestError::Persist {
                    file: path,
                    written,
                    source,
                });
            }
            tracing::info!(file = %path.display(), bytes = bytes.len(), "saved output");
            written.push(path);
        }
        Ok(())
    }
}

fn encode<T: Serialize + ?Sized>(name: &'static str, value: &T) -> Result<Vec<u8>, IngestError> {
    // serde_json's pretty printer indents with two spaces.
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|source| IngestError::Encode { name, source })?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let result = (|| {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Read back the identifier list written by a [`FileSink`].
pub fn read_market_list(dir: &Path) -> AnyResult<Vec<String>> {
    use anyhow::Context;
    let path = dir.join(MARKET_LIST_FILE);
    let s = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_str(&s)?)
}

// --- Test helper ---
pub struct MockSink {
    pub calls: std::sync::Mutex<Vec<OutputSnapshot>>,
    fail: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            calls: std::sync::Mutex::new(vec![]),
            fail: false,
        }
    }

    /// A sink whose every store fails with an I/O error.
    pub fn failing() -> Self {
        Self {
            calls: std::sync::Mutex::new(vec![]),
            fail: true,
        }
    }

    pub fn flushes(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<OutputSnapshot> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl OutputSink for MockSink {
    async fn store(&self, snapshot: &OutputSnapshot) -> Result<(), IngestError> {
        self.calls.lock().unwrap().push(snapshot.clone());
        if self.fail {
            return Err(IngestError::Persist {
                file: PathBuf::from(MARKET_METADATA_FILE),
                written: Vec::new(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "mock failure"),
            });
        }
        Ok(())
    }
}
