// src/ingest/aggregate.rs
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::ingest::types::{ClassifiedRecord, MarketMetadata, RawItem};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub attempted: usize,
    pub accepted: usize,
    pub skipped: usize,
    pub quarantined: usize,
    pub enriched: usize,
    pub enrich_failed: usize,
    /// Accepted records whose identifier was already seen in this run.
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Skipped,
    Quarantined,
}

/// One line of the quarantine output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub identifier: Option<String>,
    pub reason: String,
    pub disposition: Disposition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Kept in memory for diagnostics, never written.
    #[serde(skip)]
    pub raw: Option<RawItem>,
}

/// `{"metadata": {...}}`, the value shape of the accepted-records file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub metadata: MarketMetadata,
}

/// Everything a flush writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSnapshot {
    pub market_metadata: BTreeMap<String, MetadataEntry>,
    pub market_list: Vec<String>,
    pub skipped_markets: Vec<QuarantineEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub counts: RunCounts,
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        write!(
            f,
            "attempted={} accepted={} skipped={} quarantined={} enriched={} enrich_failed={}",
            c.attempted, c.accepted, c.skipped, c.quarantined, c.enriched, c.enrich_failed
        )
    }
}

/// Accumulates classified records for a single run.
#[derive(Debug)]
pub struct Aggregator {
    fetched_at: DateTime<Utc>,
    accepted: BTreeMap<String, MarketMetadata>,
    order: Vec<String>,
    seen: HashSet<String>,
    quarantine: Vec<QuarantineEntry>,
    counts: RunCounts,
}

impl Aggregator {
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            fetched_at,
            accepted: BTreeMap::new(),
            order: Vec::new(),
            seen: HashSet::new(),
            quarantine: Vec::new(),
            counts: RunCounts::default(),
        }
    }

    pub fn record(&mut self, rec: ClassifiedRecord) {
        self.counts.attempted += 1;
        match rec {
            ClassifiedRecord::Accepted(m) => {
                self.counts.accepted += 1;
                counter!("ingest_accepted_total").increment(1);
                if self.seen.insert(m.identifier.clone()) {
                    self.order.push(m.identifier.clone());
                } else {
                    self.counts.duplicates += 1;
                    tracing::debug!(market = %m.identifier, "duplicate identifier, last write wins");
                }
                self.accepted.insert(m.identifier, m.metadata);
            }
            ClassifiedRecord::Skipped { identifier, reason } => {
                self.counts.skipped += 1;
                counter!("ingest_skipped_total").increment(1);
                tracing::debug!(market = ?identifier, reason = reason.code(), "skipped");
                self.quarantine.push(QuarantineEntry {
                    identifier,
                    reason: reason.code().to_string(),
                    disposition: Disposition::Skipped,
                    detail: None,
                    raw: None,
                });
            }
            ClassifiedRecord::Quarantined { raw, error } => {
                self.counts.quarantined += 1;
                counter!("ingest_quarantined_total").increment(1);
                tracing::warn!(
                    market = ?error.identifier,
                    reason = error.reason.code(),
                    detail = %error.detail,
                    "quarantined"
                );
                self.quarantine.push(QuarantineEntry {
                    identifier: error.identifier,
                    reason: error.reason.code().to_string(),
                    disposition: Disposition::Quarantined,
                    detail: Some(error.detail),
                    raw: Some(raw),
                });
            }
        }
    }

    pub fn note_enrichment(&mut self, succeeded: bool) {
        if succeeded {
            self.counts.enriched += 1;
        } else {
            self.counts.enrich_failed += 1;
        }
    }

    pub fn counts(&self) -> RunCounts {
        self.counts
    }

    pub fn summary(&self) -> IngestSummary {
        IngestSummary {
            fetched_at: self.fetched_at,
            counts: self.counts,
        }
    }

    pub fn quarantined(&self) -> &[QuarantineEntry] {
        &self.quarantine
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        OutputSnapshot {
            market_metadata: self
                .accepted
                .iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        MetadataEntry {
                            metadata: v.clone(),
                        },
                    )
                })
                .collect(),
            market_list: self
                .order
                .iter()
                .filter(|id| !id.is_empty())
                .cloned()
                .collect(),
            skipped_markets: self.quarantine.clone(),
        }
    }
}
