// src/ingest/mod.rs
pub mod aggregate;
pub mod classify;
pub mod enrich;
pub mod executor;
pub mod paginator;
pub mod providers;
pub mod sink;
pub mod transport;
pub mod types;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::{IngestConfig, ProviderConfig};
use crate::error::IngestError;
use crate::ingest::aggregate::{Aggregator, IngestSummary};
use crate::ingest::classify::{classify, ClassifyPolicy};
use crate::ingest::enrich::DetailEnricher;
use crate::ingest::executor::{RequestExecutor, RetryPolicy};
use crate::ingest::paginator::{PageEvent, PageLimits, Paginator, PaginatorState, StopReason};
use crate::ingest::providers::clob::ClobProvider;
use crate::ingest::sink::OutputSink;
use crate::ingest::transport::{HttpTransport, Transport};
use crate::ingest::types::{ClassifiedRecord, RawItem};

/// Describe the pipeline series once per process, before the first run records them.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_pages_total", "Listing pages fetched.");
        describe_counter!(
            "ingest_items_total",
            "Raw items handed to the classifier."
        );
        describe_counter!("ingest_accepted_total", "Items accepted.");
        describe_counter!("ingest_skipped_total", "Items skipped by policy.");
        describe_counter!(
            "ingest_quarantined_total",
            "Items quarantined as unprocessable."
        );
        describe_counter!(
            "ingest_fetch_retries_total",
            "Retries issued by the request executor."
        );
        describe_counter!(
            "ingest_enrich_failures_total",
            "Detail lookups that failed or returned junk."
        );
        describe_counter!("ingest_runs_aborted_total", "Runs that ended ABORTED.");
        describe_counter!(
            "ingest_stalled_cursor_total",
            "Listing pages whose next cursor did not advance."
        );
        describe_histogram!(
            "ingest_page_fetch_ms",
            "Listing page fetch time in milliseconds, retries included."
        );
        describe_gauge!(
            "ingest_last_run_ts",
            "Unix ts when the ingest pipeline last flushed."
        );
    });
}

/// Per-run switches derived from [`IngestConfig`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub limits: PageLimits,
    pub enrich: bool,
    pub checkpoint_each_page: bool,
    pub deadline: Option<Duration>,
    pub policy: ClassifyPolicy,
}

impl RunOptions {
    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self {
            limits: PageLimits {
                fetch_limit: cfg.fetch_limit,
                max_pages: cfg.max_pages,
            },
            enrich: cfg.enrich,
            checkpoint_each_page: cfg.checkpoint_each_page,
            deadline: cfg.deadline_secs.map(Duration::from_secs),
            policy: ClassifyPolicy {
                skip_archived: cfg.skip_archived,
            },
        }
    }
}

/// Everything a run needs, assembled before the first request.
pub struct IngestContext {
    pub provider: ClobProvider,
    pub executor: RequestExecutor,
    pub options: RunOptions,
}

impl IngestContext {
    /// Production wiring over `reqwest`.
    pub fn from_config(cfg: &IngestConfig, provider: ProviderConfig) -> Result<Self, IngestError> {
        let transport = HttpTransport::new(Duration::from_secs(cfg.request_timeout_secs.max(1)))?;
        Ok(Self::with_transport(cfg, provider, Arc::new(transport)))
    }

    pub fn with_transport(
        cfg: &IngestConfig,
        provider: ProviderConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            provider: ClobProvider::new(provider, cfg.envelope.clone()),
            executor: RequestExecutor::new(transport, RetryPolicy::from(&cfg.retry)),
            options: RunOptions::from_config(cfg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortCause {
    /// A page after the first could not be fetched.
    Fetch { page: usize, error: String },
    /// The run deadline passed between pages.
    Deadline { elapsed_ms: u64 },
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::Fetch { page, error } => write!(f, "page {page} failed: {error}"),
            AbortCause::Deadline { elapsed_ms } => write!(f, "deadline hit after {elapsed_ms} ms"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { reason: StopReason },
    Aborted { cause: AbortCause },
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub summary: IngestSummary,
    pub pages: usize,
    pub flushes: usize,
}

/// Fetch, classify, enrich and persist one full snapshot.
///
/// Returns `Err` for a first-page fetch failure (nothing written) or a failed
/// flush. A later page failure or an expired deadline still flushes what was
/// collected and reports [`RunOutcome::Aborted`].
pub async fn run_ingest(ctx: &IngestContext, sink: &dyn OutputSink) -> Result<RunReport, IngestError> {
    ensure_metrics_described();
    let started = Instant::now();
    let opts = &ctx.options;

    let mut agg = Aggregator::new(Utc::now());
    let mut paginator = Paginator::new(&ctx.provider, &ctx.executor, opts.limits);
    let enricher = opts
        .enrich
        .then(|| DetailEnricher::new(&ctx.provider, &ctx.executor));
    let mut flushes = 0usize;

    tracing::info!(
        provider = ctx.provider.name(),
        fetch_limit = opts.limits.fetch_limit,
        max_pages = opts.limits.max_pages,
        enrich = opts.enrich,
        max_attempts = ctx.executor.policy().max_attempts,
        "ingest run starting"
    );

    let outcome = loop {
        if let Some(deadline) = opts.deadline {
            let elapsed = started.elapsed();
            if matches!(paginator.state(), PaginatorState::More) && elapsed >= deadline {
                break RunOutcome::Aborted {
                    cause: AbortCause::Deadline {
                        elapsed_ms: elapsed.as_millis() as u64,
                    },
                };
            }
        }

        match paginator.next_page().await? {
            PageEvent::Items(items) => {
                counter!("ingest_items_total").increment(items.len() as u64);
                for item in items {
                    let rec = process_item(&item, &opts.policy, enricher.as_ref(), &mut agg).await;
                    agg.record(rec);
                }
                if opts.checkpoint_each_page {
                    sink.store(&agg.snapshot()).await?;
                    flushes += 1;
                    tracing::debug!(page = paginator.pages_fetched(), "checkpoint flushed");
                }
            }
            PageEvent::Done(reason) => break RunOutcome::Completed { reason },
            PageEvent::Aborted(e) => {
                break RunOutcome::Aborted {
                    cause: AbortCause::Fetch {
                        page: paginator.pages_fetched() + 1,
                        error: e.to_string(),
                    },
                }
            }
        }
    };

    sink.store(&agg.snapshot()).await?;
    flushes += 1;
    gauge!("ingest_last_run_ts").set(Utc::now().timestamp().max(0) as f64);

    let summary = agg.summary();
    match &outcome {
        RunOutcome::Completed { reason } => tracing::info!(
            target: "ingest",
            reason = reason.as_str(),
            pages = paginator.pages_fetched(),
            items = paginator.items_emitted(),
            %summary,
            "ingest run complete"
        ),
        RunOutcome::Aborted { cause } => {
            counter!("ingest_runs_aborted_total").increment(1);
            tracing::error!(
                target: "ingest",
                cause = %cause,
                pages = paginator.pages_fetched(),
                items = paginator.items_emitted(),
                %summary,
                "ingest run aborted, partial results saved"
            );
        }
    }

    Ok(RunReport {
        outcome,
        summary,
        pages: paginator.pages_fetched(),
        flushes,
    })
}

async fn process_item(
    item: &RawItem,
    policy: &ClassifyPolicy,
    enricher: Option<&DetailEnricher<'_>>,
    agg: &mut Aggregator,
) -> ClassifiedRecord {
    match (classify(item, policy), enricher) {
        (ClassifiedRecord::Accepted(market), Some(enricher)) => {
            let market = enricher.enrich(market).await;
            agg.note_enrichment(market.metadata.details.is_some());
            ClassifiedRecord::Accepted(market)
        }
        (rec, _) => rec,
    }
}
