//! market-ingest: batch job entrypoint.
//! Loads config + credentials, runs one ingestion snapshot, prints the counts.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_ingest::config::{load_config_default, load_config_from};
use market_ingest::metrics::Metrics;
use market_ingest::{run_ingest, FileSink, IngestConfig, IngestContext, ProviderConfig, RunOutcome, RunReport};

#[derive(Parser)]
#[command(name = "market-ingest", about = "Fetch market listings into JSON snapshots")]
struct Cli {
    /// TOML/JSON config file (defaults: $INGEST_CONFIG_PATH, config/ingest.{toml,json})
    #[arg(long)]
    config: Option<PathBuf>,
    /// Maximum number of markets to fetch
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    max_pages: Option<usize>,
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Skip per-market detail lookups
    #[arg(long, default_value_t = false)]
    no_enrich: bool,
    /// Abort (keeping partial results) once this many seconds have passed
    #[arg(long)]
    deadline_secs: Option<u64>,
    #[arg(long, default_value_t = false)]
    checkpoint_each_page: bool,
    #[arg(long, default_value_t = false)]
    skip_archived: bool,
    /// Write a Prometheus text snapshot here when the run ends
    #[arg(long)]
    metrics_out: Option<PathBuf>,
    /// Print the run report as JSON on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl Cli {
    fn apply(&self, mut cfg: IngestConfig) -> IngestConfig {
        if let Some(limit) = self.limit {
            cfg.fetch_limit = limit;
        }
        if let Some(pages) = self.max_pages {
            cfg.max_pages = pages;
        }
        if let Some(dir) = &self.out_dir {
            cfg.out_dir = dir.clone();
        }
        if self.no_enrich {
            cfg.enrich = false;
        }
        if self.deadline_secs.is_some() {
            cfg.deadline_secs = self.deadline_secs;
        }
        cfg.checkpoint_each_page |= self.checkpoint_each_page;
        cfg.skip_archived |= self.skip_archived;
        cfg.sanitized()
    }
}

/// Respects RUST_LOG; `INGEST_LOG_FORMAT=json` switches to JSON lines.
/// Logs go to stderr so stdout carries only the summary.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_ingest=info,ingest=info,warn"));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let registry = tracing_subscriber::registry().with(filter);

    match std::env::var("INGEST_LOG_FORMAT").as_deref() {
        Ok("json") => {
            let _ = registry.with(fmt_layer.json().flatten_event(true)).try_init();
        }
        _ => {
            let _ = registry.with(fmt_layer.compact()).try_init();
        }
    }
}

async fn run(cli: &Cli) -> Result<RunReport> {
    let cfg = match &cli.config {
        Some(p) => load_config_from(p)?,
        None => load_config_default()?,
    };
    let cfg = cli.apply(cfg);

    let metrics = match &cli.metrics_out {
        Some(_) => Some(Metrics::init()?),
        None => None,
    };

    let provider = ProviderConfig::from_env()?;
    let ctx = IngestContext::from_config(&cfg, provider)?;
    let sink = FileSink::new(&cfg.out_dir);

    let report = run_ingest(&ctx, &sink).await;

    if let (Some(m), Some(path)) = (&metrics, &cli.metrics_out) {
        if let Err(e) = m.write_snapshot(path) {
            tracing::warn!(error = %e, "metrics snapshot not written");
        }
    }
    report.with_context(|| format!("ingesting into {}", sink.dir().display()))
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    match &report.outcome {
        RunOutcome::Completed { reason } => {
            println!("Ingest complete ({}) after {} page(s)", reason.as_str(), report.pages)
        }
        RunOutcome::Aborted { cause } => {
            println!("Ingest ABORTED after {} page(s): {cause}", report.pages)
        }
    }
    println!("{}", report.summary);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(report) => {
            if let Err(e) = print_report(&report, cli.json) {
                tracing::warn!(error = %e, "could not print report");
            }
            if report.outcome.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(e) => {
            let msg = format!("{e:#}");
            tracing::error!(error = %msg, "ingest failed");
            eprintln!("ingest failed: {msg}");
            ExitCode::from(1)
        }
    }
}
