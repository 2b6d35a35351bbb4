use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coalesce_core::timing::plan_batches;
use coalesce_core::{
    BatchObserver, ByField, FanOut, Loader, LoaderConfig, LoaderMetrics, MetricsSnapshot,
    PolicyKind, TracingObserver,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "coalesce")]
#[command(version = "0.1.0")]
#[command(about = "Coalesce - plan and simulate batched loaders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict how query arrivals group into batches
    Plan {
        #[command(flatten)]
        timing: TimingArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a real loader against an in-memory record store
    Simulate {
        #[command(flatten)]
        timing: TimingArgs,

        /// Number of distinct records queried (query = arrival index mod N)
        #[arg(long, default_value_t = 1000)]
        distinct: u32,

        /// Latency of each batch fetch in milliseconds
        #[arg(long, default_value_t = 0)]
        fetch_ms: u64,

        /// Make every batch fetch fail
        #[arg(long)]
        fail: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Timing options. Unset flags fall back to `LoaderConfig::from_env`
/// (`COALESCE_POLICY`, `COALESCE_DELAY_MS`, `COALESCE_MAX_WAIT_MS`), then to
/// a 10ms window.
#[derive(Args)]
struct TimingArgs {
    /// Timing policy (window, buffer, capped)
    #[arg(short, long)]
    policy: Option<PolicyKind>,

    /// Window length or quiet period in milliseconds
    #[arg(short, long)]
    delay_ms: Option<u64>,

    /// Upper bound on a batch's wait in milliseconds (capped only)
    #[arg(long)]
    max_wait_ms: Option<u64>,

    /// Comma-separated query arrival offsets in milliseconds
    #[arg(short, long, value_delimiter = ',', required = true)]
    arrivals: Vec<u64>,
}

impl TimingArgs {
    fn config(&self, name: &str) -> Result<LoaderConfig> {
        let mut config = LoaderConfig::from_env();
        config.name.get_or_insert_with(|| name.to_string());
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(ms) = self.delay_ms {
            config.delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_wait_ms {
            config.max_wait = Duration::from_millis(ms);
        }

        config.validate().context("Invalid timing options")?;
        Ok(config)
    }

    fn sorted_arrivals(&self) -> Vec<u64> {
        let mut arrivals = self.arrivals.clone();
        arrivals.sort_unstable();
        arrivals
    }
}

#[derive(Debug, Serialize)]
struct PlanReport {
    policy: PolicyKind,
    delay_ms: u64,
    max_wait_ms: u64,
    batches: Vec<PlanEntry>,
}

#[derive(Debug, Serialize)]
struct PlanEntry {
    arrivals_ms: Vec<u64>,
    fires_at_ms: u64,
}

#[derive(Debug, Clone)]
struct Record {
    id: u32,
    value: String,
}

#[derive(Debug, Clone, Serialize)]
struct BatchLog {
    sequence: usize,
    started_at_ms: u64,
    queries: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct SimulateReport {
    policy: PolicyKind,
    delay_ms: u64,
    max_wait_ms: u64,
    queries: usize,
    resolved: usize,
    missing: usize,
    failed: usize,
    batches: Vec<BatchLog>,
    metrics: MetricsSnapshot,
}

/// Whole milliseconds, saturating for a batch that never fires
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn plan(timing: &TimingArgs) -> Result<PlanReport> {
    let config = timing.config("plan")?;
    let arrivals = timing.sorted_arrivals();
    let offsets: Vec<Duration> = arrivals.iter().map(|ms| Duration::from_millis(*ms)).collect();

    let batches = plan_batches(config.timing_policy().as_ref(), &offsets)
        .into_iter()
        .map(|batch| PlanEntry {
            arrivals_ms: arrivals[batch.first..batch.first + batch.len].to_vec(),
            fires_at_ms: millis(batch.fires_at),
        })
        .collect();

    Ok(PlanReport {
        policy: config.policy,
        delay_ms: millis(config.delay),
        max_wait_ms: millis(config.max_wait),
        batches,
    })
}

async fn simulate(timing: &TimingArgs, distinct: u32, fetch_ms: u64, fail: bool) -> Result<SimulateReport> {
    if distinct == 0 {
        anyhow::bail!("--distinct must be at least 1");
    }
    let config = timing.config("simulate")?;
    let metrics = Arc::new(LoaderMetrics::new());
    let log: Arc<Mutex<Vec<BatchLog>>> = Arc::default();
    let epoch = Instant::now();
    let latency = Duration::from_millis(fetch_ms);

    let batch_log = Arc::clone(&log);
    let fetcher = move |ids: Vec<u32>| {
        let batch_log = Arc::clone(&batch_log);
        async move {
            {
                let mut log = batch_log.lock().await;
                let sequence = log.len();
                log.push(BatchLog {
                    sequence,
                    started_at_ms: epoch.elapsed().as_millis() as u64,
                    queries: ids.clone(),
                });
            }

            tokio::time::sleep(latency).await;
            if fail {
                return Err(format!("record store rejected a batch of {}", ids.len()));
            }
            Ok(ids
                .into_iter()
                .map(|id| Record { id, value: format!("record-{id}") })
                .collect::<Vec<_>>())
        }
    };

    let metrics_observer: Arc<dyn BatchObserver<u32>> = metrics.clone();
    let tracing_observer: Arc<dyn BatchObserver<u32>> = Arc::new(TracingObserver);
    let loader = Loader::builder(fetcher, ByField::new(|record: &Record| record.id))
        .name(config.name.clone().unwrap_or_default())
        .shared_policy(config.timing_policy())
        .observer(Arc::new(FanOut::new(vec![metrics_observer, tracing_observer])))
        .build();

    info!(
        policy = %config.policy,
        delay_ms = millis(config.delay),
        queries = timing.arrivals.len(),
        "Starting simulation"
    );

    let handles: Vec<_> = timing
        .arrivals
        .iter()
        .enumerate()
        .map(|(index, &offset)| {
            let loader = loader.clone();
            let id = index as u32 % distinct;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(offset)).await;
                loader.fetch(id).await
            })
        })
        .collect();

    let (mut resolved, mut missing, mut failed) = (0, 0, 0);
    for handle in handles {
        match handle.await.context("Query task panicked")? {
            Ok(Some(record)) => {
                debug!(id = record.id, value = %record.value, "Query resolved");
                resolved += 1;
            }
            Ok(None) => missing += 1,
            Err(e) => {
                debug!(error = %e, "Query failed");
                failed += 1;
            }
        }
    }

    let batches = log.lock().await.clone();
    info!(batches = batches.len(), resolved, failed, "Simulation finished");

    Ok(SimulateReport {
        policy: config.policy,
        delay_ms: millis(config.delay),
        max_wait_ms: millis(config.max_wait),
        queries: timing.arrivals.len(),
        resolved,
        missing,
        failed,
        batches,
        metrics: metrics.snapshot(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coalesce=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { timing, json } => {
            let report = plan(&timing)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("=== Plan ===");
            println!("Policy: {} ({}ms)", report.policy, report.delay_ms);
            if report.policy == PolicyKind::Capped {
                println!("Max wait: {}ms", report.max_wait_ms);
            }
            println!();

            for (i, batch) in report.batches.iter().enumerate() {
                println!(
                    "Batch {}: {} queries arriving at {:?}ms, fires at {}ms",
                    i,
                    batch.arrivals_ms.len(),
                    batch.arrivals_ms,
                    batch.fires_at_ms
                );
            }
        }

        Commands::Simulate {
            timing,
            distinct,
            fetch_ms,
            fail,
            json,
        } => {
            let report = simulate(&timing, distinct, fetch_ms, fail).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("=== Batches ===");
            for batch in &report.batches {
                println!(
                    "#{} at {}ms: {} queries {:?}",
                    batch.sequence,
                    batch.started_at_ms,
                    batch.queries.len(),
                    batch.queries
                );
            }
            println!();

            println!("=== Results ===");
            println!("Queries: {}", report.queries);
            println!("Resolved: {}", report.resolved);
            println!("Missing: {}", report.missing);
            println!("Failed: {}", report.failed);
            println!();

            println!("=== Metrics ===");
            println!("{}", serde_json::to_string_pretty(&report.metrics)?);
        }
    }

    Ok(())
}
