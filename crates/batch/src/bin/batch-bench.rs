//! batch-bench: drive the batch scheduler with a simulated processor.
//!
//! Submits a fixed number of requests from concurrent tasks, spreads them
//! over all priority levels, and prints the final metrics snapshot as JSON.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value};
use tracing::{info, warn};

use stupid_batch::{
    BatchConfig, BatchError, BatchProcessor, BatchScheduler, Priority, ProcessorError,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Batch scheduler load generator.
#[derive(Parser, Debug)]
#[command(name = "batch-bench", version, about)]
struct Cli {
    /// Path to a batch scheduler TOML config. Defaults plus BATCH_* env
    /// overrides are used when unset or unreadable.
    #[arg(long, env = "BATCH_CONFIG")]
    config: Option<String>,

    /// Total requests to submit.
    #[arg(long, default_value_t = 1000)]
    requests: usize,

    /// Concurrent submitting tasks.
    #[arg(long, default_value_t = 32)]
    concurrency: usize,

    /// Simulated fixed cost per batch in milliseconds.
    #[arg(long, default_value_t = 5)]
    processing_ms: u64,

    /// Fixed utilization reported to the scheduler (0.0..=1.0). Omit to
    /// report utilization derived from in-flight batches.
    #[arg(long)]
    utilization: Option<f64>,

    /// Fraction of requests carrying an identical payload.
    #[arg(long, default_value_t = 0.0)]
    duplicate_ratio: f64,
}

// ── Simulated processor ─────────────────────────────────────────────

/// Sleeps for a fixed cost per batch and echoes each payload.
struct SimulatedProcessor {
    cost: Duration,
    in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl BatchProcessor for SimulatedProcessor {
    async fn process(&self, payloads: Vec<Value>) -> Result<Vec<Value>, ProcessorError> {
        self.in_flight.fetch_add(payloads.len(), Ordering::Relaxed);
        tokio::time::sleep(self.cost).await;
        self.in_flight.fetch_sub(payloads.len(), Ordering::Relaxed);
        Ok(payloads
            .into_iter()
            .map(|p| json!({ "status": "success", "data": p }))
            .collect())
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<BatchConfig> {
    match path {
        Some(path) => match BatchConfig::from_file(path) {
            Ok(cfg) => {
                info!(path, "loaded batch config");
                Ok(cfg)
            }
            Err(e) => {
                warn!(error = %e, path, "failed to load config, using env defaults");
                Ok(BatchConfig::from_env()?)
            }
        },
        None => Ok(BatchConfig::from_env()?),
    }
}

fn payload_for(i: usize, duplicate_ratio: f64) -> Value {
    let threshold = (duplicate_ratio.clamp(0.0, 1.0) * 100.0) as usize;
    if i % 100 < threshold {
        json!({ "prompt": "shared" })
    } else {
        json!({ "prompt": format!("request-{i}") })
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let max_batch = config.max_batch_size;

    let in_flight = Arc::new(AtomicUsize::new(0));
    let processor = Arc::new(SimulatedProcessor {
        cost: Duration::from_millis(cli.processing_ms),
        in_flight: in_flight.clone(),
    });

    let fixed = cli.utilization;
    let monitor = move || -> Result<f64, ProcessorError> {
        Ok(fixed.unwrap_or_else(|| in_flight.load(Ordering::Relaxed) as f64 / max_batch as f64))
    };

    let scheduler = BatchScheduler::builder(config)
        .processor(processor)
        .monitor(Arc::new(monitor))
        .build()?;
    scheduler.start()?;

    info!(
        requests = cli.requests,
        concurrency = cli.concurrency,
        processing_ms = cli.processing_ms,
        "starting benchmark"
    );

    let started = Instant::now();
    let next = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));
    let mut workers = Vec::with_capacity(cli.concurrency);

    for _ in 0..cli.concurrency.max(1) {
        let scheduler = scheduler.clone();
        let next = next.clone();
        let failures = failures.clone();
        let total = cli.requests;
        let duplicate_ratio = cli.duplicate_ratio;

        workers.push(tokio::spawn(async move {
            loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                if i >= total {
                    break;
                }
                let priority = Priority::ALL[i % Priority::ALL.len()];
                match scheduler.submit(payload_for(i, duplicate_ratio), priority, None).await {
                    Ok(_) => {}
                    Err(BatchError::Timeout(t)) => {
                        warn!(request = i, timeout = ?t, "request timed out");
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!(request = i, error = %e, "request failed");
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for worker in workers {
        worker.await?;
    }
    let elapsed = started.elapsed();
    scheduler.stop().await;

    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        failures = failures.load(Ordering::Relaxed),
        "benchmark complete"
    );

    println!("{}", serde_json::to_string_pretty(&scheduler.metrics())?);
    Ok(())
}
