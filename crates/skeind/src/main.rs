//! `skeind` — the Skein storage-tier daemon.
//!
//! Operator entrypoint for the timeline storage tier. Runs workloads against
//! an in-memory cluster laid out like the configured one, with optional
//! fault injection, and prints the executor's counters.
//!
//! # Usage
//!
//! ```text
//! skeind benchmark                          # 100 timelines, 20 appends each
//! skeind benchmark -n 1000 -a 50            # bigger run
//! skeind benchmark --failure-rate 0.02      # inject 2% backend failures
//! skeind -c skein.toml config               # print the effective config
//! ```

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use skein_engine::{ReplicaRing, TimelineService};
use skein_pool::{OperationExecutor, StatsSnapshot};
use skein_store::{FaultyConnector, MemoryBackend};
use skein_types::TimelineEntry;
use tracing::info;

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "skeind", version, about = "Skein timeline storage tier")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "SKEIN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an append/read/rebuild workload against an in-memory cluster.
    Benchmark(BenchmarkArgs),

    /// Print the effective configuration as TOML.
    Config,
}

#[derive(clap::Args, Debug, Clone)]
struct BenchmarkArgs {
    /// Number of timelines.
    #[arg(short = 'n', long, default_value = "100")]
    timelines: usize,

    /// Entries appended to every timeline.
    #[arg(short, long, default_value = "20")]
    appends: usize,

    /// Entries read per timeline.
    #[arg(short, long, default_value = "10")]
    window: u64,

    /// Payload size in bytes.
    #[arg(short, long, default_value = "64")]
    size: usize,

    /// Fraction of backend calls that fail, in `[0, 1]`.
    #[arg(long, default_value = "0")]
    failure_rate: f64,

    /// Maximum injected latency per backend call, in milliseconds.
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    /// Seed for fault injection.
    #[arg(long, default_value = "42")]
    seed: u64,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Benchmark(args) => cmd_benchmark(&config, &args).await,
        Commands::Config => cmd_config(&config),
    }
}

// -----------------------------------------------------------------------
// skeind config
// -----------------------------------------------------------------------

fn cmd_config(config: &CliConfig) -> Result<()> {
    // Validate the layout before printing it.
    ReplicaRing::new(config.replica_groups()?)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

// -----------------------------------------------------------------------
// skeind benchmark
// -----------------------------------------------------------------------

/// Timings and counters from one benchmark run.
#[derive(Debug)]
struct BenchmarkReport {
    append_time: Duration,
    appends_ok: usize,
    appends_parked: usize,
    read_time: Duration,
    reads_found: usize,
    read_errors: usize,
    rebuilt: usize,
    retried_ok: usize,
    still_parked: usize,
    stats: StatsSnapshot,
}

async fn run_benchmark(config: &CliConfig, args: &BenchmarkArgs) -> Result<BenchmarkReport> {
    let backend = Arc::new(MemoryBackend::new());
    let connector = FaultyConnector::new(backend)
        .latency(0, args.latency_ms)
        .failure_rate(args.failure_rate)
        .seed(args.seed);
    let executor = OperationExecutor::from_config(&config.pool, Arc::new(connector));
    let ring = ReplicaRing::new(config.replica_groups()?)?;
    let service = TimelineService::new(Arc::new(ring), executor.clone(), &config.jobs);

    let ids: Vec<usize> = (0..args.timelines).collect();
    for id in &ids {
        service.store(&format!("bench:{id}"), &[]).await;
    }
    info!(timelines = ids.len(), "created timelines");

    let payload = generate_bench_data(args.size);
    let started = Instant::now();
    let mut appends_ok = 0;
    let mut appends_parked = 0;
    for n in 0..args.appends {
        let mut body = payload.clone();
        body.extend_from_slice(&(n as u64).to_be_bytes());
        let report = service
            .append(&TimelineEntry::new(Bytes::from(body)), "bench:", &ids)
            .await;
        appends_ok += report.succeeded;
        appends_parked += report.failed;
    }
    let append_time = started.elapsed();

    let retry = service.retry_errors().await;

    let started = Instant::now();
    let mut reads_found = 0;
    let mut read_errors = 0;
    for id in &ids {
        match service.get(&format!("bench:{id}"), 0, args.window, false).await {
            Ok(Some(_)) => reads_found += 1,
            Ok(None) => {}
            Err(_) => read_errors += 1,
        }
    }
    let read_time = started.elapsed();

    let mut rebuilt = 0;
    for id in &ids {
        if let Ok(outcomes) = service.rebuild(&format!("bench:{id}")).await {
            rebuilt += outcomes.iter().filter(|(_, o)| !o.plan.is_noop()).count();
        }
    }

    let still_parked = service.error_queue_len();
    service.shutdown().await;

    Ok(BenchmarkReport {
        append_time,
        appends_ok,
        appends_parked,
        read_time,
        reads_found,
        read_errors,
        rebuilt,
        retried_ok: retry.succeeded,
        still_parked,
        stats: executor.stats().snapshot(),
    })
}

async fn cmd_benchmark(config: &CliConfig, args: &BenchmarkArgs) -> Result<()> {
    println!("Skein Benchmark");
    println!("  timelines:    {}", args.timelines);
    println!("  appends:      {} per timeline", args.appends);
    println!("  payload:      {} bytes", args.size);
    println!("  failure rate: {}", args.failure_rate);
    println!("  latency:      0-{} ms", args.latency_ms);
    println!();

    let report = run_benchmark(config, args).await?;
    let s = &report.stats;

    let per_sec = |n: usize, d: Duration| n as f64 / d.as_secs_f64().max(f64::EPSILON);
    println!(
        "Appends: {:.2}s ({:.0} fan-outs/s), {} jobs ok, {} parked",
        report.append_time.as_secs_f64(),
        per_sec(args.appends, report.append_time),
        report.appends_ok,
        report.appends_parked,
    );
    println!(
        "Reads:   {:.2}s ({:.0} reads/s), {} found, {} failed",
        report.read_time.as_secs_f64(),
        per_sec(args.timelines, report.read_time),
        report.reads_found,
        report.read_errors,
    );
    println!(
        "Repair:  {} replicas rebuilt, {} parked jobs replayed, {} still parked",
        report.rebuilt, report.retried_ok, report.still_parked,
    );

    println!();
    println!("Executor:");
    println!("  acquired:          {}", s.acquired);
    println!("  released:          {}", s.releases);
    println!("  released dead:     {}", s.dead_releases);
    println!("  successes:         {}", s.successes);
    println!("  black holes:       {}", s.black_holes);
    println!("  acquire failures:  {}", s.acquire_failures);
    println!("  connection faults: {}", s.connection_faults);
    println!("  timeouts:          {}", s.timeouts);
    println!("  unclassified:      {}", s.unclassified);
    if s.acquired > 0 {
        println!(
            "  mean acquire:      {} us",
            s.acquire_micros / s.acquire_attempts.max(1)
        );
        println!("  mean release:      {} us", s.release_micros / s.releases.max(1));
    }

    Ok(())
}

/// Generate deterministic payload data for benchmarking.
fn generate_bench_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
