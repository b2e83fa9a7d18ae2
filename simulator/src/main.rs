//! Tallybank Simulator
//!
//! Drives the transfer coordinator over an in-memory ledger, either through
//! a scripted scenario or with random concurrent load, and checks that the
//! ledger still reconciles afterwards.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rust_decimal::Decimal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tallybank_coordinator::{FeeMode, FeePolicy, RetryPolicy};
use tallybank_ledger::MemoryStoreConfig;

mod bank;
mod controller;
mod metrics;
mod scenario;

use controller::{SimulationConfig, SimulationController};
use scenario::Scenario;

/// Tallybank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Scenario and load driver for the Tallybank transfer coordinator")]
struct Args {
    /// Built-in scenario to run (ping-pong, fan-in, cross-currency, failure-recovery)
    #[arg(short, long, conflicts_with = "scenario_file")]
    scenario: Option<String>,

    /// Scenario described as JSON
    #[arg(long)]
    scenario_file: Option<PathBuf>,

    /// Customers opened for random load
    #[arg(short, long, default_value = "10")]
    accounts: usize,

    /// Concurrent workers for random load
    #[arg(short, long, default_value = "8")]
    workers: usize,

    /// Opening balance of every customer
    #[arg(long, default_value = "10000")]
    opening_balance: Decimal,

    /// Largest random transfer, in whole units
    #[arg(long, default_value = "500")]
    max_amount: u32,

    /// Hold customers in every supported currency
    #[arg(long)]
    multi_currency: bool,

    /// Flat fee charged per the fee mode
    #[arg(long, default_value = "1.99")]
    fee: Decimal,

    /// always, cross-currency or never
    #[arg(long, default_value = "cross-currency")]
    fee_mode: FeeMode,

    /// Artificial latency per store write, to widen lock contention
    #[arg(long, default_value = "0")]
    op_delay_ms: u64,

    /// Retry attempts for transient failures, including the first
    #[arg(long, default_value = "5")]
    retry_attempts: u32,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "10")]
    duration: u64,

    /// Print coordinator metrics in Prometheus text format
    #[arg(long)]
    prometheus: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Tallybank Simulator");

    let controller = Arc::new(SimulationController::new(SimulationConfig {
        seed: args.seed,
        fees: FeePolicy::new(args.fee, args.fee_mode),
        store: MemoryStoreConfig {
            op_delay: (args.op_delay_ms > 0).then(|| Duration::from_millis(args.op_delay_ms)),
            ..MemoryStoreConfig::default()
        },
        retry: RetryPolicy::new(args.retry_attempts, Duration::from_millis(10)),
        ..SimulationConfig::default()
    }));

    let scenario = match (&args.scenario, &args.scenario_file) {
        (Some(name), _) => Some(Scenario::load(name)?),
        (None, Some(path)) => Some(Scenario::from_file(path)?),
        (None, None) => None,
    };

    let elapsed = match scenario {
        Some(scenario) => {
            let started = std::time::Instant::now();
            if let Err(e) = controller.run_scenario(&scenario).await {
                error!(error = %e, scenario = %scenario.name, "Scenario failed");
                return Err(e);
            }
            info!(scenario = %scenario.name, "Scenario passed");
            started.elapsed()
        }
        None => {
            controller
                .initialize(args.accounts, args.opening_balance, args.multi_currency)
                .await;
            info!(accounts = args.accounts, workers = args.workers, "Running in load mode");
            if args.duration == 0 {
                info!("Press Ctrl+C to stop");
            }
            let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
            controller.run(args.workers, args.max_amount, duration).await?
        }
    };

    controller.verify_ledger().await?;
    info!("Ledger reconciles");

    let metrics = controller.metrics().await;
    info!("Simulation complete");
    info!("Total transfers: {}", metrics.total_transfers);
    info!("Completed: {}", metrics.completed_transfers);
    info!("Failed: {} {:?}", metrics.failed_transfers(), metrics.failures);
    info!("Success rate: {:.2}%", metrics.success_rate() * 100.0);
    info!("Throughput: {:.1} transfers/s", metrics.throughput(elapsed));
    info!(
        "Latency avg/p50/p99: {}/{}/{} ms",
        metrics.average_latency_ms(),
        metrics.p50_latency_ms(),
        metrics.p99_latency_ms()
    );

    let coordinator = controller.coordinator_metrics();
    info!(
        retried = coordinator.transfers_retried,
        transient = coordinator.transfers_transient,
        overdrafts_prevented = coordinator.overdrafts_prevented,
        "Coordinator counters"
    );
    if args.prometheus {
        println!("{}", controller.prometheus());
    }

    Ok(())
}
