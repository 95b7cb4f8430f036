//! # Message Queue Benchmark - Main Entry Point
//!
//! Runs one side of a paced message-queue benchmark, or both sides in one
//! process:
//!
//! 1. **Parse arguments**: command line with environment variable fallbacks
//! 2. **Initialize logging**: colorized console output, optional log file
//! 3. **Validate configuration**: every error is reported before any socket
//!    is opened
//! 4. **Run**: producer, consumer, or both over the selected transport
//! 5. **Report**: print the summary and write the optional JSON file
//!
//! The consumer always writes its latency series to `--latency-output`
//! (default `/var/log/mq_latency.csv`).

use anyhow::Result;
use clap::Parser;
use mq_benchmark::{
    benchmark::{BenchmarkConfig, BenchmarkRunner},
    cli::Args,
    logging,
    results::ResultsManager,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the file writer flushes.
    let _log_guard = logging::init(args.role, args.verbose, args.quiet, args.log_file.as_deref())?;

    info!("Begin {} test", args.test_name);

    let config = match BenchmarkConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return Err(e);
        }
    };

    let results_manager = ResultsManager::new(args.output_file.as_deref());
    info!("Run ID: {}", results_manager.run_id());

    let runner = BenchmarkRunner::new(config);
    let outcome = match runner.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Benchmark failed: {:#}", e);
            return Err(e);
        }
    };

    let summary =
        results_manager.build_summary(runner.config(), outcome.producer, outcome.consumer.as_ref());
    info!("\n{}", summary);
    results_manager.write_summary(&summary)?;

    info!("End {} test", args.test_name);
    Ok(())
}
