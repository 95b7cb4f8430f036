//! # Message Queue Benchmark Library
//!
//! Paces synthetic message traffic against a statistical clock and measures
//! the end-to-end latency and throughput of the resulting stream.
//!
//! A producer emits a controlled arrival process of timestamped payloads; a
//! consumer decodes them, records one-way latency, and reports once the stream
//! completes. Broker bindings plug in through two small capabilities, a
//! [`MessageSender`] and a [`MessageSource`].
//!
//! ## Architecture Overview
//!
//! - `distribution`: Poisson PMF/CDF with a memoized cumulative table and
//!   inverse-transform sampling
//! - `clock`: uniform or Poisson pacing plus a stop condition, producing size
//!   events and a single terminal signal
//! - `generator`: size of each payload
//! - `envelope`: the 18-byte timestamp/FIN wire header
//! - `pipeline`: turns size events into sends and runs the FIN drain
//! - `measurement`: consumer-side completion state machine
//! - `metrics`: latency series, percentiles, throughput
//! - `results`: latency artifact and JSON run summary
//! - `transport`: sender/source traits, loopback and UDP implementations
//! - `benchmark`, `cli`, `logging`, `utils`: the command-line tool around it
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mq_benchmark::{Args, BenchmarkConfig, BenchmarkRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Args {
//!         msg_count: 1000,
//!         rate: 5000.0,
//!         ..Args::default()
//!     };
//!     let config = BenchmarkConfig::from_args(&args)?;
//!     let outcome = BenchmarkRunner::new(config).run().await?;
//!
//!     if let Some(report) = outcome.consumer {
//!         println!("Mean latency: {:?} ms", report.mean_latency_ms);
//!     }
//!     Ok(())
//! }
//! ```

/// Orchestrates producer, consumer, or both for one process
pub mod benchmark;

/// Command-line interface and configuration
///
/// Arguments fall back to the environment variables used by existing
/// deployments (`CLIENT_MODE`, `MESSAGE_COUNT`, `MESSAGE_SIZE`,
/// `TEST_DURATION`, `TEST_NAME`).
pub mod cli;

/// Rate clock driving the producer
pub mod clock;

pub mod distribution;

/// Wire format of benchmark payloads
pub mod envelope;

pub mod generator;

pub mod logging;

/// Consumer-side measurement and completion detection
pub mod measurement;

/// Latency series and throughput arithmetic
///
/// Percentiles come from an HDR histogram; the raw series is kept in arrival
/// order for the persisted artifact.
pub mod metrics;

/// Producer-side send loop and FIN drain
pub mod pipeline;

/// Latency artifact and JSON run summary
pub mod results;

/// Message transport abstractions and the bundled implementations
pub mod transport;

pub mod utils;

pub use benchmark::{BenchmarkConfig, BenchmarkOutcome, BenchmarkRunner};
pub use cli::{Args, RateDistribution, Role, SizeDistribution, TransportKind};
pub use clock::{ClockError, RateClock, RateStrategy, StopCondition};
pub use distribution::{DistributionError, PoissonDistribution};
pub use envelope::{Envelope, EnvelopeError};
pub use measurement::{CompletionCause, MeasurementConfig, MeasurementHandler, ReceiveEndpoint, Report};
pub use pipeline::{DrainPolicy, SendPipeline, SendSummary};
pub use results::{ResultsManager, RunSummary};
pub use transport::{MessageSender, MessageSource};

/// The current version of the benchmark
///
/// Written into the run summary for reproducibility.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Name used when `TEST_NAME` is not set
    pub const TEST_NAME: &str = "default";

    /// Default message size in bytes
    pub const MESSAGE_SIZE: usize = 1024;

    /// Default number of messages to send
    pub const MSG_COUNT: usize = 10000;

    /// Default uniform rate in messages per second
    pub const RATE: f64 = 1000.0;

    /// Default mean delay for poisson pacing, in microseconds
    pub const AVERAGE_DELAY_US: f64 = 1000.0;

    /// Default consumer port for network transports
    pub const PORT: u16 = 5555;

    /// Default socket buffer size in bytes
    pub const BUFFER_SIZE: usize = 4 * 1024 * 1024;

    /// Default location of the latency series
    pub const ARTIFACT_PATH: &str = crate::measurement::DEFAULT_ARTIFACT_PATH;
}
