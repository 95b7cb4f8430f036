//! # Benchmark Engine Module
//!
//! Wires the pacing and measurement engine to a transport according to the
//! process role:
//!
//! - **Producer**: rate clock → send pipeline → sender
//! - **Consumer**: source → receive endpoint → measurement handler
//! - **Both**: the two halves in one process over a connected transport pair;
//!   the consumer is started before the first message is paced
//!
//! [`BenchmarkConfig`] is the validated form of the command line. Every
//! configuration error is reported here, before any transport is created.

use crate::{
    cli::{Args, RateDistribution, Role, SizeDistribution, TransportKind},
    clock::{RateClock, RateStrategy, StopCondition},
    distribution::PoissonDistribution,
    generator::{create_generator, MessageGenerator},
    measurement::{MeasurementConfig, MeasurementHandler, ReceiveEndpoint, Report},
    pipeline::{DrainPolicy, SendPipeline, SendSummary},
    transport::{MessageSender, MessageSource, TransportConfig, TransportFactory},
    utils::{format_duration, validate_message_size},
};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Single source of truth for displaying the run configuration.
struct BenchmarkConfigDisplay<'a> {
    config: &'a BenchmarkConfig,
}

impl<'a> std::fmt::Display for BenchmarkConfigDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config;
        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(f, "Starting Benchmark: {}", config.test_name)?;
        writeln!(f, "  Role:               {}", config.role)?;
        writeln!(f, "  Transport:          {}", config.transport)?;

        if config.role.produces() {
            writeln!(f, "  Message Size:       {} bytes", config.message_size)?;
            writeln!(f, "  Size Distribution:  {}", config.size_distribution)?;
            match (config.msg_count, config.duration) {
                (Some(count), _) => writeln!(f, "  Message Count:      {}", count)?,
                (None, Some(duration)) => {
                    writeln!(f, "  Test Duration:      {}", format_duration(duration))?
                }
                (None, None) => {}
            }
            match config.rate_distribution {
                RateDistribution::Uniform => writeln!(
                    f,
                    "  Pacing:             uniform, every {}",
                    config
                        .send_period()
                        .map(format_duration)
                        .unwrap_or_else(|| "?".to_string())
                )?,
                RateDistribution::Poisson => writeln!(
                    f,
                    "  Pacing:             poisson, mean delay {}us",
                    config.average_delay_us
                )?,
            }
            let fin = if config.drain.enabled {
                format!(
                    "{} x {} bytes every {}",
                    config.drain.count,
                    config.drain.message_size,
                    format_duration(config.drain.interval)
                )
            } else {
                "Disabled".to_string()
            };
            writeln!(f, "  FIN Drain:          {}", fin)?;
        }

        if config.role.consumes() {
            let timeout = config
                .measurement
                .timeout
                .map_or("Not set".to_string(), format_duration);
            writeln!(f, "  Consumer Timeout:   {}", timeout)?;
            let artifact = config
                .measurement
                .artifact_path
                .as_ref()
                .map_or("Not written".to_string(), |p| p.display().to_string());
            writeln!(f, "  Latency Output:     {}", artifact)?;
        }

        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// Validated configuration for one benchmark process
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub test_name: String,
    pub role: Role,
    pub transport: TransportKind,
    pub transport_config: TransportConfig,

    pub rate_distribution: RateDistribution,
    pub size_distribution: SizeDistribution,
    pub message_size: usize,

    /// Exact number of data messages; `None` runs for `duration`
    pub msg_count: Option<usize>,
    pub duration: Option<Duration>,

    /// Messages per second for uniform pacing
    pub rate: f64,
    /// Explicit uniform period, wins over `rate`
    pub send_delay: Option<Duration>,
    pub average_delay_us: f64,
    /// Poisson sampler seed for reproducible pacing
    pub seed: Option<u64>,

    pub drain: DrainPolicy,
    pub measurement: MeasurementConfig,
}

impl BenchmarkConfig {
    /// Create benchmark configuration from CLI arguments
    ///
    /// ## Validation
    /// - Message size must hold the envelope header and stay below 16MB
    /// - Producers need a message count > 0 or a duration
    /// - Rates, delays, and percentiles must be in range
    /// - The loopback transport only works with both roles in one process
    /// - An in-process run without FIN needs a consumer timeout to finish
    pub fn from_args(args: &Args) -> Result<Self> {
        if args.role.produces() {
            validate_message_size(args.message_size)?;
        }

        if args.transport == TransportKind::Loopback && args.role != Role::Both {
            bail!("The loopback transport requires --role both");
        }

        if !(0.0..=1.0).contains(&args.loss_probability) {
            bail!(
                "Loss probability must be within [0, 1], got {}",
                args.loss_probability
            );
        }

        if let Some(p) = args
            .percentiles
            .iter()
            .find(|p| !(**p > 0.0 && **p <= 100.0))
        {
            bail!("Percentile {} is outside (0, 100]", p);
        }

        if args.role == Role::Both && args.no_fin && args.timeout.is_none() {
            bail!("--no-fin with --role both needs a consumer --timeout to complete");
        }

        let config = Self {
            test_name: args.test_name.clone(),
            role: args.role,
            transport: args.transport,
            transport_config: TransportConfig {
                host: args.host.clone(),
                port: args.port,
                buffer_size: args.buffer_size,
                loss_probability: args.loss_probability,
            },
            rate_distribution: args.rate_distribution,
            size_distribution: args.size_distribution,
            message_size: args.message_size,
            // A non-zero count wins over the duration
            msg_count: if args.msg_count > 0 {
                Some(args.msg_count)
            } else {
                None
            },
            duration: args.duration,
            rate: args.rate,
            send_delay: args.send_delay,
            average_delay_us: args.average_delay_us,
            seed: args.seed,
            drain: if args.no_fin {
                DrainPolicy::disabled()
            } else {
                DrainPolicy::default()
            },
            measurement: MeasurementConfig {
                timeout: args.timeout,
                artifact_path: Some(args.latency_output.clone()),
                percentiles: args.percentiles.clone(),
            },
        };

        if config.role.produces() {
            config.stop_condition()?;
            config.rate_strategy()?;
        }

        Ok(config)
    }

    pub fn stop_condition(&self) -> Result<StopCondition> {
        Ok(StopCondition::from_parts(
            self.msg_count.unwrap_or(0),
            self.duration,
        )?)
    }

    pub fn rate_strategy(&self) -> Result<RateStrategy> {
        let strategy = match self.rate_distribution {
            RateDistribution::Uniform => match self.send_delay {
                Some(delay) => RateStrategy::uniform_delay(delay)?,
                None => RateStrategy::uniform_rate(self.rate)?,
            },
            RateDistribution::Poisson => RateStrategy::poisson(self.average_delay_us)?,
        };
        Ok(strategy)
    }

    /// Uniform pacing period, `None` for poisson pacing or an invalid rate
    pub fn send_period(&self) -> Option<Duration> {
        match self.rate_strategy().ok()? {
            RateStrategy::Uniform { period } => Some(period),
            RateStrategy::Poisson { .. } => None,
        }
    }

    /// Build the rate clock for the producer side
    pub fn build_clock(&self) -> Result<RateClock<Box<dyn MessageGenerator>>> {
        let generator = create_generator(self.size_distribution, self.message_size);
        let stop = self.stop_condition()?;

        match (self.rate_strategy()?, self.seed) {
            (RateStrategy::Poisson { average_delay_us }, Some(seed)) => {
                let sampler = PoissonDistribution::seeded(average_delay_us, seed)?;
                Ok(RateClock::with_sampler(generator, sampler, stop))
            }
            (strategy, _) => Ok(RateClock::new(generator, strategy, stop)?),
        }
    }

    pub fn display(&self) -> impl std::fmt::Display + '_ {
        BenchmarkConfigDisplay { config: self }
    }
}

/// What a process produced; each side is present when its role ran
#[derive(Debug, Clone)]
pub struct BenchmarkOutcome {
    pub producer: Option<SendSummary>,
    pub consumer: Option<Report>,
}

/// Runs one benchmark process according to its role
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<BenchmarkOutcome> {
        info!("\n{}", self.config.display());

        match self.config.role {
            Role::Producer => {
                let sender =
                    TransportFactory::create_sender(self.config.transport, &self.config.transport_config)
                        .await
                        .context("Failed to create producer transport")?;
                Ok(BenchmarkOutcome {
                    producer: Some(self.run_producer(sender).await?),
                    consumer: None,
                })
            }
            Role::Consumer => {
                let source =
                    TransportFactory::create_source(self.config.transport, &self.config.transport_config)
                        .await
                        .context("Failed to create consumer transport")?;
                Ok(BenchmarkOutcome {
                    producer: None,
                    consumer: Some(self.run_consumer(source).await?),
                })
            }
            Role::Both => {
                let (sender, source) =
                    TransportFactory::create_pair(self.config.transport, &self.config.transport_config)
                        .await
                        .context("Failed to create transport pair")?;
                self.run_in_process(sender, source).await
            }
        }
    }

    /// Pace and send until the stop condition, then drain.
    ///
    /// Fails before sending anything when the data or FIN payloads would
    /// exceed what the transport can carry.
    pub async fn run_producer(&self, sender: Arc<dyn MessageSender>) -> Result<SendSummary> {
        let limit = sender.max_message_size();
        let largest = if self.config.drain.enabled {
            self.config.message_size.max(self.config.drain.message_size)
        } else {
            self.config.message_size
        };
        if largest > limit {
            bail!(
                "Message size {} exceeds the {} transport limit of {} bytes",
                largest,
                sender.name(),
                limit
            );
        }

        let clock = self.config.build_clock()?;
        debug!("Producer stop condition: {:?}", clock.stop_condition());
        SendPipeline::new(sender, self.config.drain)
            .drive(clock)
            .await
    }

    /// Receive and measure until the stream completes.
    pub async fn run_consumer(&self, source: Box<dyn MessageSource>) -> Result<Report> {
        let handler = MeasurementHandler::new(self.config.measurement.clone())?;
        ReceiveEndpoint::new(source, handler).run().await
    }

    async fn run_in_process(
        &self,
        sender: Arc<dyn MessageSender>,
        source: Box<dyn MessageSource>,
    ) -> Result<BenchmarkOutcome> {
        let handler = MeasurementHandler::new(self.config.measurement.clone())?;
        let consumer = tokio::spawn(ReceiveEndpoint::new(source, handler).run());

        let producer = self.run_producer(sender).await;
        let report = consumer.await.context("Consumer task failed")?;

        Ok(BenchmarkOutcome {
            producer: Some(producer?),
            consumer: Some(report?),
        })
    }
}
