//! # Rate Clock
//!
//! Turns a pacing strategy and a stop condition into a stream of "send a
//! message of this size now" events followed by exactly one terminal signal.
//!
//! The clock runs as its own Tokio task. Size events are handed over a
//! capacity-1 channel, so the clock can never run more than one event ahead of
//! the consumer; the terminal signal travels over a `oneshot`, which makes a
//! second terminal impossible by construction.
//!
//! ## Strategies
//!
//! - **Uniform**: fixed tick period. The first event fires one period after
//!   start and missed ticks are skipped rather than bursted.
//! - **Poisson**: before every event a wait time in microseconds is drawn from
//!   a Poisson distribution whose mean is the configured average delay.
//!
//! The Poisson strategy samples a Poisson-distributed *delay*. A true Poisson
//! arrival process would draw exponential inter-arrival times instead; the
//! delay model is kept for comparability with existing measurements.

use crate::distribution::{DistributionError, PoissonDistribution};
use crate::generator::MessageGenerator;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClockError {
    #[error("message rate must be a finite value > 0, got {0}")]
    InvalidRate(f64),

    #[error("tick period must be greater than zero")]
    ZeroPeriod,

    #[error("either a message count > 0 or a test duration is required")]
    MissingStopCondition,

    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

/// When the clock stops scheduling events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Emit exactly this many events.
    ByCount(u64),
    /// Emit events until this much wall-clock time has passed.
    ByDuration(Duration),
}

impl StopCondition {
    /// A non-zero count wins over any duration.
    pub fn from_parts(count: usize, duration: Option<Duration>) -> Result<Self, ClockError> {
        match (count, duration) {
            (n, _) if n > 0 => Ok(StopCondition::ByCount(n as u64)),
            (_, Some(d)) => Ok(StopCondition::ByDuration(d)),
            _ => Err(ClockError::MissingStopCondition),
        }
    }
}

/// How the time between two events is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateStrategy {
    Uniform { period: Duration },
    Poisson { average_delay_us: f64 },
}

impl RateStrategy {
    /// Uniform pacing at `messages_per_second`.
    pub fn uniform_rate(messages_per_second: f64) -> Result<Self, ClockError> {
        if !messages_per_second.is_finite() || messages_per_second <= 0.0 {
            return Err(ClockError::InvalidRate(messages_per_second));
        }
        Self::uniform_delay(Duration::from_nanos(
            (1_000_000_000.0 / messages_per_second).round() as u64,
        ))
    }

    /// Uniform pacing with an explicit period.
    pub fn uniform_delay(period: Duration) -> Result<Self, ClockError> {
        if period.is_zero() {
            return Err(ClockError::ZeroPeriod);
        }
        Ok(RateStrategy::Uniform { period })
    }

    /// Poisson-sampled delays with the given mean in microseconds.
    pub fn poisson(average_delay_us: f64) -> Result<Self, ClockError> {
        if !average_delay_us.is_finite() || average_delay_us < 0.0 {
            return Err(DistributionError::InvalidLambda(average_delay_us).into());
        }
        Ok(RateStrategy::Poisson { average_delay_us })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RateStrategy::Uniform { .. } => "uniform",
            RateStrategy::Poisson { .. } => "poisson",
        }
    }
}

/// Terminal signal of a clock run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockStopped {
    /// Number of size events handed to the consumer.
    pub events: u64,
    pub elapsed: Duration,
}

/// Receiving side of a running clock.
#[derive(Debug)]
pub struct ClockOutputs {
    pub sizes: mpsc::Receiver<usize>,
    pub stopped: oneshot::Receiver<ClockStopped>,
}

enum Pacer {
    Uniform(Duration),
    Poisson(PoissonDistribution),
}

enum ActivePacer {
    Uniform(Interval),
    Poisson(PoissonDistribution),
}

impl ActivePacer {
    async fn wait(&mut self) {
        match self {
            ActivePacer::Uniform(interval) => {
                interval.tick().await;
            }
            ActivePacer::Poisson(sampler) => {
                let wait_us = sampler.sample() as u64;
                sleep(Duration::from_micros(wait_us)).await;
            }
        }
    }
}

/// A configured, not yet running, rate clock.
pub struct RateClock<G> {
    generator: G,
    pacer: Pacer,
    stop: StopCondition,
    name: &'static str,
}

impl<G: MessageGenerator> RateClock<G> {
    /// Build a clock; the Poisson strategy gets an entropy-seeded sampler.
    pub fn new(generator: G, strategy: RateStrategy, stop: StopCondition) -> Result<Self, ClockError> {
        let pacer = match strategy {
            RateStrategy::Uniform { period } => {
                if period.is_zero() {
                    return Err(ClockError::ZeroPeriod);
                }
                Pacer::Uniform(period)
            }
            RateStrategy::Poisson { average_delay_us } => {
                Pacer::Poisson(PoissonDistribution::from_entropy(average_delay_us)?)
            }
        };

        Ok(Self {
            generator,
            pacer,
            stop,
            name: strategy.name(),
        })
    }

    /// Poisson clock driven by a caller-supplied sampler.
    pub fn with_sampler(generator: G, sampler: PoissonDistribution, stop: StopCondition) -> Self {
        Self {
            generator,
            pacer: Pacer::Poisson(sampler),
            stop,
            name: "poisson",
        }
    }

    pub fn stop_condition(&self) -> StopCondition {
        self.stop
    }

    /// Start the clock on the current Tokio runtime.
    pub fn spawn(self) -> (ClockOutputs, JoinHandle<()>) {
        let (sizes_tx, sizes_rx) = mpsc::channel(1);
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let handle = tokio::spawn(self.run(sizes_tx, stopped_tx));
        (
            ClockOutputs {
                sizes: sizes_rx,
                stopped: stopped_rx,
            },
            handle,
        )
    }

    async fn run(mut self, sizes: mpsc::Sender<usize>, stopped: oneshot::Sender<ClockStopped>) {
        let started = Instant::now();
        let mut pacer = match self.pacer {
            Pacer::Uniform(period) => {
                let mut interval = interval_at(started + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ActivePacer::Uniform(interval)
            }
            Pacer::Poisson(sampler) => {
                debug!("Poisson pacing with a mean delay of {}us", sampler.lambda());
                ActivePacer::Poisson(sampler)
            }
        };

        debug!("Starting {} rate clock ({:?})", self.name, self.stop);
        let mut events: u64 = 0;

        match self.stop {
            StopCondition::ByCount(count) => {
                while events < count {
                    pacer.wait().await;
                    if sizes.send(self.generator.next_size()).await.is_err() {
                        debug!("Size consumer went away after {} events", events);
                        break;
                    }
                    events += 1;
                }
            }
            StopCondition::ByDuration(duration) => {
                let deadline = sleep(duration);
                tokio::pin!(deadline);

                loop {
                    tokio::select! {
                        biased;
                        _ = &mut deadline => break,
                        _ = pacer.wait() => {}
                    }

                    let size = self.generator.next_size();
                    tokio::select! {
                        biased;
                        _ = &mut deadline => break,
                        sent = sizes.send(size) => {
                            if sent.is_err() {
                                debug!("Size consumer went away after {} events", events);
                                break;
                            }
                        }
                    }
                    events += 1;
                }
            }
        }

        drop(sizes);
        let summary = ClockStopped {
            events,
            elapsed: started.elapsed(),
        };
        if stopped.send(summary).is_err() {
            debug!("Terminal signal receiver dropped");
        }
        info!("Stop {} rate clock after {} events", self.name, events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{SequenceSizeGenerator, UniformSizeGenerator};

    /// Drain a clock the way the send pipeline does: queued sizes first.
    async fn collect(mut outputs: ClockOutputs) -> (Vec<usize>, ClockStopped) {
        let mut sizes = Vec::new();
        loop {
            tokio::select! {
                biased;
                Some(size) = outputs.sizes.recv() => sizes.push(size),
                stopped = &mut outputs.stopped => {
                    let stopped = stopped.expect("clock dropped its terminal signal");
                    while let Ok(size) = outputs.sizes.try_recv() {
                        sizes.push(size);
                    }
                    return (sizes, stopped);
                }
            }
        }
    }

    #[test]
    fn test_stop_condition_from_parts() {
        assert_eq!(
            StopCondition::from_parts(10, Some(Duration::from_secs(1))).unwrap(),
            StopCondition::ByCount(10)
        );
        assert_eq!(
            StopCondition::from_parts(0, Some(Duration::from_secs(1))).unwrap(),
            StopCondition::ByDuration(Duration::from_secs(1))
        );
        assert_eq!(
            StopCondition::from_parts(0, None),
            Err(ClockError::MissingStopCondition)
        );
    }

    #[test]
    fn test_strategy_validation() {
        assert!(RateStrategy::uniform_rate(0.0).is_err());
        assert!(RateStrategy::uniform_rate(-5.0).is_err());
        assert!(RateStrategy::uniform_rate(f64::NAN).is_err());
        assert!(RateStrategy::uniform_delay(Duration::ZERO).is_err());
        assert!(RateStrategy::poisson(-1.0).is_err());

        assert_eq!(
            RateStrategy::uniform_rate(1000.0).unwrap(),
            RateStrategy::Uniform {
                period: Duration::from_millis(1)
            }
        );
        assert_eq!(RateStrategy::poisson(250.0).unwrap().name(), "poisson");
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_mode_emits_exact_count_then_stops() {
        let clock = RateClock::new(
            UniformSizeGenerator::new(64),
            RateStrategy::uniform_rate(1000.0).unwrap(),
            StopCondition::ByCount(100),
        )
        .unwrap();
        let (outputs, handle) = clock.spawn();

        let (sizes, stopped) = collect(outputs).await;
        assert_eq!(sizes.len(), 100);
        assert!(sizes.iter().all(|&s| s == 64));
        assert_eq!(stopped.events, 100);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_follows_terminal_signal() {
        let clock = RateClock::new(
            UniformSizeGenerator::new(32),
            RateStrategy::uniform_rate(500.0).unwrap(),
            StopCondition::ByCount(5),
        )
        .unwrap();
        let (mut outputs, handle) = clock.spawn();

        let mut received = 0;
        while outputs.sizes.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 5);
        assert_eq!((&mut outputs.stopped).await.unwrap().events, 5);
        handle.await.unwrap();
        assert!(outputs.sizes.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_mode_uses_generator_sizes() {
        let clock = RateClock::new(
            SequenceSizeGenerator::new(vec![100, 200, 300]),
            RateStrategy::uniform_delay(Duration::from_micros(250)).unwrap(),
            StopCondition::ByCount(4),
        )
        .unwrap();
        let (outputs, _handle) = clock.spawn();
        let (sizes, _) = collect(outputs).await;
        assert_eq!(sizes, vec![100, 200, 300, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uniform_pacing_spacing() {
        let clock = RateClock::new(
            UniformSizeGenerator::new(8),
            RateStrategy::uniform_rate(100.0).unwrap(),
            StopCondition::ByCount(10),
        )
        .unwrap();
        let started = Instant::now();
        let (outputs, _handle) = clock.spawn();
        let (_, stopped) = collect(outputs).await;

        // First tick after one period, so ten events take ten periods.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(110), "{:?}", elapsed);
        assert_eq!(stopped.events, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_mode_stops_after_deadline() {
        let clock = RateClock::new(
            UniformSizeGenerator::new(16),
            RateStrategy::uniform_rate(1000.0).unwrap(),
            StopCondition::ByDuration(Duration::from_millis(50)),
        )
        .unwrap();
        let started = Instant::now();
        let (outputs, handle) = clock.spawn();

        let (sizes, stopped) = collect(outputs).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(60), "{:?}", elapsed);
        assert!(sizes.len() >= 45 && sizes.len() <= 50, "{} events", sizes.len());
        assert_eq!(stopped.events as usize, sizes.len());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_duration_mode_real_time_grace_period() {
        let clock = RateClock::new(
            UniformSizeGenerator::new(16),
            RateStrategy::uniform_rate(200.0).unwrap(),
            StopCondition::ByDuration(Duration::from_millis(100)),
        )
        .unwrap();
        let started = std::time::Instant::now();
        let (outputs, _handle) = clock.spawn();
        let (_, stopped) = collect(outputs).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(600), "{:?}", elapsed);
        assert!(stopped.events <= 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poisson_clock_with_injected_sampler() {
        let sampler = PoissonDistribution::seeded(2_000.0, 99).unwrap();
        let clock = RateClock::with_sampler(
            UniformSizeGenerator::new(256),
            sampler,
            StopCondition::ByCount(50),
        );
        let started = Instant::now();
        let (outputs, _handle) = clock.spawn();
        let (sizes, stopped) = collect(outputs).await;

        assert_eq!(sizes.len(), 50);
        assert_eq!(stopped.events, 50);
        // 50 delays averaging 2ms; the timer wheel rounds each up to a
        // whole millisecond.
        let elapsed = started.elapsed();
        assert!(elapsed > Duration::from_millis(90), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(160), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poisson_duration_mode_single_terminal() {
        let clock = RateClock::new(
            UniformSizeGenerator::new(256),
            RateStrategy::poisson(1_000.0).unwrap(),
            StopCondition::ByDuration(Duration::from_millis(30)),
        )
        .unwrap();
        let (outputs, handle) = clock.spawn();
        let (sizes, stopped) = collect(outputs).await;
        assert_eq!(stopped.events as usize, sizes.len());
        assert!(sizes.len() <= 30);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_exits_when_consumer_drops() {
        let clock = RateClock::new(
            UniformSizeGenerator::new(1),
            RateStrategy::uniform_rate(1000.0).unwrap(),
            StopCondition::ByCount(1_000_000),
        )
        .unwrap();
        let (outputs, handle) = clock.spawn();
        drop(outputs);
        handle.await.unwrap();
    }
}
