//! # Send Pipeline
//!
//! Consumes the size events of a [`RateClock`](crate::clock::RateClock),
//! turns each one into a timestamped envelope, and hands it to a
//! [`MessageSender`]. Every data send runs on its own task, so pacing is
//! bounded by the clock rather than by the transport's round-trip time.
//!
//! ## Termination
//!
//! When the clock's terminal signal arrives, any size events already queued
//! are still sent, in-flight sends are awaited, and then the drain phase
//! starts: a burst of FIN-marked envelopes, one per interval. Delivery is not
//! assumed to be reliable or exactly-once, so the sentinel is repeated to
//! raise the odds that every consumer observes at least one.

use crate::clock::{ClockOutputs, ClockStopped, RateClock};
use crate::envelope::{Envelope, FIN_MARKER};
use crate::generator::MessageGenerator;
use crate::transport::MessageSender;
use crate::utils::format_duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

/// Number of FIN envelopes sent by the drain phase
pub const FIN_BURST_COUNT: usize = 1000;

/// Pause between two FIN envelopes
pub const FIN_INTERVAL: Duration = Duration::from_millis(1);

/// Size of every FIN envelope, independent of the data message size
pub const FIN_MESSAGE_SIZE: usize = 1024;

/// How the end of a run is announced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    pub enabled: bool,
    pub count: usize,
    pub interval: Duration,
    pub message_size: usize,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            count: FIN_BURST_COUNT,
            interval: FIN_INTERVAL,
            message_size: FIN_MESSAGE_SIZE,
        }
    }
}

impl DrainPolicy {
    /// No FIN burst; consumers must rely on their own timeout.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Producer-side outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendSummary {
    /// Data envelopes handed to the sender
    pub messages_sent: u64,
    /// FIN envelopes handed to the sender
    pub fin_sent: u64,
    /// Sends the transport reported as failed
    pub send_errors: u64,
    /// Events the clock reported, when its terminal signal was received
    pub clock_events: Option<u64>,
    /// From the first event wait until the terminal signal
    pub elapsed: Duration,
    pub drain_elapsed: Duration,
}

impl SendSummary {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1_000.0
    }
}

pub struct SendPipeline {
    sender: Arc<dyn MessageSender>,
    drain: DrainPolicy,
}

impl SendPipeline {
    pub fn new(sender: Arc<dyn MessageSender>, drain: DrainPolicy) -> Self {
        Self { sender, drain }
    }

    /// Spawn `clock` and run the pipeline until the drain phase completes.
    pub async fn drive<G: MessageGenerator>(&self, clock: RateClock<G>) -> Result<SendSummary> {
        let (outputs, handle) = clock.spawn();
        let summary = self.run(outputs).await?;
        handle.await.context("Rate clock task failed")?;
        Ok(summary)
    }

    /// Run against an already running clock.
    pub async fn run(&self, outputs: ClockOutputs) -> Result<SendSummary> {
        let ClockOutputs {
            mut sizes,
            mut stopped,
        } = outputs;

        info!("Start sender ({})", self.sender.name());
        let errors = Arc::new(AtomicU64::new(0));
        let mut in_flight = JoinSet::new();
        let mut messages_sent: u64 = 0;
        let started = Instant::now();

        let clock: Option<ClockStopped> = loop {
            tokio::select! {
                biased;
                Some(size) = sizes.recv() => {
                    self.dispatch(&mut in_flight, size, &errors)?;
                    messages_sent += 1;
                    trace!("Message sent: {}", messages_sent);
                }
                terminal = &mut stopped => {
                    while let Ok(size) = sizes.try_recv() {
                        self.dispatch(&mut in_flight, size, &errors)?;
                        messages_sent += 1;
                    }
                    break terminal.ok();
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    warn!("Send task failed: {}", e);
                }
            }
        };
        let elapsed = started.elapsed();

        if clock.is_none() {
            warn!("Rate clock ended without a terminal signal");
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!("Send task failed: {}", e);
            }
        }

        let drain_started = Instant::now();
        let fin_sent = if self.drain.enabled {
            self.send_fin_burst(&errors).await?
        } else {
            debug!("FIN drain disabled");
            0
        };

        let summary = SendSummary {
            messages_sent,
            fin_sent,
            send_errors: errors.load(Ordering::Relaxed),
            clock_events: clock.map(|c| c.events),
            elapsed,
            drain_elapsed: drain_started.elapsed(),
        };

        info!("Time: {}", format_duration(summary.elapsed));
        info!("Message sent: {}", summary.messages_sent);
        if summary.send_errors > 0 {
            warn!("{} sends reported errors", summary.send_errors);
        }
        Ok(summary)
    }

    fn dispatch(
        &self,
        in_flight: &mut JoinSet<()>,
        size: usize,
        errors: &Arc<AtomicU64>,
    ) -> Result<()> {
        let payload = Envelope::stamped_now(0)
            .encode(size)
            .context("Failed to encode data envelope")?;
        let sender = Arc::clone(&self.sender);
        let errors = Arc::clone(errors);

        in_flight.spawn(async move {
            if let Err(e) = sender.send(payload).await {
                errors.fetch_add(1, Ordering::Relaxed);
                debug!("Send failed: {}", e);
            }
        });
        Ok(())
    }

    async fn send_fin_burst(&self, errors: &AtomicU64) -> Result<u64> {
        info!(
            "Sending {} FIN messages (every {})",
            self.drain.count,
            format_duration(self.drain.interval)
        );

        let mut sent: u64 = 0;
        for _ in 0..self.drain.count {
            let payload = Envelope::stamped_now(FIN_MARKER)
                .encode(self.drain.message_size)
                .context("Failed to encode FIN envelope")?;
            if let Err(e) = self.sender.send(payload).await {
                errors.fetch_add(1, Ordering::Relaxed);
                debug!("FIN send failed: {}", e);
            }
            sent += 1;
            sleep(self.drain.interval).await;
        }
        Ok(sent)
    }
}

/// Channels in the shape a running clock produces, for driving the pipeline
/// from something other than a [`RateClock`].
pub fn manual_clock(
    capacity: usize,
) -> (
    (mpsc::Sender<usize>, oneshot::Sender<ClockStopped>),
    ClockOutputs,
) {
    let (sizes_tx, sizes) = mpsc::channel(capacity.max(1));
    let (stopped_tx, stopped) = oneshot::channel();
    ((sizes_tx, stopped_tx), ClockOutputs { sizes, stopped })
}
