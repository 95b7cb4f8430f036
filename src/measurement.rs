//! # Measurement Handler
//!
//! Consumer-side state machine. Every inbound payload is decoded, its
//! one-way latency recorded, and the stream is declared complete on the first
//! FIN marker or when the optional timeout expires, whichever happens first.
//!
//! ```text
//! Idle --first message--> Started --FIN | timeout--> Completing --persisted--> Completed
//! ```
//!
//! The transition out of `Started` happens under the state lock, so concurrent
//! FINs and the timeout timer produce exactly one [`Report`]. The handler only
//! reports itself completed once the latency artifact write has returned.
//! Payloads arriving after the stream ended are ignored.

use crate::envelope::Envelope;
use crate::metrics::{throughput_per_second, LatencySeries, LatencySummary, DEFAULT_PERCENTILES};
use crate::results::write_latency_artifact;
use crate::transport::MessageSource;
use crate::utils::{current_timestamp_ns, format_latency_ms, format_message_rate};
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Where the latency series is written when nothing else is configured
pub const DEFAULT_ARTIFACT_PATH: &str = "/var/log/mq_latency.csv";

#[derive(Debug, Clone)]
pub struct MeasurementConfig {
    /// Completes the stream this long after the first message, if no FIN
    /// arrived before
    pub timeout: Option<Duration>,
    /// `None` skips persisting the latency series
    pub artifact_path: Option<PathBuf>,
    pub percentiles: Vec<f64>,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            artifact_path: Some(PathBuf::from(DEFAULT_ARTIFACT_PATH)),
            percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }
}

/// What ended the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionCause {
    Fin,
    Timeout,
}

/// Consumer-side result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub cause: CompletionCause,
    /// Accepted messages, FIN included
    pub message_count: u64,
    pub elapsed_ms: f64,
    /// Messages per second over `elapsed_ms`
    pub throughput: f64,
    /// `None` when no accepted message carried a timestamp
    pub mean_latency_ms: Option<f64>,
    pub latency: LatencySummary,
    /// Raw series in arrival order
    pub latencies_ms: Vec<f64>,
    /// Undersized or malformed payloads
    pub rejected: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Started,
    /// Report computed, artifact write in progress
    Completing,
    Completed,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    message_count: u64,
    started_ns: u64,
    series: LatencySeries,
    rejected: u64,
    timer: Option<AbortHandle>,
    report: Option<Report>,
}

#[derive(Debug, Clone)]
struct Completion {
    report: Report,
    persist_error: Option<String>,
}

#[derive(Debug)]
struct Inner {
    config: MeasurementConfig,
    state: Mutex<State>,
    completed: watch::Sender<Option<Arc<Completion>>>,
}

/// Cheaply cloneable handle; all clones share one state machine.
#[derive(Debug, Clone)]
pub struct MeasurementHandler {
    inner: Arc<Inner>,
}

impl MeasurementHandler {
    pub fn new(config: MeasurementConfig) -> Result<Self> {
        let (completed, _) = watch::channel(None);
        let state = State {
            phase: Phase::Idle,
            message_count: 0,
            started_ns: 0,
            series: LatencySeries::new().context("Failed to create latency histogram")?,
            rejected: 0,
            timer: None,
            report: None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                completed,
            }),
        })
    }

    /// Feed one inbound payload.
    ///
    /// Returns `true` once the handler has completed. Payloads arriving
    /// after completion are ignored.
    pub fn receive(&self, payload: &[u8]) -> bool {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                let mut state = self.inner.state.lock();
                match state.phase {
                    Phase::Completed => return true,
                    Phase::Completing => return false,
                    Phase::Idle | Phase::Started => {}
                }
                state.rejected += 1;
                debug!("Rejected inbound payload: {}", e);
                return false;
            }
        };
        let now = current_timestamp_ns();

        let report = {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Completed => return true,
                Phase::Completing => return false,
                Phase::Idle => {
                    state.phase = Phase::Started;
                    state.started_ns = now;
                    state.timer = self.arm_timer();
                    debug!("First message received, measurement started");
                }
                Phase::Started => {}
            }

            if envelope.has_timestamp() {
                let latency_ms = (now as i64 - envelope.timestamp_ns) as f64 / 1_000_000.0;
                state.series.record(latency_ms);
            }
            state.message_count += 1;

            if envelope.is_fin() {
                let report = self.complete(&mut state, CompletionCause::Fin, now);
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                Some(report)
            } else {
                None
            }
        };

        match report {
            Some(report) => {
                self.publish(report);
                true
            }
            None => false,
        }
    }

    /// Complete the stream unless something else already did.
    fn on_timeout(&self) {
        let report = {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Started {
                return;
            }
            state.timer = None;
            self.complete(&mut state, CompletionCause::Timeout, current_timestamp_ns())
        };
        self.publish(report);
    }

    fn arm_timer(&self) -> Option<AbortHandle> {
        let timeout = self.inner.config.timeout?;
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No Tokio runtime available, consumer timeout is not armed");
                return None;
            }
        };

        let handler = self.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!("Consumer timeout of {:?} expired", timeout);
            handler.on_timeout();
        });
        Some(task.abort_handle())
    }

    /// `Started -> Completing`; must be called with the state lock held.
    fn complete(&self, state: &mut State, cause: CompletionCause, now: u64) -> Report {
        state.phase = Phase::Completing;
        let elapsed_ms = now.saturating_sub(state.started_ns) as f64 / 1_000_000.0;

        let report = Report {
            cause,
            message_count: state.message_count,
            elapsed_ms,
            throughput: throughput_per_second(state.message_count, elapsed_ms),
            mean_latency_ms: state.series.mean(),
            latency: state.series.summary(&self.inner.config.percentiles),
            latencies_ms: state.series.samples().to_vec(),
            rejected: state.rejected,
        };
        state.report = Some(report.clone());
        report
    }

    /// Persist the artifact, then mark `Completed` and wake every waiter.
    fn publish(&self, report: Report) {
        info!("Stream completed by {:?}", report.cause);
        info!("Messages received: {}", report.message_count);
        info!("Time: {:.3}ms", report.elapsed_ms);
        info!("Throughput: {}", format_message_rate(report.throughput));
        info!("Mean latency: {}", format_latency_ms(report.mean_latency_ms));
        if report.rejected > 0 {
            warn!("{} payloads were rejected", report.rejected);
        }

        let persist_error = match &self.inner.config.artifact_path {
            Some(path) => match write_latency_artifact(path, &report.latencies_ms) {
                Ok(()) => {
                    info!("Latency series written to {}", path.display());
                    None
                }
                Err(e) => {
                    error!("Failed to persist latency series: {:#}", e);
                    Some(format!("{:#}", e))
                }
            },
            None => None,
        };

        self.inner.state.lock().phase = Phase::Completed;
        self.inner.completed.send_replace(Some(Arc::new(Completion {
            report,
            persist_error,
        })));
    }

    pub fn has_completed(&self) -> bool {
        self.inner.state.lock().phase == Phase::Completed
    }

    /// Wait until the stream completes.
    ///
    /// Fails when the latency artifact could not be written; the report is
    /// still available through [`report`](Self::report) in that case.
    pub async fn wait_for_completion(&self) -> Result<Report> {
        let mut rx = self.inner.completed.subscribe();
        let completion = rx
            .wait_for(|c| c.is_some())
            .await
            .map_err(|_| anyhow!("Measurement handler dropped before completion"))?
            .clone()
            .ok_or_else(|| anyhow!("Completion signalled without a report"))?;

        match &completion.persist_error {
            Some(e) => Err(anyhow!("Failed to persist latency series: {}", e)),
            None => Ok(completion.report.clone()),
        }
    }

    /// Whether a pending timeout will complete the stream on its own
    pub fn timeout_armed(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }

    pub fn report(&self) -> Option<Report> {
        self.inner.state.lock().report.clone()
    }

    pub fn message_count(&self) -> u64 {
        self.inner.state.lock().message_count
    }

    pub fn rejected(&self) -> u64 {
        self.inner.state.lock().rejected
    }
}

/// Pumps a [`MessageSource`] into a [`MeasurementHandler`] until the stream
/// completes.
pub struct ReceiveEndpoint {
    source: Box<dyn MessageSource>,
    handler: MeasurementHandler,
}

impl ReceiveEndpoint {
    pub fn new(source: Box<dyn MessageSource>, handler: MeasurementHandler) -> Self {
        Self { source, handler }
    }

    pub fn handler(&self) -> &MeasurementHandler {
        &self.handler
    }

    pub async fn run(mut self) -> Result<Report> {
        info!("Start consumer ({})", self.source.name());
        let completion = self.handler.wait_for_completion();
        tokio::pin!(completion);

        loop {
            tokio::select! {
                biased;
                result = &mut completion => return result,
                received = self.source.recv() => {
                    match received.context("Failed to receive message")? {
                        Some(payload) => {
                            self.handler.receive(&payload);
                        }
                        None if self.handler.timeout_armed() => {
                            info!("{} source closed, waiting for consumer timeout", self.source.name());
                            return completion.await;
                        }
                        None => {
                            return Err(anyhow!(
                                "{} source closed before the stream completed ({} messages received)",
                                self.source.name(),
                                self.handler.message_count()
                            ));
                        }
                    }
                }
            }
        }
    }
}
