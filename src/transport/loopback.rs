use super::{MessageSender, MessageSource};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

/// Create a connected in-process sender/source pair.
///
/// A non-zero `loss_probability` drops payloads at random on the sending side,
/// which is enough to exercise the FIN drain protocol without a real broker.
pub fn channel(loss_probability: f64) -> Result<(LoopbackSender, LoopbackSource)> {
    if !(0.0..=1.0).contains(&loss_probability) {
        return Err(anyhow!(
            "loss probability must be within [0, 1], got {}",
            loss_probability
        ));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let sender = LoopbackSender {
        tx,
        loss_probability,
        rng: Mutex::new(StdRng::from_entropy()),
        dropped: AtomicU64::new(0),
    };
    Ok((sender, LoopbackSource { rx }))
}

/// Sending half of the loopback transport
#[derive(Debug)]
pub struct LoopbackSender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    loss_probability: f64,
    rng: Mutex<StdRng>,
    dropped: AtomicU64,
}

impl LoopbackSender {
    /// Payloads discarded by simulated loss so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Replace the loss RNG with a seeded one for reproducible runs.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }
}

#[async_trait]
impl MessageSender for LoopbackSender {
    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        if self.loss_probability > 0.0 && self.rng.lock().gen::<f64>() < self.loss_probability {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Loopback dropped a {}-byte payload", payload.len());
            return Ok(());
        }
        self.tx
            .send(payload)
            .map_err(|_| anyhow!("loopback source has been closed"))
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Receiving half of the loopback transport
#[derive(Debug)]
pub struct LoopbackSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl MessageSource for LoopbackSource {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}
