//! Message transport capabilities consumed by the benchmark engine.
//!
//! The pacing and measurement code only ever sees two capabilities: a
//! [`MessageSender`] that accepts opaque payloads without acknowledging
//! delivery, and a [`MessageSource`] that yields inbound payloads. Broker
//! bindings implement these two traits; the crate ships an in-process
//! loopback and a UDP datagram implementation.

use crate::cli::TransportKind;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub mod loopback;
pub mod udp;

pub use loopback::{LoopbackSender, LoopbackSource};
pub use udp::{UdpSender, UdpSource};

/// Outbound side of a transport.
///
/// `send` is fire-and-forget from the engine's point of view: a returned
/// error is logged and counted, never retried.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> Result<()>;

    /// Get transport name for identification
    fn name(&self) -> &'static str;

    /// Get maximum message size supported
    fn max_message_size(&self) -> usize {
        crate::utils::MAX_MESSAGE_SIZE
    }
}

/// Inbound side of a transport.
#[async_trait]
pub trait MessageSource: Send {
    /// Next payload, or `None` once the source is closed.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    fn name(&self) -> &'static str;
}

/// Transport configuration shared by all implementations
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Socket send/receive buffer size in bytes
    pub buffer_size: usize,
    /// Probability in `[0, 1]` that the loopback drops a payload
    pub loss_probability: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: crate::defaults::PORT,
            buffer_size: crate::defaults::BUFFER_SIZE,
            loss_probability: 0.0,
        }
    }
}

/// Transport factory for creating sender/source instances
pub struct TransportFactory;

impl TransportFactory {
    /// Create the producer side of a transport.
    pub async fn create_sender(
        kind: TransportKind,
        config: &TransportConfig,
    ) -> Result<Arc<dyn MessageSender>> {
        match kind {
            TransportKind::Udp => Ok(Arc::new(UdpSender::connect(config).await?)),
            TransportKind::Loopback => Err(anyhow!(
                "the loopback transport only connects a producer and consumer in the same process"
            )),
        }
    }

    /// Create the consumer side of a transport.
    pub async fn create_source(
        kind: TransportKind,
        config: &TransportConfig,
    ) -> Result<Box<dyn MessageSource>> {
        match kind {
            TransportKind::Udp => Ok(Box::new(UdpSource::bind(config).await?)),
            TransportKind::Loopback => Err(anyhow!(
                "the loopback transport only connects a producer and consumer in the same process"
            )),
        }
    }

    /// Create a connected sender/source pair for an in-process run.
    ///
    /// The source is bound before the sender connects so no early payload
    /// is lost.
    pub async fn create_pair(
        kind: TransportKind,
        config: &TransportConfig,
    ) -> Result<(Arc<dyn MessageSender>, Box<dyn MessageSource>)> {
        match kind {
            TransportKind::Loopback => {
                let (sender, source) = loopback::channel(config.loss_probability)?;
                Ok((Arc::new(sender), Box::new(source)))
            }
            TransportKind::Udp => {
                let source = UdpSource::bind(config).await?;
                let target = TransportConfig {
                    port: source.local_addr()?.port(),
                    ..config.clone()
                };
                let sender = UdpSender::connect(&target).await?;
                Ok((Arc::new(sender), Box::new(source)))
            }
        }
    }
}
