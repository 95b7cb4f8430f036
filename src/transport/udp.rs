//! UDP datagram transport.
//!
//! Datagrams are unordered, may be dropped, and are never acknowledged, which
//! is the delivery model the FIN drain protocol is designed around. One
//! envelope is one datagram, so the message size is limited to the largest
//! UDP payload.

use super::{MessageSender, MessageSource, TransportConfig};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Largest payload of a single IPv4 UDP datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .next()
        .ok_or_else(|| anyhow!("No address found for {}:{}", host, port))
}

/// Build a non-blocking UDP socket with the configured kernel buffer sizes.
fn bound_socket(bind_addr: SocketAddr, buffer_size: usize) -> Result<UdpSocket> {
    let socket = Socket::new(
        Domain::for_address(bind_addr),
        Type::DGRAM,
        Some(Protocol::UDP),
    )?;
    if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
        warn!("Could not set UDP receive buffer to {} bytes: {}", buffer_size, e);
    }
    if let Err(e) = socket.set_send_buffer_size(buffer_size) {
        warn!("Could not set UDP send buffer to {} bytes: {}", buffer_size, e);
    }
    socket.set_nonblocking(true)?;
    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("Failed to bind UDP socket to {}", bind_addr))?;

    Ok(UdpSocket::from_std(socket.into())?)
}

/// Producer side: a UDP socket connected to the consumer address
#[derive(Debug)]
pub struct UdpSender {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpSender {
    pub async fn connect(config: &TransportConfig) -> Result<Self> {
        let peer = resolve(&config.host, config.port)?;
        let local: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = bound_socket(local, config.buffer_size)?;
        socket
            .connect(peer)
            .await
            .with_context(|| format!("Failed to connect UDP socket to {}", peer))?;
        debug!("UDP sender connected to {}", peer);
        Ok(Self { socket, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl MessageSender for UdpSender {
    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(anyhow!(
                "payload of {} bytes exceeds the UDP datagram limit",
                payload.len()
            ));
        }
        self.socket.send(&payload).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "udp"
    }

    fn max_message_size(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }
}

/// Consumer side: a UDP socket bound to the configured address
#[derive(Debug)]
pub struct UdpSource {
    socket: UdpSocket,
    buffer: Vec<u8>,
}

impl UdpSource {
    pub async fn bind(config: &TransportConfig) -> Result<Self> {
        let addr = resolve(&config.host, config.port)?;
        let socket = bound_socket(addr, config.buffer_size)?;
        debug!("UDP source listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl MessageSource for UdpSource {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let (len, _from) = self.socket.recv_from(&mut self.buffer).await?;
        Ok(Some(self.buffer[..len].to_vec()))
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ephemeral() -> TransportConfig {
        TransportConfig {
            port: 0,
            buffer_size: 256 * 1024,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_datagram_round_trip() {
        let mut source = UdpSource::bind(&ephemeral()).await.unwrap();
        let target = TransportConfig {
            port: source.local_addr().unwrap().port(),
            ..ephemeral()
        };
        let sender = UdpSender::connect(&target).await.unwrap();
        assert_eq!(sender.peer_addr().port(), target.port);

        sender.send(b"benchmark payload".to_vec()).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), source.recv())
            .await
            .expect("datagram not delivered")
            .unwrap();
        assert_eq!(received.as_deref(), Some(&b"benchmark payload"[..]));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let source = UdpSource::bind(&ephemeral()).await.unwrap();
        let target = TransportConfig {
            port: source.local_addr().unwrap().port(),
            ..ephemeral()
        };
        let sender = UdpSender::connect(&target).await.unwrap();
        assert!(sender.send(vec![0u8; MAX_DATAGRAM_SIZE + 1]).await.is_err());
        assert_eq!(sender.max_message_size(), MAX_DATAGRAM_SIZE);
    }
}
