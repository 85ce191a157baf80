use super::bounded;
use crate::utils::Result;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

const MAX_DATAGRAM: usize = 4096;

/// What came back from a single datagram exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramReply {
    Received(Vec<u8>),
    TimedOut,
    /// The peer answered with ICMP port unreachable.
    Refused,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DatagramOutcome {
    pub reply: DatagramReply,
    pub latency: Duration,
}

impl DatagramOutcome {
    pub fn received(payload: Vec<u8>, latency: Duration) -> Self {
        Self {
            reply: DatagramReply::Received(payload),
            latency,
        }
    }

    pub fn timed_out(latency: Duration) -> Self {
        Self {
            reply: DatagramReply::TimedOut,
            latency,
        }
    }

    pub fn response(&self) -> Option<&[u8]> {
        match &self.reply {
            DatagramReply::Received(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match &self.reply {
            DatagramReply::Received(_) => None,
            DatagramReply::TimedOut => Some("no reply before timeout".to_string()),
            DatagramReply::Refused => Some("port unreachable".to_string()),
            DatagramReply::Failed(reason) => Some(reason.clone()),
        }
    }
}

/// Sends one datagram and waits for one reply.
///
/// Probes hold this as `Arc<dyn DatagramTransport>` so tests can substitute
/// canned replies for the real socket.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    async fn exchange(
        &self,
        addr: SocketAddr,
        payload: &[u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DatagramOutcome>;
}

/// Socket-backed transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpTransport;

impl UdpTransport {
    async fn send_and_receive(addr: SocketAddr, payload: &[u8]) -> io::Result<Vec<u8>> {
        let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(addr).await?;
        socket.send(payload).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = socket.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn exchange(
        &self,
        addr: SocketAddr,
        payload: &[u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DatagramOutcome> {
        let start = Instant::now();
        let attempt = bounded(timeout, cancel, Self::send_and_receive(addr, payload)).await?;
        let latency = start.elapsed();

        let reply = match attempt {
            Some(Ok(data)) => DatagramReply::Received(data),
            Some(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => DatagramReply::Refused,
            Some(Err(e)) => DatagramReply::Failed(e.to_string()),
            None => DatagramReply::TimedOut,
        };

        log::debug!("UDP exchange with {} -> {:?} in {:?}", addr, reply_kind(&reply), latency);

        Ok(DatagramOutcome { reply, latency })
    }
}

fn reply_kind(reply: &DatagramReply) -> &'static str {
    match reply {
        DatagramReply::Received(_) => "reply",
        DatagramReply::TimedOut => "timeout",
        DatagramReply::Refused => "refused",
        DatagramReply::Failed(_) => "failed",
    }
}
