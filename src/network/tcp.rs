use super::bounded;
use crate::utils::{measure_time, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Outcome of a single TCP connect attempt.
#[derive(Debug)]
pub struct TcpConnectOutcome {
    pub stream: Option<TcpStream>,
    pub latency: Duration,
    pub error: Option<String>,
}

impl TcpConnectOutcome {
    pub fn success(&self) -> bool {
        self.stream.is_some()
    }
}

/// Opens a TCP connection bounded by `timeout`.
///
/// Refused, unreachable and timed-out connects come back as an outcome with
/// `error` set; only cancellation is returned as `Err`.
pub async fn tcp_connect(
    addr: SocketAddr,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<TcpConnectOutcome> {
    let (latency, attempt) =
        measure_time(|| bounded(timeout, cancel, TcpStream::connect(addr))).await;

    let outcome = match attempt? {
        Some(Ok(stream)) => TcpConnectOutcome {
            stream: Some(stream),
            latency,
            error: None,
        },
        Some(Err(e)) => TcpConnectOutcome {
            stream: None,
            latency,
            error: Some(e.to_string()),
        },
        None => TcpConnectOutcome {
            stream: None,
            latency,
            error: Some(format!("connection timed out after {}ms", timeout.as_millis())),
        },
    };

    log::debug!(
        "TCP connect {} -> {} in {:?}",
        addr,
        if outcome.success() { "open" } else { "failed" },
        outcome.latency
    );

    Ok(outcome)
}
