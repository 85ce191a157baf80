use super::{default_transport, resolve_target, DEFAULT_PROBE_TIMEOUT};
use crate::network::DatagramTransport;
use crate::protocol::dns;
use crate::utils::{measure_time, Result, TestResult};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DNS_PORT: u16 = 53;
pub const DEFAULT_RECURSION_QUERY: &str = "example.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecursionResult {
    pub available: bool,
}

/// Open-resolver test: does the server recurse for a name it is not
/// authoritative for?
#[derive(Clone)]
pub struct RecursionProbe {
    transport: Arc<dyn DatagramTransport>,
    timeout: Duration,
    query_name: String,
}

impl Default for RecursionProbe {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            query_name: DEFAULT_RECURSION_QUERY.to_string(),
        }
    }
}

impl RecursionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, transport: Arc<dyn DatagramTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_query_name(mut self, name: impl Into<String>) -> Self {
        self.query_name = name.into();
        self
    }

    pub async fn check(
        &self,
        server: SocketAddr,
        cancel: &CancellationToken,
    ) -> Result<RecursionResult> {
        let query = dns::build_query(rand::random(), &self.query_name, dns::QTYPE_A, true)?;
        let outcome = self
            .transport
            .exchange(server, &query, self.timeout, cancel)
            .await?;

        let available = outcome
            .response()
            .map(dns::recursion_available)
            .unwrap_or(false);

        log::debug!("Recursion probe {} -> available={}", server, available);
        Ok(RecursionResult { available })
    }

    pub async fn run(&self, host: &str, port: u16, cancel: &CancellationToken) -> TestResult {
        let test_name = format!("DNS recursion test on {}:{}", host, port);

        let (duration, result) = measure_time(|| async {
            let server = resolve_target(host, port).await?;
            self.check(server, cancel).await
        })
        .await;

        match result {
            Ok(RecursionResult { available: true }) => TestResult::new(test_name).success(
                duration,
                "Open resolver: recursion available for external names".to_string(),
            ),
            Ok(RecursionResult { available: false }) => TestResult::new(test_name).negative(
                duration,
                "Recursion not available (no reply, refused or RA unset)".to_string(),
            ),
            Err(error) => TestResult::new(test_name).failure(duration, error),
        }
    }
}
