use super::{default_transport, resolve_target, DEFAULT_PROBE_TIMEOUT};
use crate::network::DatagramTransport;
use crate::protocol::snmp::GET_SYS_DESCR_PUBLIC;
use crate::utils::{measure_time, Result, TestResult};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const SNMP_PORT: u16 = 161;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnmpResult {
    pub responded: bool,
}

/// Liveness only: any non-empty reply to the GetRequest counts.
#[derive(Clone)]
pub struct SnmpProbe {
    transport: Arc<dyn DatagramTransport>,
    timeout: Duration,
}

impl Default for SnmpProbe {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl SnmpProbe {
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

    pub async fn check(&self, target: SocketAddr, cancel: &CancellationToken) -> Result<SnmpResult> {
        let outcome = self
            .transport
            .exchange(target, &GET_SYS_DESCR_PUBLIC, self.timeout, cancel)
            .await?;

        let responded = outcome.response().is_some_and(|reply| !reply.is_empty());
        Ok(SnmpResult { responded })
    }

    pub async fn run(&self, host: &str, port: u16, cancel: &CancellationToken) -> TestResult {
        let test_name = format!("SNMP liveness probe to {}:{}", host, port);

        let (duration, result) = measure_time(|| async {
            let target = resolve_target(host, port).await?;
            self.check(target, cancel).await
        })
        .await;

        match result {
            Ok(SnmpResult { responded: true }) => TestResult::new(test_name)
                .success(duration, "Agent answered community 'public'".to_string()),
            Ok(SnmpResult { responded: false }) => {
                TestResult::new(test_name).negative(duration, "No SNMP reply".to_string())
            }
            Err(error) => TestResult::new(test_name).failure(duration, error),
        }
    }
}
