use super::{default_transport, resolve_target, DEFAULT_PROBE_TIMEOUT};
use crate::network::DatagramTransport;
use crate::protocol::ntp;
use crate::utils::{format_offset, measure_time, Result, TestResult};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NTP_PORT: u16 = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpResult {
    pub success: bool,
    pub stratum: u8,
    /// Server time minus local time at receipt.
    pub offset: Option<chrono::Duration>,
}

impl NtpResult {
    fn failed() -> Self {
        Self {
            success: false,
            stratum: 0,
            offset: None,
        }
    }
}

#[derive(Clone)]
pub struct NtpProbe {
    transport: Arc<dyn DatagramTransport>,
    timeout: Duration,
}

impl Default for NtpProbe {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl NtpProbe {
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

    pub async fn check(&self, server: SocketAddr, cancel: &CancellationToken) -> Result<NtpResult> {
        let request = ntp::build_client_request();
        let outcome = self
            .transport
            .exchange(server, &request, self.timeout, cancel)
            .await?;
        let received_at = Utc::now();

        let Some(reply) = outcome.response().and_then(ntp::parse_reply) else {
            log::debug!("NTP probe {} -> no usable reply ({:?})", server, outcome.error());
            return Ok(NtpResult::failed());
        };

        match reply.offset_from(received_at) {
            Some(offset) => Ok(NtpResult {
                success: true,
                stratum: reply.stratum,
                offset: Some(offset),
            }),
            None => Ok(NtpResult::failed()),
        }
    }

    pub async fn run(&self, host: &str, port: u16, cancel: &CancellationToken) -> TestResult {
        let test_name = format!("NTP query to {}:{}", host, port);

        let (duration, result) = measure_time(|| async {
            let server = resolve_target(host, port).await?;
            self.check(server, cancel).await
        })
        .await;

        match result {
            Ok(NtpResult {
                success: true,
                stratum,
                offset: Some(offset),
            }) => TestResult::new(test_name).success(
                duration,
                format!("stratum {}, clock offset {}", stratum, format_offset(offset)),
            ),
            Ok(_) => TestResult::new(test_name)
                .negative(duration, "No valid NTP reply".to_string()),
            Err(error) => TestResult::new(test_name).failure(duration, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::DatagramOutcome;
    use crate::protocol::ntp::{NtpTimestamp, PACKET_LEN};
    use async_trait::async_trait;

    struct Fixture(Vec<u8>);

    #[async_trait]
    impl DatagramTransport for Fixture {
        async fn exchange(
            &self,
            _addr: SocketAddr,
            payload: &[u8],
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<DatagramOutcome> {
            assert_eq!(payload.len(), PACKET_LEN);
            Ok(DatagramOutcome::received(self.0.clone(), Duration::from_millis(1)))
        }
    }

    fn server() -> SocketAddr {
        "192.0.2.123:123".parse().unwrap()
    }

    #[tokio::test]
    async fn reads_stratum_and_offset() {
        let server_time = Utc::now() + chrono::Duration::seconds(30);
        let mut reply = vec![0u8; PACKET_LEN];
        reply[1] = 3;
        reply[40..48].copy_from_slice(&NtpTimestamp::from_datetime(server_time).to_bytes());

        let result = NtpProbe::new()
            .with_transport(Arc::new(Fixture(reply)))
            .check(server(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.stratum, 3);
        let offset = result.offset.unwrap();
        assert!(offset > chrono::Duration::seconds(29));
        assert!(offset <= chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn short_reply_fails_without_offset() {
        let result = NtpProbe::new()
            .with_transport(Arc::new(Fixture(vec![0u8; 20])))
            .check(server(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.offset.is_none());
    }

    #[tokio::test]
    async fn kiss_of_death_reply_is_not_a_success() {
        let mut reply = vec![0u8; PACKET_LEN];
        reply[0] = 0xDC;
        reply[12..16].copy_from_slice(b"RATE");

        let probe = NtpProbe::new().with_transport(Arc::new(Fixture(reply)));
        let result = probe.check(server(), &CancellationToken::new()).await.unwrap();
        assert!(!result.success);
        assert!(result.offset.is_none());

        let result = probe.run("192.0.2.123", 123, &CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.error.is_none());
    }
}
