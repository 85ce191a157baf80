//! Bounded-concurrency TCP/UDP port scanning with service fingerprinting.

use crate::network::{
    bounded, resolve_host, tcp_connect, DatagramReply, DatagramTransport, UdpTransport,
};
use crate::probes::SnmpProbe;
use crate::utils::{NetworkError, Result};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub mod fingerprint;
pub mod profiles;

pub use fingerprint::*;
pub use profiles::*;

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub host: String,
    pub ports: Vec<u16>,
}

impl ScanTarget {
    /// Duplicate ports are dropped, keeping the first occurrence.
    pub fn new(host: impl Into<String>, ports: impl IntoIterator<Item = u16>) -> Self {
        let mut unique = Vec::new();
        for port in ports {
            if !unique.contains(&port) {
                unique.push(port);
            }
        }
        Self {
            host: host.into(),
            ports: unique,
        }
    }

    pub fn with_profile(host: impl Into<String>, profile: PortProfile) -> Self {
        Self::new(host, profile.ports().iter().copied())
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub port: u16,
    pub tcp_open: bool,
    pub udp_open: bool,
    #[serde(rename = "tcp_latency_ms", serialize_with = "as_millis")]
    pub tcp_latency: Duration,
    pub banner: Option<String>,
    pub error: Option<String>,
}

impl ScanResult {
    fn unreachable(port: u16, error: &str) -> Self {
        Self {
            port,
            tcp_open: false,
            udp_open: false,
            tcp_latency: Duration::ZERO,
            banner: None,
            error: Some(error.to_string()),
        }
    }
}

struct TcpFindings {
    open: bool,
    latency: Duration,
    banner: Option<String>,
    error: Option<String>,
}

struct UdpFindings {
    open: bool,
    snmp: bool,
    error: Option<String>,
}

#[derive(Clone)]
pub struct PortScanner {
    timeout: Duration,
    max_concurrency: usize,
    transport: Arc<dyn DatagramTransport>,
    fingerprinter: Arc<ServiceFingerprinter>,
}

impl Default for PortScanner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SCAN_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            transport: Arc::new(UdpTransport),
            fingerprinter: Arc::new(ServiceFingerprinter::default()),
        }
    }
}

impl PortScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn DatagramTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: ServiceFingerprinter) -> Self {
        self.fingerprinter = Arc::new(fingerprinter);
        self
    }

    pub async fn scan(
        &self,
        target: &ScanTarget,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<u16, ScanResult>> {
        self.scan_with_progress(target, cancel, |_| {}).await
    }

    /// Scans every port of `target`; `progress` gets the completed fraction
    /// after each port.
    ///
    /// The returned map holds exactly one entry per target port. Connection
    /// and resolution failures are recorded per port; cancellation aborts
    /// everything still in flight and is reported once as
    /// [`NetworkError::Cancelled`].
    pub async fn scan_with_progress<F>(
        &self,
        target: &ScanTarget,
        cancel: &CancellationToken,
        mut progress: F,
    ) -> Result<BTreeMap<u16, ScanResult>>
    where
        F: FnMut(f32),
    {
        if target.host.trim().is_empty() {
            return Err(NetworkError::Configuration("host must not be empty".to_string()));
        }
        if cancel.is_cancelled() {
            return Err(NetworkError::Cancelled);
        }

        let mut results = BTreeMap::new();
        if target.ports.is_empty() {
            return Ok(results);
        }

        let scope = cancel.child_token();
        let ip = match bounded(self.timeout, &scope, resolve_host(&target.host)).await? {
            Some(Ok(ip)) => ip,
            Some(Err(e)) => return Ok(self.all_failed(target, &e.to_string(), &mut progress)),
            None => {
                let error = format!("could not resolve {} before timeout", target.host);
                return Ok(self.all_failed(target, &error, &mut progress));
            }
        };

        log::info!(
            "Scanning {} ({}) on {} ports, concurrency {}",
            target.host,
            ip,
            target.ports.len(),
            self.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let scanner = Arc::new(self.clone());
        let mut tasks = JoinSet::new();

        for &port in &target.ports {
            let semaphore = Arc::clone(&semaphore);
            let scanner = Arc::clone(&scanner);
            let scope = scope.clone();
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = scope.cancelled() => return Err(NetworkError::Cancelled),
                    permit = semaphore.acquire_owned() => {
                        permit.map_err(|_| NetworkError::Cancelled)?
                    }
                };
                scanner.probe_port(ip, port, &scope).await
            });
        }

        let total = target.ports.len() as f32;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| NetworkError::Other(format!("scan task failed: {e}")));
            match outcome.and_then(|result| result) {
                Ok(result) => {
                    results.insert(result.port, result);
                    progress(results.len() as f32 / total);
                }
                Err(e) => {
                    scope.cancel();
                    tasks.abort_all();
                    if e.is_cancelled() {
                        log::info!("Scan of {} cancelled", target.host);
                    }
                    return Err(e);
                }
            }
        }

        Ok(results)
    }

    fn all_failed<F: FnMut(f32)>(
        &self,
        target: &ScanTarget,
        error: &str,
        progress: &mut F,
    ) -> BTreeMap<u16, ScanResult> {
        log::warn!("Scan of {} aborted before connecting: {}", target.host, error);
        let results = target
            .ports
            .iter()
            .map(|&port| (port, ScanResult::unreachable(port, error)))
            .collect();
        progress(1.0);
        results
    }

    async fn probe_port(&self, ip: IpAddr, port: u16, cancel: &CancellationToken) -> Result<ScanResult> {
        let addr = SocketAddr::new(ip, port);
        let (tcp, udp) = tokio::try_join!(self.probe_tcp(addr, cancel), self.probe_udp(addr, cancel))?;

        let banner = if udp.snmp {
            Some("SNMP".to_string())
        } else {
            tcp.banner
        };

        Ok(ScanResult {
            port,
            tcp_open: tcp.open,
            udp_open: udp.open,
            tcp_latency: tcp.latency,
            banner,
            error: tcp.error.or(udp.error),
        })
    }

    async fn probe_tcp(&self, addr: SocketAddr, cancel: &CancellationToken) -> Result<TcpFindings> {
        let outcome = tcp_connect(addr, self.timeout, cancel).await?;

        let Some(mut stream) = outcome.stream else {
            return Ok(TcpFindings {
                open: false,
                latency: outcome.latency,
                banner: None,
                error: outcome.error,
            });
        };

        let banner = self.fingerprinter.identify(&mut stream, addr.port(), cancel).await?;
        Ok(TcpFindings {
            open: true,
            latency: outcome.latency,
            banner,
            error: None,
        })
    }

    async fn probe_udp(&self, addr: SocketAddr, cancel: &CancellationToken) -> Result<UdpFindings> {
        let snmp = SnmpProbe::new()
            .with_transport(Arc::clone(&self.transport))
            .with_timeout(self.timeout)
            .check(addr, cancel)
            .await?;
        if snmp.responded {
            return Ok(UdpFindings {
                open: true,
                snmp: true,
                error: None,
            });
        }

        let outcome = self.transport.exchange(addr, &[], self.timeout, cancel).await?;
        let open = outcome.response().is_some();
        let error = match outcome.reply {
            DatagramReply::Failed(reason) => Some(reason),
            _ => None,
        };
        Ok(UdpFindings {
            open,
            snmp: false,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::DatagramOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    struct Silent;

    #[async_trait]
    impl DatagramTransport for Silent {
        async fn exchange(
            &self,
            _addr: SocketAddr,
            _payload: &[u8],
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<DatagramOutcome> {
            Ok(DatagramOutcome::timed_out(Duration::ZERO))
        }
    }

    /// Answers SNMP on one port only, counts empty datagrams.
    struct SnmpOn {
        port: u16,
        empty_sent: AtomicUsize,
    }

    #[async_trait]
    impl DatagramTransport for SnmpOn {
        async fn exchange(
            &self,
            addr: SocketAddr,
            payload: &[u8],
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<DatagramOutcome> {
            if payload.is_empty() {
                self.empty_sent.fetch_add(1, Ordering::SeqCst);
            }
            if addr.port() == self.port && !payload.is_empty() {
                Ok(DatagramOutcome::received(vec![0x30, 0x00], Duration::ZERO))
            } else {
                Ok(DatagramOutcome::timed_out(Duration::ZERO))
            }
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[test]
    fn target_ports_are_deduplicated_in_order() {
        let target = ScanTarget::new("localhost", [80, 22, 80, 443, 22]);
        assert_eq!(target.ports, vec![80, 22, 443]);
    }

    #[tokio::test]
    async fn result_keys_match_target_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let target = ScanTarget::new("127.0.0.1", [open, closed]);
        let mut fractions = Vec::new();
        let results = PortScanner::new()
            .with_timeout(Duration::from_millis(500))
            .with_transport(Arc::new(Silent))
            .scan_with_progress(&target, &CancellationToken::new(), |f| fractions.push(f))
            .await
            .unwrap();

        assert_eq!(results.keys().copied().collect::<Vec<_>>(), {
            let mut ports = vec![open, closed];
            ports.sort();
            ports
        });
        assert!(results[&open].tcp_open);
        assert!(!results[&closed].tcp_open);
        assert!(results[&closed].error.is_some());
        assert_eq!(fractions.len(), 2);
        assert_eq!(fractions.last().copied(), Some(1.0));
    }

    #[tokio::test]
    async fn snmp_reply_marks_udp_open_and_skips_empty_datagram() {
        let port = closed_port().await;
        let transport = Arc::new(SnmpOn {
            port,
            empty_sent: AtomicUsize::new(0),
        });

        let results = PortScanner::new()
            .with_timeout(Duration::from_millis(300))
            .with_transport(transport.clone())
            .scan(&ScanTarget::new("127.0.0.1", [port]), &CancellationToken::new())
            .await
            .unwrap();

        let result = &results[&port];
        assert!(result.udp_open);
        assert_eq!(result.banner.as_deref(), Some("SNMP"));
        assert_eq!(transport.empty_sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_host_is_rejected() {
        let err = PortScanner::new()
            .scan(&ScanTarget::new(" ", [80]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Configuration(_)));
    }

    /// Never answers; only returns once the caller gives up.
    struct Hanging;

    #[async_trait]
    impl DatagramTransport for Hanging {
        async fn exchange(
            &self,
            _addr: SocketAddr,
            _payload: &[u8],
            _timeout: Duration,
            cancel: &CancellationToken,
        ) -> Result<DatagramOutcome> {
            cancel.cancelled().await;
            Err(NetworkError::Cancelled)
        }
    }

    #[tokio::test]
    async fn cancellation_surfaces_once() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let ports = [closed_port().await, closed_port().await];
        let err = PortScanner::new()
            .with_timeout(Duration::from_secs(10))
            .with_transport(Arc::new(Hanging))
            .scan(&ScanTarget::new("127.0.0.1", ports), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    /// Fails every empty datagram with a local socket error.
    struct SendFails;

    #[async_trait]
    impl DatagramTransport for SendFails {
        async fn exchange(
            &self,
            _addr: SocketAddr,
            payload: &[u8],
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<DatagramOutcome> {
            if payload.is_empty() {
                Ok(DatagramOutcome {
                    reply: DatagramReply::Failed("network unreachable".to_string()),
                    latency: Duration::ZERO,
                })
            } else {
                Ok(DatagramOutcome::timed_out(Duration::ZERO))
            }
        }
    }

    #[tokio::test]
    async fn udp_failure_is_reported_when_tcp_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let results = PortScanner::new()
            .with_timeout(Duration::from_millis(300))
            .with_transport(Arc::new(SendFails))
            .scan(&ScanTarget::new("127.0.0.1", [port]), &CancellationToken::new())
            .await
            .unwrap();

        let result = &results[&port];
        assert!(result.tcp_open);
        assert!(!result.udp_open);
        assert_eq!(result.error.as_deref(), Some("network unreachable"));
    }

    /// Tracks the highest number of exchanges in flight at once.
    #[derive(Default)]
    struct Overlap {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl DatagramTransport for Overlap {
        async fn exchange(
            &self,
            _addr: SocketAddr,
            _payload: &[u8],
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<DatagramOutcome> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(DatagramOutcome::timed_out(Duration::from_millis(50)))
        }
    }

    #[tokio::test]
    async fn max_concurrency_caps_ports_in_flight() {
        let mut ports = Vec::new();
        for _ in 0..6 {
            ports.push(closed_port().await);
        }
        let transport = Arc::new(Overlap::default());

        let results = PortScanner::new()
            .with_timeout(Duration::from_millis(500))
            .with_max_concurrency(2)
            .with_transport(transport.clone())
            .scan(&ScanTarget::new("127.0.0.1", ports.clone()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), ScanTarget::new("127.0.0.1", ports).ports.len());
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
    }
}
