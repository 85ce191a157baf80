use crate::network::bounded;
use crate::utils::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Budget for each detector, independent of the connect timeout.
pub const DETECT_TIMEOUT: Duration = Duration::from_millis(200);

/// Used for every port, after any port-specific detectors.
pub const DEFAULT_DETECTORS: &[Detector] = &[Detector::Banner, Detector::Http];

const HTTP_PROBE: &[u8] = b"HEAD / HTTP/1.0\r\n\r\n";

/// TPKT header + X.224 Connection Request carrying an RDP negotiation
/// request for TLS.
const RDP_PROBE: &[u8] = &[
    0x03, 0x00, 0x00, 0x13, 0x0e, 0xe0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x08, 0x00,
    0x03, 0x00, 0x00, 0x00,
];
const TPKT_PREFIX: &[u8] = &[0x03, 0x00];

const MAX_BANNER_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Detector {
    /// Passive read of whatever the server says first.
    Banner,
    Ssh,
    Http,
    Rdp,
}

/// One open connection plus everything read from it so far.
struct Session<'a> {
    stream: &'a mut TcpStream,
    received: Vec<u8>,
    closed: bool,
}

impl<'a> Session<'a> {
    fn new(stream: &'a mut TcpStream) -> Self {
        Self {
            stream,
            received: Vec::new(),
            closed: false,
        }
    }

    /// Reads until at least `want` bytes are buffered, the peer closes, or
    /// `budget` runs out.
    async fn fill(&mut self, want: usize, budget: Duration, cancel: &CancellationToken) -> Result<()> {
        let deadline = Instant::now() + budget;
        let mut buf = [0u8; 1024];

        while !self.closed && self.received.len() < want {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match bounded(remaining, cancel, self.stream.read(&mut buf)).await? {
                Some(Ok(0)) | Some(Err(_)) => self.closed = true,
                Some(Ok(n)) => self.received.extend_from_slice(&buf[..n]),
                None => break,
            }
        }
        Ok(())
    }

    async fn send(&mut self, payload: &[u8], budget: Duration, cancel: &CancellationToken) -> Result<bool> {
        match bounded(budget, cancel, self.stream.write_all(payload)).await? {
            Some(Ok(())) => Ok(true),
            Some(Err(_)) => {
                self.closed = true;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Sends `payload` and returns the bytes that arrived after it.
    async fn exchange(
        &mut self,
        payload: &[u8],
        want: usize,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<&[u8]> {
        let mark = self.received.len();
        if self.send(payload, budget, cancel).await? {
            self.fill(mark + want, budget, cancel).await?;
        }
        Ok(&self.received[mark..])
    }
}

fn first_printable_line(data: &[u8]) -> Option<String> {
    let end = data.iter().position(|b| *b == b'\n').unwrap_or(data.len());
    let line = String::from_utf8_lossy(&data[..end]).replace('\t', " ");
    let line = line.trim();

    if line.is_empty() || line.chars().any(|c| c.is_control()) {
        return None;
    }
    Some(line.chars().take(MAX_BANNER_LEN).collect())
}

/// Picks detectors by port and runs them in order over one TCP stream.
#[derive(Debug, Clone)]
pub struct ServiceFingerprinter {
    table: HashMap<u16, Vec<Detector>>,
    detect_timeout: Duration,
}

impl Default for ServiceFingerprinter {
    fn default() -> Self {
        use Detector::*;

        let mut table = HashMap::new();
        table.insert(22, vec![Ssh]);
        for port in [21, 23, 25, 110, 143, 587] {
            table.insert(port, vec![Banner]);
        }
        for port in [80, 8000, 8008, 8080, 8081, 8888] {
            table.insert(port, vec![Http]);
        }
        table.insert(3389, vec![Rdp]);

        Self {
            table,
            detect_timeout: DETECT_TIMEOUT,
        }
    }
}

impl ServiceFingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detectors(mut self, port: u16, detectors: Vec<Detector>) -> Self {
        self.table.insert(port, detectors);
        self
    }

    pub fn with_detect_timeout(mut self, timeout: Duration) -> Self {
        self.detect_timeout = timeout;
        self
    }

    /// Port-specific detectors first, then the defaults not already listed.
    pub fn detectors_for(&self, port: u16) -> Vec<Detector> {
        let mut detectors = self.table.get(&port).cloned().unwrap_or_default();
        for detector in DEFAULT_DETECTORS {
            if !detectors.contains(detector) {
                detectors.push(*detector);
            }
        }
        detectors
    }

    /// Returns the first non-empty identification, or `None` if nothing
    /// matched before the detectors ran out or the peer hung up.
    pub async fn identify(
        &self,
        stream: &mut TcpStream,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let mut session = Session::new(stream);

        for detector in self.detectors_for(port) {
            if session.closed && session.received.is_empty() {
                break;
            }
            if let Some(found) = self.run_detector(detector, &mut session, cancel).await? {
                log::debug!("Port {} identified by {:?}: {}", port, detector, found);
                return Ok(Some(found));
            }
            if session.closed {
                break;
            }
        }
        Ok(None)
    }

    async fn run_detector(
        &self,
        detector: Detector,
        session: &mut Session<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let budget = self.detect_timeout;

        match detector {
            Detector::Banner => {
                session.fill(1, budget, cancel).await?;
                Ok(first_printable_line(&session.received))
            }
            Detector::Ssh => {
                session.fill(4, budget, cancel).await?;
                if session.received.starts_with(b"SSH-") {
                    Ok(first_printable_line(&session.received))
                } else {
                    Ok(None)
                }
            }
            Detector::Http => {
                let reply = session.exchange(HTTP_PROBE, 5, budget, cancel).await?;
                Ok(reply.starts_with(b"HTTP/").then(|| "HTTP".to_string()))
            }
            Detector::Rdp => {
                let reply = session.exchange(RDP_PROBE, TPKT_PREFIX.len(), budget, cancel).await?;
                Ok(reply.starts_with(TPKT_PREFIX).then(|| "RDP".to_string()))
            }
        }
    }
}
