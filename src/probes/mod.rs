//! Single-purpose UDP protocol probes.
//!
//! Each probe takes its transport as an `Arc<dyn DatagramTransport>`, which
//! defaults to [`UdpTransport`]. Tests swap in a stub that replays fixtures.

use crate::network::{resolve_host, DatagramTransport, UdpTransport};
use crate::utils::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub mod ntp;
pub mod recursion;
pub mod snmp;

pub use ntp::*;
pub use recursion::*;
pub use snmp::*;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) fn default_transport() -> Arc<dyn DatagramTransport> {
    Arc::new(UdpTransport)
}

pub(crate) async fn resolve_target(host: &str, port: u16) -> Result<SocketAddr> {
    let ip = resolve_host(host).await?;
    Ok(SocketAddr::new(ip, port))
}
