//! Transport probes: single TCP connects and single UDP exchanges.
//!
//! Expected network failures (refused, timed out, reset, unreachable) are
//! reported as values inside the outcome types. The only error these
//! functions return is [`NetworkError::Cancelled`], raised when the caller's
//! token fires.

use crate::utils::{NetworkError, Result};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::{system_conf, TokioAsyncResolver};
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod tcp;
pub mod udp;

pub use tcp::*;
pub use udp::*;

/// Races `fut` against its own `timeout` and the caller's token.
///
/// Returns `Ok(None)` when the timeout elapsed first.
pub(crate) async fn bounded<F>(
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<Option<F::Output>>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NetworkError::Cancelled),
        res = tokio::time::timeout(timeout, fut) => Ok(res.ok()),
    }
}

/// Resolves a host name or literal address to a single IP address.
pub async fn resolve_host(host: &str) -> Result<IpAddr> {
    let host = host.trim();
    if host.is_empty() {
        return Err(NetworkError::Configuration("host must not be empty".to_string()));
    }

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(ip);
    }

    let (config, opts) = system_conf::read_system_conf().unwrap_or_else(|e| {
        log::warn!("Could not read system DNS config ({}), using default", e);
        (ResolverConfig::default(), ResolverOpts::default())
    });
    let resolver = TokioAsyncResolver::tokio(config, opts);

    let lookup = resolver
        .lookup_ip(host)
        .await
        .map_err(|e| NetworkError::DnsResolution(e.to_string()))?;

    lookup
        .iter()
        .next()
        .ok_or_else(|| NetworkError::DnsResolution(format!("No IP found for {}", host)))
}
