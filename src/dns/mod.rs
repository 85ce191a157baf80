use crate::utils::{NetworkError, Result};
use async_trait::async_trait;
use hickory_client::rr::Name;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::system_conf;
use hickory_resolver::TokioAsyncResolver;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub mod monitor;
pub mod propagation;
pub mod servers;
pub mod snapshot;
pub mod wildcard;

pub use monitor::*;
pub use propagation::*;
pub use servers::*;
pub use snapshot::*;
pub use wildcard::*;

pub use hickory_client::rr::RecordType;

pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// A single DNS lookup, either through the system resolver (`server` is
/// `None`) or directly against one name server.
///
/// Answers are returned as presentation-format strings. A name that exists
/// but has no records of the requested type yields an empty list.
#[async_trait]
pub trait DnsQuery: Send + Sync {
    async fn lookup(
        &self,
        server: Option<SocketAddr>,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<String>>;
}

/// [`DnsQuery`] backed by the hickory resolver.
#[derive(Debug, Clone)]
pub struct ResolverQuery {
    timeout: Duration,
    attempts: usize,
}

impl Default for ResolverQuery {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DNS_TIMEOUT,
            attempts: 1,
        }
    }
}

impl ResolverQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    fn options(&self) -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        opts.ndots = 0;
        opts.timeout = self.timeout;
        opts.attempts = self.attempts;
        opts.edns0 = true;
        opts.cache_size = 0;
        opts
    }

    fn resolver_for(&self, server: Option<SocketAddr>) -> TokioAsyncResolver {
        let config = match server {
            Some(addr) => {
                let mut config = ResolverConfig::new();
                config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
                config
            }
            None => {
                let system = system_conf::read_system_conf()
                    .map(|(config, _)| config)
                    .unwrap_or_else(|e| {
                        log::warn!("Could not read system DNS config ({}), using default", e);
                        ResolverConfig::default()
                    });
                // Keep the name servers, drop search domains.
                let mut clean = ResolverConfig::new();
                for name_server in system.name_servers() {
                    clean.add_name_server(name_server.clone());
                }
                clean
            }
        };
        TokioAsyncResolver::tokio(config, self.options())
    }
}

#[async_trait]
impl DnsQuery for ResolverQuery {
    async fn lookup(
        &self,
        server: Option<SocketAddr>,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<String>> {
        let fqdn = Name::from_str(name)
            .map_err(|e| NetworkError::Configuration(format!("Invalid domain {}: {}", name, e)))?;
        let resolver = self.resolver_for(server);

        match resolver.lookup(fqdn, record_type).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter(|record| record.record_type() == record_type)
                .filter_map(|record| record.data().map(|data| data.to_string()))
                .collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                _ => Err(NetworkError::DnsResolution(format!(
                    "{:?} lookup for {} failed: {}",
                    record_type, name, e
                ))),
            },
        }
    }
}

/// Trims, lower-cases and strips the trailing dot; rejects empty names.
pub fn normalize_domain(domain: &str) -> Result<String> {
    let normalized = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(NetworkError::Configuration("domain must not be empty".to_string()));
    }
    if normalized.split('.').any(|label| label.is_empty() || label.len() > 63) {
        return Err(NetworkError::Configuration(format!("invalid domain: {}", domain)));
    }
    Ok(normalized)
}

/// Parses a record type name such as `a`, `AAAA` or `txt`.
pub fn parse_record_type(value: &str) -> Result<RecordType> {
    RecordType::from_str(&value.trim().to_ascii_uppercase())
        .map_err(|_| NetworkError::Configuration(format!("unknown record type: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_domain_cleans_input() {
        assert_eq!(normalize_domain(" Example.COM. ").unwrap(), "example.com");
        assert!(normalize_domain("").is_err());
        assert!(normalize_domain("a..b").is_err());
    }

    #[test]
    fn record_types_parse_case_insensitively() {
        assert_eq!(parse_record_type("aaaa").unwrap(), RecordType::AAAA);
        assert_eq!(parse_record_type("Txt").unwrap(), RecordType::TXT);
        assert!(parse_record_type("bogus").is_err());
    }
}
