use super::{normalize_domain, DnsQuery, ResolverQuery};
use crate::utils::{NetworkError, Result};
use futures::stream::{self, StreamExt};
use hickory_client::rr::RecordType;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// `ip` or `ip:port`; port 53 when omitted.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ServerInfo {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            country: None,
            location: None,
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let address = self.address.trim();
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Ok(addr);
        }
        address
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, 53))
            .map_err(|_| NetworkError::Configuration(format!("invalid server address: {}", self.address)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationResult {
    pub server: ServerInfo,
    pub records: Vec<String>,
    pub success: bool,
    #[serde(skip)]
    pub error: Option<String>,
}

/// Servers that returned the same normalized record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordGroup {
    pub records: Vec<String>,
    pub servers: Vec<String>,
}

fn normalize_record(record: &str) -> String {
    record.trim().trim_end_matches('.').to_lowercase()
}

/// Normalized, sorted, deduplicated form of a record set.
pub fn normalize_records(records: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = records.iter().map(|r| normalize_record(r)).collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Groups successful results by record set, in order of first appearance.
/// More than one group means the servers disagree.
pub fn compare_results(results: &[PropagationResult]) -> Vec<RecordGroup> {
    let mut groups: Vec<RecordGroup> = Vec::new();

    for result in results.iter().filter(|r| r.success) {
        let records = normalize_records(&result.records);
        match groups.iter_mut().find(|g| g.records == records) {
            Some(group) => group.servers.push(result.server.address.clone()),
            None => groups.push(RecordGroup {
                records,
                servers: vec![result.server.address.clone()],
            }),
        }
    }
    groups
}

/// The group answered by the most servers; the earliest wins a tie.
pub fn majority(groups: &[RecordGroup]) -> Option<&RecordGroup> {
    groups
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.servers.len().cmp(&b.servers.len()).then(ib.cmp(ia)))
        .map(|(_, group)| group)
}

/// Queries one name on many resolvers at once.
#[derive(Clone)]
pub struct PropagationChecker {
    query: Arc<dyn DnsQuery>,
    max_parallelism: usize,
    timeout: Duration,
}

impl Default for PropagationChecker {
    fn default() -> Self {
        Self {
            query: Arc::new(ResolverQuery::default().with_timeout(DEFAULT_SERVER_TIMEOUT)),
            max_parallelism: 0,
            timeout: DEFAULT_SERVER_TIMEOUT,
        }
    }
}

impl PropagationChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: Arc<dyn DnsQuery>) -> Self {
        self.query = query;
        self
    }

    /// 0 queries every server at once.
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query_server(&self, domain: &str, record_type: RecordType, server: &ServerInfo) -> PropagationResult {
        let outcome = match server.socket_addr() {
            Ok(addr) => tokio::time::timeout(self.timeout, self.query.lookup(Some(addr), domain, record_type))
                .await
                .unwrap_or(Err(NetworkError::Timeout)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(records) => PropagationResult {
                server: server.clone(),
                records,
                success: true,
                error: None,
            },
            Err(e) => {
                log::debug!("{} {:?} via {} failed: {}", domain, record_type, server.address, e);
                PropagationResult {
                    server: server.clone(),
                    records: Vec::new(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// One result per server, in the order of `servers`. Per-server failures
    /// are recorded in the result; only cancellation fails the batch.
    pub async fn query(
        &self,
        domain: &str,
        record_type: RecordType,
        servers: &[ServerInfo],
        cancel: &CancellationToken,
    ) -> Result<Vec<PropagationResult>> {
        let domain = normalize_domain(domain)?;
        if servers.is_empty() {
            return Ok(Vec::new());
        }

        let limit = match self.max_parallelism {
            0 => servers.len(),
            n => n,
        };

        let checker = self.clone();
        let name = domain.clone();
        let batch = stream::iter(servers.to_vec().into_iter().enumerate())
            .map(move |(index, server)| {
                let checker = checker.clone();
                let domain = name.clone();
                async move {
                    let result = checker.query_server(&domain, record_type, &server).await;
                    (index, result)
                }
            })
            .buffer_unordered(limit)
            .collect::<Vec<_>>();

        let mut indexed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
            results = batch => results,
        };
        indexed.sort_by_key(|(index, _)| *index);

        let results: Vec<PropagationResult> = indexed.into_iter().map(|(_, result)| result).collect();
        log::info!(
            "{} {:?}: {}/{} servers answered",
            domain,
            record_type,
            results.iter().filter(|r| r.success).count(),
            results.len()
        );
        Ok(results)
    }
}
