use super::{normalize_domain, DnsQuery, ResolverQuery};
use crate::utils::{measure_time, NetworkError, Result, TestResult};
use hickory_client::rr::RecordType;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const LABEL_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WildcardReport {
    pub domain: String,
    pub catch_all: bool,
    pub tested_names: Vec<String>,
    pub resolved_names: Vec<String>,
    pub resolved_addresses: Vec<String>,
    /// How many tested names returned each address.
    pub address_occurrences: BTreeMap<String, usize>,
    pub soa_exists: bool,
    pub ns_exists: bool,
}

/// Detects catch-all DNS by resolving random names under a domain.
///
/// A domain is flagged when at least `required` of the tested names resolve
/// and one address is shared by at least `required` of them, where
/// `required = ceil(tested * consistency_threshold)`.
#[derive(Clone)]
pub struct WildcardDetector {
    query: Arc<dyn DnsQuery>,
    sample_count: usize,
    depth: usize,
    retry_count: usize,
    consistency_threshold: f64,
}

impl Default for WildcardDetector {
    fn default() -> Self {
        Self {
            query: Arc::new(ResolverQuery::default()),
            sample_count: 3,
            depth: 2,
            retry_count: 2,
            consistency_threshold: 1.0,
        }
    }
}

fn random_label() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LABEL_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

impl WildcardDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: Arc<dyn DnsQuery>) -> Self {
        self.query = query;
        self
    }

    pub fn with_sample_count(mut self, sample_count: usize) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_consistency_threshold(mut self, threshold: f64) -> Self {
        self.consistency_threshold = threshold;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.sample_count == 0 {
            return Err(NetworkError::Configuration("sample count must be at least 1".to_string()));
        }
        if !(1..=2).contains(&self.depth) {
            return Err(NetworkError::Configuration(format!(
                "depth must be 1 or 2, got {}",
                self.depth
            )));
        }
        if !(self.consistency_threshold > 0.0 && self.consistency_threshold <= 1.0) {
            return Err(NetworkError::Configuration(format!(
                "consistency threshold must be in (0, 1], got {}",
                self.consistency_threshold
            )));
        }
        Ok(())
    }

    /// Lookup failures count as "no answer"; only cancellation is an error.
    async fn answers(&self, name: &str, record_type: RecordType, cancel: &CancellationToken) -> Result<Vec<String>> {
        let lookup = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
            lookup = self.query.lookup(None, name, record_type) => lookup,
        };
        match lookup {
            Ok(records) => Ok(records),
            Err(e) => {
                log::debug!("{:?} {} -> {}", record_type, name, e);
                Ok(Vec::new())
            }
        }
    }

    async fn resolve_sample(&self, name: &str, cancel: &CancellationToken) -> Result<BTreeSet<String>> {
        let mut addresses = BTreeSet::new();
        for attempt in 0..self.retry_count.max(1) {
            for record_type in [RecordType::A, RecordType::AAAA] {
                addresses.extend(self.answers(name, record_type, cancel).await?);
            }
            if !addresses.is_empty() {
                break;
            }
            log::debug!("No answer for {} (attempt {})", name, attempt + 1);
        }
        Ok(addresses)
    }

    pub async fn analyze(&self, domain: &str, cancel: &CancellationToken) -> Result<WildcardReport> {
        let domain = normalize_domain(domain)?;
        self.validate()?;

        let soa_exists = !self.answers(&domain, RecordType::SOA, cancel).await?.is_empty();
        let ns_exists = if soa_exists {
            false
        } else {
            !self.answers(&domain, RecordType::NS, cancel).await?.is_empty()
        };
        if !soa_exists && !ns_exists {
            log::info!("{} has neither SOA nor NS records", domain);
        }

        let mut tested_names = Vec::new();
        let mut resolved_names = Vec::new();
        let mut address_occurrences: BTreeMap<String, usize> = BTreeMap::new();

        for _ in 0..self.sample_count {
            for level in 1..=self.depth {
                let labels: Vec<String> = (0..level).map(|_| random_label()).collect();
                let name = format!("{}.{}", labels.join("."), domain);

                let addresses = self.resolve_sample(&name, cancel).await?;
                if !addresses.is_empty() {
                    resolved_names.push(name.clone());
                    for address in addresses {
                        *address_occurrences.entry(address).or_default() += 1;
                    }
                }
                tested_names.push(name);
            }
        }

        let required = (tested_names.len() as f64 * self.consistency_threshold).ceil() as usize;
        let max_occurrence = address_occurrences.values().copied().max().unwrap_or(0);
        let catch_all = resolved_names.len() >= required && max_occurrence >= required;

        log::info!(
            "Wildcard analysis of {}: {}/{} names resolved, max address occurrence {}, required {}",
            domain,
            resolved_names.len(),
            tested_names.len(),
            max_occurrence,
            required
        );

        Ok(WildcardReport {
            domain,
            catch_all,
            tested_names,
            resolved_names,
            resolved_addresses: address_occurrences.keys().cloned().collect(),
            address_occurrences,
            soa_exists,
            ns_exists,
        })
    }

    pub async fn run(&self, domain: &str, cancel: &CancellationToken) -> TestResult {
        let test_name = format!("Wildcard DNS detection for {}", domain);
        let (duration, result) = measure_time(|| self.analyze(domain, cancel)).await;

        match result {
            Ok(report) if report.catch_all => TestResult::new(test_name).success(
                duration,
                format!(
                    "Catch-all DNS detected: {}/{} random names resolved to {}",
                    report.resolved_names.len(),
                    report.tested_names.len(),
                    report.resolved_addresses.join(", ")
                ),
            ),
            Ok(report) => TestResult::new(test_name).negative(
                duration,
                format!(
                    "No catch-all: {}/{} random names resolved (SOA: {}, NS: {})",
                    report.resolved_names.len(),
                    report.tested_names.len(),
                    report.soa_exists,
                    report.ns_exists
                ),
            ),
            Err(error) => TestResult::new(test_name).failure(duration, error),
        }
    }
}
