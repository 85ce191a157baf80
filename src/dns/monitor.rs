use super::{
    compare_results, majority, normalize_domain, PropagationChecker, PropagationResult,
    RecordGroup, ServerInfo, SnapshotStore,
};
use crate::monitor::MonitorCheck;
use crate::notify::NotificationSender;
use crate::utils::Result;
use async_trait::async_trait;
use hickory_client::rr::RecordType;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// What one record type looked like on one monitor cycle.
#[derive(Debug, Clone)]
pub struct PropagationCheck {
    pub record_type: RecordType,
    pub results: Vec<PropagationResult>,
    pub groups: Vec<RecordGroup>,
    pub changes: Vec<String>,
    pub snapshot: Option<PathBuf>,
}

impl PropagationCheck {
    pub fn has_discrepancy(&self) -> bool {
        self.groups.len() > 1
    }
}

/// Watches one domain across a set of resolvers.
///
/// Each cycle queries every configured record type, alerts when servers
/// disagree, and with a snapshot store alerts on any change since the last
/// saved snapshot before saving a new one.
pub struct PropagationMonitor {
    domain: String,
    record_types: Vec<RecordType>,
    servers: Vec<ServerInfo>,
    checker: PropagationChecker,
    store: Option<SnapshotStore>,
    notifier: Arc<dyn NotificationSender>,
    consensus: Mutex<HashMap<RecordType, Vec<String>>>,
}

impl PropagationMonitor {
    pub fn new(
        domain: &str,
        servers: Vec<ServerInfo>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Result<Self> {
        Ok(Self {
            domain: normalize_domain(domain)?,
            record_types: vec![RecordType::A],
            servers,
            checker: PropagationChecker::default(),
            store: None,
            notifier,
            consensus: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_record_types(mut self, record_types: Vec<RecordType>) -> Self {
        self.record_types = record_types;
        self
    }

    pub fn with_checker(mut self, checker: PropagationChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_snapshot_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Majority answer seen on the last cycle for `record_type`.
    pub fn last_consensus(&self, record_type: RecordType) -> Option<Vec<String>> {
        self.consensus
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&record_type)
            .cloned()
    }

    async fn notify(&self, message: &str, cancel: &CancellationToken) -> Result<()> {
        match self.notifier.send(message, cancel).await {
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                log::warn!("Could not deliver notification for {}: {}", self.domain, e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn record_consensus(&self, record_type: RecordType, groups: &[RecordGroup]) {
        let Some(top) = majority(groups) else {
            return;
        };
        let mut consensus = self.consensus.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = consensus.insert(record_type, top.records.clone());
        if let Some(previous) = previous.filter(|p| *p != top.records) {
            log::info!(
                "{} {} consensus changed: [{}] -> [{}]",
                self.domain,
                record_type,
                previous.join(", "),
                top.records.join(", ")
            );
        }
    }

    pub async fn check_record_type(
        &self,
        record_type: RecordType,
        cancel: &CancellationToken,
    ) -> Result<PropagationCheck> {
        let results = self
            .checker
            .query(&self.domain, record_type, &self.servers, cancel)
            .await?;
        let groups = compare_results(&results);

        if groups.len() > 1 {
            log::warn!(
                "Propagation discrepancy for {} {}: {} distinct answers",
                self.domain,
                record_type,
                groups.len()
            );
            let detail: Vec<String> = groups
                .iter()
                .map(|g| format!("[{}] via {}", g.records.join(", "), g.servers.join(", ")))
                .collect();
            let message = format!(
                "Propagation discrepancy for {} {}:\n{}",
                self.domain,
                record_type,
                detail.join("\n")
            );
            self.notify(&message, cancel).await?;
        }
        self.record_consensus(record_type, &groups);

        let mut changes = Vec::new();
        let mut snapshot = None;
        if let Some(store) = &self.store {
            changes = store.diff(&self.domain, record_type, &results)?;
            if !changes.is_empty() {
                let message = format!(
                    "{} {} changed since last snapshot:\n{}",
                    self.domain,
                    record_type,
                    changes.join("\n")
                );
                self.notify(&message, cancel).await?;
            }
            snapshot = Some(store.save(&self.domain, record_type, &results)?);
        }

        Ok(PropagationCheck {
            record_type,
            results,
            groups,
            changes,
            snapshot,
        })
    }
}

#[async_trait]
impl MonitorCheck for PropagationMonitor {
    fn name(&self) -> String {
        format!("Propagation monitor for {}", self.domain)
    }

    async fn run_check(&self, cancel: &CancellationToken) -> Result<()> {
        for &record_type in &self.record_types {
            self.check_record_type(record_type, cancel).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::DnsQuery;
    use crate::notify::CallbackSender;
    use crate::utils::NetworkError;
    use std::net::SocketAddr;

    /// Per-server canned answers that tests can change between cycles.
    #[derive(Default)]
    struct Answers(Mutex<HashMap<SocketAddr, Vec<String>>>);

    impl Answers {
        fn set(&self, server: &str, records: &[&str]) {
            let addr = ServerInfo::new(server).socket_addr().unwrap();
            self.0
                .lock()
                .unwrap()
                .insert(addr, records.iter().map(|r| r.to_string()).collect());
        }
    }

    #[async_trait]
    impl DnsQuery for Answers {
        async fn lookup(&self, server: Option<SocketAddr>, _: &str, _: RecordType) -> Result<Vec<String>> {
            let server = server.ok_or_else(|| NetworkError::Other("server required".to_string()))?;
            self.0
                .lock()
                .unwrap()
                .get(&server)
                .cloned()
                .ok_or_else(|| NetworkError::DnsResolution("no answer".to_string()))
        }
    }

    fn setup(answers: Arc<Answers>) -> (PropagationMonitor, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let notifier = CallbackSender::new(move |m: &str| {
            sink.lock().unwrap().push(m.to_string());
            Ok(())
        });
        let servers = vec![ServerInfo::new("192.0.2.1"), ServerInfo::new("192.0.2.2")];
        let monitor = PropagationMonitor::new("example.com", servers, Arc::new(notifier))
            .unwrap()
            .with_checker(PropagationChecker::new().with_query(answers));
        (monitor, sent)
    }

    #[tokio::test]
    async fn agreement_sends_nothing() {
        let answers = Arc::new(Answers::default());
        answers.set("192.0.2.1", &["198.51.100.1"]);
        answers.set("192.0.2.2", &["198.51.100.1"]);
        let (monitor, sent) = setup(answers);

        let check = monitor.check_record_type(RecordType::A, &CancellationToken::new()).await.unwrap();
        assert!(!check.has_discrepancy());
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(monitor.last_consensus(RecordType::A), Some(vec!["198.51.100.1".to_string()]));
    }

    #[tokio::test]
    async fn disagreement_notifies() {
        let answers = Arc::new(Answers::default());
        answers.set("192.0.2.1", &["198.51.100.1"]);
        answers.set("192.0.2.2", &["198.51.100.2"]);
        let (monitor, sent) = setup(answers);

        monitor.run_check(&CancellationToken::new()).await.unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Propagation discrepancy for example.com A"));
    }

    #[tokio::test]
    async fn snapshot_change_notifies_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let answers = Arc::new(Answers::default());
        answers.set("192.0.2.1", &["198.51.100.1"]);
        answers.set("192.0.2.2", &["198.51.100.1"]);
        let (monitor, sent) = setup(Arc::clone(&answers));
        let monitor = monitor.with_snapshot_store(SnapshotStore::new(dir.path()));
        let cancel = CancellationToken::new();

        let first = monitor.check_record_type(RecordType::A, &cancel).await.unwrap();
        assert!(first.changes.is_empty());
        assert!(first.snapshot.unwrap().exists());

        answers.set("192.0.2.1", &["198.51.100.9"]);
        answers.set("192.0.2.2", &["198.51.100.9"]);
        let second = monitor.check_record_type(RecordType::A, &cancel).await.unwrap();
        assert_eq!(second.changes.len(), 4);
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(monitor.last_consensus(RecordType::A), Some(vec!["198.51.100.9".to_string()]));
    }

    #[tokio::test]
    async fn failed_delivery_does_not_stop_the_cycle() {
        let answers = Arc::new(Answers::default());
        answers.set("192.0.2.1", &["198.51.100.1"]);
        answers.set("192.0.2.2", &["198.51.100.2"]);
        let notifier = CallbackSender::new(|_: &str| Err(NetworkError::Notification("down".to_string())));
        let monitor = PropagationMonitor::new(
            "example.com",
            vec![ServerInfo::new("192.0.2.1"), ServerInfo::new("192.0.2.2")],
            Arc::new(notifier),
        )
        .unwrap()
        .with_checker(PropagationChecker::new().with_query(answers));

        assert!(monitor.run_check(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn unreadable_snapshot_does_not_block_later_cycles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("example.com_A_20200101000000.json"), "[{\"server\"").unwrap();

        let answers = Arc::new(Answers::default());
        answers.set("192.0.2.1", &["198.51.100.1"]);
        answers.set("192.0.2.2", &["198.51.100.1"]);
        let (monitor, sent) = setup(answers);
        let monitor = monitor.with_snapshot_store(SnapshotStore::new(dir.path()));
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            monitor.run_check(&cancel).await.unwrap();
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4);
        assert!(sent.lock().unwrap().is_empty());
    }
}
