use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use netprobe::cli::{self, Commands, PropagationCommands, ServerSelection};
use netprobe::dns::{
    compare_results, PropagationChecker, PropagationMonitor, RecordType, ResolverQuery,
    ServerEntry, ServerFilter, ServerInfo, ServerPool, SnapshotStore, WildcardDetector,
};
use netprobe::monitor::PeriodicMonitor;
use netprobe::notify::{LogSender, NotificationSender, WebhookSender};
use netprobe::probes::{NtpProbe, RecursionProbe, SnmpProbe};
use netprobe::scan::{PortScanner, ScanResult, ScanTarget};
use netprobe::utils::{self, NetworkError, Result, TestResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    cli::log_builder(cli.verbose, std::env::var("RUST_LOG").ok().as_deref()).init();

    let timeout = Duration::from_secs(cli.timeout.max(1));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let results = match cli.command {
        Commands::Scan {
            host,
            ports,
            profile,
            concurrency,
        } => {
            let target = if ports.is_empty() {
                ScanTarget::with_profile(host, profile)
            } else {
                ScanTarget::new(host, ports)
            };
            handle_scan(target, concurrency, timeout, cli.json, &cancel).await
        }
        Commands::Recursion {
            server,
            port,
            query_name,
        } => {
            let probe = RecursionProbe::new()
                .with_timeout(timeout)
                .with_query_name(query_name);
            vec![probe.run(&server, port, &cancel).await]
        }
        Commands::Ntp { server, port } => {
            let probe = NtpProbe::new().with_timeout(timeout);
            vec![probe.run(&server, port, &cancel).await]
        }
        Commands::Snmp { host, port } => {
            let probe = SnmpProbe::new().with_timeout(timeout);
            vec![probe.run(&host, port, &cancel).await]
        }
        Commands::Wildcard {
            domain,
            samples,
            depth,
            retries,
            threshold,
        } => {
            let detector = WildcardDetector::new()
                .with_query(Arc::new(ResolverQuery::new().with_timeout(timeout)))
                .with_sample_count(samples)
                .with_depth(depth)
                .with_retry_count(retries)
                .with_consistency_threshold(threshold);
            vec![detector.run(&domain, &cancel).await]
        }
        Commands::Propagation { command } => {
            handle_propagation_command(command, timeout, &cancel).await
        }
        Commands::Servers { selection } => handle_servers(&selection),
    };

    if cli.json {
        print_results_json(&results);
    } else {
        print_results_human(&results);
    }

    if !results.is_empty() && results.iter().all(|r| !r.success) {
        std::process::exit(1);
    }
}

fn select_servers(selection: &ServerSelection) -> Result<Vec<ServerInfo>> {
    let mut pool = match &selection.servers_file {
        Some(path) => ServerPool::from_file(path)?,
        None => ServerPool::builtin()?,
    };
    for address in &selection.servers {
        pool = pool.with_custom(ServerEntry::new(address.clone()));
    }

    let servers = pool.select(&ServerFilter {
        country: selection.country.clone(),
        location: selection.location.clone(),
    });
    if servers.is_empty() {
        return Err(NetworkError::Configuration(
            "no resolvers match the selection".to_string(),
        ));
    }
    Ok(servers)
}

fn describe_server(server: &ServerInfo) -> String {
    match (&server.country, &server.location) {
        (Some(country), Some(location)) => format!("{} ({}, {})", server.address, country, location),
        (Some(country), None) => format!("{} ({})", server.address, country),
        (None, Some(location)) => format!("{} ({})", server.address, location),
        (None, None) => server.address.clone(),
    }
}

async fn handle_scan(
    target: ScanTarget,
    concurrency: usize,
    timeout: Duration,
    quiet: bool,
    cancel: &CancellationToken,
) -> Vec<TestResult> {
    let scanner = PortScanner::new()
        .with_timeout(timeout)
        .with_max_concurrency(concurrency);

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}% {msg}")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(format!("Scanning {} ports on {}...", target.ports.len(), target.host));

    let start = Instant::now();
    let scan = scanner
        .scan_with_progress(&target, cancel, |fraction| {
            pb.set_position((fraction * 100.0).round() as u64)
        })
        .await;
    pb.finish_and_clear();

    match scan {
        Ok(results) => scan_results(&target.host, &results),
        Err(error) => vec![TestResult::new(format!("Port scan of {}", target.host))
            .failure(start.elapsed(), error)],
    }
}

fn scan_results(host: &str, results: &BTreeMap<u16, ScanResult>) -> Vec<TestResult> {
    results
        .values()
        .map(|r| {
            let test_name = format!("Port {} on {}", r.port, host);
            let mut details = Vec::new();
            if r.tcp_open {
                details.push("tcp open".to_string());
            }
            if r.udp_open {
                details.push("udp open".to_string());
            }
            if let Some(banner) = &r.banner {
                details.push(format!("service: {}", banner));
            }

            if r.tcp_open || r.udp_open {
                TestResult::new(test_name).success(r.tcp_latency, details.join(", "))
            } else {
                let reason = r.error.clone().unwrap_or_else(|| "closed or filtered".to_string());
                TestResult::new(test_name).failure(r.tcp_latency, NetworkError::Other(reason))
            }
        })
        .collect()
}

async fn handle_propagation_command(
    command: PropagationCommands,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Vec<TestResult> {
    match command {
        PropagationCommands::Query {
            domain,
            record_type,
            selection,
            parallelism,
            snapshot_dir,
        } => {
            let servers = match select_servers(&selection) {
                Ok(servers) => servers,
                Err(e) => return vec![TestResult::new("Resolver selection".to_string()).failure(Duration::ZERO, e)],
            };
            let checker = PropagationChecker::new()
                .with_query(Arc::new(ResolverQuery::new().with_timeout(timeout)))
                .with_timeout(timeout)
                .with_max_parallelism(parallelism);
            let store = snapshot_dir.map(SnapshotStore::new);

            let mut results = Vec::new();
            for rt in record_type.to_record_types() {
                results.extend(propagation_query(&checker, store.as_ref(), &domain, rt, &servers, cancel).await);
            }
            results
        }
        PropagationCommands::Watch {
            domain,
            record_type,
            selection,
            parallelism,
            snapshot_dir,
            interval,
            webhook,
        } => {
            let started = Instant::now();
            let test_name = format!("Propagation watch for {}", domain);
            match watch(
                &domain,
                record_type.to_record_types(),
                &selection,
                parallelism,
                snapshot_dir,
                Duration::from_secs(interval),
                webhook,
                timeout,
                cancel,
            )
            .await
            {
                Ok(()) => vec![TestResult::new(test_name).success(started.elapsed(), "Stopped".to_string())],
                Err(e) => vec![TestResult::new(test_name).failure(started.elapsed(), e)],
            }
        }
    }
}

async fn propagation_query(
    checker: &PropagationChecker,
    store: Option<&SnapshotStore>,
    domain: &str,
    record_type: RecordType,
    servers: &[ServerInfo],
    cancel: &CancellationToken,
) -> Vec<TestResult> {
    let (duration, queried) =
        utils::measure_time(|| checker.query(domain, record_type, servers, cancel)).await;
    let summary_name = format!("{} propagation for {}", record_type, domain);

    let results = match queried {
        Ok(results) => results,
        Err(e) => return vec![TestResult::new(summary_name).failure(duration, e)],
    };

    let mut out: Vec<TestResult> = results
        .iter()
        .map(|r| {
            let test_name = format!("{} {} via {}", record_type, domain, describe_server(&r.server));
            if r.success {
                let details = if r.records.is_empty() {
                    "(no records)".to_string()
                } else {
                    r.records.join(", ")
                };
                TestResult::new(test_name).success(duration, details)
            } else {
                let reason = r.error.clone().unwrap_or_else(|| "query failed".to_string());
                TestResult::new(test_name).failure(duration, NetworkError::DnsResolution(reason))
            }
        })
        .collect();

    let groups = compare_results(&results);
    let listing: Vec<String> = groups
        .iter()
        .map(|g| format!("[{}] x{}", g.records.join(", "), g.servers.len()))
        .collect();
    out.push(if groups.len() > 1 {
        TestResult::new(summary_name).failure(
            duration,
            NetworkError::Other(format!("{} distinct answers: {}", groups.len(), listing.join("; "))),
        )
    } else {
        TestResult::new(summary_name).success(duration, format!("Consistent: {}", listing.join("; ")))
    });

    if let Some(store) = store {
        let snapshot_name = format!("{} snapshot for {}", record_type, domain);
        let saved = store
            .diff(domain, record_type, &results)
            .and_then(|changes| Ok((changes, store.save(domain, record_type, &results)?)));
        out.push(match saved {
            Ok((changes, path)) if changes.is_empty() => TestResult::new(snapshot_name)
                .success(Duration::ZERO, format!("No changes, saved {}", path.display())),
            Ok((changes, path)) => TestResult::new(snapshot_name).success(
                Duration::ZERO,
                format!("{} saved {}", changes.join(" | "), path.display()),
            ),
            Err(e) => TestResult::new(snapshot_name).failure(Duration::ZERO, e),
        });
    }
    out
}

#[allow(clippy::too_many_arguments)]
async fn watch(
    domain: &str,
    record_types: Vec<RecordType>,
    selection: &ServerSelection,
    parallelism: usize,
    snapshot_dir: Option<std::path::PathBuf>,
    interval: Duration,
    webhook: Option<String>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let servers = select_servers(selection)?;
    let notifier: Arc<dyn NotificationSender> = match webhook {
        Some(url) => Arc::new(WebhookSender::new(&url)?),
        None => Arc::new(LogSender),
    };
    let checker = PropagationChecker::new()
        .with_query(Arc::new(ResolverQuery::new().with_timeout(timeout)))
        .with_timeout(timeout)
        .with_max_parallelism(parallelism);

    let mut check = PropagationMonitor::new(domain, servers, notifier)?
        .with_record_types(record_types)
        .with_checker(checker);
    if let Some(dir) = snapshot_dir {
        check = check.with_snapshot_store(SnapshotStore::new(dir));
    }

    let mut monitor = PeriodicMonitor::new(check, interval)?;
    monitor.start();
    println!("Watching {} every {:?}, press Ctrl-C to stop", domain, interval);

    cancel.cancelled().await;
    monitor.stop();
    Ok(())
}

fn handle_servers(selection: &ServerSelection) -> Vec<TestResult> {
    match select_servers(selection) {
        Ok(servers) => servers
            .iter()
            .map(|s| TestResult::new(describe_server(s)).success(Duration::ZERO, "enabled".to_string()))
            .collect(),
        Err(e) => vec![TestResult::new("Resolver selection".to_string()).failure(Duration::ZERO, e)],
    }
}

fn print_results_human(results: &[TestResult]) {
    println!("\n{}", "=".repeat(80).blue());
    println!("{}", "Probe Results".bold().blue());
    println!("{}", "=".repeat(80).blue());

    let mut success_count = 0;
    let mut failure_count = 0;

    for result in results {
        let status = if result.success {
            success_count += 1;
            "PASS".green().bold()
        } else {
            failure_count += 1;
            "FAIL".red().bold()
        };

        let duration_str = utils::format_duration(result.duration);

        println!("{} {} ({})", status, result.test_name, duration_str.cyan());

        if result.success {
            if !result.details.is_empty() {
                println!("  ✓ {}", result.details.green());
            }
        } else if let Some(ref error) = result.error {
            println!("  ✗ {}", error.to_string().red());
        } else if !result.details.is_empty() {
            println!("  - {}", result.details.yellow());
        }
        println!();
    }

    println!("{}", "-".repeat(80).blue());
    println!(
        "Summary: {} passed, {} failed, {} total",
        success_count.to_string().green().bold(),
        failure_count.to_string().red().bold(),
        results.len().to_string().blue().bold()
    );
}

fn print_results_json(results: &[TestResult]) {
    #[derive(serde::Serialize)]
    struct JsonResult {
        test_name: String,
        success: bool,
        duration_ms: u128,
        details: Option<String>,
        error: Option<String>,
    }

    let json_results: Vec<JsonResult> = results
        .iter()
        .map(|r| JsonResult {
            test_name: r.test_name.clone(),
            success: r.success,
            duration_ms: r.duration.as_millis(),
            details: if r.details.is_empty() {
                None
            } else {
                Some(r.details.clone())
            },
            error: r.error.as_ref().map(|e| e.to_string()),
        })
        .collect();

    match serde_json::to_string_pretty(&json_results) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Could not serialize results: {}", e),
    }
}
