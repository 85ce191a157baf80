use crate::scan::PortProfile;
use clap::{Args, Parser, Subcommand, ValueEnum};
use hickory_client::rr::RecordType;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "netprobe")]
#[command(about = "Port scanning, UDP protocol probes and DNS propagation monitoring")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Per-operation timeout in seconds
    #[arg(short, long, global = true, default_value = "3")]
    pub timeout: u64,

    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Scan TCP/UDP ports and fingerprint services")]
    Scan {
        host: String,
        /// Comma-separated port list; overrides --profile
        #[arg(short, long, value_delimiter = ',')]
        ports: Vec<u16>,
        #[arg(long, value_enum, default_value = "default")]
        profile: PortProfile,
        #[arg(short, long, default_value = "100")]
        concurrency: usize,
    },
    #[command(about = "Test whether a DNS server is an open resolver")]
    Recursion {
        server: String,
        #[arg(short, long, default_value = "53")]
        port: u16,
        #[arg(long, default_value = "example.com")]
        query_name: String,
    },
    #[command(about = "Query an NTP server for stratum and clock offset")]
    Ntp {
        server: String,
        #[arg(short, long, default_value = "123")]
        port: u16,
    },
    #[command(about = "Check whether an SNMP agent answers community 'public'")]
    Snmp {
        host: String,
        #[arg(short, long, default_value = "161")]
        port: u16,
    },
    #[command(about = "Detect wildcard (catch-all) DNS")]
    Wildcard {
        domain: String,
        #[arg(long, default_value = "3")]
        samples: usize,
        #[arg(long, default_value = "2")]
        depth: usize,
        #[arg(long, default_value = "2")]
        retries: usize,
        #[arg(long, default_value = "1.0")]
        threshold: f64,
    },
    #[command(about = "Check DNS propagation across public resolvers")]
    Propagation {
        #[command(subcommand)]
        command: PropagationCommands,
    },
    #[command(about = "List the resolvers used for propagation checks")]
    Servers {
        #[command(flatten)]
        selection: ServerSelection,
    },
}

#[derive(Subcommand)]
pub enum PropagationCommands {
    #[command(about = "Query every selected resolver once")]
    Query {
        domain: String,
        #[arg(short, long, value_enum, default_value = "a")]
        record_type: RecordTypeArg,
        #[command(flatten)]
        selection: ServerSelection,
        /// Maximum concurrent queries, 0 for no limit
        #[arg(long, default_value = "0")]
        parallelism: usize,
        /// Diff against and save snapshots in this directory
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },
    #[command(about = "Re-check periodically and notify on discrepancies or changes")]
    Watch {
        domain: String,
        #[arg(short, long, value_enum, default_value = "a")]
        record_type: RecordTypeArg,
        #[command(flatten)]
        selection: ServerSelection,
        #[arg(long, default_value = "0")]
        parallelism: usize,
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
        /// Seconds between checks
        #[arg(short, long, default_value = "300")]
        interval: u64,
        /// Post notifications to this webhook instead of the log
        #[arg(long)]
        webhook: Option<String>,
    },
}

#[derive(Args, Clone, Default)]
pub struct ServerSelection {
    #[arg(long)]
    pub country: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    /// Extra resolver address, may be repeated
    #[arg(long = "server")]
    pub servers: Vec<String>,
    /// JSON server list to use instead of the built-in one
    #[arg(long)]
    pub servers_file: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
pub enum RecordTypeArg {
    A,
    AAAA,
    MX,
    NS,
    TXT,
    CNAME,
    SOA,
    CAA,
    All,
}

impl RecordTypeArg {
    pub fn to_record_types(&self) -> Vec<RecordType> {
        match self {
            RecordTypeArg::A => vec![RecordType::A],
            RecordTypeArg::AAAA => vec![RecordType::AAAA],
            RecordTypeArg::MX => vec![RecordType::MX],
            RecordTypeArg::NS => vec![RecordType::NS],
            RecordTypeArg::TXT => vec![RecordType::TXT],
            RecordTypeArg::CNAME => vec![RecordType::CNAME],
            RecordTypeArg::SOA => vec![RecordType::SOA],
            RecordTypeArg::CAA => vec![RecordType::CAA],
            RecordTypeArg::All => vec![
                RecordType::A,
                RecordType::AAAA,
                RecordType::MX,
                RecordType::NS,
                RecordType::TXT,
            ],
        }
    }
}

/// `--verbose` sets the base level; `RUST_LOG` style directives refine it.
pub fn log_builder(verbose: bool, directives: Option<&str>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    });
    if let Some(directives) = directives {
        builder.parse_filters(directives);
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_ports_are_comma_separated() {
        let cli = Cli::try_parse_from(["netprobe", "scan", "example.com", "-p", "22,80,443"]).unwrap();
        match cli.command {
            Commands::Scan { ports, profile, .. } => {
                assert_eq!(ports, vec![22, 80, 443]);
                assert_eq!(profile, PortProfile::Default);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn propagation_watch_accepts_repeated_servers() {
        let cli = Cli::try_parse_from([
            "netprobe",
            "--json",
            "propagation",
            "watch",
            "example.com",
            "-r",
            "aaaa",
            "--server",
            "192.0.2.1",
            "--server",
            "192.0.2.2:5353",
            "--interval",
            "60",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Propagation {
                command: PropagationCommands::Watch { selection, interval, record_type, .. },
            } => {
                assert_eq!(selection.servers.len(), 2);
                assert_eq!(interval, 60);
                assert_eq!(record_type.to_record_types(), vec![RecordType::AAAA]);
            }
            _ => panic!("expected propagation watch"),
        }
    }

    #[test]
    fn log_directives_override_verbosity() {
        assert_eq!(log_builder(false, None).build().filter(), log::LevelFilter::Warn);
        assert_eq!(log_builder(true, None).build().filter(), log::LevelFilter::Info);
        assert_eq!(log_builder(false, Some("debug")).build().filter(), log::LevelFilter::Debug);
        assert_eq!(
            log_builder(true, Some("netprobe=trace")).build().filter(),
            log::LevelFilter::Trace
        );
    }
}
