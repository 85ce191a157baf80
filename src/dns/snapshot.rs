//! Timestamped propagation snapshots on disk.
//!
//! Files are named `{domain}_{TYPE}_{yyyyMMddHHmmss}.json` and never
//! rewritten, so the newest snapshot for a name and type is simply the
//! greatest file name with that prefix.

use super::PropagationResult;
use crate::utils::{NetworkError, Result};
use chrono::Utc;
use hickory_client::rr::RecordType;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

fn sanitize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_end_matches('.')
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect()
}

/// One line per server, sorted by address.
fn snapshot_lines(results: &[PropagationResult]) -> Vec<String> {
    let mut sorted: Vec<&PropagationResult> = results.iter().collect();
    sorted.sort_by(|a, b| a.server.address.cmp(&b.server.address));
    sorted
        .into_iter()
        .map(|result| {
            let mut records = result.records.clone();
            records.sort();
            format!("{}:{}", result.server.address, records.join(","))
        })
        .collect()
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn prefix(domain: &str, record_type: RecordType) -> String {
        format!("{}_{}_", sanitize_domain(domain), record_type)
    }

    /// Writes a new snapshot file and returns its path. A save within the
    /// same second as an earlier one gets a numbered suffix.
    pub fn save(&self, domain: &str, record_type: RecordType, results: &[PropagationResult]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(results)?;
        let base = format!(
            "{}{}",
            Self::prefix(domain, record_type),
            Utc::now().format(TIMESTAMP_FORMAT)
        );

        for attempt in 0..1000u32 {
            let name = match attempt {
                0 => format!("{base}.json"),
                n => format!("{base}_{n:03}.json"),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&body)?;
                    log::debug!("Saved snapshot {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(NetworkError::Other(format!("too many snapshots for {} in one second", base)))
    }

    /// Newest snapshot file for `domain` and `record_type`, if any.
    pub fn latest(&self, domain: &str, record_type: RecordType) -> Result<Option<PathBuf>> {
        let prefix = Self::prefix(domain, record_type);
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<String> = None;
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            if !name.ends_with(".json") || !rest.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            if newest.as_ref().map_or(true, |current| name > *current) {
                newest = Some(name);
            }
        }
        Ok(newest.map(|name| self.dir.join(name)))
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<Vec<PropagationResult>> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Compares `current` with the newest saved snapshot.
    ///
    /// Both sides are rendered as `address:records` lines sorted by address
    /// and compared position by position; each mismatch yields `- old` and
    /// `+ new`. Without a saved snapshot, or when the newest one cannot be
    /// read, the diff is empty.
    pub fn diff(
        &self,
        domain: &str,
        record_type: RecordType,
        current: &[PropagationResult],
    ) -> Result<Vec<String>> {
        let Some(path) = self.latest(domain, record_type)? else {
            return Ok(Vec::new());
        };
        let previous = match self.load(&path) {
            Ok(previous) => snapshot_lines(&previous),
            Err(e) => {
                log::warn!("Ignoring unreadable snapshot {}: {}", path.display(), e);
                return Ok(Vec::new());
            }
        };
        let current = snapshot_lines(current);

        let mut changes = Vec::new();
        for index in 0..previous.len().max(current.len()) {
            match (previous.get(index), current.get(index)) {
                (Some(old), Some(new)) if old != new => {
                    changes.push(format!("- {old}"));
                    changes.push(format!("+ {new}"));
                }
                (Some(old), None) => changes.push(format!("- {old}")),
                (None, Some(new)) => changes.push(format!("+ {new}")),
                _ => {}
            }
        }
        Ok(changes)
    }
}
