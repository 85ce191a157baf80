use super::ServerInfo;
use crate::utils::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const BUILTIN_SERVERS: &str = include_str!("servers.json");

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub address: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl ServerEntry {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            country: None,
            location: None,
            enabled: true,
        }
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            address: self.address.clone(),
            country: self.country.clone(),
            location: self.location.clone(),
        }
    }
}

/// Case-insensitive country/location filter; unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    pub country: Option<String>,
    pub location: Option<String>,
}

impl ServerFilter {
    fn matches(&self, entry: &ServerEntry) -> bool {
        fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
            match wanted {
                None => true,
                Some(wanted) => actual
                    .as_deref()
                    .is_some_and(|actual| actual.eq_ignore_ascii_case(wanted.trim())),
            }
        }
        field_matches(&self.country, &entry.country) && field_matches(&self.location, &entry.location)
    }
}

/// Resolvers to query: a base list plus caller-supplied extras.
#[derive(Debug, Clone)]
pub struct ServerPool {
    entries: Vec<ServerEntry>,
    custom: Vec<ServerEntry>,
}

impl ServerPool {
    /// The list compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_SERVERS)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<ServerEntry> = serde_json::from_str(json)
            .map_err(|e| NetworkError::Configuration(format!("invalid server list: {}", e)))?;
        Ok(Self {
            entries,
            custom: Vec::new(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            NetworkError::Configuration(format!("cannot read server list {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn with_custom(mut self, entry: ServerEntry) -> Self {
        self.custom.push(entry);
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = &ServerEntry> {
        self.entries.iter().chain(self.custom.iter())
    }

    /// Enabled base entries matching `filter`, then enabled custom entries.
    pub fn select(&self, filter: &ServerFilter) -> Vec<ServerInfo> {
        let base = self.entries.iter().filter(|e| filter.matches(e));
        base.chain(self.custom.iter())
            .filter(|e| e.enabled)
            .map(ServerEntry::info)
            .collect()
    }
}
