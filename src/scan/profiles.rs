use clap::ValueEnum;
use serde::Serialize;

/// Commonly exposed TCP/UDP service ports.
pub const DEFAULT_PORTS: &[u16] = &[
    7, 9, 13, 21, 22, 23, 25, 26, 37, 53, 67, 69, 79, 80, 81, 88, 106, 110, 111, 113, 119, 123,
    135, 137, 139, 143, 161, 179, 389, 427, 443, 445, 465, 500, 513, 514, 515, 548, 554, 587,
    631, 636, 873, 990, 993, 995, 1025, 1080, 1194, 1433, 1434, 1521, 1723, 1900, 2049, 2082,
    2083, 2222, 3000, 3128, 3268, 3306, 3389, 4500, 5000, 5060, 5222, 5432, 5631, 5900, 5985,
    6379, 6667, 7001, 8000, 8008, 8080, 8081, 8443, 8888, 9000, 9090, 9100, 9200, 9418, 10000,
    11211, 27017,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ValueEnum)]
pub enum PortProfile {
    #[default]
    Default,
    Smb,
    Ntp,
}

impl PortProfile {
    pub fn ports(self) -> &'static [u16] {
        match self {
            PortProfile::Default => DEFAULT_PORTS,
            PortProfile::Smb => &[445, 139],
            PortProfile::Ntp => &[123],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_profile_has_no_duplicates() {
        let unique: HashSet<_> = DEFAULT_PORTS.iter().collect();
        assert_eq!(unique.len(), DEFAULT_PORTS.len());
        assert!(DEFAULT_PORTS.len() >= 80);
    }

    #[test]
    fn named_profiles() {
        assert_eq!(PortProfile::Smb.ports(), &[445, 139]);
        assert_eq!(PortProfile::Ntp.ports(), &[123]);
    }
}
