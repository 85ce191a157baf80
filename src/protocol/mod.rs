//! Minimal wire formats used by the probes.
//!
//! These are pure encode/decode functions with no I/O. They cover exactly
//! what the probes need: a DNS query header and question, an NTP client
//! exchange and a single SNMPv1 GetRequest.

pub mod dns;
pub mod ntp;
pub mod snmp;
