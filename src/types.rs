//! Data structures shared by the discovery and record-writing layers.
//!
//! Everything here is a plain value rebuilt on every reconciliation pass.
//! Nothing is cached between passes; the record store is the only state
//! that outlives a cycle.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// TTL written into every record, in seconds.
pub const RECORD_TTL: u32 = 300;

/// Where a host was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Docker,
    Proxmox,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Docker => f.write_str("docker"),
            Source::Proxmox => f.write_str("proxmox"),
        }
    }
}

/// A discovered hostname, either an FQDN or a bare short name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub source: Source,
}

impl Host {
    pub fn new(name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A parsed IP address ready to be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress(IpAddr);

impl ResolvedAddress {
    pub fn new(ip: IpAddr) -> Self {
        Self(ip)
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }

    pub fn family(&self) -> AddressFamily {
        match self.0 {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self.family() {
            AddressFamily::V4 => RecordType::A,
            AddressFamily::V6 => RecordType::Aaaa,
        }
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The record type a write is meant to produce.
///
/// The stored value has the same shape for all three; the type only decides
/// the key suffix and what gets logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
}

impl RecordType {
    /// Classifies a record target: IP literals map to A/AAAA, anything else
    /// is treated as a hostname.
    pub fn for_target(target: &str) -> Self {
        match target.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => RecordType::A,
            Ok(IpAddr::V6(_)) => RecordType::Aaaa,
            Err(_) => RecordType::Cname,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => f.write_str("A"),
            RecordType::Aaaa => f.write_str("AAAA"),
            RecordType::Cname => f.write_str("CNAME"),
        }
    }
}

/// The JSON value stored under a record key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub host: String,
    pub ttl: u32,
}

impl DnsRecord {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ttl: RECORD_TTL,
        }
    }
}
