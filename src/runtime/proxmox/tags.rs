//! `dnsherpa-*` tag handling for Proxmox guests.

use std::net::IpAddr;

use crate::types::ResolvedAddress;

pub const SKIP_TAG: &str = "dnsherpa-skip";
pub const IP_TAG: &str = "dnsherpa-ip";
pub const INTERFACE_TAG: &str = "dnsherpa-interface";

/// The tags of one guest, as parsed from Proxmox's `;`-separated list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(Vec<String>);

impl TagSet {
    pub fn parse(raw: Option<&str>) -> Self {
        let tags = raw
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self(tags)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    /// Value of the first `name:value` tag with a non-empty value.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.0.iter().find_map(|t| {
            t.strip_prefix(name)
                .and_then(|rest| rest.strip_prefix(':'))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
    }

    pub fn opted_out(&self) -> bool {
        self.contains(SKIP_TAG)
    }

    /// Addresses pinned with `dnsherpa-ip:<ip>[,<ip>...]`. Unparseable
    /// entries are dropped; `Some(vec![])` still means the tag was present.
    pub fn pinned_addresses(&self) -> Option<Vec<ResolvedAddress>> {
        self.value(IP_TAG).map(|csv| {
            csv.split(',')
                .filter_map(|ip| ip.trim().parse::<IpAddr>().ok())
                .map(ResolvedAddress::new)
                .collect()
        })
    }

    pub fn interface(&self) -> Option<&str> {
        self.value(INTERFACE_TAG)
    }
}
