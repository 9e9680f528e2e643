//! Address classification and the multi-address selection strategy.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::types::{AddressFamily, ResolvedAddress};

/// How many addresses of each family are published per host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiAddressStrategy {
    /// First IPv4 address only, every IPv6 address.
    #[default]
    First,
    /// Every address of either family.
    All,
}

impl MultiAddressStrategy {
    /// Filters `addresses` according to the strategy, keeping encounter order.
    pub fn apply(self, addresses: Vec<ResolvedAddress>) -> Vec<ResolvedAddress> {
        match self {
            MultiAddressStrategy::All => addresses,
            MultiAddressStrategy::First => {
                let mut seen_v4 = false;
                addresses
                    .into_iter()
                    .filter(|addr| match addr.family() {
                        AddressFamily::V4 if seen_v4 => false,
                        AddressFamily::V4 => {
                            seen_v4 = true;
                            true
                        }
                        AddressFamily::V6 => true,
                    })
                    .collect()
            }
        }
    }
}

/// Parses a single IP literal. Surrounding whitespace and a trailing CIDR
/// prefix length (`10.0.0.5/24`) are tolerated; anything else yields `None`.
pub fn parse_address(raw: &str) -> Option<ResolvedAddress> {
    let raw = raw.trim();
    let raw = raw.split_once('/').map_or(raw, |(ip, _)| ip);
    raw.parse::<IpAddr>().ok().map(ResolvedAddress::new)
}

/// Loopback and link-local addresses are never published.
pub fn is_publishable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local() && !v4.is_unspecified(),
        IpAddr::V6(v6) => {
            !v6.is_loopback() && !v6.is_unspecified() && (v6.segments()[0] & 0xffc0) != 0xfe80
        }
    }
}

/// Parses raw interface addresses, silently dropping unparseable and
/// unpublishable entries, then applies `strategy`.
pub fn select_addresses<I, S>(raw: I, strategy: MultiAddressStrategy) -> Vec<ResolvedAddress>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parsed = raw
        .into_iter()
        .filter_map(|s| parse_address(s.as_ref()))
        .filter(|addr| is_publishable(addr.ip()))
        .collect();
    strategy.apply(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(addrs: &[ResolvedAddress]) -> Vec<String> {
        addrs.iter().map(ToString::to_string).collect()
    }

    const MIXED: [&str; 5] = [
        "10.0.0.1",
        "10.0.0.2",
        "fe80::1",
        "2001:db8::1",
        "2001:db8::2",
    ];

    #[test]
    fn first_keeps_one_ipv4_and_every_ipv6() {
        let selected = select_addresses(MIXED, MultiAddressStrategy::First);
        assert_eq!(
            render(&selected),
            ["10.0.0.1", "2001:db8::1", "2001:db8::2"]
        );
    }

    #[test]
    fn all_keeps_everything_publishable() {
        let selected = select_addresses(MIXED, MultiAddressStrategy::All);
        assert_eq!(
            render(&selected),
            ["10.0.0.1", "10.0.0.2", "2001:db8::1", "2001:db8::2"]
        );
    }

    #[test]
    fn garbage_and_local_addresses_are_dropped() {
        let raw = ["not-an-ip", "127.0.0.1", "::1", "169.254.3.3", "", "192.0.2.7"];
        let selected = select_addresses(raw, MultiAddressStrategy::All);
        assert_eq!(render(&selected), ["192.0.2.7"]);
    }

    #[test]
    fn cidr_suffix_is_stripped() {
        let addr = parse_address(" 10.1.2.3/24 ").unwrap();
        assert_eq!(addr.to_string(), "10.1.2.3");
        assert!(parse_address("10.1.2/24").is_none());
    }

    #[test]
    fn ipv6_order_is_preserved_under_first() {
        let raw = ["2001:db8::9", "10.0.0.9", "2001:db8::3", "10.0.0.1"];
        let selected = select_addresses(raw, MultiAddressStrategy::First);
        assert_eq!(render(&selected), ["2001:db8::9", "10.0.0.9", "2001:db8::3"]);
    }
}
