//! Reverse-domain key layout used by SkyDNS-style etcd backends.
//!
//! `api.example.com` under prefix `/skydns` becomes `/skydns/com/example/api`.
//! Hosts with several addresses get one child key per address: `a1`, `a2`, ...
//! for IPv4 and `aaaa1`, `aaaa2`, ... for IPv6.

use crate::types::AddressFamily;

#[derive(Debug, Clone)]
pub struct KeyPathBuilder {
    prefix: String,
}

impl KeyPathBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Key for a single-record host.
    pub fn path(&self, hostname: &str) -> String {
        let labels: Vec<&str> = hostname.split('.').rev().collect();
        format!("{}/{}", self.prefix, labels.join("/"))
    }

    /// Key for the `index`-th (1-based) address of `family` on a multi-address host.
    pub fn indexed_path(&self, hostname: &str, family: AddressFamily, index: usize) -> String {
        let leaf = match family {
            AddressFamily::V4 => "a",
            AddressFamily::V6 => "aaaa",
        };
        format!("{}/{}{}", self.path(hostname), leaf, index)
    }
}
