//! Hostname extraction from Traefik router labels.
//!
//! Any label whose key looks like `traefik.http.routers.<name>.rule` is
//! scanned for ``Host(`example.com`)`` clauses. Labels that do not match
//! simply produce nothing.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

const ROUTER_KEY_MARKER: &str = "traefik.http.routers.";
const RULE_KEY_MARKER: &str = ".rule";

static HOST_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Host\(\s*`([^`]+)`\s*\)").expect("host rule pattern is valid")
});

/// Returns every hostname named in router rules. Order is stable within one
/// rule but not across labels, since the map has no order. Duplicates are kept.
pub fn extract_hosts(labels: &HashMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .filter(|(key, _)| key.contains(ROUTER_KEY_MARKER) && key.contains(RULE_KEY_MARKER))
        .flat_map(|(_, rule)| hosts_in_rule(rule))
        .collect()
}

fn hosts_in_rule(rule: &str) -> impl Iterator<Item = String> + '_ {
    HOST_RULE
        .captures_iter(rule)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
