use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    value::UncasedStr,
    Figment,
};
use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dns::MultiAddressStrategy;
use crate::error::{Error, Result};

/// Environment variables read on top of the config files.
const ENV_KEYS: &[&str] = &[
    "ETCD_ENDPOINTS",
    "ETCD_PREFIX",
    "ETCD_TLS",
    "ETCD_CA_FILE",
    "ETCD_CERT_FILE",
    "ETCD_KEY_FILE",
    "DNS_TARGET",
    "HOST_HOSTNAME_FILE",
    "DOMAIN",
    "AGENT_MODE",
    "PROXMOX_API_URL",
    "PROXMOX_TOKEN_ID",
    "PROXMOX_TOKEN_SECRET",
    "PROXMOX_POLL_INTERVAL",
    "PROXMOX_VERIFY_SSL",
    "PROXMOX_INTERFACE",
    "PROXMOX_MULTI_IPV4",
    "LOG_LEVEL",
    "LOG_FORMAT",
];

const PROXMOX_API_PATH: &str = "/api2/json";

/// Which discovery sources run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Docker,
    Proxmox,
    Hybrid,
}

impl AgentMode {
    pub fn runs_docker(self) -> bool {
        matches!(self, AgentMode::Docker | AgentMode::Hybrid)
    }

    pub fn runs_proxmox(self) -> bool {
        matches!(self, AgentMode::Proxmox | AgentMode::Hybrid)
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentMode::Docker => f.write_str("docker"),
            AgentMode::Proxmox => f.write_str("proxmox"),
            AgentMode::Hybrid => f.write_str("hybrid"),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(deserialize_with = "list_or_csv")]
    pub etcd_endpoints: Vec<String>,
    pub etcd_prefix: String,
    pub etcd_tls: bool,
    pub etcd_ca_file: String,
    pub etcd_cert_file: String,
    pub etcd_key_file: String,

    /// Record target for Docker-discovered hosts. Detected from the host's
    /// hostname when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_target: Option<String>,
    pub host_hostname_file: PathBuf,
    pub domain: String,

    pub agent_mode: AgentMode,

    pub proxmox_api_url: String,
    pub proxmox_token_id: String,
    pub proxmox_token_secret: String,
    pub proxmox_poll_interval: PollInterval,
    pub proxmox_verify_ssl: bool,
    pub proxmox_interface: String,
    pub proxmox_multi_ipv4: MultiAddressStrategy,

    pub log_level: String,
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            etcd_endpoints: vec!["172.16.0.221:2379".into(), "172.16.0.222:2379".into()],
            etcd_prefix: "/skydns".into(),
            etcd_tls: false,
            etcd_ca_file: String::new(),
            etcd_cert_file: String::new(),
            etcd_key_file: String::new(),
            dns_target: None,
            host_hostname_file: PathBuf::from("/host/hostname"),
            domain: String::new(),
            agent_mode: AgentMode::Docker,
            proxmox_api_url: String::new(),
            proxmox_token_id: String::new(),
            proxmox_token_secret: String::new(),
            proxmox_poll_interval: PollInterval(Duration::from_secs(30)),
            proxmox_verify_ssl: false,
            proxmox_interface: "eth0".into(),
            proxmox_multi_ipv4: MultiAddressStrategy::First,
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("dnsherpa.toml"))
            .merge(Json::file("dnsherpa.json"))
            .merge(Env::raw().only(ENV_KEYS).filter(is_set))
    }

    fn validate(&self) -> Result<()> {
        if self.etcd_endpoints.is_empty() {
            return Err(Error::Config("ETCD_ENDPOINTS must name at least one endpoint".into()));
        }
        if self.proxmox_poll_interval.0.is_zero() {
            return Err(Error::Config("PROXMOX_POLL_INTERVAL must be positive".into()));
        }
        Ok(())
    }

    /// Proxmox API base URL ending in `/api2/json`, or `None` when unset.
    pub fn proxmox_api_base(&self) -> Option<String> {
        let url = self.proxmox_api_url.trim();
        if url.is_empty() {
            return None;
        }
        if url.ends_with(PROXMOX_API_PATH) {
            return Some(url.to_string());
        }
        Some(format!("{}{}", url.trim_end_matches('/'), PROXMOX_API_PATH))
    }

    pub fn poll_interval(&self) -> Duration {
        self.proxmox_poll_interval.0
    }

    /// Determines the record target for Docker-discovered hosts.
    ///
    /// `DNS_TARGET` wins; otherwise the host's own hostname is read from the
    /// mounted hostname file and qualified with `DOMAIN` when it is short.
    pub fn detect_dns_target(&self) -> Result<String> {
        if let Some(target) = self.dns_target.as_deref().map(str::trim) {
            if !target.is_empty() {
                info!("Using DNS_TARGET from environment: {}", target);
                return Ok(target.to_string());
            }
        }

        let path = &self.host_hostname_file;
        let hostname = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "cannot read {} ({}); mount the host's /etc/hostname with -v /etc/hostname:{}:ro",
                path.display(),
                e,
                path.display()
            ))
        })?;

        let target = qualify_host_hostname(hostname.trim(), &self.domain)?;
        info!("Detected DNS target from {}: {}", path.display(), target);
        Ok(target)
    }

    /// Logs the effective configuration without secrets.
    pub fn log_summary(&self, dns_target: Option<&str>) {
        info!(
            "Configuration loaded: agent_mode={} etcd_endpoints={} etcd_prefix={} etcd_tls={} dns_target={} domain={}",
            self.agent_mode,
            self.etcd_endpoints.join(","),
            self.etcd_prefix,
            self.etcd_tls,
            dns_target.unwrap_or("-"),
            if self.domain.is_empty() { "-" } else { &self.domain },
        );

        if self.agent_mode.runs_proxmox() {
            match self.proxmox_api_base() {
                Some(url) => info!(
                    "Proxmox configuration: api_url={} verify_ssl={} poll_interval={} interface={} multi_ipv4={:?} token_configured={}",
                    url,
                    self.proxmox_verify_ssl,
                    self.proxmox_poll_interval,
                    self.proxmox_interface,
                    self.proxmox_multi_ipv4,
                    !self.proxmox_token_id.is_empty() && !self.proxmox_token_secret.is_empty(),
                ),
                None => warn!("Proxmox mode enabled but no API URL configured"),
            }
        }
    }
}

/// An empty variable counts as unset, so `KEY=` in a compose file keeps the default.
fn is_set(key: &UncasedStr) -> bool {
    std::env::var_os(key.as_str()).is_some_and(|value| !value.is_empty())
}

fn qualify_host_hostname(hostname: &str, domain: &str) -> Result<String> {
    if hostname.is_empty() {
        return Err(Error::Config("host hostname file is empty".into()));
    }
    if hostname.contains('.') {
        return Ok(hostname.to_string());
    }
    if domain.is_empty() {
        return Err(Error::Config(format!(
            "host hostname '{}' is not an FQDN and DOMAIN is not set",
            hostname
        )));
    }
    Ok(format!("{}.{}", hostname, domain))
}

/// Accepts either a list or a single comma-separated string.
fn list_or_csv<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }

    let list = match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };
    Ok(list
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Poll period: bare seconds, or a sequence of decimal numbers with units
/// (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`) such as `90s`, `1m30s` or `1.5h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval(pub Duration);

const NANOS_PER_SEC: u64 = 1_000_000_000;

impl PollInterval {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(secs) = raw.parse::<u64>() {
            return Some(Self(Duration::from_secs(secs)));
        }

        let mut total = Duration::ZERO;
        let mut rest = raw;
        while !rest.is_empty() {
            let number_end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            let (number, tail) = rest.split_at(number_end);
            let unit_end = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);

            let unit_nanos = match unit {
                "ns" => 1,
                "us" | "µs" => 1_000,
                "ms" => 1_000_000,
                "s" => NANOS_PER_SEC,
                "m" => 60 * NANOS_PER_SEC,
                "h" => 3600 * NANOS_PER_SEC,
                _ => return None,
            };
            total = total.checked_add(scale(number, unit_nanos)?)?;
            rest = tail;
        }
        Some(Self(total))
    }
}

/// `number` (optionally with a fractional part) times `unit_nanos`.
fn scale(number: &str, unit_nanos: u64) -> Option<Duration> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let unit_nanos = u128::from(unit_nanos);

    let mut nanos = match whole {
        "" => 0,
        digits => digits.parse::<u128>().ok()?.checked_mul(unit_nanos)?,
    };
    if !frac.is_empty() {
        let digits: u128 = frac.parse().ok()?;
        let divisor = 10u128.checked_pow(u32::try_from(frac.len()).ok()?)?;
        nanos = nanos.checked_add(digits.checked_mul(unit_nanos)? / divisor)?;
    }
    Some(Duration::from_nanos(u64::try_from(nanos).ok()?))
}

impl fmt::Display for PollInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.subsec_nanos();
        if nanos == 0 {
            write!(f, "{}s", self.0.as_secs())
        } else if nanos % 1_000_000 == 0 {
            write!(f, "{}ms", self.0.as_millis())
        } else {
            write!(f, "{}ns", self.0.as_nanos())
        }
    }
}

impl Serialize for PollInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PollInterval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Self(Duration::from_secs(secs))),
            Raw::Text(text) => Self::parse(&text).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid poll interval '{}'", text))
            }),
        }
    }
}
