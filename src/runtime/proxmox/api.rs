//! Minimal Proxmox VE REST client.
//!
//! Only the read endpoints needed for discovery are covered. Every response
//! from `/api2/json` is wrapped in a `{"data": ...}` envelope.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct PveVersion {
    pub version: String,
    #[serde(default)]
    pub release: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeStatus {
    pub node: String,
    #[serde(default)]
    pub status: String,
}

/// Entry of `/nodes/{node}/qemu` or `/nodes/{node}/lxc`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuestSummary {
    #[serde(deserialize_with = "number_or_string")]
    pub vmid: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
    /// `;`-separated tag list.
    #[serde(default)]
    pub tags: Option<String>,
}

/// Interface reported by the QEMU guest agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentInterface {
    pub name: String,
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<AgentIpAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentIpAddress {
    #[serde(rename = "ip-address")]
    pub ip_address: String,
}

/// Interface of a running LXC container; addresses carry a CIDR suffix.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerInterface {
    pub name: String,
    #[serde(default)]
    pub inet: Option<String>,
    #[serde(default)]
    pub inet6: Option<String>,
}

/// The virtualization platform as seen by the reconciler.
#[async_trait]
pub trait ProxmoxApi: Send + Sync {
    async fn version(&self) -> Result<PveVersion>;
    async fn nodes(&self) -> Result<Vec<NodeStatus>>;
    async fn virtual_machines(&self, node: &str) -> Result<Vec<GuestSummary>>;
    async fn containers(&self, node: &str) -> Result<Vec<GuestSummary>>;
    async fn vm_agent_interfaces(&self, node: &str, vmid: u64) -> Result<Vec<AgentInterface>>;
    async fn container_interfaces(&self, node: &str, vmid: u64) -> Result<Vec<ContainerInterface>>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct AgentResult {
    #[serde(default)]
    result: Vec<AgentInterface>,
}

pub struct ProxmoxClient {
    http: Client,
    base_url: String,
}

impl ProxmoxClient {
    /// `base_url` must already end in `/api2/json`.
    pub fn new(
        base_url: impl Into<String>,
        token_id: &str,
        token_secret: &str,
        verify_ssl: bool,
    ) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("PVEAPIToken={}={}", token_id, token_secret))
            .map_err(|e| Error::Config(format!("invalid Proxmox API token: {}", e)))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!verify_ssl)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::ProxmoxStatus {
                status,
                path: path.to_string(),
            });
        }
        let body: Envelope<T> = resp.json().await?;
        Ok(body.data)
    }
}

#[async_trait]
impl ProxmoxApi for ProxmoxClient {
    async fn version(&self) -> Result<PveVersion> {
        self.get("/version").await
    }

    async fn nodes(&self) -> Result<Vec<NodeStatus>> {
        self.get("/nodes").await
    }

    async fn virtual_machines(&self, node: &str) -> Result<Vec<GuestSummary>> {
        self.get(&format!("/nodes/{}/qemu", node)).await
    }

    async fn containers(&self, node: &str) -> Result<Vec<GuestSummary>> {
        self.get(&format!("/nodes/{}/lxc", node)).await
    }

    async fn vm_agent_interfaces(&self, node: &str, vmid: u64) -> Result<Vec<AgentInterface>> {
        let res: AgentResult = self
            .get(&format!("/nodes/{}/qemu/{}/agent/network-get-interfaces", node, vmid))
            .await?;
        Ok(res.result)
    }

    async fn container_interfaces(&self, node: &str, vmid: u64) -> Result<Vec<ContainerInterface>> {
        self.get(&format!("/nodes/{}/lxc/{}/interfaces", node, vmid)).await
    }
}

/// Some PVE releases return `vmid` as a string on the LXC listing.
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
