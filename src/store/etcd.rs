use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Certificate, Client, ConnectOptions, Identity, TlsOptions};
use log::{debug, info};

use super::RecordStore;
use crate::config::Config;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// etcd v3 backed record store.
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connects to the configured endpoints. Any failure here is fatal for the process.
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(CONNECT_TIMEOUT)
            .with_timeout(REQUEST_TIMEOUT);

        if cfg.etcd_tls {
            options = options.with_tls(tls_options(cfg).await?);
        }

        info!("Connecting to etcd at {}", cfg.etcd_endpoints.join(","));
        let client = Client::connect(&cfg.etcd_endpoints, Some(options)).await?;
        Ok(Self { client })
    }
}

async fn tls_options(cfg: &Config) -> Result<TlsOptions> {
    let mut tls = TlsOptions::new();

    if !cfg.etcd_ca_file.is_empty() {
        let ca = read_pem(&cfg.etcd_ca_file, "CA").await?;
        tls = tls.ca_certificate(Certificate::from_pem(ca));
    }

    if !cfg.etcd_cert_file.is_empty() && !cfg.etcd_key_file.is_empty() {
        let cert = read_pem(&cfg.etcd_cert_file, "client certificate").await?;
        let key = read_pem(&cfg.etcd_key_file, "client key").await?;
        tls = tls.identity(Identity::from_pem(cert, key));
    }

    Ok(tls)
}

async fn read_pem(path: &str, what: &str) -> Result<Vec<u8>> {
    let pem = tokio::fs::read(Path::new(path)).await?;
    if pem.is_empty() {
        return Err(Error::Config(format!("{} file {} is empty", what, path)));
    }
    debug!("Loaded etcd {} from {}", what, path);
    Ok(pem)
}

#[async_trait]
impl RecordStore for EtcdStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        // Client handles are cheap clones over a shared channel.
        let mut client = self.client.clone();
        client.put(key, value, None).await?;
        debug!("etcd put {}", key);
        Ok(())
    }
}
