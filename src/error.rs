//! Error types for dnsherpa.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error (hostname file, TLS material)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// etcd client error
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    /// Docker API error
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Docker event stream ended without an error
    #[error("Docker event stream closed")]
    EventStreamClosed,

    /// HTTP transport error talking to the Proxmox API
    #[error("Proxmox request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Proxmox API answered with a non-success status
    #[error("Proxmox API returned {status} for {path}")]
    ProxmoxStatus {
        status: reqwest::StatusCode,
        path: String,
    },

    /// Record encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A platform call did not finish in time
    #[error("{0} timed out")]
    Timeout(&'static str),
}
