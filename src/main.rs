//! DNSherpa daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod config;
mod dns;
mod error;
mod labels;
mod logging;
mod orchestrator;
mod runtime;
mod store;
mod types;

use config::{AgentMode, Config};
use dns::KeyPathBuilder;
use orchestrator::Orchestrator;
use runtime::proxmox::ResourceResolver;
use runtime::{BollardPlatform, DockerReconciler, ProxmoxClient, ProxmoxReconciler, Reconciler};
use store::{EtcdStore, RecordWriter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let cfg = Config::load()?;

    // Initialize logging
    logging::init(&cfg.log_level, &cfg.log_format);
    logging::banner(&logging::BuildInfo::current());

    let dns_target = if cfg.agent_mode.runs_docker() {
        Some(cfg.detect_dns_target()?)
    } else {
        None
    };
    cfg.log_summary(dns_target.as_deref());

    // Record store
    let store = EtcdStore::connect(&cfg).await?;
    let writer = RecordWriter::new(Arc::new(store), KeyPathBuilder::new(cfg.etcd_prefix.clone()));

    let docker = match dns_target {
        Some(target) => {
            let platform = BollardPlatform::connect()?;
            Some(Arc::new(DockerReconciler::new(platform, writer.clone(), target)) as Arc<dyn Reconciler>)
        }
        None => None,
    };

    let proxmox = if cfg.agent_mode.runs_proxmox() {
        let api = match cfg.proxmox_api_base() {
            Some(url) => {
                info!("Connecting to Proxmox API at {}", url);
                Some(ProxmoxClient::new(
                    url,
                    &cfg.proxmox_token_id,
                    &cfg.proxmox_token_secret,
                    cfg.proxmox_verify_ssl,
                )?)
            }
            None => None,
        };
        let resolver = ResourceResolver::new(
            cfg.domain.clone(),
            cfg.proxmox_interface.clone(),
            cfg.proxmox_multi_ipv4,
        );
        Some(Arc::new(ProxmoxReconciler::new(api, resolver, writer, cfg.poll_interval())) as Arc<dyn Reconciler>)
    } else {
        None
    };

    let orchestrator = match (cfg.agent_mode, docker, proxmox) {
        (AgentMode::Hybrid, Some(docker), Some(proxmox)) => Orchestrator::Hybrid { docker, proxmox },
        (AgentMode::Docker, Some(docker), None) => Orchestrator::Single(docker),
        (AgentMode::Proxmox, None, Some(proxmox)) => Orchestrator::Single(proxmox),
        (mode, _, _) => anyhow::bail!("Inconsistent reconciler setup for agent mode {}", mode),
    };

    // Graceful Shutdown
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    match orchestrator.run(cancel).await {
        Ok(()) => {
            info!("Shutdown complete.");
            Ok(())
        }
        Err(e) => {
            error!("DNS automator failed: {}", e);
            Err(e.into())
        }
    }
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = signal::ctrl_c() => match res {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
                return;
            }
        },
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
    cancel.cancel();
}
