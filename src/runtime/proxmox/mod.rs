//! Poll-driven discovery of Proxmox VMs and LXC containers.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Reconciler;
use crate::error::Result;
use crate::store::RecordWriter;
use crate::types::{Host, Source};

pub mod api;
pub mod resolver;
pub mod tags;

pub use api::{ProxmoxApi, ProxmoxClient};
pub use resolver::{GuestKind, Resolution, ResourceResolver, VmResource};

const NODE_ONLINE: &str = "online";

/// Counts for one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct ProxmoxReconciler<A> {
    /// `None` when no API URL is configured; the reconciler then idles.
    api: Option<A>,
    resolver: ResourceResolver,
    writer: RecordWriter,
    interval: Duration,
}

impl<A: ProxmoxApi> ProxmoxReconciler<A> {
    pub fn new(api: Option<A>, resolver: ResourceResolver, writer: RecordWriter, interval: Duration) -> Self {
        Self {
            api,
            resolver,
            writer,
            interval,
        }
    }

    async fn test_connection(api: &A) -> Result<()> {
        info!("Testing Proxmox API connection...");
        let version = api.version().await?;
        info!(
            "Proxmox API connection successful: version={} release={}",
            version.version, version.release
        );

        match api.nodes().await {
            Ok(nodes) => {
                info!("Found {} nodes in cluster", nodes.len());
                for node in &nodes {
                    debug!("Cluster node {} status={}", node.node, node.status);
                }
            }
            Err(e) => warn!("Cannot list nodes: {}", e),
        }
        Ok(())
    }

    /// One full pass over every online node.
    pub async fn sync_all(&self, api: &A) -> Result<SyncSummary> {
        info!("Syncing Proxmox VMs and containers...");
        let nodes = api.nodes().await?;
        let mut summary = SyncSummary::default();

        for node in nodes {
            if node.status != NODE_ONLINE {
                warn!("Skipping offline node {}", node.node);
                continue;
            }

            match api.virtual_machines(&node.node).await {
                Ok(vms) => {
                    info!("Found {} QEMU VMs on node {}", vms.len(), node.node);
                    for vm in vms {
                        let resource = VmResource::from_summary(vm, GuestKind::Qemu, &node.node);
                        self.visit(api, resource, &mut summary).await;
                    }
                }
                Err(e) => error!("Failed to get VMs on node {}: {}", node.node, e),
            }

            match api.containers(&node.node).await {
                Ok(cts) => {
                    info!("Found {} LXC containers on node {}", cts.len(), node.node);
                    for ct in cts {
                        let resource = VmResource::from_summary(ct, GuestKind::Lxc, &node.node);
                        self.visit(api, resource, &mut summary).await;
                    }
                }
                Err(e) => error!("Failed to get containers on node {}: {}", node.node, e),
            }
        }

        info!(
            "Completed Proxmox resource sync: processed={} skipped={} failed={}",
            summary.processed, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    async fn visit(&self, api: &A, resource: VmResource, summary: &mut SyncSummary) {
        if !resource.is_running() {
            debug!(
                "Skipping non-running {} {} ({})",
                resource.kind, resource.name, resource.status
            );
            summary.skipped += 1;
            return;
        }
        if resource.name.is_empty() {
            warn!("Skipping {} {} without a name", resource.kind, resource.vmid);
            summary.skipped += 1;
            return;
        }

        match self.process(api, &resource).await {
            Ok(()) => summary.processed += 1,
            Err(e) => {
                error!("Error processing {} {}: {}", resource.kind, resource.name, e);
                summary.failed += 1;
            }
        }
    }

    async fn process(&self, api: &A, resource: &VmResource) -> Result<()> {
        match self.resolver.resolve(api, resource).await {
            Resolution::OptedOut => {
                info!("Skipping {} {} due to dnsherpa-skip tag", resource.kind, resource.name);
                Ok(())
            }
            Resolution::Resolved { addresses, source, .. } if addresses.is_empty() => {
                warn!(
                    "No IPs found for {} {} (source {:?})",
                    resource.kind, resource.name, source
                );
                Ok(())
            }
            Resolution::Resolved {
                hostname, addresses, ..
            } => {
                let host = Host::new(hostname, Source::Proxmox);
                self.writer.write_addresses(&host, &addresses).await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<A: ProxmoxApi + 'static> Reconciler for ProxmoxReconciler<A> {
    fn name(&self) -> &'static str {
        "proxmox"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let Some(api) = self.api.as_ref() else {
            info!("Proxmox client not configured, skipping monitoring");
            cancel.cancelled().await;
            return Ok(());
        };

        info!("Starting Proxmox monitoring (poll interval {:?})", self.interval);
        Self::test_connection(api).await?;

        if let Err(e) = self.sync_all(api).await {
            warn!("Initial sync failed: {}", e);
        }

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Proxmox monitoring cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_all(api).await {
                        error!("Error during Proxmox sync: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reqwest::StatusCode;

    use super::api::*;
    use super::*;
    use crate::error::Error;

    fn unavailable(path: String) -> Error {
        Error::ProxmoxStatus {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            path,
        }
    }

    #[derive(Default)]
    pub struct FakeApi {
        pub version_fails: bool,
        pub nodes_fail: bool,
        pub nodes: Vec<NodeStatus>,
        pub vms: HashMap<String, Vec<GuestSummary>>,
        pub cts: HashMap<String, Vec<GuestSummary>>,
        pub failing_listings: HashSet<String>,
        pub agent: HashMap<u64, Vec<AgentInterface>>,
        pub lxc: HashMap<u64, Vec<ContainerInterface>>,
        pub node_calls: AtomicUsize,
        pub interface_calls: AtomicUsize,
    }

    impl FakeApi {
        pub fn with_node(mut self, node: &str, status: &str) -> Self {
            self.nodes.push(NodeStatus {
                node: node.into(),
                status: status.into(),
            });
            self
        }

        pub fn with_guest(mut self, kind: GuestKind, node: &str, vmid: u64, name: &str, status: &str, tags: &str) -> Self {
            let summary = GuestSummary {
                vmid,
                name: Some(name.into()).filter(|n: &String| !n.is_empty()),
                status: status.into(),
                tags: Some(tags.into()),
            };
            let listing = match kind {
                GuestKind::Qemu => &mut self.vms,
                GuestKind::Lxc => &mut self.cts,
            };
            listing.entry(node.into()).or_default().push(summary);
            self
        }

        pub fn with_agent(mut self, vmid: u64, iface: &str, ips: &[&str]) -> Self {
            self.agent.entry(vmid).or_default().push(AgentInterface {
                name: iface.into(),
                ip_addresses: ips
                    .iter()
                    .map(|ip| AgentIpAddress {
                        ip_address: ip.to_string(),
                    })
                    .collect(),
            });
            self
        }

        pub fn with_lxc(mut self, vmid: u64, iface: &str, inet: Option<&str>, inet6: Option<&str>) -> Self {
            self.lxc.entry(vmid).or_default().push(ContainerInterface {
                name: iface.into(),
                inet: inet.map(Into::into),
                inet6: inet6.map(Into::into),
            });
            self
        }

        pub fn interface_queries(&self) -> usize {
            self.interface_calls.load(Ordering::SeqCst)
        }

        pub fn node_listings(&self) -> usize {
            self.node_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProxmoxApi for FakeApi {
        async fn version(&self) -> Result<PveVersion> {
            if self.version_fails {
                return Err(unavailable("/version".into()));
            }
            Ok(PveVersion {
                version: "8.2.4".into(),
                release: "8.2".into(),
            })
        }

        async fn nodes(&self) -> Result<Vec<NodeStatus>> {
            self.node_calls.fetch_add(1, Ordering::SeqCst);
            if self.nodes_fail {
                return Err(unavailable("/nodes".into()));
            }
            Ok(self.nodes.clone())
        }

        async fn virtual_machines(&self, node: &str) -> Result<Vec<GuestSummary>> {
            if self.failing_listings.contains(node) {
                return Err(unavailable(format!("/nodes/{}/qemu", node)));
            }
            Ok(self.vms.get(node).cloned().unwrap_or_default())
        }

        async fn containers(&self, node: &str) -> Result<Vec<GuestSummary>> {
            Ok(self.cts.get(node).cloned().unwrap_or_default())
        }

        async fn vm_agent_interfaces(&self, node: &str, vmid: u64) -> Result<Vec<AgentInterface>> {
            self.interface_calls.fetch_add(1, Ordering::SeqCst);
            self.agent
                .get(&vmid)
                .cloned()
                .ok_or_else(|| unavailable(format!("/nodes/{}/qemu/{}/agent", node, vmid)))
        }

        async fn container_interfaces(&self, node: &str, vmid: u64) -> Result<Vec<ContainerInterface>> {
            self.interface_calls.fetch_add(1, Ordering::SeqCst);
            self.lxc
                .get(&vmid)
                .cloned()
                .ok_or_else(|| unavailable(format!("/nodes/{}/lxc/{}/interfaces", node, vmid)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::FakeApi;
    use super::*;
    use crate::dns::MultiAddressStrategy;
    use crate::store::testing::{writer, MemoryStore};

    fn reconciler(api: Option<FakeApi>, store: &Arc<MemoryStore>) -> ProxmoxReconciler<FakeApi> {
        ProxmoxReconciler::new(
            api,
            ResourceResolver::new("home.lab", "eth0", MultiAddressStrategy::First),
            writer(store),
            Duration::from_secs(30),
        )
    }

    fn cluster() -> FakeApi {
        FakeApi::default()
            .with_node("pve1", "online")
            .with_node("pve2", "offline")
            .with_guest(GuestKind::Qemu, "pve1", 100, "web-server", "running", "")
            .with_guest(GuestKind::Qemu, "pve1", 101, "db.example.com", "running", "dnsherpa-ip:192.0.2.5,2001:db8::5")
            .with_guest(GuestKind::Qemu, "pve1", 102, "halted", "stopped", "")
            .with_guest(GuestKind::Lxc, "pve1", 200, "cache", "running", "dnsherpa-skip")
            .with_guest(GuestKind::Lxc, "pve1", 201, "proxy", "running", "")
            .with_guest(GuestKind::Qemu, "pve2", 300, "elsewhere", "running", "")
            .with_agent(100, "eth0", &["10.0.0.10", "10.0.0.11", "2001:db8::10"])
            .with_lxc(201, "eth0", Some("10.0.0.20/24"), None)
    }

    #[tokio::test]
    async fn full_pass_writes_expected_keys() {
        let store = Arc::new(MemoryStore::default());
        let api = cluster();
        let r = reconciler(None, &store);

        let summary = r.sync_all(&api).await.unwrap();
        assert_eq!(
            summary,
            SyncSummary {
                processed: 4,
                skipped: 1,
                failed: 0
            }
        );

        let keys: Vec<String> = store.snapshot().into_keys().collect();
        assert_eq!(
            keys,
            [
                "/skydns/com/example/db/a1",
                "/skydns/com/example/db/aaaa1",
                "/skydns/lab/home/proxy/a1",
                "/skydns/lab/home/web-server/a1",
                "/skydns/lab/home/web-server/aaaa1",
            ]
        );
        assert_eq!(
            store.snapshot()["/skydns/lab/home/web-server/a1"],
            r#"{"host":"10.0.0.10","ttl":300}"#
        );
    }

    #[tokio::test]
    async fn listing_failure_skips_only_that_listing() {
        let store = Arc::new(MemoryStore::default());
        let mut api = cluster();
        api.failing_listings.insert("pve1".into());
        let r = reconciler(None, &store);

        let summary = r.sync_all(&api).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert!(store.snapshot().contains_key("/skydns/lab/home/proxy/a1"));
    }

    #[tokio::test]
    async fn write_failure_is_counted_and_the_pass_continues() {
        let store = Arc::new(MemoryStore::default());
        store.fail_on("/skydns/lab/home/web-server/a1");
        let r = reconciler(None, &store);

        let summary = r.sync_all(&cluster()).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 3);
    }

    #[tokio::test]
    async fn node_listing_failure_fails_the_pass() {
        let store = Arc::new(MemoryStore::default());
        let api = FakeApi {
            nodes_fail: true,
            ..Default::default()
        };
        assert!(reconciler(None, &store).sync_all(&api).await.is_err());
    }

    #[tokio::test]
    async fn connection_test_failure_is_fatal() {
        let store = Arc::new(MemoryStore::default());
        let api = FakeApi {
            version_fails: true,
            ..Default::default()
        };
        let result = reconciler(Some(api), &store).run(CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unconfigured_reconciler_idles_until_cancelled() {
        let store = Arc::new(MemoryStore::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        reconciler(None, &store).run(cancel).await.unwrap();
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_after_initial_pass() {
        let store = Arc::new(MemoryStore::default());
        let api = FakeApi {
            nodes_fail: true,
            ..Default::default()
        };
        let r = Arc::new(reconciler(Some(api), &store));
        let cancel = CancellationToken::new();

        let task = {
            let r = Arc::clone(&r);
            let cancel = cancel.clone();
            tokio::spawn(async move { r.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(65)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        // connection test + initial pass + ticks at 30s and 60s
        let api = r.api.as_ref().unwrap();
        assert_eq!(api.node_listings(), 4);
    }
}
