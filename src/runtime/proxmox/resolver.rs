//! Hostname and address resolution for a single Proxmox guest.
//!
//! Address sources, first match wins:
//! 1. `dnsherpa-ip:` tag
//! 2. live interface data for the `dnsherpa-interface:` tag, the configured
//!    interface, or the default interface, in that order
//! 3. static configuration (not supported yet, yields nothing)

use std::fmt;

use log::{debug, trace};

use super::api::{GuestSummary, ProxmoxApi};
use super::tags::TagSet;
use crate::dns::{select_addresses, MultiAddressStrategy};
use crate::error::Result;
use crate::types::ResolvedAddress;

pub const DEFAULT_INTERFACE: &str = "eth0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestKind::Qemu => f.write_str("qemu"),
            GuestKind::Lxc => f.write_str("lxc"),
        }
    }
}

/// A VM or container as listed on one node during one poll.
#[derive(Debug, Clone)]
pub struct VmResource {
    pub name: String,
    pub vmid: u64,
    pub kind: GuestKind,
    pub status: String,
    pub node: String,
    pub tags: TagSet,
}

impl VmResource {
    pub fn from_summary(summary: GuestSummary, kind: GuestKind, node: &str) -> Self {
        Self {
            name: summary.name.unwrap_or_default(),
            vmid: summary.vmid,
            kind,
            status: summary.status,
            node: node.to_string(),
            tags: TagSet::parse(summary.tags.as_deref()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// Where a guest's addresses came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSource {
    Tag,
    Interface(String),
    /// Live data was unavailable and static resolution is not implemented.
    StaticUnsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The guest carries `dnsherpa-skip`.
    OptedOut,
    Resolved {
        hostname: String,
        addresses: Vec<ResolvedAddress>,
        source: AddressSource,
    },
}

#[derive(Debug, Clone)]
pub struct ResourceResolver {
    domain: String,
    interface: String,
    strategy: MultiAddressStrategy,
}

impl ResourceResolver {
    pub fn new(domain: impl Into<String>, interface: impl Into<String>, strategy: MultiAddressStrategy) -> Self {
        let interface: String = interface.into();
        Self {
            domain: domain.into(),
            interface: if interface.trim().is_empty() {
                DEFAULT_INTERFACE.to_string()
            } else {
                interface
            },
            strategy,
        }
    }

    /// Dotted names are used as-is; short names get the configured domain.
    /// With no domain configured the short name is published unqualified.
    pub fn hostname(&self, name: &str) -> String {
        if name.contains('.') || self.domain.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", name, self.domain)
        }
    }

    pub async fn resolve<A>(&self, api: &A, resource: &VmResource) -> Resolution
    where
        A: ProxmoxApi + ?Sized,
    {
        if resource.tags.opted_out() {
            return Resolution::OptedOut;
        }

        let hostname = self.hostname(&resource.name);

        if let Some(addresses) = resource.tags.pinned_addresses() {
            debug!("{}: using addresses pinned by tag", resource.name);
            return Resolution::Resolved {
                hostname,
                addresses,
                source: AddressSource::Tag,
            };
        }

        let interface = resource.tags.interface().unwrap_or(&self.interface);

        match live_addresses(api, resource, interface).await {
            Ok(raw) => Resolution::Resolved {
                hostname,
                addresses: select_addresses(raw, self.strategy),
                source: AddressSource::Interface(interface.to_string()),
            },
            Err(e) => {
                debug!(
                    "{}: live interface data unavailable ({}), falling back to config",
                    resource.name, e
                );
                Resolution::Resolved {
                    hostname,
                    addresses: static_addresses(resource),
                    source: AddressSource::StaticUnsupported,
                }
            }
        }
    }
}

/// Raw address strings on `interface`, straight from the guest agent (VMs)
/// or the container's interface list (LXC).
async fn live_addresses<A>(api: &A, resource: &VmResource, interface: &str) -> Result<Vec<String>>
where
    A: ProxmoxApi + ?Sized,
{
    let raw = match resource.kind {
        GuestKind::Qemu => api
            .vm_agent_interfaces(&resource.node, resource.vmid)
            .await?
            .into_iter()
            .filter(|iface| iface.name == interface)
            .flat_map(|iface| iface.ip_addresses.into_iter().map(|a| a.ip_address))
            .collect::<Vec<_>>(),
        GuestKind::Lxc => api
            .container_interfaces(&resource.node, resource.vmid)
            .await?
            .into_iter()
            .filter(|iface| iface.name == interface)
            .flat_map(|iface| iface.inet.into_iter().chain(iface.inet6))
            .collect::<Vec<_>>(),
    };
    trace!("{}: raw addresses on {}: {:?}", resource.name, interface, raw);
    Ok(raw)
}

// TODO: derive addresses from the guest's net0/ipconfig0 settings.
fn static_addresses(resource: &VmResource) -> Vec<ResolvedAddress> {
    debug!(
        "{}: static address resolution is not supported yet",
        resource.name
    );
    Vec::new()
}
