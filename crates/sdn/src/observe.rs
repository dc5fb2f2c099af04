//! Current-state observation of physical interfaces.
//!
//! Physical interfaces are the only items not created by the agent. They are
//! looked up by MAC address through the [`InterfaceLookup`] trait, so the
//! compiler and configurators can be driven from a static table in tests and
//! from netlink in production.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::RwLock;

use async_trait::async_trait;
use ipnet::IpNet;
use nlink::netlink::{Connection, Route};

use crate::Result;
use crate::depgraph::SubGraph;
use crate::items::{ConfigItem, MAIN_TABLE, PhysIf};
use crate::model::{HOST_PORT_LABEL, HOST_PORT_MAC_PREFIX, NetworkModel};
use crate::util::{IpFamily, MacAddr};

/// Name of the sub-graph holding observed physical interfaces.
pub const PHYS_IFS_SUBGRAPH: &str = "Physical-Interfaces";

/// Link kinds created by the agent itself, never reported as physical.
const VIRTUAL_KINDS: &[&str] = &["veth", "bridge", "bond"];

/// Network interface present in the main namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetIf {
    pub if_index: u32,
    pub if_name: String,
    pub mac: MacAddr,
}

/// Lookup of physical interfaces and host routing.
pub trait InterfaceLookup: Send + Sync {
    /// Find an interface by MAC. With `prefix_match` the given bytes only
    /// need to prefix the interface MAC.
    fn get_interface_by_mac(&self, mac: &[u8], prefix_match: bool) -> Option<NetIf>;

    fn get_interface_by_index(&self, if_index: u32) -> Option<NetIf>;

    /// Default gateway of the main routing table.
    fn gateway(&self, family: IpFamily) -> Option<IpAddr>;
}

/// Interface lookup that can be re-synchronized with the host.
#[async_trait]
pub trait HostInterfaces: InterfaceLookup {
    /// Re-read the host. Returns true if anything changed.
    async fn refresh(&self) -> Result<bool>;

    /// Addresses assigned to the given interface.
    async fn addresses(&self, if_index: u32) -> Result<Vec<IpNet>>;
}

fn find_by_mac<'a>(
    interfaces: impl IntoIterator<Item = &'a NetIf>,
    mac: &[u8],
    prefix_match: bool,
) -> Option<NetIf> {
    interfaces
        .into_iter()
        .find(|netif| {
            if prefix_match {
                netif.mac.has_prefix(mac)
            } else {
                netif.mac.octets().as_slice() == mac
            }
        })
        .cloned()
}

/// Fixed interface table.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaceLookup {
    pub interfaces: Vec<NetIf>,
    pub gateways: BTreeMap<IpFamily, IpAddr>,
    pub addresses: BTreeMap<u32, Vec<IpNet>>,
}

impl StaticInterfaceLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface(mut self, if_index: u32, if_name: &str, mac: MacAddr) -> Self {
        self.interfaces.push(NetIf {
            if_index,
            if_name: if_name.to_string(),
            mac,
        });
        self
    }

    pub fn with_gateway(mut self, gw: IpAddr) -> Self {
        self.gateways.insert(IpFamily::of(&gw), gw);
        self
    }

    pub fn with_address(mut self, if_index: u32, addr: IpNet) -> Self {
        self.addresses.entry(if_index).or_default().push(addr);
        self
    }
}

impl InterfaceLookup for StaticInterfaceLookup {
    fn get_interface_by_mac(&self, mac: &[u8], prefix_match: bool) -> Option<NetIf> {
        find_by_mac(&self.interfaces, mac, prefix_match)
    }

    fn get_interface_by_index(&self, if_index: u32) -> Option<NetIf> {
        self.interfaces.iter().find(|i| i.if_index == if_index).cloned()
    }

    fn gateway(&self, family: IpFamily) -> Option<IpAddr> {
        self.gateways.get(&family).copied()
    }
}

#[async_trait]
impl HostInterfaces for StaticInterfaceLookup {
    async fn refresh(&self) -> Result<bool> {
        Ok(false)
    }

    async fn addresses(&self, if_index: u32) -> Result<Vec<IpNet>> {
        Ok(self.addresses.get(&if_index).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Snapshot {
    interfaces: Vec<NetIf>,
    gateways: BTreeMap<IpFamily, IpAddr>,
}

/// Interface lookup backed by netlink dumps of the main namespace.
///
/// The trait methods read the last snapshot; call [`refresh`](Self::refresh)
/// to update it.
#[derive(Debug, Default)]
pub struct NetlinkInterfaceLookup {
    snapshot: RwLock<Snapshot>,
}

impl NetlinkInterfaceLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read links and default routes. Returns true if anything changed.
    pub async fn refresh(&self) -> Result<bool> {
        let conn = Connection::<Route>::new()?;

        let mut interfaces = Vec::new();
        for link in conn.get_links().await? {
            if link.is_loopback() {
                continue;
            }
            if let Some(kind) = link.kind()
                && VIRTUAL_KINDS.contains(&kind)
            {
                continue;
            }
            let Some(name) = link.name() else {
                continue;
            };
            let Some(mac) = link
                .perm_address()
                .or_else(|| link.address())
                .and_then(|bytes| <[u8; 6]>::try_from(bytes).ok())
            else {
                continue;
            };
            interfaces.push(NetIf {
                if_index: link.ifindex(),
                if_name: name.to_string(),
                mac: MacAddr(mac),
            });
        }
        interfaces.sort_by_key(|i| i.if_index);

        let mut gateways = BTreeMap::new();
        for route in conn.get_routes_for_table(MAIN_TABLE).await? {
            if !route.is_default() {
                continue;
            }
            if let Some(gw) = route.gateway() {
                gateways.entry(IpFamily::of(gw)).or_insert(*gw);
            }
        }

        let snapshot = Snapshot {
            interfaces,
            gateways,
        };
        let mut current = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current == snapshot {
            return Ok(false);
        }
        tracing::debug!(interfaces = snapshot.interfaces.len(), "interface snapshot changed");
        *current = snapshot;
        Ok(true)
    }

    /// Addresses assigned to the given interface.
    pub async fn addresses(&self, if_index: u32) -> Result<Vec<IpNet>> {
        let conn = Connection::<Route>::new()?;
        let addrs = conn.get_addresses_by_index(if_index).await?;
        Ok(addrs
            .iter()
            .filter_map(|a| {
                let ip = a.address()?;
                IpNet::new(*ip, a.prefix_len()).ok()
            })
            .collect())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InterfaceLookup for NetlinkInterfaceLookup {
    fn get_interface_by_mac(&self, mac: &[u8], prefix_match: bool) -> Option<NetIf> {
        find_by_mac(&self.read().interfaces, mac, prefix_match)
    }

    fn get_interface_by_index(&self, if_index: u32) -> Option<NetIf> {
        self.read()
            .interfaces
            .iter()
            .find(|i| i.if_index == if_index)
            .cloned()
    }

    fn gateway(&self, family: IpFamily) -> Option<IpAddr> {
        self.read().gateways.get(&family).copied()
    }
}

#[async_trait]
impl HostInterfaces for NetlinkInterfaceLookup {
    async fn refresh(&self) -> Result<bool> {
        NetlinkInterfaceLookup::refresh(self).await
    }

    async fn addresses(&self, if_index: u32) -> Result<Vec<IpNet>> {
        NetlinkInterfaceLookup::addresses(self, if_index).await
    }
}

/// The host port, found by its reserved MAC prefix.
pub fn host_port(lookup: &dyn InterfaceLookup) -> Option<(NetIf, PhysIf)> {
    let netif = lookup.get_interface_by_mac(&HOST_PORT_MAC_PREFIX, true)?;
    let phys_if = PhysIf::new(netif.mac, HOST_PORT_LABEL);
    Some((netif, phys_if))
}

/// Physical interfaces of the model (plus the host port) that currently exist.
pub fn observe_current_state(model: &NetworkModel, lookup: &dyn InterfaceLookup) -> SubGraph {
    let mut subgraph = SubGraph::new(PHYS_IFS_SUBGRAPH);
    if let Some((_, phys_if)) = host_port(lookup) {
        subgraph.put_item(ConfigItem::PhysIf(phys_if));
    }
    for port in &model.ports {
        let Ok(mac) = port.mac.parse::<MacAddr>() else {
            continue;
        };
        if lookup.get_interface_by_mac(&mac.octets(), false).is_some() {
            subgraph.put_item(ConfigItem::PhysIf(PhysIf::new(mac, port.logical_label.clone())));
        }
    }
    subgraph
}
