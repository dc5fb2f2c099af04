use std::net::IpAddr;

use ipnet::IpNet;

use super::{Dependency, ItemRef, ItemType, netns_dependency};
use crate::model::{ArpMonitor, BondMode, LacpRate, MiiMonitor};
use crate::util::MacAddr;

/// How an interface handle is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IfUsage {
    #[default]
    Unused,
    /// Carries IP addresses directly.
    L3,
    /// Enslaved under a bridge.
    Bridged,
    /// Enslaved under a bond.
    Aggregated,
}

/// Physical network interface, identified by MAC. Never created by the agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysIf {
    pub mac: MacAddr,
    pub logical_label: String,
}

impl PhysIf {
    pub fn new(mac: MacAddr, logical_label: impl Into<String>) -> Self {
        Self {
            mac,
            logical_label: logical_label.into(),
        }
    }

    pub fn item_ref(&self) -> ItemRef {
        ItemRef::new(ItemType::PhysIf, self.mac.to_string())
    }

    pub(crate) fn dependency(&self) -> Dependency {
        Dependency::exists(self.item_ref(), "physical interface must exist")
    }
}

/// Handle on a physical interface declaring how it is used.
///
/// Interfaces are claimed one usage at a time, so the handle is what a bridge,
/// bond or L3 user depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfHandle {
    pub mac: MacAddr,
    pub logical_label: String,
    pub usage: IfUsage,
    /// Logical label of the master (bridge or bond); empty for L3 usage.
    pub master_label: String,
    pub admin_up: bool,
    pub mtu: u16,
}

impl IfHandle {
    pub fn phys_if(&self) -> PhysIf {
        PhysIf::new(self.mac, self.logical_label.clone())
    }

    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        vec![self.phys_if().dependency()]
    }
}

/// DNS servers written into `/etc/netns/<ns>/resolv.conf`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvConf {
    pub dns_servers: Vec<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetNamespace {
    pub ns_name: String,
    pub resolv_conf: Option<ResolvConf>,
}

/// Bridge (and access VLAN) a veth peer is enslaved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterBridge {
    pub if_name: String,
    /// Zero means untagged.
    pub vlan_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPeer {
    pub if_name: String,
    pub net_namespace: String,
    pub ip_addresses: Vec<IpNet>,
    pub master_bridge: Option<MasterBridge>,
}

/// Virtual ethernet pair connecting two namespaces (or a namespace and a bridge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Veth {
    pub veth_name: String,
    pub peer1: VethPeer,
    pub peer2: VethPeer,
    pub mtu: u16,
}

impl Veth {
    pub fn peers(&self) -> [&VethPeer; 2] {
        [&self.peer1, &self.peer2]
    }

    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        let mut deps = Vec::new();
        for peer in self.peers() {
            if let Some(dep) = netns_dependency(&peer.net_namespace)
                && !deps.contains(&dep)
            {
                deps.push(dep);
            }
            if let Some(master) = &peer.master_bridge {
                deps.push(Dependency::exists(
                    ItemRef::new(ItemType::Bridge, master.if_name.clone()),
                    "bridge must exist",
                ));
            }
        }
        deps
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bond {
    pub if_name: String,
    pub logical_label: String,
    pub aggregated_ports: Vec<PhysIf>,
    pub mode: BondMode,
    pub lacp_rate: LacpRate,
    pub mii_monitor: MiiMonitor,
    pub arp_monitor: ArpMonitor,
    pub mtu: u16,
}

impl Bond {
    /// Attributes that can only be set at creation.
    pub(crate) fn same_attrs(&self, other: &Bond) -> bool {
        self.mode == other.mode
            && self.lacp_rate == other.lacp_rate
            && self.mii_monitor == other.mii_monitor
            && self.arp_monitor == other.arp_monitor
    }

    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        self.aggregated_ports
            .iter()
            .map(|port| {
                Dependency::if_handle(
                    &port.mac,
                    IfUsage::Aggregated,
                    Some(&self.logical_label),
                    "port must be aggregated by the bond",
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub if_name: String,
    pub logical_label: String,
    pub ports: Vec<PhysIf>,
    /// Interface names of enslaved bonds.
    pub bonds: Vec<String>,
    pub with_stp: bool,
    /// VLANs used by networks and endpoints attached to the bridge, sorted.
    pub vlans: Vec<u16>,
    /// Largest MTU of the attached networks and endpoints.
    pub mtu: u16,
}

impl Bridge {
    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        let ports = self.ports.iter().map(|port| {
            Dependency::if_handle(
                &port.mac,
                IfUsage::Bridged,
                Some(&self.logical_label),
                "port must be bridged",
            )
        });
        let bonds = self.bonds.iter().map(|bond| {
            Dependency::exists(ItemRef::new(ItemType::Bond, bond.clone()), "bond must exist")
        });
        ports.chain(bonds).collect()
    }
}

/// Kernel parameters of a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sysctl {
    pub net_namespace: String,
    pub enable_ipv4_fwd: bool,
    pub enable_ipv6_fwd: bool,
    pub bridge_nf_call_iptables: bool,
    pub bridge_nf_call_ip6tables: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{MAIN_NS, Requirement};

    fn peer(name: &str, ns: &str, master: Option<&str>) -> VethPeer {
        VethPeer {
            if_name: name.into(),
            net_namespace: ns.into(),
            ip_addresses: vec![],
            master_bridge: master.map(|m| MasterBridge {
                if_name: m.into(),
                vlan_id: 0,
            }),
        }
    }

    #[test]
    fn test_veth_dependencies() {
        let veth = Veth {
            veth_name: "net-br-lan".into(),
            peer1: peer("net-br-in-lan", "network-lan", None),
            peer2: peer("net-br-out-lan", MAIN_NS, Some("br-br0")),
            mtu: 1500,
        };
        let deps = veth.dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].required.to_string(), "Network-Namespace/network-lan");
        assert_eq!(deps[1].required.to_string(), "Bridge/br-br0");
    }

    #[test]
    fn test_bridge_dependencies() {
        let mac: MacAddr = "02:00:00:00:00:01".parse().unwrap();
        let bridge = Bridge {
            if_name: "br-br0".into(),
            logical_label: "br0".into(),
            ports: vec![PhysIf::new(mac, "eth0")],
            bonds: vec!["bond-bond0".into()],
            with_stp: false,
            vlans: vec![],
            mtu: 1500,
        };
        let deps = bridge.dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].required.item_type, ItemType::IfHandle);
        assert_eq!(
            deps[0].requirement,
            Requirement::IfHandleUsage {
                usage: IfUsage::Bridged,
                master_label: Some("br0".into()),
            }
        );
        assert_eq!(deps[1].required.to_string(), "Bond/bond-bond0");
    }
}
