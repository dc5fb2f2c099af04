//! Intended-state compiler.
//!
//! Turns a validated [`ParsedModel`] into the graph of configuration items
//! that should exist. The result depends only on the model and on the
//! interfaces reported by the [`InterfaceLookup`], so compiling the same
//! input twice yields equal graphs.

mod endpoint;
mod network;

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::depgraph::{Graph, SubGraph};
use crate::items::{
    Bond, Bridge, ConfigItem, DhcpClient, IfHandle, IfUsage, IptablesChain, IptablesRule, MAIN_NS,
    NetNamespace, PhysIf, Sysctl, TrafficControl,
};
use crate::model::{
    BOND_TYPE, BRIDGE_TYPE, DEFAULT_MTU, FwAction, FwProto, FwRule, MAX_MTU, NetworkModel, PORT_MASTER_REF_KEY,
    PORT_TYPE,
};
use crate::observe::{InterfaceLookup, NetIf, PHYS_IFS_SUBGRAPH, host_port};
use crate::parse::{ParsedModel, endpoint_ips};
use crate::util::addr::{nth_addr, parse_subnet};
use crate::util::{IpFamily, MacAddr, NameRegistry};
use crate::{Error, Result};

pub const CONFIG_GRAPH: &str = "SDN-Config";
pub const HOST_CONNECTIVITY_SUBGRAPH: &str = "Host-Connectivity";
pub const TRAFFIC_CONTROL_SUBGRAPH: &str = "Traffic-Control";
pub const BRIDGES_SUBGRAPH: &str = "Bridges";
pub const FIREWALL_SUBGRAPH: &str = "Firewall";
pub const NETWORK_SUBGRAPH_PREFIX: &str = "Network-";
pub const ENDPOINT_SUBGRAPH_PREFIX: &str = "Endpoint-";

/// Custom iptables chain implementing the firewall rules.
pub const FIREWALL_CHAIN: &str = "firewall";

/// Routing table of the network with index 0.
pub const NETWORK_RT_BASE: u32 = 500;

pub const DHCP_CLIENT_LOG: &str = "/run/dhcpcd.log";

/// Base of the subnet used for veths between network namespaces and the
/// main namespace (240.0.0.0/4).
pub const INTERNAL_IPV4_BASE: Ipv4Addr = Ipv4Addr::new(240, 0, 0, 0);

/// Base of the internal IPv6 subnet (fd00:5d4e::/64).
pub const INTERNAL_IPV6_BASE: Ipv6Addr = Ipv6Addr::new(0xfd00, 0x5d4e, 0, 0, 0, 0, 0, 0);

/// Internal subnet of the given family.
pub fn internal_subnet(family: IpFamily) -> IpNet {
    match family {
        IpFamily::V4 => Ipv4Net::new(INTERNAL_IPV4_BASE, 4).map(IpNet::V4),
        IpFamily::V6 => Ipv6Net::new(INTERNAL_IPV6_BASE, 64).map(IpNet::V6),
    }
    .unwrap_or_else(|_| family.default_net())
}

/// Interface names of one veth pair.
#[derive(Debug, Clone)]
pub(crate) struct VethNames {
    pub veth: String,
    /// Side inside the network or endpoint namespace.
    pub inside: String,
    /// Side in the main namespace.
    pub outside: String,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum VethKind {
    NetworkBridge,
    NetworkRouter,
    Endpoint,
}

impl VethKind {
    fn prefixes(self) -> (&'static str, &'static str, &'static str) {
        match self {
            VethKind::NetworkBridge => ("net-br-", "net-br-in-", "net-br-out-"),
            VethKind::NetworkRouter => ("net-rt-", "net-rt-in-", "net-rt-out-"),
            VethKind::Endpoint => ("ep-", "ep-in-", "ep-out-"),
        }
    }
}

pub(crate) fn network_ns_name(label: &str) -> String {
    format!("network-{label}")
}

pub(crate) fn endpoint_ns_name(label: &str) -> String {
    format!("endpoint-{label}")
}

/// Compile the intended state of a validated model.
pub fn compile(parsed: &ParsedModel, lookup: &dyn InterfaceLookup) -> Result<Graph> {
    Compiler::new(parsed, lookup).compile()
}

/// Single compile pass.
pub struct Compiler<'a> {
    parsed: &'a ParsedModel,
    model: &'a NetworkModel,
    lookup: &'a dyn InterfaceLookup,
    names: NameRegistry,
    /// Network label -> index, assigned in label order.
    net_index: BTreeMap<&'a str, u32>,
    host_port: Option<(NetIf, PhysIf)>,
}

impl<'a> Compiler<'a> {
    pub fn new(parsed: &'a ParsedModel, lookup: &'a dyn InterfaceLookup) -> Self {
        let model = parsed.model();
        let labels: BTreeSet<&str> = model
            .networks
            .iter()
            .map(|n| n.logical_label.as_str())
            .collect();
        let net_index = labels
            .into_iter()
            .zip(0u32..)
            .collect::<BTreeMap<_, _>>();
        Self {
            parsed,
            model,
            lookup,
            names: NameRegistry::new(),
            net_index,
            host_port: host_port(lookup),
        }
    }

    pub fn compile(mut self) -> Result<Graph> {
        let model = self.model;
        let mut graph = Graph::new(CONFIG_GRAPH);
        graph.put_subgraph(self.phys_ifs()?);
        graph.put_subgraph(self.host_connectivity());
        graph.put_subgraph(self.traffic_control()?);
        graph.put_subgraph(self.bridges()?);
        graph.put_subgraph(self.firewall()?);
        for network in &model.networks {
            graph.put_subgraph(self.network(network)?);
        }
        for ep in model.all_endpoints() {
            graph.put_subgraph(self.endpoint(ep)?);
        }
        tracing::debug!(
            items = graph.len(),
            if_names = self.names.len(),
            "compiled intended state"
        );
        Ok(graph)
    }

    fn if_name(&mut self, prefix: &str, label: &str) -> Result<String> {
        self.names.if_name(prefix, label)
    }

    pub(crate) fn bridge_if_name(&mut self, label: &str) -> Result<String> {
        self.if_name("br-", label)
    }

    pub(crate) fn bond_if_name(&mut self, label: &str) -> Result<String> {
        self.if_name("bond-", label)
    }

    pub(crate) fn veth_names(&mut self, kind: VethKind, label: &str) -> Result<VethNames> {
        let (veth, inside, outside) = kind.prefixes();
        Ok(VethNames {
            veth: format!("{veth}{label}"),
            inside: self.if_name(inside, label)?,
            outside: self.if_name(outside, label)?,
        })
    }

    pub(crate) fn network_index(&self, label: &str) -> Result<u32> {
        self.net_index
            .get(label)
            .copied()
            .ok_or_else(|| Error::compile(format!("missing index for network {label}")))
    }

    /// Addresses of the router veth of a network: (inside, outside).
    pub(crate) fn internal_ips(&self, label: &str, family: IpFamily) -> Result<(IpNet, IpNet)> {
        let index = u128::from(self.network_index(label)?);
        let (base, prefix_len) = match family {
            IpFamily::V4 => (internal_subnet(family), 30),
            IpFamily::V6 => (internal_subnet(family), 126),
        };
        let inside = nth_addr(&base, 4 * index + 1);
        let outside = nth_addr(&base, 4 * index + 2);
        let net = |ip: IpAddr| IpNet::new(ip, prefix_len).map_err(|e| Error::compile(e.to_string()));
        Ok((net(inside)?, net(outside)?))
    }

    fn port_mac(port_mac: &str) -> Result<MacAddr> {
        Ok(port_mac.parse()?)
    }

    fn phys_ifs(&self) -> Result<SubGraph> {
        let mut sg = SubGraph::new(PHYS_IFS_SUBGRAPH);
        if let Some((_, phys_if)) = &self.host_port {
            sg.put_item(ConfigItem::PhysIf(phys_if.clone()));
        }
        for port in &self.model.ports {
            let mac = Self::port_mac(&port.mac)?;
            sg.put_item(ConfigItem::PhysIf(PhysIf::new(mac, port.logical_label.clone())));
        }
        Ok(sg)
    }

    fn host_connectivity(&self) -> SubGraph {
        host_connectivity(self.host_port.as_ref())
    }

    fn traffic_control(&self) -> Result<SubGraph> {
        let mut sg = SubGraph::new(TRAFFIC_CONTROL_SUBGRAPH);
        for port in &self.model.ports {
            if port.traffic_control.is_empty() {
                continue;
            }
            let mac = Self::port_mac(&port.mac)?;
            sg.put_item(ConfigItem::TrafficControl(TrafficControl {
                phys_if: PhysIf::new(mac, port.logical_label.clone()),
                config: port.traffic_control.clone(),
            }));
        }
        Ok(sg)
    }

    fn bridges(&mut self) -> Result<SubGraph> {
        let model = self.model;
        let mut sg = SubGraph::new(BRIDGES_SUBGRAPH);

        for port in &model.ports {
            let Some(master) = self
                .parsed
                .item(PORT_TYPE, &port.logical_label)
                .and_then(|item| item.referenced_by.get(PORT_MASTER_REF_KEY))
            else {
                continue;
            };
            let usage = match master.item_type {
                BRIDGE_TYPE => IfUsage::Bridged,
                BOND_TYPE => IfUsage::Aggregated,
                other => {
                    return Err(Error::compile(format!(
                        "unexpected master type {other} of port {}",
                        port.logical_label
                    )));
                }
            };
            sg.put_item(ConfigItem::IfHandle(IfHandle {
                mac: Self::port_mac(&port.mac)?,
                logical_label: port.logical_label.clone(),
                usage,
                master_label: master.logical_label.clone(),
                admin_up: port.admin_up,
                mtu: MAX_MTU,
            }));
        }

        for bond in &model.bonds {
            let mut aggregated_ports = Vec::new();
            for label in &bond.ports {
                if let Some(port) = model.port(label) {
                    aggregated_ports.push(PhysIf::new(Self::port_mac(&port.mac)?, label.clone()));
                }
            }
            sg.put_item(ConfigItem::Bond(Bond {
                if_name: self.bond_if_name(&bond.logical_label)?,
                logical_label: bond.logical_label.clone(),
                aggregated_ports,
                mode: bond.mode,
                lacp_rate: bond.lacp_rate,
                mii_monitor: bond.mii_monitor.clone(),
                arp_monitor: bond.arp_monitor.clone(),
                mtu: MAX_MTU,
            }));
        }

        for bridge in &model.bridges {
            let mut ports = Vec::new();
            for label in &bridge.ports {
                if let Some(port) = model.port(label) {
                    ports.push(PhysIf::new(Self::port_mac(&port.mac)?, label.clone()));
                }
            }
            let mut bonds = Vec::new();
            for label in &bridge.bonds {
                bonds.push(self.bond_if_name(label)?);
            }
            let network_vlans = model
                .networks
                .iter()
                .filter(|n| n.bridge == bridge.logical_label)
                .map(|n| n.vlan_id);
            let endpoints = model
                .all_endpoints()
                .into_iter()
                .map(|ep| ep.endpoint())
                .filter(|ep| ep.direct_l2_connect.bridge == bridge.logical_label)
                .collect::<Vec<_>>();
            let endpoint_vlans = endpoints.iter().map(|ep| ep.direct_l2_connect.vlan_id);
            let vlans: BTreeSet<u16> = network_vlans
                .chain(endpoint_vlans)
                .filter(|vid| *vid != 0)
                .collect();
            let mtu = model
                .networks
                .iter()
                .filter(|n| n.bridge == bridge.logical_label)
                .map(|n| n.mtu)
                .chain(endpoints.iter().map(|ep| ep.mtu))
                .map(|mtu| if mtu == 0 { DEFAULT_MTU } else { mtu })
                .max()
                .unwrap_or(DEFAULT_MTU);
            sg.put_item(ConfigItem::Bridge(Bridge {
                if_name: self.bridge_if_name(&bridge.logical_label)?,
                logical_label: bridge.logical_label.clone(),
                ports,
                bonds,
                with_stp: bridge.with_stp,
                vlans: vlans.into_iter().collect(),
                mtu,
            }));
        }
        Ok(sg)
    }

    fn firewall(&mut self) -> Result<SubGraph> {
        let model = self.model;
        let mut sg = SubGraph::new(FIREWALL_SUBGRAPH);

        let mut jump_rules = Vec::new();
        let mut veths = Vec::new();
        for network in &model.networks {
            let names = self.veth_names(VethKind::NetworkRouter, &network.logical_label)?;
            jump_rules.push(IptablesRule::new(
                ["-i", names.outside.as_str(), "-j", FIREWALL_CHAIN],
                format!("apply firewall to traffic from network {}", network.logical_label),
            ));
            veths.push(names.veth);
        }
        for ep in model.all_endpoints() {
            if ep.endpoint().is_direct_l2() {
                continue;
            }
            let names = self.veth_names(VethKind::Endpoint, ep.logical_label())?;
            jump_rules.push(IptablesRule::new(
                ["-i", names.outside.as_str(), "-j", FIREWALL_CHAIN],
                format!("apply firewall to traffic from endpoint {}", ep.logical_label()),
            ));
            veths.push(names.veth);
        }

        for family in [IpFamily::V4, IpFamily::V6] {
            let for_ipv6 = family == IpFamily::V6;
            let mut rules = vec![IptablesRule::new(
                ["-m", "conntrack", "--ctstate", "ESTABLISHED,RELATED", "-j", "ACCEPT"],
                "allow traffic of already allowed connections",
            )];
            for rule in &model.firewall.rules {
                if let Some(rule) = fw_rule(rule, family)? {
                    rules.push(rule);
                }
            }
            let allow_rest = FwRule {
                action: FwAction::Allow,
                ..Default::default()
            };
            if let Some(rule) = fw_rule(&allow_rest, family)? {
                rules.push(rule);
            }
            sg.put_item(ConfigItem::IptablesChain(IptablesChain {
                net_namespace: MAIN_NS.to_string(),
                table: "filter".into(),
                chain_name: FIREWALL_CHAIN.into(),
                for_ipv6,
                rules,
                refers_veths: vec![],
                refers_chains: vec![],
            }));
            sg.put_item(ConfigItem::IptablesChain(IptablesChain {
                net_namespace: MAIN_NS.to_string(),
                table: "filter".into(),
                chain_name: "FORWARD".into(),
                for_ipv6,
                rules: jump_rules.clone(),
                refers_veths: veths.clone(),
                refers_chains: vec![FIREWALL_CHAIN.to_string()],
            }));
        }
        Ok(sg)
    }

    /// IPs of an endpoint, optionally limited to one family.
    pub(crate) fn endpoint_addrs(&self, label: &str, family: Option<IpFamily>) -> Result<Vec<IpAddr>> {
        let ep = self
            .parsed
            .endpoint(label)
            .ok_or_else(|| Error::compile(format!("missing endpoint {label}")))?;
        Ok(endpoint_ips(ep.endpoint())?
            .into_iter()
            .filter(|ip| family.is_none_or(|f| ip.family() == f))
            .map(|ip| ip.ip)
            .collect())
    }
}

/// Intended state before any network model is applied: the host port and
/// the items connecting the emulator with the host through it.
pub fn compile_host_connectivity(lookup: &dyn InterfaceLookup) -> Graph {
    let host_port = host_port(lookup);
    let mut graph = Graph::new(CONFIG_GRAPH);
    let mut phys_ifs = SubGraph::new(PHYS_IFS_SUBGRAPH);
    if let Some((_, phys_if)) = &host_port {
        phys_ifs.put_item(ConfigItem::PhysIf(phys_if.clone()));
    }
    graph.put_subgraph(phys_ifs);
    graph.put_subgraph(host_connectivity(host_port.as_ref()));
    graph
}

fn host_connectivity(host_port: Option<&(NetIf, PhysIf)>) -> SubGraph {
    let mut sg = SubGraph::new(HOST_CONNECTIVITY_SUBGRAPH);
    let Some((netif, phys_if)) = host_port else {
        return sg;
    };
    sg.put_item(ConfigItem::NetNamespace(NetNamespace {
        ns_name: MAIN_NS.to_string(),
        resolv_conf: None,
    }));
    sg.put_item(ConfigItem::IfHandle(IfHandle {
        mac: phys_if.mac,
        logical_label: phys_if.logical_label.clone(),
        usage: IfUsage::L3,
        master_label: String::new(),
        admin_up: true,
        mtu: MAX_MTU,
    }));
    sg.put_item(ConfigItem::Sysctl(Sysctl {
        net_namespace: MAIN_NS.to_string(),
        enable_ipv4_fwd: true,
        enable_ipv6_fwd: true,
        bridge_nf_call_iptables: false,
        bridge_nf_call_ip6tables: false,
    }));
    sg.put_item(ConfigItem::DhcpClient(DhcpClient {
        phys_if: phys_if.clone(),
        log_file: DHCP_CLIENT_LOG.to_string(),
    }));
    for for_ipv6 in [false, true] {
        sg.put_item(ConfigItem::IptablesChain(IptablesChain {
            net_namespace: MAIN_NS.to_string(),
            table: "nat".into(),
            chain_name: "POSTROUTING".into(),
            for_ipv6,
            rules: vec![IptablesRule::new(
                ["-o", netif.if_name.as_str(), "-j", "MASQUERADE"],
                "S-NAT traffic leaving towards the host",
            )],
            refers_veths: vec![],
            refers_chains: vec![],
        }));
    }
    sg
}

/// Translate a firewall rule into an iptables rule of the given family;
/// None if the rule's subnets belong to the other family.
fn fw_rule(rule: &FwRule, family: IpFamily) -> Result<Option<IptablesRule>> {
    let mut args: Vec<String> = Vec::new();
    let mut desc = Vec::new();
    for (flag, subnet) in [("-s", &rule.src_subnet), ("-d", &rule.dst_subnet)] {
        if subnet.is_empty() {
            continue;
        }
        let net = parse_subnet(subnet)?;
        if IpFamily::of_net(&net) != family {
            return Ok(None);
        }
        args.extend([flag.to_string(), net.to_string()]);
        desc.push(format!("{flag} {net}"));
    }
    let proto = match (rule.protocol, family) {
        (FwProto::Any, _) => "all",
        (FwProto::Icmp, IpFamily::V4) => "icmp",
        (FwProto::Icmp, IpFamily::V6) => "icmpv6",
        (FwProto::Tcp, _) => "tcp",
        (FwProto::Udp, _) => "udp",
    };
    args.extend(["-p".to_string(), proto.to_string()]);
    if !rule.ports.is_empty() {
        let ports = rule
            .ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        args.extend(["--match".into(), "multiport".into(), "--dport".into(), ports]);
    }
    let target = match rule.action {
        FwAction::Allow => "ACCEPT",
        FwAction::Reject => "REJECT",
        FwAction::Drop => "DROP",
    };
    args.extend(["-j".to_string(), target.to_string()]);
    let description = if desc.is_empty() {
        format!("{target} {proto}")
    } else {
        format!("{target} {proto} {}", desc.join(" "))
    };
    Ok(Some(IptablesRule { args, description }))
}

#[cfg(test)]
mod tests;
