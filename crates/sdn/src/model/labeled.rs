//! Labeled model entities and their cross-references.

use std::fmt;

use super::{
    Bond, Bridge, Client, DnsServer, Endpoint, ExplicitProxy, HttpServer, NetbootServer,
    Network, NetworkModel, NtpServer, Port, TransparentProxy,
};

pub const PORT_TYPE: &str = "port";
pub const BOND_TYPE: &str = "bond";
pub const BRIDGE_TYPE: &str = "bridge";
pub const NETWORK_TYPE: &str = "network";
pub const ENDPOINT_TYPE: &str = "endpoint";

/// RefKey used by bridges and bonds to claim ports (and bridges to claim bonds).
pub const PORT_MASTER_REF_KEY: &str = "port-master";

/// Prefixes of symbolic references accepted in DNS static entries.
pub const ENDPOINT_FQDN_REF_PREFIX: &str = "endpoint-fqdn.";
pub const ENDPOINT_IP_REF_PREFIX: &str = "endpoint-ip.";
pub const ENDPOINT_IPV4_REF_PREFIX: &str = "endpoint-ipv4.";
pub const ENDPOINT_IPV6_REF_PREFIX: &str = "endpoint-ipv6.";
/// Tokens resolving to the host (controller) addresses.
pub const ADAM_IP_REF: &str = "adam-ip";
pub const ADAM_IPV4_REF: &str = "adam-ipv4";
pub const ADAM_IPV6_REF: &str = "adam-ipv6";

/// Endpoint kinds, each with its own category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EndpointKind {
    Client,
    DnsServer,
    NtpServer,
    HttpServer,
    ExplicitProxy,
    TransparentProxy,
    NetbootServer,
}

impl EndpointKind {
    pub fn category(&self) -> &'static str {
        match self {
            EndpointKind::Client => "client",
            EndpointKind::DnsServer => "dns-server",
            EndpointKind::NtpServer => "ntp-server",
            EndpointKind::HttpServer => "http-server",
            EndpointKind::ExplicitProxy => "explicit-proxy",
            EndpointKind::TransparentProxy => "transparent-proxy",
            EndpointKind::NetbootServer => "netboot-server",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category())
    }
}

/// Reference from one labeled item to another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalLabelRef {
    pub item_type: &'static str,
    /// Empty means any category.
    pub item_category: &'static str,
    pub item_logical_label: String,
    /// At most one item may hold a given RefKey pointing at a particular target.
    pub ref_key: String,
}

impl LogicalLabelRef {
    fn new(item_type: &'static str, label: &str, ref_key: impl Into<String>) -> Self {
        Self {
            item_type,
            item_category: "",
            item_logical_label: label.to_string(),
            ref_key: ref_key.into(),
        }
    }

    fn endpoint(category: &'static str, label: &str, ref_key: impl Into<String>) -> Self {
        Self {
            item_type: ENDPOINT_TYPE,
            item_category: category,
            item_logical_label: label.to_string(),
            ref_key: ref_key.into(),
        }
    }
}

/// Borrowed endpoint of any kind.
#[derive(Debug, Clone, Copy)]
pub enum EndpointRef<'a> {
    Client(&'a Client),
    DnsServer(&'a DnsServer),
    NtpServer(&'a NtpServer),
    HttpServer(&'a HttpServer),
    ExplicitProxy(&'a ExplicitProxy),
    TransparentProxy(&'a TransparentProxy),
    NetbootServer(&'a NetbootServer),
}

impl<'a> EndpointRef<'a> {
    pub fn endpoint(&self) -> &'a Endpoint {
        match self {
            EndpointRef::Client(e) => &e.endpoint,
            EndpointRef::DnsServer(e) => &e.endpoint,
            EndpointRef::NtpServer(e) => &e.endpoint,
            EndpointRef::HttpServer(e) => &e.endpoint,
            EndpointRef::ExplicitProxy(e) => &e.endpoint,
            EndpointRef::TransparentProxy(e) => &e.endpoint,
            EndpointRef::NetbootServer(e) => &e.endpoint,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            EndpointRef::Client(_) => EndpointKind::Client,
            EndpointRef::DnsServer(_) => EndpointKind::DnsServer,
            EndpointRef::NtpServer(_) => EndpointKind::NtpServer,
            EndpointRef::HttpServer(_) => EndpointKind::HttpServer,
            EndpointRef::ExplicitProxy(_) => EndpointKind::ExplicitProxy,
            EndpointRef::TransparentProxy(_) => EndpointKind::TransparentProxy,
            EndpointRef::NetbootServer(_) => EndpointKind::NetbootServer,
        }
    }

    pub fn logical_label(&self) -> &'a str {
        &self.endpoint().logical_label
    }

    /// DNS client configuration for endpoint kinds that resolve names themselves.
    pub fn dns_client_config(&self) -> Option<&'a super::DnsClientConfig> {
        match self {
            EndpointRef::HttpServer(e) => Some(&e.dns),
            EndpointRef::ExplicitProxy(e) => Some(&e.proxy.dns),
            EndpointRef::TransparentProxy(e) => Some(&e.proxy.dns),
            _ => None,
        }
    }

    fn references(&self) -> Vec<LogicalLabelRef> {
        let ep = self.endpoint();
        let label = &ep.logical_label;
        let mut refs = Vec::new();

        if ep.is_direct_l2() {
            refs.push(LogicalLabelRef::new(
                BRIDGE_TYPE,
                &ep.direct_l2_connect.bridge,
                format!("bridge-endpoint-{}", label),
            ));
        }

        match self {
            EndpointRef::DnsServer(dns) => {
                for (i, entry) in dns.static_entries.iter().enumerate() {
                    if let Some(target) = entry.fqdn.strip_prefix(ENDPOINT_FQDN_REF_PREFIX) {
                        refs.push(LogicalLabelRef::new(
                            ENDPOINT_TYPE,
                            target,
                            format!("dns-server-{}-entry-{}-fqdn", label, i),
                        ));
                    }
                    if let Some(target) = endpoint_ip_ref_target(&entry.ip) {
                        refs.push(LogicalLabelRef::new(
                            ENDPOINT_TYPE,
                            target,
                            format!("dns-server-{}-entry-{}-ip", label, i),
                        ));
                    }
                }
            }
            EndpointRef::HttpServer(_)
            | EndpointRef::ExplicitProxy(_)
            | EndpointRef::TransparentProxy(_) => {
                let ref_key = format!("{}-{}", self.kind().category(), label);
                if let Some(dns) = self.dns_client_config() {
                    for server in &dns.private_dns {
                        refs.push(LogicalLabelRef::endpoint(
                            EndpointKind::DnsServer.category(),
                            server,
                            ref_key.clone(),
                        ));
                    }
                }
            }
            _ => {}
        }
        refs
    }
}

/// Target label of an `endpoint-ip[v4|v6].<label>` token.
pub fn endpoint_ip_ref_target(value: &str) -> Option<&str> {
    value
        .strip_prefix(ENDPOINT_IP_REF_PREFIX)
        .or_else(|| value.strip_prefix(ENDPOINT_IPV4_REF_PREFIX))
        .or_else(|| value.strip_prefix(ENDPOINT_IPV6_REF_PREFIX))
}

/// Returns true if the value is one of the symbolic IP tokens.
pub fn is_symbolic_ip(value: &str) -> bool {
    endpoint_ip_ref_target(value).is_some()
        || value == ADAM_IP_REF
        || value == ADAM_IPV4_REF
        || value == ADAM_IPV6_REF
}

/// Any model entity identified by a logical label.
#[derive(Debug, Clone, Copy)]
pub enum LabeledItem<'a> {
    Port(&'a Port),
    Bond(&'a Bond),
    Bridge(&'a Bridge),
    Network(&'a Network),
    Endpoint(EndpointRef<'a>),
}

impl<'a> LabeledItem<'a> {
    pub fn item_type(&self) -> &'static str {
        match self {
            LabeledItem::Port(_) => PORT_TYPE,
            LabeledItem::Bond(_) => BOND_TYPE,
            LabeledItem::Bridge(_) => BRIDGE_TYPE,
            LabeledItem::Network(_) => NETWORK_TYPE,
            LabeledItem::Endpoint(_) => ENDPOINT_TYPE,
        }
    }

    pub fn logical_label(&self) -> &'a str {
        match self {
            LabeledItem::Port(p) => &p.logical_label,
            LabeledItem::Bond(b) => &b.logical_label,
            LabeledItem::Bridge(b) => &b.logical_label,
            LabeledItem::Network(n) => &n.logical_label,
            LabeledItem::Endpoint(e) => e.logical_label(),
        }
    }

    /// Category; empty for everything except endpoints.
    pub fn category(&self) -> &'static str {
        match self {
            LabeledItem::Endpoint(e) => e.kind().category(),
            _ => "",
        }
    }

    /// References to other labeled items.
    pub fn references(&self) -> Vec<LogicalLabelRef> {
        match self {
            LabeledItem::Port(_) => Vec::new(),
            LabeledItem::Bond(bond) => bond
                .ports
                .iter()
                .map(|p| LogicalLabelRef::new(PORT_TYPE, p, PORT_MASTER_REF_KEY))
                .collect(),
            LabeledItem::Bridge(bridge) => {
                let ports = bridge
                    .ports
                    .iter()
                    .map(|p| LogicalLabelRef::new(PORT_TYPE, p, PORT_MASTER_REF_KEY));
                let bonds = bridge
                    .bonds
                    .iter()
                    .map(|b| LogicalLabelRef::new(BOND_TYPE, b, PORT_MASTER_REF_KEY));
                ports.chain(bonds).collect()
            }
            LabeledItem::Network(network) => network_references(network),
            LabeledItem::Endpoint(e) => e.references(),
        }
    }
}

fn network_references(network: &Network) -> Vec<LogicalLabelRef> {
    let label = &network.logical_label;
    let mut refs = Vec::new();

    // Only one network per bridge without VLAN, or per VLAN.
    let bridge_ref_key = if network.vlan_id == 0 {
        "bridge-network".to_string()
    } else {
        format!("bridge-network-vlan{}", network.vlan_id)
    };
    refs.push(LogicalLabelRef::new(
        BRIDGE_TYPE,
        &network.bridge,
        bridge_ref_key,
    ));

    // Dual-stack networks may list the same server in both DHCP configs.
    let mut dns = Vec::new();
    let mut ntp = Vec::new();
    let mut netboot = Vec::new();
    for dhcp in network.enabled_dhcps() {
        for server in &dhcp.dns.private_dns {
            if !dns.contains(server) {
                dns.push(server.clone());
            }
        }
        if !dhcp.private_ntp.is_empty() && !ntp.contains(&dhcp.private_ntp) {
            ntp.push(dhcp.private_ntp.clone());
        }
        if !dhcp.netboot_server.is_empty() && !netboot.contains(&dhcp.netboot_server) {
            netboot.push(dhcp.netboot_server.clone());
        }
    }
    for server in &dns {
        refs.push(LogicalLabelRef::endpoint(
            EndpointKind::DnsServer.category(),
            server,
            format!("dns-for-network-{}", label),
        ));
    }
    for server in &ntp {
        refs.push(LogicalLabelRef::endpoint(
            EndpointKind::NtpServer.category(),
            server,
            format!("ntp-for-network-{}", label),
        ));
    }
    for server in &netboot {
        refs.push(LogicalLabelRef::endpoint(
            EndpointKind::NetbootServer.category(),
            server,
            format!("netboot-for-network-{}", label),
        ));
    }

    if let Some(router) = &network.router {
        let ref_key = format!("reachable-by-network-{}", label);
        for ep in &router.reachable_endpoints {
            refs.push(LogicalLabelRef::new(ENDPOINT_TYPE, ep, ref_key.clone()));
        }
        for net in &router.reachable_networks {
            refs.push(LogicalLabelRef::new(NETWORK_TYPE, net, ref_key.clone()));
        }
    }

    if !network.transparent_proxy.is_empty() {
        refs.push(LogicalLabelRef::endpoint(
            EndpointKind::TransparentProxy.category(),
            &network.transparent_proxy,
            format!("network-tproxy-{}", label),
        ));
    }
    refs
}

impl NetworkModel {
    /// Every endpoint of the model, in a fixed kind order.
    pub fn all_endpoints(&self) -> Vec<EndpointRef<'_>> {
        let eps = &self.endpoints;
        let mut all = Vec::new();
        all.extend(eps.dns_servers.iter().map(EndpointRef::DnsServer));
        all.extend(eps.ntp_servers.iter().map(EndpointRef::NtpServer));
        all.extend(eps.netboot_servers.iter().map(EndpointRef::NetbootServer));
        all.extend(eps.http_servers.iter().map(EndpointRef::HttpServer));
        all.extend(eps.explicit_proxies.iter().map(EndpointRef::ExplicitProxy));
        all.extend(eps.transparent_proxies.iter().map(EndpointRef::TransparentProxy));
        all.extend(eps.clients.iter().map(EndpointRef::Client));
        all
    }

    pub fn endpoint(&self, label: &str) -> Option<EndpointRef<'_>> {
        self.all_endpoints()
            .into_iter()
            .find(|e| e.logical_label() == label)
    }

    /// Every labeled entity of the model.
    pub fn labeled_items(&self) -> Vec<LabeledItem<'_>> {
        let mut items = Vec::new();
        items.extend(self.ports.iter().map(LabeledItem::Port));
        items.extend(self.bonds.iter().map(LabeledItem::Bond));
        items.extend(self.bridges.iter().map(LabeledItem::Bridge));
        items.extend(self.networks.iter().map(LabeledItem::Network));
        items.extend(self.all_endpoints().into_iter().map(LabeledItem::Endpoint));
        items
    }
}
