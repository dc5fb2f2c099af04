//! Low-level configuration items produced by the compiler.
//!
//! Every item has a type, a name unique within its type, and a list of
//! dependencies on other items. Two items with the same [`ItemRef`] are
//! compared with `==` to decide whether anything changed.

mod link;
mod routing;
mod service;

use std::fmt;

pub use link::*;
pub use routing::*;
pub use service::*;

/// Name of the main (default) network namespace.
pub const MAIN_NS: &str = "main";

/// Configuration item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemType {
    PhysIf,
    IfHandle,
    NetNamespace,
    Veth,
    Bond,
    Bridge,
    Sysctl,
    DhcpClient,
    DhcpServer,
    DnsServer,
    Radvd,
    Route,
    IpRule,
    IptablesChain,
    Ip6tablesChain,
    TrafficControl,
    HttpProxy,
    HttpServer,
}

impl ItemType {
    pub const ALL: [ItemType; 18] = [
        ItemType::PhysIf,
        ItemType::IfHandle,
        ItemType::NetNamespace,
        ItemType::Veth,
        ItemType::Bond,
        ItemType::Bridge,
        ItemType::Sysctl,
        ItemType::DhcpClient,
        ItemType::DhcpServer,
        ItemType::DnsServer,
        ItemType::Radvd,
        ItemType::Route,
        ItemType::IpRule,
        ItemType::IptablesChain,
        ItemType::Ip6tablesChain,
        ItemType::TrafficControl,
        ItemType::HttpProxy,
        ItemType::HttpServer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::PhysIf => "Physical-Interface",
            ItemType::IfHandle => "Interface-Handle",
            ItemType::NetNamespace => "Network-Namespace",
            ItemType::Veth => "Veth",
            ItemType::Bond => "Bond",
            ItemType::Bridge => "Bridge",
            ItemType::Sysctl => "Sysctl",
            ItemType::DhcpClient => "DHCP-Client",
            ItemType::DhcpServer => "DHCP-Server",
            ItemType::DnsServer => "DNS-Server",
            ItemType::Radvd => "Radvd",
            ItemType::Route => "Route",
            ItemType::IpRule => "IP-Rule",
            ItemType::IptablesChain => "Iptables-Chain",
            ItemType::Ip6tablesChain => "Ip6tables-Chain",
            ItemType::TrafficControl => "Traffic-Control",
            ItemType::HttpProxy => "HTTP-Proxy",
            ItemType::HttpServer => "HTTP-Server",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an item by type and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemRef {
    pub item_type: ItemType,
    pub item_name: String,
}

impl ItemRef {
    pub fn new(item_type: ItemType, item_name: impl Into<String>) -> Self {
        Self {
            item_type,
            item_name: item_name.into(),
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.item_type, self.item_name)
    }
}

/// Condition the required item must meet beyond merely existing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Exists,
    /// The required interface handle must be used in the given way (and,
    /// for bridged/aggregated usage, by the given master).
    IfHandleUsage {
        usage: IfUsage,
        master_label: Option<String>,
    },
}

impl Requirement {
    pub fn is_satisfied_by(&self, item: &ConfigItem) -> bool {
        match (self, item) {
            (Requirement::Exists, _) => true,
            (
                Requirement::IfHandleUsage {
                    usage,
                    master_label,
                },
                ConfigItem::IfHandle(handle),
            ) => {
                handle.usage == *usage
                    && master_label
                        .as_ref()
                        .is_none_or(|label| *label == handle.master_label)
            }
            _ => false,
        }
    }
}

/// Edge of the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub required: ItemRef,
    pub requirement: Requirement,
    pub description: String,
}

impl Dependency {
    pub fn exists(required: ItemRef, description: impl Into<String>) -> Self {
        Self {
            required,
            requirement: Requirement::Exists,
            description: description.into(),
        }
    }

    pub fn if_handle(
        mac: &crate::util::MacAddr,
        usage: IfUsage,
        master_label: Option<&str>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: ItemRef::new(ItemType::IfHandle, mac.to_string()),
            requirement: Requirement::IfHandleUsage {
                usage,
                master_label: master_label.map(str::to_string),
            },
            description: description.into(),
        }
    }
}

pub(crate) fn netns_dependency(ns: &str) -> Option<Dependency> {
    (ns != MAIN_NS).then(|| {
        Dependency::exists(
            ItemRef::new(ItemType::NetNamespace, ns),
            "network namespace must exist",
        )
    })
}

/// Any configuration item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigItem {
    PhysIf(PhysIf),
    IfHandle(IfHandle),
    NetNamespace(NetNamespace),
    Veth(Veth),
    Bond(Bond),
    Bridge(Bridge),
    Sysctl(Sysctl),
    DhcpClient(DhcpClient),
    DhcpServer(DhcpServer),
    DnsServer(DnsServer),
    Radvd(Radvd),
    Route(Route),
    IpRule(IpRule),
    IptablesChain(IptablesChain),
    TrafficControl(TrafficControl),
    HttpProxy(HttpProxy),
    HttpServer(HttpServer),
}

impl ConfigItem {
    pub fn item_type(&self) -> ItemType {
        match self {
            ConfigItem::PhysIf(_) => ItemType::PhysIf,
            ConfigItem::IfHandle(_) => ItemType::IfHandle,
            ConfigItem::NetNamespace(_) => ItemType::NetNamespace,
            ConfigItem::Veth(_) => ItemType::Veth,
            ConfigItem::Bond(_) => ItemType::Bond,
            ConfigItem::Bridge(_) => ItemType::Bridge,
            ConfigItem::Sysctl(_) => ItemType::Sysctl,
            ConfigItem::DhcpClient(_) => ItemType::DhcpClient,
            ConfigItem::DhcpServer(_) => ItemType::DhcpServer,
            ConfigItem::DnsServer(_) => ItemType::DnsServer,
            ConfigItem::Radvd(_) => ItemType::Radvd,
            ConfigItem::Route(_) => ItemType::Route,
            ConfigItem::IpRule(_) => ItemType::IpRule,
            ConfigItem::IptablesChain(c) if c.for_ipv6 => ItemType::Ip6tablesChain,
            ConfigItem::IptablesChain(_) => ItemType::IptablesChain,
            ConfigItem::TrafficControl(_) => ItemType::TrafficControl,
            ConfigItem::HttpProxy(_) => ItemType::HttpProxy,
            ConfigItem::HttpServer(_) => ItemType::HttpServer,
        }
    }

    /// Name unique within the item type.
    pub fn name(&self) -> String {
        match self {
            ConfigItem::PhysIf(i) => i.mac.to_string(),
            ConfigItem::IfHandle(i) => i.mac.to_string(),
            ConfigItem::NetNamespace(i) => i.ns_name.clone(),
            ConfigItem::Veth(i) => i.veth_name.clone(),
            ConfigItem::Bond(i) => i.if_name.clone(),
            ConfigItem::Bridge(i) => i.if_name.clone(),
            ConfigItem::Sysctl(i) => i.net_namespace.clone(),
            ConfigItem::DhcpClient(i) => i.phys_if.mac.to_string(),
            ConfigItem::DhcpServer(i) => i.server_name.clone(),
            ConfigItem::DnsServer(i) => i.server_name.clone(),
            ConfigItem::Radvd(i) => i.name.clone(),
            ConfigItem::Route(i) => i.name(),
            ConfigItem::IpRule(i) => i.name(),
            ConfigItem::IptablesChain(i) => i.name(),
            ConfigItem::TrafficControl(i) => i.phys_if.mac.to_string(),
            ConfigItem::HttpProxy(i) => i.proxy_name.clone(),
            ConfigItem::HttpServer(i) => i.server_name.clone(),
        }
    }

    /// Human-readable label, used in visualizations.
    pub fn label(&self) -> String {
        match self {
            ConfigItem::PhysIf(i) => format!("{} (physical)", i.logical_label),
            ConfigItem::IfHandle(i) => format!("{} ({:?})", i.logical_label, i.usage),
            ConfigItem::NetNamespace(i) => i.ns_name.clone(),
            ConfigItem::Veth(i) => format!("{} <-> {}", i.peer1.if_name, i.peer2.if_name),
            ConfigItem::Bond(i) => format!("{} ({})", i.if_name, i.logical_label),
            ConfigItem::Bridge(i) => format!("{} ({})", i.if_name, i.logical_label),
            ConfigItem::Sysctl(i) => format!("sysctl in {}", i.net_namespace),
            ConfigItem::DhcpClient(i) => format!("DHCP client for {}", i.phys_if.logical_label),
            ConfigItem::DhcpServer(i) => format!("DHCP server for {}", i.server_name),
            ConfigItem::DnsServer(i) => format!("DNS server {}", i.server_name),
            ConfigItem::Radvd(i) => format!("radvd for {}", i.name),
            ConfigItem::Route(i) => i.label(),
            ConfigItem::IpRule(i) => i.name(),
            ConfigItem::IptablesChain(i) => i.name(),
            ConfigItem::TrafficControl(i) => format!("TC for {}", i.phys_if.logical_label),
            ConfigItem::HttpProxy(i) => format!("HTTP proxy {}", i.proxy_name),
            ConfigItem::HttpServer(i) => format!("HTTP server {}", i.server_name),
        }
    }

    pub fn item_ref(&self) -> ItemRef {
        ItemRef::new(self.item_type(), self.name())
    }

    /// External items are not created by the agent, only observed.
    pub fn external(&self) -> bool {
        matches!(self, ConfigItem::PhysIf(_))
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        match self {
            ConfigItem::PhysIf(_) => Vec::new(),
            ConfigItem::IfHandle(i) => i.dependencies(),
            ConfigItem::NetNamespace(_) => Vec::new(),
            ConfigItem::Veth(i) => i.dependencies(),
            ConfigItem::Bond(i) => i.dependencies(),
            ConfigItem::Bridge(i) => i.dependencies(),
            ConfigItem::Sysctl(i) => netns_dependency(&i.net_namespace).into_iter().collect(),
            ConfigItem::DhcpClient(i) => i.dependencies(),
            ConfigItem::DhcpServer(i) => i.attachment.dependencies(),
            ConfigItem::DnsServer(i) => i.attachment.dependencies(),
            ConfigItem::Radvd(i) => i.attachment.dependencies(),
            ConfigItem::Route(i) => i.dependencies(),
            ConfigItem::IpRule(_) => Vec::new(),
            ConfigItem::IptablesChain(i) => i.dependencies(),
            ConfigItem::TrafficControl(i) => vec![i.phys_if.dependency()],
            ConfigItem::HttpProxy(i) => i.attachment.dependencies(),
            ConfigItem::HttpServer(i) => i.attachment.dependencies(),
        }
    }
}
