use std::net::IpAddr;

use ipnet::IpNet;

use super::{Dependency, IfUsage, ItemRef, ItemType, PhysIf, netns_dependency};
use crate::util::IpFamily;

/// Routing table of the main namespace.
pub const MAIN_TABLE: u32 = 254;

/// Priority of IP rules steering network traffic into per-network tables.
pub const IP_RULE_PRIORITY: u32 = 500;

/// Output interface of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutIf {
    /// One side of a veth pair; `if_name` is the peer interface name.
    Veth { veth_name: String, if_name: String },
    /// Physical interface used for L3 (the host port).
    PhysIf(PhysIf),
}

impl RouteOutIf {
    fn name_ref(&self) -> String {
        match self {
            RouteOutIf::Veth { if_name, .. } => if_name.clone(),
            RouteOutIf::PhysIf(phys_if) => phys_if.mac.to_string(),
        }
    }
}

/// IP route. A route with neither output interface nor gateway is of the
/// unreachable type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub net_namespace: String,
    pub table: u32,
    pub dst_net: IpNet,
    pub out_if: Option<RouteOutIf>,
    pub gw: Option<IpAddr>,
    pub metric: u32,
}

impl Route {
    pub fn family(&self) -> IpFamily {
        IpFamily::of_net(&self.dst_net)
    }

    pub fn is_unreachable(&self) -> bool {
        self.out_if.is_none() && self.gw.is_none()
    }

    pub fn name(&self) -> String {
        let mut name = format!("{}/{}/{}", self.net_namespace, self.table, self.dst_net);
        if let Some(out_if) = &self.out_if {
            name.push('/');
            name.push_str(&out_if.name_ref());
        }
        name
    }

    pub(crate) fn label(&self) -> String {
        match (&self.out_if, &self.gw) {
            (None, None) => format!("unreachable {} (table {})", self.dst_net, self.table),
            (None, Some(gw)) => format!("{} via {gw} (table {})", self.dst_net, self.table),
            (Some(out_if), Some(gw)) => format!(
                "{} via {gw} dev {} (table {})",
                self.dst_net,
                out_if.name_ref(),
                self.table
            ),
            (Some(out_if), None) => format!(
                "{} dev {} (table {})",
                self.dst_net,
                out_if.name_ref(),
                self.table
            ),
        }
    }

    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        let mut deps: Vec<Dependency> = netns_dependency(&self.net_namespace).into_iter().collect();
        match &self.out_if {
            Some(RouteOutIf::Veth { veth_name, .. }) => deps.push(Dependency::exists(
                ItemRef::new(ItemType::Veth, veth_name.clone()),
                "veth must exist",
            )),
            Some(RouteOutIf::PhysIf(phys_if)) => deps.push(Dependency::if_handle(
                &phys_if.mac,
                IfUsage::L3,
                None,
                "interface must be used for L3",
            )),
            None => {}
        }
        deps
    }
}

/// Policy routing rule in the main namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRule {
    pub src_net: Option<IpNet>,
    pub dst_net: Option<IpNet>,
    pub table: u32,
    pub priority: u32,
}

impl IpRule {
    pub fn family(&self) -> IpFamily {
        self.src_net
            .or(self.dst_net)
            .map(|net| IpFamily::of_net(&net))
            .unwrap_or(IpFamily::V4)
    }

    pub fn name(&self) -> String {
        match (&self.src_net, &self.dst_net) {
            (Some(src), Some(dst)) => format!("{src}/from/{dst}/to/{}", self.table),
            (Some(src), None) => format!("{src}/from/{}", self.table),
            (None, Some(dst)) => format!("{dst}/to/{}", self.table),
            (None, None) => format!("all/{}", self.table),
        }
    }
}

/// Single iptables rule, as arguments following `-A <chain>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IptablesRule {
    pub args: Vec<String>,
    pub description: String,
}

impl IptablesRule {
    pub fn new<I, S>(args: I, description: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            description: description.into(),
        }
    }
}

/// Built-in iptables chains. Rules are appended to these rather than owning them.
pub const BUILTIN_CHAINS: [&str; 5] = ["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IptablesChain {
    pub net_namespace: String,
    pub table: String,
    pub chain_name: String,
    pub for_ipv6: bool,
    pub rules: Vec<IptablesRule>,
    /// Veths referenced by the rules (`-i`/`-o`).
    pub refers_veths: Vec<String>,
    /// Custom chains jumped to by the rules (same namespace and table).
    pub refers_chains: Vec<String>,
}

impl IptablesChain {
    pub fn is_builtin(&self) -> bool {
        BUILTIN_CHAINS.contains(&self.chain_name.as_str())
    }

    pub fn name(&self) -> String {
        chain_name(&self.net_namespace, &self.table, &self.chain_name)
    }

    fn item_type(&self) -> ItemType {
        if self.for_ipv6 {
            ItemType::Ip6tablesChain
        } else {
            ItemType::IptablesChain
        }
    }

    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        let mut deps: Vec<Dependency> = netns_dependency(&self.net_namespace).into_iter().collect();
        for veth in &self.refers_veths {
            deps.push(Dependency::exists(
                ItemRef::new(ItemType::Veth, veth.clone()),
                "referenced veth must exist",
            ));
        }
        for chain in &self.refers_chains {
            deps.push(Dependency::exists(
                ItemRef::new(
                    self.item_type(),
                    chain_name(&self.net_namespace, &self.table, chain),
                ),
                "referenced chain must exist",
            ));
        }
        deps
    }
}

fn chain_name(ns: &str, table: &str, chain: &str) -> String {
    format!("{ns}/{table}/{chain}")
}

/// Traffic shaping on a physical port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficControl {
    pub phys_if: PhysIf,
    pub config: crate::model::TrafficControl,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::MAIN_NS;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_route_name() {
        let mut route = Route {
            net_namespace: MAIN_NS.into(),
            table: 500,
            dst_net: net("10.0.0.0/24"),
            out_if: None,
            gw: None,
            metric: u32::MAX,
        };
        assert_eq!(route.name(), "main/500/10.0.0.0/24");
        assert!(route.is_unreachable());
        assert!(route.dependencies().is_empty());
        assert_eq!(route.label(), "unreachable 10.0.0.0/24 (table 500)");

        route.gw = Some("10.0.0.1".parse().unwrap());
        assert!(!route.is_unreachable());
        assert_eq!(route.label(), "10.0.0.0/24 via 10.0.0.1 (table 500)");
        route.gw = None;

        route.out_if = Some(RouteOutIf::Veth {
            veth_name: "net-rt-lan".into(),
            if_name: "net-rt-out-lan".into(),
        });
        assert_eq!(route.name(), "main/500/10.0.0.0/24/net-rt-out-lan");
        assert_eq!(route.dependencies()[0].required.to_string(), "Veth/net-rt-lan");
    }

    #[test]
    fn test_ip_rule_name() {
        let rule = IpRule {
            src_net: Some(net("10.0.0.0/24")),
            dst_net: None,
            table: 500,
            priority: IP_RULE_PRIORITY,
        };
        assert_eq!(rule.name(), "10.0.0.0/24/from/500");
        let rule = IpRule {
            src_net: None,
            dst_net: Some(net("fd00::/64")),
            table: 501,
            priority: IP_RULE_PRIORITY,
        };
        assert_eq!(rule.name(), "fd00::/64/to/501");
        assert_eq!(rule.family(), IpFamily::V6);
    }

    #[test]
    fn test_chain_dependencies() {
        let chain = IptablesChain {
            net_namespace: MAIN_NS.into(),
            table: "filter".into(),
            chain_name: "FORWARD".into(),
            for_ipv6: false,
            rules: vec![IptablesRule::new(["-i", "net-rt-out-lan", "-j", "firewall"], "")],
            refers_veths: vec!["net-rt-lan".into()],
            refers_chains: vec!["firewall".into()],
        };
        assert!(chain.is_builtin());
        let deps = chain.dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[1].required.to_string(), "Iptables-Chain/main/filter/firewall");
    }
}
