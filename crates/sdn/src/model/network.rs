use serde::{Deserialize, Serialize};

/// Routed L3 network attached to a bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Network {
    pub logical_label: String,
    /// Logical label of the bridge this network is attached to.
    pub bridge: String,
    /// Zero means untagged.
    #[serde(rename = "vlanID")]
    pub vlan_id: u16,
    /// Zero means the default (1500).
    pub mtu: u16,
    /// Single-stack IP configuration.
    #[serde(flatten)]
    pub ip_config: NetworkIpConfig,
    /// Used instead of the single-stack fields for dual-stack networks.
    pub dual_stack: DualStackNetwork,
    /// Logical label of a transparent proxy intercepting HTTP(S) traffic.
    pub transparent_proxy: String,
    /// Absence of a router means everything is reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router: Option<Router>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkIpConfig {
    pub subnet: String,
    #[serde(rename = "gwIP")]
    pub gw_ip: String,
    pub dhcp: Dhcp,
}

impl NetworkIpConfig {
    pub fn is_empty(&self) -> bool {
        self.subnet.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DualStackNetwork {
    pub ipv4: NetworkIpConfig,
    pub ipv6: NetworkIpConfig,
}

impl Network {
    pub fn is_dual_stack(&self) -> bool {
        !self.dual_stack.ipv4.is_empty() || !self.dual_stack.ipv6.is_empty()
    }

    /// IP configurations of the network, one per IP version in use.
    pub fn ip_configs(&self) -> Vec<&NetworkIpConfig> {
        if self.is_dual_stack() {
            [&self.dual_stack.ipv4, &self.dual_stack.ipv6]
                .into_iter()
                .filter(|c| !c.is_empty())
                .collect()
        } else {
            vec![&self.ip_config]
        }
    }

    /// Every DHCP configuration of the network that is enabled.
    pub fn enabled_dhcps(&self) -> impl Iterator<Item = &Dhcp> {
        self.ip_configs()
            .into_iter()
            .map(|c| &c.dhcp)
            .filter(|d| d.enable)
    }
}

/// DHCP (and for IPv6, DHCPv6/RA) configuration of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dhcp {
    pub enable: bool,
    /// Empty means the whole subnet host range.
    pub ip_range: IpRange,
    pub static_entries: Vec<MacToIp>,
    pub without_default_route: bool,
    pub domain_name: String,
    #[serde(flatten)]
    pub dns: DnsClientConfig,
    #[serde(rename = "publicNTP")]
    pub public_ntp: String,
    /// Logical label of an NTP server endpoint.
    #[serde(rename = "privateNTP")]
    pub private_ntp: String,
    /// Web Proxy Auto-Discovery URL (IPv4 only).
    pub wpad: String,
    /// Logical label of a netboot server endpoint.
    pub netboot_server: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpRange {
    #[serde(rename = "fromIP")]
    pub from_ip: String,
    #[serde(rename = "toIP")]
    pub to_ip: String,
}

impl IpRange {
    pub fn is_empty(&self) -> bool {
        self.from_ip.is_empty() && self.to_ip.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacToIp {
    pub mac: String,
    pub ip: String,
}

/// DNS servers to use, given as literal IPs and/or DNS server endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsClientConfig {
    #[serde(rename = "publicDNS")]
    pub public_dns: Vec<String>,
    /// Logical labels of DNS server endpoints.
    #[serde(rename = "privateDNS")]
    pub private_dns: Vec<String>,
}

impl DnsClientConfig {
    pub fn is_empty(&self) -> bool {
        self.public_dns.is_empty() && self.private_dns.is_empty()
    }
}

/// Reachability and static routing of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Router {
    /// Route traffic towards the host (and the outside world).
    pub outside_reachability: bool,
    /// Logical labels of endpoints reachable from this network.
    pub reachable_endpoints: Vec<String>,
    /// Logical labels of other networks reachable from this network.
    pub reachable_networks: Vec<String>,
    #[serde(rename = "routesTowardsEVE")]
    pub routes_towards_eve: Vec<IpRoute>,
}

/// Static route pointing to a subnet behind the device under test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IpRoute {
    pub dst_network: String,
    pub gateway: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_stack_flattened() {
        let json = r#"{
            "logicalLabel": "net1",
            "bridge": "br",
            "subnet": "10.0.0.0/24",
            "gwIP": "10.0.0.1",
            "dhcp": {
                "enable": true,
                "ipRange": {"fromIP": "10.0.0.10", "toIP": "10.0.0.100"},
                "publicDNS": ["1.1.1.1"],
                "privateDNS": ["dns1"],
                "publicNTP": "132.163.96.5"
            }
        }"#;
        let n: Network = serde_json::from_str(json).unwrap();
        assert!(!n.is_dual_stack());
        let configs = n.ip_configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].gw_ip, "10.0.0.1");
        assert_eq!(configs[0].dhcp.ip_range.to_ip, "10.0.0.100");
        assert_eq!(configs[0].dhcp.dns.private_dns, vec!["dns1"]);
        assert!(n.router.is_none());
        assert_eq!(n.enabled_dhcps().count(), 1);
    }

    #[test]
    fn test_dual_stack() {
        let json = r#"{
            "logicalLabel": "net1",
            "dualStack": {
                "ipv4": {"subnet": "10.0.0.0/24", "gwIP": "10.0.0.1"},
                "ipv6": {"subnet": "2001:db8::/64", "gwIP": "2001:db8::1"}
            },
            "router": {"outsideReachability": true, "reachableNetworks": []}
        }"#;
        let n: Network = serde_json::from_str(json).unwrap();
        assert!(n.is_dual_stack());
        assert_eq!(n.ip_configs().len(), 2);
        let router = n.router.unwrap();
        assert!(router.outside_reachability);
        assert!(router.reachable_networks.is_empty());
    }
}
