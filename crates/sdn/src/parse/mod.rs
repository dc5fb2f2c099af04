//! Model parser and validator.
//!
//! [`parse`] builds the referential index over every labeled item of the
//! model, resolves and checks each cross-reference, and validates the
//! remaining fields. A [`ParsedModel`] is only produced for models that pass
//! every check.

pub mod cert;
mod validate;

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;

pub use validate::HostIps;

use crate::model::{
    Dhcp, Endpoint, EndpointRef, LogicalLabelRef, Network, NetworkModel,
};
use crate::util::IpFamily;
use crate::util::addr::{parse_addr, parse_subnet};
use crate::{Error, Result};

/// Identifier of a labeled item: type name plus logical label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId {
    pub item_type: &'static str,
    pub logical_label: String,
}

impl ItemId {
    pub fn new(item_type: &'static str, logical_label: impl Into<String>) -> Self {
        Self {
            item_type,
            logical_label: logical_label.into(),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.item_type, self.logical_label)
    }
}

/// Index record of one labeled item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedItem {
    pub category: &'static str,
    /// Outgoing references.
    pub referencing: Vec<LogicalLabelRef>,
    /// RefKey -> item holding that key against this item.
    pub referenced_by: BTreeMap<String, ItemId>,
}

/// Validated network model with its referential index.
#[derive(Debug, Clone)]
pub struct ParsedModel {
    model: NetworkModel,
    items: BTreeMap<ItemId, IndexedItem>,
    host_ips: HostIps,
}

/// Parse and validate a network model.
pub fn parse(model: NetworkModel) -> Result<ParsedModel> {
    let items = build_index(&model)?;
    let host_ips = validate::validate_model(&model)?;
    Ok(ParsedModel {
        model,
        items,
        host_ips,
    })
}

fn build_index(model: &NetworkModel) -> Result<BTreeMap<ItemId, IndexedItem>> {
    let labeled = model.labeled_items();
    let mut items: BTreeMap<ItemId, IndexedItem> = BTreeMap::new();

    for item in &labeled {
        let id = ItemId::new(item.item_type(), item.logical_label());
        if items.contains_key(&id) {
            return Err(Error::validation(format!("duplicate logical label: {}", id)));
        }
        items.insert(
            id,
            IndexedItem {
                category: item.category(),
                referencing: item.references(),
                referenced_by: BTreeMap::new(),
            },
        );
    }

    for item in &labeled {
        let source = ItemId::new(item.item_type(), item.logical_label());
        for r in item.references() {
            let target_id = ItemId::new(r.item_type, r.item_logical_label.clone());
            let Some(target) = items.get_mut(&target_id) else {
                return Err(Error::reference(format!(
                    "referenced item {} does not exist (ref-key: {})",
                    target_id, r.ref_key
                )));
            };
            if !r.item_category.is_empty() && r.item_category != target.category {
                return Err(Error::reference(format!(
                    "category mismatch for referenced item {} (expected {}, has {})",
                    target_id, r.item_category, target.category
                )));
            }
            if target.referenced_by.contains_key(&r.ref_key) {
                return Err(Error::reference(format!(
                    "colliding referencing to logical label: {} (ref-key: {})",
                    target_id, r.ref_key
                )));
            }
            target.referenced_by.insert(r.ref_key, source.clone());
        }
    }
    Ok(items)
}

impl ParsedModel {
    pub fn model(&self) -> &NetworkModel {
        &self.model
    }

    pub fn into_model(self) -> NetworkModel {
        self.model
    }

    pub fn item(&self, item_type: &'static str, label: &str) -> Option<&IndexedItem> {
        self.items.get(&ItemId::new(item_type, label))
    }

    /// Items referencing the given item, keyed by RefKey.
    pub fn referenced_by(&self, item_type: &'static str, label: &str) -> Vec<(&str, &ItemId)> {
        self.item(item_type, label)
            .map(|i| {
                i.referenced_by
                    .iter()
                    .map(|(k, v)| (k.as_str(), v))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn items(&self) -> impl Iterator<Item = (&ItemId, &IndexedItem)> {
        self.items.iter()
    }

    pub fn host_ips(&self) -> HostIps {
        self.host_ips
    }

    pub fn host_ip(&self, family: IpFamily) -> Option<IpAddr> {
        match family {
            IpFamily::V4 => self.host_ips.ipv4,
            IpFamily::V6 => self.host_ips.ipv6,
        }
    }

    pub fn network(&self, label: &str) -> Option<&Network> {
        self.model.network(label)
    }

    pub fn endpoint(&self, label: &str) -> Option<EndpointRef<'_>> {
        self.model.endpoint(label)
    }

    pub fn controller_port(&self) -> u16 {
        self.model
            .host
            .as_ref()
            .map(|h| h.controller_port)
            .unwrap_or_default()
    }
}

/// Parsed IP configuration of a network.
#[derive(Debug, Clone)]
pub struct NetIpConfig<'a> {
    pub family: IpFamily,
    pub subnet: IpNet,
    pub gw: IpAddr,
    pub dhcp: &'a Dhcp,
}

/// Parsed IP configurations of a validated network, one per IP version.
pub fn network_ip_configs(network: &Network) -> Result<Vec<NetIpConfig<'_>>> {
    network
        .ip_configs()
        .into_iter()
        .map(|config| {
            let subnet = parse_subnet(&config.subnet).map_err(|e| Error::compile(e.to_string()))?;
            let gw = parse_addr(&config.gw_ip).map_err(|e| Error::compile(e.to_string()))?;
            Ok(NetIpConfig {
                family: IpFamily::of_net(&subnet),
                subnet,
                gw,
                dhcp: &config.dhcp,
            })
        })
        .collect()
}

/// Parsed IP address of an endpoint together with its subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointIp {
    pub subnet: IpNet,
    pub ip: IpAddr,
}

impl EndpointIp {
    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.ip)
    }

    /// The endpoint address with the subnet prefix length.
    pub fn with_prefix(&self) -> Result<IpNet> {
        IpNet::new(self.ip, self.subnet.prefix_len()).map_err(|e| Error::compile(e.to_string()))
    }
}

/// Parsed IP addresses of a validated endpoint. Empty for L2-only endpoints.
pub fn endpoint_ips(endpoint: &Endpoint) -> Result<Vec<EndpointIp>> {
    endpoint
        .ip_configs()
        .into_iter()
        .map(|config| {
            Ok(EndpointIp {
                subnet: parse_subnet(&config.subnet).map_err(|e| Error::compile(e.to_string()))?,
                ip: parse_addr(&config.ip).map_err(|e| Error::compile(e.to_string()))?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_model() -> NetworkModel {
        serde_json::from_value(serde_json::json!({
            "ports": [{"logicalLabel": "eveport0", "mac": "02:00:00:00:00:01", "adminUP": true}],
            "bridges": [{"logicalLabel": "bridge0", "ports": ["eveport0"]}],
            "networks": [{
                "logicalLabel": "network0",
                "bridge": "bridge0",
                "subnet": "10.0.0.0/24",
                "gwIP": "10.0.0.1",
                "dhcp": {
                    "enable": true,
                    "ipRange": {"fromIP": "10.0.0.10", "toIP": "10.0.0.100"},
                    "privateDNS": ["dns-server0"]
                }
            }],
            "endpoints": {
                "clients": [{"logicalLabel": "client1", "fqdn": "client1.sdn",
                             "subnet": "10.16.0.0/24", "ip": "10.16.0.5"}],
                "dnsServers": [{
                    "logicalLabel": "dns-server0",
                    "fqdn": "dns-server0.sdn",
                    "subnet": "10.16.16.0/24",
                    "ip": "10.16.16.25",
                    "staticEntries": [
                        {"fqdn": "client1.sdn", "ip": "endpoint-ip.client1"},
                        {"fqdn": "mydomain.adam", "ip": "adam-ip"}
                    ],
                    "upstreamServers": ["1.1.1.1"]
                }]
            },
            "host": {"hostIPs": ["192.168.0.2"], "networkType": "ipv4-only", "controllerPort": 3000}
        }))
        .unwrap()
    }

    fn parse_err(model: NetworkModel) -> String {
        parse(model).unwrap_err().to_string()
    }

    #[test]
    fn test_parse_valid() {
        let parsed = parse(base_model()).unwrap();
        assert_eq!(
            parsed.host_ips().ipv4,
            Some("192.168.0.2".parse().unwrap())
        );
        let refs = parsed.referenced_by("port", "eveport0");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0, "port-master");
        assert_eq!(refs[0].1.to_string(), "bridge/bridge0");

        let dns = parsed.item("endpoint", "dns-server0").unwrap();
        assert_eq!(dns.category, "dns-server");
        assert!(dns.referenced_by.contains_key("dns-for-network-network0"));
    }

    #[test]
    fn test_duplicate_label() {
        let mut model = base_model();
        let client = model.endpoints.clients[0].clone();
        let mut dup = model.endpoints.dns_servers[0].clone();
        dup.endpoint.logical_label = client.endpoint.logical_label.clone();
        model.endpoints.dns_servers.push(dup);
        let err = parse(model).unwrap_err();
        assert!(err.is_validation());
        assert!(!err.is_reference());
        assert_eq!(err.to_string(), "duplicate logical label: endpoint/client1");
    }

    #[test]
    fn test_missing_reference() {
        let mut model = base_model();
        model.networks[0].bridge = "nope".into();
        let err = parse(model).unwrap_err();
        assert!(err.is_reference());
        assert_eq!(
            err.to_string(),
            "referenced item bridge/nope does not exist (ref-key: bridge-network)"
        );
    }

    #[test]
    fn test_category_mismatch() {
        let mut model = base_model();
        model.networks[0].ip_config.dhcp.dns.private_dns = vec!["client1".into()];
        assert_eq!(
            parse_err(model),
            "category mismatch for referenced item endpoint/client1 (expected dns-server, has client)"
        );
    }

    #[test]
    fn test_port_master_exclusivity() {
        let mut model = base_model();
        let mut bridge = model.bridges[0].clone();
        bridge.logical_label = "bridge1".into();
        model.bridges.push(bridge);
        let err = parse(model).unwrap_err();
        assert!(err.is_reference());
        assert_eq!(
            err.to_string(),
            "colliding referencing to logical label: port/eveport0 (ref-key: port-master)"
        );
    }

    #[test]
    fn test_bond_and_bridge_share_port() {
        let mut model = base_model();
        model.bonds.push(crate::model::Bond {
            logical_label: "bond0".into(),
            ports: vec!["eveport0".into()],
            ..Default::default()
        });
        assert!(parse_err(model).contains("(ref-key: port-master)"));
    }

    #[test]
    fn test_two_untagged_networks_on_bridge() {
        let mut model = base_model();
        let mut network = model.networks[0].clone();
        network.logical_label = "network1".into();
        network.ip_config.dhcp.enable = false;
        model.networks.push(network.clone());
        assert!(parse_err(model.clone()).contains("(ref-key: bridge-network)"));

        model.networks[1].vlan_id = 100;
        assert!(parse(model).is_ok());
    }

    #[test]
    fn test_port_mac_checks() {
        let mut model = base_model();
        model.ports[0].mac = "02:fe:00:00:00:01".into();
        assert_eq!(
            parse_err(model),
            "port eveport0 has MAC address with prefix reserved for the host port"
        );

        let mut model = base_model();
        model.ports[0].mac = "banana".into();
        assert!(parse_err(model).starts_with("port eveport0 has invalid MAC address"));

        let mut model = base_model();
        let mut port = model.ports[0].clone();
        port.logical_label = "eveport1".into();
        model.ports.push(port);
        assert_eq!(
            parse_err(model),
            "port eveport1 has duplicate MAC address 02:00:00:00:00:01"
        );

        let mut model = base_model();
        model.ports[0].eve_connect.mac = "xx".into();
        assert!(parse_err(model).starts_with("EVE-side of port eveport0 has invalid MAC address"));
    }

    #[test]
    fn test_rate_limit_requires_limits() {
        let mut model = base_model();
        model.ports[0].traffic_control.rate_limit = 1000;
        assert_eq!(
            parse_err(model.clone()),
            "RateLimit set for port eveport0 without QueueLimit"
        );
        model.ports[0].traffic_control.queue_limit = 100;
        assert_eq!(
            parse_err(model.clone()),
            "RateLimit set for port eveport0 without BurstLimit"
        );
        model.ports[0].traffic_control.burst_limit = 10;
        assert!(parse(model).is_ok());
    }

    #[test]
    fn test_host_checks() {
        let mut model = base_model();
        model.host = None;
        assert_eq!(parse_err(model), "missing host configuration");

        let mut model = base_model();
        model.host.as_mut().unwrap().host_ips = vec!["127.0.0.1".into()];
        assert_eq!(
            parse_err(model),
            "eden SDN requires at least one routable host IP address"
        );

        let mut model = base_model();
        model.host.as_mut().unwrap().controller_port = 0;
        assert_eq!(parse_err(model), "missing controller port");
    }

    #[test]
    fn test_mtu_boundaries() {
        for (mtu, ok) in [(1279, false), (1280, true), (16110, true), (16111, false)] {
            let mut model = base_model();
            model.networks[0].mtu = mtu;
            assert_eq!(parse(model).is_ok(), ok, "network MTU {}", mtu);

            let mut model = base_model();
            model.endpoints.clients[0].endpoint.mtu = mtu;
            assert_eq!(parse(model).is_ok(), ok, "endpoint MTU {}", mtu);
        }

        let mut model = base_model();
        model.networks[0].mtu = 1279;
        assert_eq!(
            parse_err(model),
            "MTU 1279 configured for network network0 is too small"
        );
        let mut model = base_model();
        model.endpoints.clients[0].endpoint.mtu = 16111;
        assert_eq!(
            parse_err(model),
            "MTU 16111 configured for endpoint client1 is too large"
        );
    }

    #[test]
    fn test_network_ip_checks() {
        let mut model = base_model();
        model.networks[0].ip_config.gw_ip = "10.1.0.1".into();
        assert_eq!(
            parse_err(model),
            "network network0 has gateway IP (10.1.0.1) which is not inside the subnet (10.0.0.0/24)"
        );

        let mut model = base_model();
        model.networks[0].ip_config.dhcp.ip_range.to_ip = "10.0.1.100".into();
        assert_eq!(
            parse_err(model),
            "network network0 has DHCP IP range outside of the subnet"
        );

        let mut model = base_model();
        model.networks[0].ip_config.dhcp.ip_range.from_ip = "10.0.0.200".into();
        assert_eq!(
            parse_err(model),
            "network network0 has DHCP IP range where FromIP > ToIP"
        );

        let mut model = base_model();
        model.networks[0].ip_config.dhcp.public_ntp = "1.2.3.4".into();
        model.networks[0].ip_config.dhcp.private_ntp = "ntp".into();
        // Reference check fails first: no such NTP server.
        assert!(parse(model).unwrap_err().is_reference());
    }

    #[test]
    fn test_disabled_dhcp_is_not_validated() {
        let mut model = base_model();
        model.networks[0].ip_config.dhcp.enable = false;
        model.networks[0].ip_config.dhcp.ip_range.from_ip = "garbage".into();
        assert!(parse(model).is_ok());
    }

    #[test]
    fn test_wpad_ipv6_rejected() {
        let mut model = base_model();
        let n = &mut model.networks[0];
        n.ip_config = Default::default();
        n.dual_stack.ipv6.subnet = "2001:db8::/64".into();
        n.dual_stack.ipv6.gw_ip = "2001:db8::1".into();
        n.dual_stack.ipv6.dhcp.enable = true;
        n.dual_stack.ipv6.dhcp.wpad = "http://wpad/wpad.dat".into();
        assert_eq!(
            parse_err(model),
            "network network0 configured with WPAD URL (http://wpad/wpad.dat) which is not supported for IPv6"
        );
    }

    #[test]
    fn test_dual_stack_family_mismatch() {
        let mut model = base_model();
        let n = &mut model.networks[0];
        n.dual_stack.ipv4.subnet = "2001:db8::/64".into();
        n.dual_stack.ipv4.gw_ip = "2001:db8::1".into();
        assert_eq!(
            parse_err(model),
            "expected IPv4 subnet for network network0, got: 2001:db8::/64"
        );
    }

    #[test]
    fn test_route_towards_eve_gateway() {
        let mut model = base_model();
        model.networks[0].router = Some(crate::model::Router {
            routes_towards_eve: vec![crate::model::IpRoute {
                dst_network: "10.50.0.0/16".into(),
                gateway: "10.9.0.1".into(),
            }],
            ..Default::default()
        });
        assert!(parse_err(model).contains("which is not from within the network subnet(s)"));
    }

    #[test]
    fn test_endpoint_subnet_checks() {
        let mut model = base_model();
        model.endpoints.clients[0].endpoint.ip_config.subnet = "10.16.0.4/31".into();
        model.endpoints.clients[0].endpoint.ip_config.ip = "10.16.0.5".into();
        assert_eq!(
            parse_err(model),
            "endpoint client1 uses subnet with less than 2 host IPs (10.16.0.4/31)"
        );

        let mut model = base_model();
        model.endpoints.clients[0].endpoint.ip_config.ip = "10.17.0.5".into();
        assert_eq!(
            parse_err(model),
            "endpoint client1 has IP (10.17.0.5) address outside of the configured subnet (10.16.0.0/24)"
        );

        // L2-only endpoint.
        let mut model = base_model();
        model.endpoints.clients[0].endpoint.ip_config = Default::default();
        assert!(parse(model).is_ok());
    }

    #[test]
    fn test_dns_symbolic_entries_deferred() {
        let parsed = parse(base_model()).unwrap();
        assert!(
            parsed
                .item("endpoint", "client1")
                .unwrap()
                .referenced_by
                .contains_key("dns-server-dns-server0-entry-0-ip")
        );

        let mut model = base_model();
        model.endpoints.dns_servers[0].static_entries[0].ip = "not-an-ip".into();
        assert_eq!(
            parse_err(model),
            "DNS server dns-server0 has invalid static entry IP (not-an-ip)"
        );

        let mut model = base_model();
        model.endpoints.dns_servers[0].static_entries[1].fqdn.clear();
        assert_eq!(
            parse_err(model),
            "DNS server dns-server0 has static entry with empty FQDN"
        );
    }

    fn proxy_model(http: u16, https: u16) -> NetworkModel {
        let mut model = base_model();
        model.endpoints.explicit_proxies.push(
            serde_json::from_value(serde_json::json!({
                "logicalLabel": "proxy",
                "fqdn": "proxy.sdn",
                "subnet": "10.18.18.0/24",
                "ip": "10.18.18.70",
                "httpProxy": {"port": http},
                "httpsProxy": {"port": https},
            }))
            .unwrap(),
        );
        model
    }

    #[test]
    fn test_proxy_ports() {
        assert!(parse(proxy_model(9090, 9091)).is_ok());
        assert_eq!(
            parse_err(proxy_model(9090, 9090)),
            "proxy proxy with colliding ports"
        );
        assert_eq!(
            parse_err(proxy_model(0, 0)),
            "Proxy proxy without port numbers"
        );

        let mut model = proxy_model(9090, 0);
        model.endpoints.explicit_proxies[0]
            .users
            .push(crate::model::UserCredentials::default());
        assert_eq!(parse_err(model), "Proxy proxy with empty username");
    }

    #[test]
    fn test_proxy_duplicate_rules() {
        let mut model = proxy_model(9090, 0);
        let rule = crate::model::ProxyRule {
            req_host: "example.com".into(),
            action: crate::model::ProxyAction::Reject,
        };
        model.endpoints.explicit_proxies[0].proxy.proxy_rules = vec![rule.clone(), rule];
        assert_eq!(parse_err(model), "proxy proxy has duplicate rules");
    }

    #[test]
    fn test_https_server_requires_cert() {
        let mut model = base_model();
        model.endpoints.http_servers.push(
            serde_json::from_value(serde_json::json!({
                "logicalLabel": "web",
                "subnet": "10.19.0.0/24",
                "ip": "10.19.0.10",
                "httpsPort": 443
            }))
            .unwrap(),
        );
        assert_eq!(parse_err(model), "HTTPS server web without certificate");
    }

    #[test]
    fn test_firewall_checks() {
        let mut model = base_model();
        model.firewall.rules.push(crate::model::FwRule {
            src_subnet: "10.0.0.0/33".into(),
            ..Default::default()
        });
        assert_eq!(
            parse_err(model),
            "firewall rule with invalid subnet '10.0.0.0/33'"
        );

        let mut model = base_model();
        model.firewall.rules.push(crate::model::FwRule {
            protocol: crate::model::FwProto::Icmp,
            ports: vec![80],
            ..Default::default()
        });
        assert!(parse_err(model).contains("but protocol is neither TCP nor UDP"));
    }

    #[test]
    fn test_resolve_helpers() {
        let model = base_model();
        let configs = network_ip_configs(&model.networks[0]).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].family, IpFamily::V4);
        assert_eq!(configs[0].gw, "10.0.0.1".parse::<IpAddr>().unwrap());

        let ips = endpoint_ips(&model.endpoints.clients[0].endpoint).unwrap();
        assert_eq!(ips[0].with_prefix().unwrap().to_string(), "10.16.0.5/24");
    }
}
