use super::*;
use crate::depgraph::Graph;
use crate::items::{ItemRef, ItemType, Route};
use crate::observe::StaticInterfaceLookup;
use crate::parse::parse;

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
                "privateDNS": ["dns-server0"],
                "publicNTP": "pool.ntp.org"
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
                    {"fqdn": "endpoint-fqdn.client1", "ip": "endpoint-ip.client1"},
                    {"fqdn": "mydomain.adam", "ip": "adam-ip"},
                    {"fqdn": "v6.adam", "ip": "adam-ipv6"}
                ],
                "upstreamServers": ["1.1.1.1", "8.8.8.8"]
            }]
        },
        "host": {"hostIPs": ["192.168.0.2"], "networkType": "ipv4-only", "controllerPort": 3000}
    }))
    .unwrap()
}

fn host_lookup() -> StaticInterfaceLookup {
    StaticInterfaceLookup::new()
        .with_interface(2, "eth0", "02:fe:00:00:00:01".parse().unwrap())
        .with_interface(3, "eth1", "02:00:00:00:00:01".parse().unwrap())
        .with_gateway("192.168.0.1".parse().unwrap())
}

fn compile_model(model: NetworkModel, lookup: &StaticInterfaceLookup) -> Graph {
    let parsed = parse(model).unwrap();
    compile(&parsed, lookup).unwrap()
}

fn items_of<'g>(graph: &'g Graph, item_type: ItemType) -> Vec<&'g ConfigItem> {
    graph
        .items()
        .filter(|(item_ref, _)| item_ref.item_type == item_type)
        .map(|(_, item)| item)
        .collect()
}

fn routes_in_table(graph: &Graph, table: u32) -> Vec<&Route> {
    items_of(graph, ItemType::Route)
        .into_iter()
        .filter_map(|item| match item {
            ConfigItem::Route(r) if r.table == table => Some(r),
            _ => None,
        })
        .collect()
}

#[test]
fn test_compile_is_deterministic() {
    let lookup = host_lookup();
    let first = compile_model(base_model(), &lookup);
    let second = compile_model(base_model(), &lookup);
    assert_eq!(first, second);
    assert_eq!(first.to_dot(), second.to_dot());
}

#[test]
fn test_subgraph_layout() {
    let graph = compile_model(base_model(), &host_lookup());
    for name in [
        PHYS_IFS_SUBGRAPH,
        HOST_CONNECTIVITY_SUBGRAPH,
        BRIDGES_SUBGRAPH,
        FIREWALL_SUBGRAPH,
        "Network-network0",
        "Endpoint-client1",
        "Endpoint-dns-server0",
    ] {
        assert!(graph.subgraphs.contains_key(name), "missing sub-graph {name}");
    }
    let veth = ItemRef::new(ItemType::Veth, "net-br-network0");
    assert_eq!(graph.subgraph_of(&veth), Some("Network-network0"));
    let Some(ConfigItem::Bridge(bridge)) = graph.get(&ItemRef::new(ItemType::Bridge, "br-bridge0"))
    else {
        panic!("expected bridge");
    };
    assert_eq!(bridge.mtu, DEFAULT_MTU);
    assert!(
        graph
            .get(&ItemRef::new(ItemType::IfHandle, "02:00:00:00:00:01"))
            .is_some()
    );
}

#[test]
fn test_network_without_router_reaches_everything() {
    let graph = compile_model(base_model(), &host_lookup());
    let routes = routes_in_table(&graph, NETWORK_RT_BASE);

    let client = routes
        .iter()
        .find(|r| r.dst_net.to_string() == "10.16.0.0/24")
        .unwrap();
    assert!(!client.is_unreachable());
    assert_eq!(client.gw, Some("10.16.0.5".parse().unwrap()));

    let outside = routes
        .iter()
        .find(|r| r.dst_net.prefix_len() == 0 && !r.is_unreachable())
        .unwrap();
    assert_eq!(outside.gw, Some("192.168.0.1".parse().unwrap()));

    let fallback = routes
        .iter()
        .find(|r| r.dst_net.prefix_len() == 0 && r.is_unreachable())
        .unwrap();
    assert_eq!(fallback.metric, u32::MAX);
}

#[test]
fn test_empty_reachable_lists_make_routes_unreachable() {
    let mut model = base_model();
    model.networks[0].router = Some(Default::default());
    let graph = compile_model(model, &host_lookup());
    let routes = routes_in_table(&graph, NETWORK_RT_BASE);

    let client = routes
        .iter()
        .find(|r| r.dst_net.to_string() == "10.16.0.0/24")
        .unwrap();
    assert!(client.is_unreachable());
    // The network itself stays reachable.
    let own = routes
        .iter()
        .find(|r| r.dst_net.to_string() == "10.0.0.0/24")
        .unwrap();
    assert!(!own.is_unreachable());
    assert!(
        !routes
            .iter()
            .any(|r| r.dst_net.prefix_len() == 0 && !r.is_unreachable())
    );
}

#[test]
fn test_outside_route_requires_host_port() {
    let lookup = StaticInterfaceLookup::new()
        .with_interface(3, "eth1", "02:00:00:00:00:01".parse().unwrap())
        .with_gateway("192.168.0.1".parse().unwrap());
    let graph = compile_model(base_model(), &lookup);
    assert!(graph.subgraphs[HOST_CONNECTIVITY_SUBGRAPH].is_empty());
    let routes = routes_in_table(&graph, NETWORK_RT_BASE);
    assert!(
        !routes
            .iter()
            .any(|r| r.dst_net.prefix_len() == 0 && !r.is_unreachable())
    );
    assert!(items_of(&graph, ItemType::DhcpClient).is_empty());
}

#[test]
fn test_host_connectivity() {
    let graph = compile_model(base_model(), &host_lookup());
    let sg = &graph.subgraphs[HOST_CONNECTIVITY_SUBGRAPH];
    let handle = sg
        .items
        .get(&ItemRef::new(ItemType::IfHandle, "02:fe:00:00:00:01"))
        .unwrap();
    let ConfigItem::IfHandle(handle) = handle else {
        panic!("expected interface handle");
    };
    assert_eq!(handle.usage, IfUsage::L3);
    assert_eq!(handle.mtu, MAX_MTU);
    let nat = sg
        .items
        .get(&ItemRef::new(ItemType::IptablesChain, "main/nat/POSTROUTING"))
        .unwrap();
    let ConfigItem::IptablesChain(nat) = nat else {
        panic!("expected iptables chain");
    };
    assert_eq!(nat.rules[0].args, ["-o", "eth0", "-j", "MASQUERADE"]);
}

#[test]
fn test_host_connectivity_without_model() {
    let graph = compile_host_connectivity(&host_lookup());
    let full = compile_model(base_model(), &host_lookup());
    assert_eq!(
        graph.subgraphs[HOST_CONNECTIVITY_SUBGRAPH],
        full.subgraphs[HOST_CONNECTIVITY_SUBGRAPH]
    );
    assert!(graph.get(&ItemRef::new(ItemType::PhysIf, "02:fe:00:00:00:01")).is_some());
    assert!(graph.get(&ItemRef::new(ItemType::PhysIf, "02:00:00:00:00:01")).is_none());
    assert!(items_of(&graph, ItemType::Bridge).is_empty());

    let no_host_port = StaticInterfaceLookup::new();
    assert_eq!(compile_host_connectivity(&no_host_port).len(), 0);
}

#[test]
fn test_dhcp_server_defaults() {
    let graph = compile_model(base_model(), &host_lookup());
    let item = graph
        .get(&ItemRef::new(ItemType::DhcpServer, "network0"))
        .unwrap();
    let ConfigItem::DhcpServer(dhcp) = item else {
        panic!("expected DHCP server");
    };
    let v4 = dhcp.ipv4.as_ref().unwrap();
    assert_eq!(v4.from_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
    assert_eq!(v4.to_ip, "10.0.0.254".parse::<IpAddr>().unwrap());
    assert_eq!(v4.gateway, Some("10.0.0.1".parse().unwrap()));
    assert_eq!(v4.dns_servers, ["10.16.16.25".parse::<IpAddr>().unwrap()]);
    assert_eq!(v4.ntp_server.as_deref(), Some("pool.ntp.org"));
    assert!(dhcp.ipv6.is_none());
    assert_eq!(dhcp.attachment.net_namespace, "network-network0");
    assert!(items_of(&graph, ItemType::Radvd).is_empty());
}

#[test]
fn test_dhcp_disabled_yields_no_server() {
    let mut model = base_model();
    model.networks[0].ip_config.dhcp.enable = false;
    let graph = compile_model(model, &host_lookup());
    assert!(items_of(&graph, ItemType::DhcpServer).is_empty());
}

#[test]
fn test_dns_static_entries() {
    let graph = compile_model(base_model(), &host_lookup());
    let item = graph
        .get(&ItemRef::new(ItemType::DnsServer, "dns-server0"))
        .unwrap();
    let ConfigItem::DnsServer(dns) = item else {
        panic!("expected DNS server");
    };
    let entries: Vec<(&str, String)> = dns
        .static_entries
        .iter()
        .map(|e| (e.fqdn.as_str(), e.ip.to_string()))
        .collect();
    // The IPv6 host IP is not configured, so "v6.adam" resolves to nothing.
    assert_eq!(
        entries,
        [
            ("client1.sdn", "10.16.0.5".to_string()),
            ("mydomain.adam", "192.168.0.2".to_string()),
        ]
    );
    assert_eq!(dns.upstream_servers.len(), 2);
    assert_eq!(dns.attachment.veth_name, "ep-dns-server0");
}

#[test]
fn test_endpoint_common_items() {
    let graph = compile_model(base_model(), &host_lookup());
    let ConfigItem::Veth(veth) = graph.get(&ItemRef::new(ItemType::Veth, "ep-client1")).unwrap()
    else {
        panic!("expected veth");
    };
    assert_eq!(veth.peer1.net_namespace, "endpoint-client1");
    assert_eq!(veth.peer1.ip_addresses[0].to_string(), "10.16.0.5/24");
    assert_eq!(veth.peer2.ip_addresses[0].to_string(), "10.16.0.1/24");
    assert_eq!(veth.mtu, 1500);

    let default = graph
        .subgraphs["Endpoint-client1"]
        .items
        .values()
        .find_map(|item| match item {
            ConfigItem::Route(r) => Some(r),
            _ => None,
        })
        .unwrap();
    assert_eq!(default.net_namespace, "endpoint-client1");
    assert_eq!(default.gw, Some("10.16.0.1".parse().unwrap()));
}

#[test]
fn test_dual_stack_network() {
    let mut model = base_model();
    model.networks[0] = serde_json::from_value(serde_json::json!({
        "logicalLabel": "network0",
        "bridge": "bridge0",
        "dualStack": {
            "ipv4": {"subnet": "10.0.0.0/24", "gwIP": "10.0.0.1", "dhcp": {"enable": true}},
            "ipv6": {"subnet": "fd01::/64", "gwIP": "fd01::1", "dhcp": {"enable": true}}
        }
    }))
    .unwrap();
    let graph = compile_model(model, &host_lookup());
    let routes = routes_in_table(&graph, NETWORK_RT_BASE);
    let unreachable_defaults: Vec<_> = routes
        .iter()
        .filter(|r| r.dst_net.prefix_len() == 0 && r.is_unreachable())
        .map(|r| r.family())
        .collect();
    assert_eq!(unreachable_defaults.len(), 2);
    assert!(unreachable_defaults.contains(&IpFamily::V4));
    assert!(unreachable_defaults.contains(&IpFamily::V6));

    let ConfigItem::Radvd(radvd) = graph.get(&ItemRef::new(ItemType::Radvd, "network0")).unwrap()
    else {
        panic!("expected radvd");
    };
    assert!(radvd.autonomous);
    assert!(!radvd.managed);

    let ConfigItem::DhcpServer(dhcp) = graph
        .get(&ItemRef::new(ItemType::DhcpServer, "network0"))
        .unwrap()
    else {
        panic!("expected DHCP server");
    };
    assert!(dhcp.ipv4.is_some());
    assert_eq!(dhcp.ipv6.as_ref().unwrap().ip_range, None);

    let ConfigItem::Veth(rt) = graph.get(&ItemRef::new(ItemType::Veth, "net-rt-network0")).unwrap()
    else {
        panic!("expected veth");
    };
    let inside: Vec<String> = rt.peer1.ip_addresses.iter().map(ToString::to_string).collect();
    assert_eq!(inside, ["240.0.0.1/30", "fd00:5d4e::1/126"]);
    assert_eq!(rt.mtu, MAX_MTU);
}

#[test]
fn test_internal_ips_per_network_index() {
    let mut model = base_model();
    let mut second = model.networks[0].clone();
    second.logical_label = "another".into();
    second.ip_config.subnet = "10.1.0.0/24".into();
    second.ip_config.gw_ip = "10.1.0.1".into();
    second.ip_config.dhcp = Default::default();
    second.vlan_id = 10;
    second.mtu = 9000;
    model.networks.push(second);
    let lookup = host_lookup();
    let parsed = parse(model).unwrap();
    let compiler = Compiler::new(&parsed, &lookup);
    // Indexes follow label order.
    assert_eq!(compiler.network_index("another").unwrap(), 0);
    assert_eq!(compiler.network_index("network0").unwrap(), 1);
    let (inside, outside) = compiler.internal_ips("network0", IpFamily::V4).unwrap();
    assert_eq!(inside.to_string(), "240.0.0.5/30");
    assert_eq!(outside.to_string(), "240.0.0.6/30");

    let graph = compile(&parsed, &lookup).unwrap();
    let ConfigItem::Bridge(bridge) = graph.get(&ItemRef::new(ItemType::Bridge, "br-bridge0")).unwrap()
    else {
        panic!("expected bridge");
    };
    assert_eq!(bridge.vlans, [10]);
    // Sized for the jumbo network, not the default one.
    assert_eq!(bridge.mtu, 9000);
    // Network routes go into per-network tables.
    assert!(!routes_in_table(&graph, NETWORK_RT_BASE).is_empty());
    assert!(!routes_in_table(&graph, NETWORK_RT_BASE + 1).is_empty());
}

#[test]
fn test_firewall_family_split() {
    let mut model = base_model();
    model.firewall.rules = serde_json::from_value(serde_json::json!([
        {"srcSubnet": "10.16.0.0/24", "protocol": "tcp", "ports": [80, 443], "action": "reject"},
        {"dstSubnet": "fd02::/64", "protocol": "icmp", "action": "drop"}
    ]))
    .unwrap();
    let graph = compile_model(model, &host_lookup());

    let chain = |item_type, name: &str| match graph.get(&ItemRef::new(item_type, name)) {
        Some(ConfigItem::IptablesChain(chain)) => chain.clone(),
        other => panic!("unexpected item {other:?}"),
    };
    let v4 = chain(ItemType::IptablesChain, "main/filter/firewall");
    let v6 = chain(ItemType::Ip6tablesChain, "main/filter/firewall");
    // conntrack + rule + allow-rest
    assert_eq!(v4.rules.len(), 3);
    assert_eq!(
        v4.rules[1].args,
        [
            "-s",
            "10.16.0.0/24",
            "-p",
            "tcp",
            "--match",
            "multiport",
            "--dport",
            "80,443",
            "-j",
            "REJECT"
        ]
    );
    assert_eq!(v6.rules.len(), 3);
    assert_eq!(
        v6.rules[1].args,
        ["-d", "fd02::/64", "-p", "icmpv6", "-j", "DROP"]
    );

    let forward = chain(ItemType::IptablesChain, "main/filter/FORWARD");
    assert_eq!(forward.refers_chains, [FIREWALL_CHAIN]);
    assert!(forward.refers_veths.contains(&"net-rt-network0".to_string()));
    assert!(forward.refers_veths.contains(&"ep-client1".to_string()));
}

#[test]
fn test_transparent_proxy_redirect() {
    let mut model = base_model();
    model.endpoints.transparent_proxies = serde_json::from_value(serde_json::json!([{
        "logicalLabel": "tproxy",
        "fqdn": "tproxy.sdn",
        "subnet": "10.17.0.0/24",
        "ip": "10.17.0.10"
    }]))
    .unwrap();
    model.networks[0].transparent_proxy = "tproxy".into();
    let graph = compile_model(model, &host_lookup());

    let Some(ConfigItem::IptablesChain(dnat)) = graph.get(&ItemRef::new(
        ItemType::IptablesChain,
        "network-network0/nat/PREROUTING",
    )) else {
        panic!("missing DNAT chain");
    };
    let ports: Vec<&str> = dnat.rules.iter().map(|r| r.args[3].as_str()).collect();
    assert_eq!(ports, ["80", "443", "3000"]);
    assert!(dnat.rules.iter().all(|r| r.args.last().unwrap() == "10.17.0.10"));

    let Some(ConfigItem::HttpProxy(proxy)) =
        graph.get(&ItemRef::new(ItemType::HttpProxy, "tproxy"))
    else {
        panic!("missing proxy");
    };
    assert!(proxy.transparent);
    assert_eq!(proxy.http_port.port, 80);
    assert_eq!(proxy.https_ports.len(), 2);
    assert_eq!(proxy.listen_ip, Some("10.17.0.10".parse().unwrap()));
}

#[test]
fn test_routes_towards_eve() {
    let mut model = base_model();
    model.networks[0].router = serde_json::from_value(serde_json::json!({
        "outsideReachability": true,
        "routesTowardsEVE": [{"dstNetwork": "10.50.0.0/16", "gateway": "10.0.0.100"}]
    }))
    .unwrap();
    let graph = compile_model(model, &host_lookup());
    let sg = &graph.subgraphs["Network-network0"];
    assert!(
        sg.items
            .contains_key(&ItemRef::new(ItemType::IpRule, "10.50.0.0/16/from/500"))
    );
    let ns_route = sg
        .items
        .values()
        .find_map(|item| match item {
            ConfigItem::Route(r)
                if r.net_namespace == "network-network0" && r.dst_net.prefix_len() == 16 =>
            {
                Some(r)
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(ns_route.gw, Some("10.0.0.100".parse().unwrap()));
}
