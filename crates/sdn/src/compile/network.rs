use std::net::IpAddr;

use ipnet::IpNet;

use super::{
    Compiler, NETWORK_RT_BASE, NETWORK_SUBGRAPH_PREFIX, VethKind, VethNames, internal_subnet,
    network_ns_name,
};
use crate::depgraph::SubGraph;
use crate::items::{
    ConfigItem, DhcpServer, DhcpV4Config, DhcpV6Config, IP_RULE_PRIORITY, IpRule, IptablesChain,
    IptablesRule, MAIN_NS, MAIN_TABLE, MasterBridge, NetAttachment, NetNamespace, Radvd, Route,
    RouteOutIf, StaticLease, Sysctl, Veth, VethPeer,
};
use crate::model::{DEFAULT_MTU, Dhcp, ListenProto, MAX_MTU, Network, ProxyPort};
use crate::parse::{NetIpConfig, network_ip_configs};
use crate::util::IpFamily;
use crate::util::addr::{default_host_range, parse_addr, parse_subnet};
use crate::{Error, Result};

/// HTTP(S) ports redirected into a transparent proxy.
pub(crate) fn transparent_proxy_ports(controller_port: u16) -> (ProxyPort, Vec<ProxyPort>) {
    let http = ProxyPort {
        port: 80,
        listen_proto: ListenProto::Http,
    };
    let mut https = vec![ProxyPort {
        port: 443,
        listen_proto: ListenProto::Http,
    }];
    if controller_port != 0 && controller_port != 443 {
        https.push(ProxyPort {
            port: controller_port,
            listen_proto: ListenProto::Http,
        });
    }
    (http, https)
}

impl<'a> Compiler<'a> {
    pub(super) fn network(&mut self, network: &'a Network) -> Result<SubGraph> {
        let label = network.logical_label.as_str();
        let mut sg = SubGraph::new(format!("{NETWORK_SUBGRAPH_PREFIX}{label}"));

        let configs = network_ip_configs(network)?;
        let families: Vec<IpFamily> = configs.iter().map(|c| c.family).collect();
        let ns = network_ns_name(label);
        let br = self.veth_names(VethKind::NetworkBridge, label)?;
        let rt = self.veth_names(VethKind::NetworkRouter, label)?;
        let table = NETWORK_RT_BASE + self.network_index(label)?;
        let mtu = if network.mtu == 0 {
            DEFAULT_MTU
        } else {
            network.mtu
        };

        sg.put_item(ConfigItem::NetNamespace(NetNamespace {
            ns_name: ns.clone(),
            resolv_conf: None,
        }));

        let gw_ips = configs
            .iter()
            .map(|c| IpNet::new(c.gw, c.subnet.prefix_len()).map_err(|e| Error::compile(e.to_string())))
            .collect::<Result<Vec<_>>>()?;
        sg.put_item(ConfigItem::Veth(Veth {
            veth_name: br.veth.clone(),
            peer1: VethPeer {
                if_name: br.inside.clone(),
                net_namespace: ns.clone(),
                ip_addresses: gw_ips,
                master_bridge: None,
            },
            peer2: VethPeer {
                if_name: br.outside.clone(),
                net_namespace: MAIN_NS.to_string(),
                ip_addresses: vec![],
                master_bridge: Some(MasterBridge {
                    if_name: self.bridge_if_name(&network.bridge)?,
                    vlan_id: network.vlan_id,
                }),
            },
            mtu,
        }));

        let mut rt_inside = Vec::new();
        let mut rt_outside = Vec::new();
        for family in &families {
            let (inside, outside) = self.internal_ips(label, *family)?;
            rt_inside.push(inside);
            rt_outside.push(outside);
        }
        sg.put_item(ConfigItem::Veth(Veth {
            veth_name: rt.veth.clone(),
            peer1: VethPeer {
                if_name: rt.inside.clone(),
                net_namespace: ns.clone(),
                ip_addresses: rt_inside,
                master_bridge: None,
            },
            peer2: VethPeer {
                if_name: rt.outside.clone(),
                net_namespace: MAIN_NS.to_string(),
                ip_addresses: rt_outside,
                master_bridge: None,
            },
            mtu: MAX_MTU,
        }));

        sg.put_item(ConfigItem::Sysctl(Sysctl {
            net_namespace: ns.clone(),
            enable_ipv4_fwd: true,
            enable_ipv6_fwd: true,
            bridge_nf_call_iptables: false,
            bridge_nf_call_ip6tables: false,
        }));

        let attachment = NetAttachment {
            net_namespace: ns.clone(),
            veth_name: br.veth.clone(),
            veth_peer_if_name: br.inside.clone(),
        };
        self.dhcp_and_radvd(network, &configs, &attachment, mtu, &mut sg)?;
        self.network_routing(network, &configs, &ns, &br, &rt, table, &mut sg)?;

        if !network.transparent_proxy.is_empty() {
            let (http, https) = transparent_proxy_ports(self.parsed.controller_port());
            for proxy_ip in self.endpoint_addrs(&network.transparent_proxy, None)? {
                let family = IpFamily::of(&proxy_ip);
                if !families.contains(&family) {
                    continue;
                }
                let to = proxy_ip.to_string();
                let rules = std::iter::once(&http)
                    .chain(&https)
                    .map(|p| {
                        let port = p.port.to_string();
                        IptablesRule::new(
                            ["-p", "tcp", "--dport", port.as_str(), "-j", "DNAT", "--to-destination", to.as_str()],
                            format!("redirect traffic to port {} into the transparent proxy", p.port),
                        )
                    })
                    .collect();
                sg.put_item(ConfigItem::IptablesChain(IptablesChain {
                    net_namespace: ns.clone(),
                    table: "nat".into(),
                    chain_name: "PREROUTING".into(),
                    for_ipv6: family == IpFamily::V6,
                    rules,
                    refers_veths: vec![],
                    refers_chains: vec![],
                }));
            }
        }

        for family in &families {
            let internal = internal_subnet(*family).to_string();
            sg.put_item(ConfigItem::IptablesChain(IptablesChain {
                net_namespace: ns.clone(),
                table: "nat".into(),
                chain_name: "POSTROUTING".into(),
                for_ipv6: *family == IpFamily::V6,
                rules: vec![IptablesRule::new(
                    ["-o", br.inside.as_str(), "-s", internal.as_str(), "-j", "MASQUERADE"],
                    "S-NAT traffic with internal source IP leaving towards the device",
                )],
                refers_veths: vec![rt.veth.clone()],
                refers_chains: vec![],
            }));
        }
        Ok(sg)
    }

    /// DNS servers announced to a network for one IP version.
    fn dhcp_dns_servers(&self, dhcp: &Dhcp, family: IpFamily) -> Result<Vec<IpAddr>> {
        let mut servers = Vec::new();
        for dns in &dhcp.dns.public_dns {
            let ip = parse_addr(dns)?;
            if IpFamily::of(&ip) == family {
                servers.push(ip);
            }
        }
        for label in &dhcp.dns.private_dns {
            servers.extend(self.endpoint_addrs(label, Some(family))?);
        }
        Ok(servers)
    }

    fn dhcp_ntp_server(&self, dhcp: &Dhcp, family: IpFamily) -> Result<Option<String>> {
        if !dhcp.public_ntp.is_empty() {
            return Ok(Some(dhcp.public_ntp.clone()));
        }
        if dhcp.private_ntp.is_empty() {
            return Ok(None);
        }
        Ok(self
            .endpoint_addrs(&dhcp.private_ntp, Some(family))?
            .first()
            .map(IpAddr::to_string))
    }

    fn static_leases(dhcp: &Dhcp) -> Result<Vec<StaticLease>> {
        dhcp.static_entries
            .iter()
            .map(|entry| -> Result<StaticLease> {
                Ok(StaticLease {
                    mac: entry.mac.parse()?,
                    ip: parse_addr(&entry.ip)?,
                })
            })
            .collect()
    }

    fn dhcp_and_radvd(
        &self,
        network: &Network,
        configs: &[NetIpConfig<'_>],
        attachment: &NetAttachment,
        mtu: u16,
        sg: &mut SubGraph,
    ) -> Result<()> {
        let label = &network.logical_label;
        let mut ipv4 = None;
        let mut ipv6 = None;
        let mut domain_name = String::new();

        for config in configs {
            let dhcp = config.dhcp;
            let dns_servers = if dhcp.enable {
                self.dhcp_dns_servers(dhcp, config.family)?
            } else {
                Vec::new()
            };
            let ntp_server = if dhcp.enable {
                self.dhcp_ntp_server(dhcp, config.family)?
            } else {
                None
            };
            let has_range = !dhcp.ip_range.is_empty();

            if config.family == IpFamily::V6 {
                sg.put_item(ConfigItem::Radvd(Radvd {
                    name: label.clone(),
                    attachment: attachment.clone(),
                    prefix: config.subnet,
                    managed: dhcp.enable && has_range,
                    other_config: dhcp.enable && (!dns_servers.is_empty() || ntp_server.is_some()),
                    autonomous: !dhcp.enable || !has_range,
                    rdnss: dns_servers.clone(),
                    mtu,
                }));
            }
            if !dhcp.enable {
                continue;
            }
            if domain_name.is_empty() {
                domain_name = dhcp.domain_name.clone();
            }
            let static_leases = Self::static_leases(dhcp)?;
            match config.family {
                IpFamily::V4 => {
                    let (from_ip, to_ip) = if has_range {
                        (parse_addr(&dhcp.ip_range.from_ip)?, parse_addr(&dhcp.ip_range.to_ip)?)
                    } else {
                        default_host_range(&config.subnet)
                    };
                    ipv4 = Some(DhcpV4Config {
                        subnet: config.subnet,
                        from_ip,
                        to_ip,
                        gateway: (!dhcp.without_default_route).then_some(config.gw),
                        dns_servers,
                        ntp_server,
                        wpad: (!dhcp.wpad.is_empty()).then(|| dhcp.wpad.clone()),
                        static_leases,
                    });
                }
                IpFamily::V6 => {
                    let ip_range = if has_range {
                        Some((parse_addr(&dhcp.ip_range.from_ip)?, parse_addr(&dhcp.ip_range.to_ip)?))
                    } else {
                        None
                    };
                    ipv6 = Some(DhcpV6Config {
                        subnet: config.subnet,
                        ip_range,
                        dns_servers,
                        ntp_server,
                        static_leases,
                    });
                }
            }
        }

        if ipv4.is_some() || ipv6.is_some() {
            sg.put_item(ConfigItem::DhcpServer(DhcpServer {
                server_name: label.clone(),
                attachment: attachment.clone(),
                domain_name,
                ipv4,
                ipv6,
            }));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn network_routing(
        &mut self,
        network: &'a Network,
        configs: &[NetIpConfig<'_>],
        ns: &str,
        br: &VethNames,
        rt: &VethNames,
        table: u32,
        sg: &mut SubGraph,
    ) -> Result<()> {
        let model = self.model;
        let label = network.logical_label.as_str();
        let router = network.router.as_ref();
        let rt_out_if = |veth: &VethNames| RouteOutIf::Veth {
            veth_name: veth.veth.clone(),
            if_name: veth.outside.clone(),
        };

        for config in configs {
            let family = config.family;
            let default_dst = family.default_net();
            let (rt_in_ip, rt_out_ip) = self.internal_ips(label, family)?;

            for (src_net, dst_net) in [(Some(config.subnet), None), (None, Some(config.subnet))] {
                sg.put_item(ConfigItem::IpRule(IpRule {
                    src_net,
                    dst_net,
                    table,
                    priority: IP_RULE_PRIORITY,
                }));
            }

            // Default route inside the network namespace, towards the main namespace.
            sg.put_item(ConfigItem::Route(Route {
                net_namespace: ns.to_string(),
                table: MAIN_TABLE,
                dst_net: default_dst,
                out_if: Some(RouteOutIf::Veth {
                    veth_name: rt.veth.clone(),
                    if_name: rt.inside.clone(),
                }),
                gw: Some(rt_out_ip.addr()),
                metric: 0,
            }));

            for ep in model.all_endpoints() {
                let endpoint = ep.endpoint();
                if endpoint.is_direct_l2() {
                    continue;
                }
                let ep_label = ep.logical_label();
                let reachable =
                    router.is_none_or(|r| r.reachable_endpoints.iter().any(|l| l == ep_label));
                for ip in crate::parse::endpoint_ips(endpoint)? {
                    if ip.family() != family {
                        continue;
                    }
                    let (out_if, gw) = if reachable {
                        let veth = self.veth_names(VethKind::Endpoint, ep_label)?;
                        (Some(rt_out_if(&veth)), Some(ip.ip))
                    } else {
                        (None, None)
                    };
                    sg.put_item(ConfigItem::Route(Route {
                        net_namespace: MAIN_NS.to_string(),
                        table,
                        dst_net: ip.subnet,
                        out_if,
                        gw,
                        metric: 0,
                    }));
                }
            }

            for network2 in &model.networks {
                let label2 = network2.logical_label.as_str();
                let reachable = label2 == label
                    || router.is_none_or(|r| r.reachable_networks.iter().any(|l| l == label2));
                for config2 in network_ip_configs(network2)? {
                    if config2.family != family {
                        continue;
                    }
                    let (out_if, gw) = if reachable {
                        let veth = self.veth_names(VethKind::NetworkRouter, label2)?;
                        let (in_ip, _) = self.internal_ips(label2, family)?;
                        (Some(rt_out_if(&veth)), Some(in_ip.addr()))
                    } else {
                        (None, None)
                    };
                    sg.put_item(ConfigItem::Route(Route {
                        net_namespace: MAIN_NS.to_string(),
                        table,
                        dst_net: config2.subnet,
                        out_if,
                        gw,
                        metric: 0,
                    }));
                }
            }

            let outside = router.is_none_or(|r| r.outside_reachability);
            if outside
                && let Some((_, host_port)) = &self.host_port
                && let Some(host_gw) = self.lookup.gateway(family)
            {
                sg.put_item(ConfigItem::Route(Route {
                    net_namespace: MAIN_NS.to_string(),
                    table,
                    dst_net: default_dst,
                    out_if: Some(RouteOutIf::PhysIf(host_port.clone())),
                    gw: Some(host_gw),
                    metric: 0,
                }));
            }

            for route in router.map(|r| r.routes_towards_eve.as_slice()).unwrap_or_default() {
                let dst_net = parse_subnet(&route.dst_network)?;
                if IpFamily::of_net(&dst_net) != family {
                    continue;
                }
                let gw = parse_addr(&route.gateway)?;
                for (src, dst) in [(Some(dst_net), None), (None, Some(dst_net))] {
                    sg.put_item(ConfigItem::IpRule(IpRule {
                        src_net: src,
                        dst_net: dst,
                        table,
                        priority: IP_RULE_PRIORITY,
                    }));
                }
                sg.put_item(ConfigItem::Route(Route {
                    net_namespace: ns.to_string(),
                    table: MAIN_TABLE,
                    dst_net,
                    out_if: Some(RouteOutIf::Veth {
                        veth_name: br.veth.clone(),
                        if_name: br.inside.clone(),
                    }),
                    gw: Some(gw),
                    metric: 0,
                }));
                sg.put_item(ConfigItem::Route(Route {
                    net_namespace: MAIN_NS.to_string(),
                    table,
                    dst_net,
                    out_if: Some(rt_out_if(rt)),
                    gw: Some(rt_in_ip.addr()),
                    metric: 0,
                }));
            }

            // Everything else is unreachable.
            sg.put_item(ConfigItem::Route(Route {
                net_namespace: MAIN_NS.to_string(),
                table,
                dst_net: default_dst,
                out_if: None,
                gw: None,
                metric: u32::MAX,
            }));
        }
        Ok(())
    }
}
