use std::net::IpAddr;

use ipnet::IpNet;

use super::network::transparent_proxy_ports;
use super::{Compiler, ENDPOINT_SUBGRAPH_PREFIX, VethKind, endpoint_ns_name};
use crate::depgraph::SubGraph;
use crate::items::{
    ConfigItem, DnsServer, DnsStaticEntry, HttpProxy, HttpServer, MAIN_NS, MAIN_TABLE,
    MasterBridge, NetAttachment, NetNamespace, ResolvConf, Route, RouteOutIf, Veth, VethPeer,
};
use crate::model::{
    ADAM_IP_REF, ADAM_IPV4_REF, ADAM_IPV6_REF, DEFAULT_MTU, DnsClientConfig,
    ENDPOINT_FQDN_REF_PREFIX, ENDPOINT_IP_REF_PREFIX, ENDPOINT_IPV4_REF_PREFIX,
    ENDPOINT_IPV6_REF_PREFIX, EndpointRef, ProxyPort,
};
use crate::parse::endpoint_ips;
use crate::util::IpFamily;
use crate::util::addr::{endpoint_gateway, parse_addr};
use crate::{Error, Result};

impl<'a> Compiler<'a> {
    pub(super) fn endpoint(&mut self, ep: EndpointRef<'a>) -> Result<SubGraph> {
        let label = ep.logical_label();
        let endpoint = ep.endpoint();
        let mut sg = SubGraph::new(format!("{ENDPOINT_SUBGRAPH_PREFIX}{label}"));

        let ns = endpoint_ns_name(label);
        let names = self.veth_names(VethKind::Endpoint, label)?;
        let ips = endpoint_ips(endpoint)?;

        let resolv_conf = ep
            .dns_client_config()
            .map(|dns| self.resolv_conf(dns))
            .transpose()?;
        sg.put_item(ConfigItem::NetNamespace(NetNamespace {
            ns_name: ns.clone(),
            resolv_conf,
        }));

        let ep_ips = ips
            .iter()
            .map(|ip| ip.with_prefix())
            .collect::<Result<Vec<_>>>()?;
        let (gw_ips, master_bridge) = if endpoint.is_direct_l2() {
            let l2 = &endpoint.direct_l2_connect;
            let master = MasterBridge {
                if_name: self.bridge_if_name(&l2.bridge)?,
                vlan_id: l2.vlan_id,
            };
            (Vec::new(), Some(master))
        } else {
            let gws = ips
                .iter()
                .map(|ip| {
                    let gw = endpoint_gateway(&ip.subnet, ip.ip);
                    IpNet::new(gw, ip.subnet.prefix_len())
                        .map_err(|e| Error::compile(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            (gws, None)
        };
        sg.put_item(ConfigItem::Veth(Veth {
            veth_name: names.veth.clone(),
            peer1: VethPeer {
                if_name: names.inside.clone(),
                net_namespace: ns.clone(),
                ip_addresses: ep_ips,
                master_bridge: None,
            },
            peer2: VethPeer {
                if_name: names.outside.clone(),
                net_namespace: MAIN_NS.to_string(),
                ip_addresses: gw_ips.clone(),
                master_bridge,
            },
            mtu: if endpoint.mtu == 0 {
                DEFAULT_MTU
            } else {
                endpoint.mtu
            },
        }));

        for gw in &gw_ips {
            let family = IpFamily::of(&gw.addr());
            sg.put_item(ConfigItem::Route(Route {
                net_namespace: ns.clone(),
                table: MAIN_TABLE,
                dst_net: family.default_net(),
                out_if: Some(RouteOutIf::Veth {
                    veth_name: names.veth.clone(),
                    if_name: names.inside.clone(),
                }),
                gw: Some(gw.addr()),
                metric: 0,
            }));
        }

        let attachment = NetAttachment {
            net_namespace: ns,
            veth_name: names.veth,
            veth_peer_if_name: names.inside,
        };
        let listen_ips: Vec<IpAddr> = ips.iter().map(|ip| ip.ip).collect();
        let single_ip = match listen_ips.as_slice() {
            [ip] => Some(*ip),
            _ => None,
        };

        match ep {
            EndpointRef::DnsServer(dns) => {
                let mut static_entries = Vec::new();
                for entry in &dns.static_entries {
                    let resolved = self.resolve_dns_entry(&entry.fqdn, &entry.ip)?;
                    if resolved.is_empty() {
                        tracing::warn!(
                            server = label,
                            fqdn = %entry.fqdn,
                            ip = %entry.ip,
                            "static DNS entry resolves to no address, skipping"
                        );
                    }
                    static_entries.extend(resolved);
                }
                let upstream_servers = dns
                    .upstream_servers
                    .iter()
                    .map(|s| parse_addr(s).map_err(Error::from))
                    .collect::<Result<Vec<_>>>()?;
                sg.put_item(ConfigItem::DnsServer(DnsServer {
                    server_name: label.to_string(),
                    attachment,
                    static_entries,
                    upstream_servers,
                }));
            }
            EndpointRef::ExplicitProxy(proxy) => {
                let https_ports: Vec<ProxyPort> = (proxy.https_proxy.port != 0)
                    .then(|| proxy.https_proxy.clone())
                    .into_iter()
                    .collect();
                sg.put_item(ConfigItem::HttpProxy(HttpProxy {
                    proxy_name: label.to_string(),
                    attachment,
                    listen_ip: single_ip,
                    hostname: endpoint.fqdn.clone(),
                    http_port: proxy.http_proxy.clone(),
                    https_ports,
                    transparent: false,
                    ca_cert_pem: proxy.proxy.ca_cert_pem.clone(),
                    ca_key_pem: proxy.proxy.ca_key_pem.clone(),
                    proxy_rules: proxy.proxy.proxy_rules.clone(),
                    users: proxy.users.clone(),
                }));
            }
            EndpointRef::TransparentProxy(proxy) => {
                let (http_port, https_ports) = transparent_proxy_ports(self.parsed.controller_port());
                sg.put_item(ConfigItem::HttpProxy(HttpProxy {
                    proxy_name: label.to_string(),
                    attachment,
                    listen_ip: single_ip,
                    hostname: endpoint.fqdn.clone(),
                    http_port,
                    https_ports,
                    transparent: true,
                    ca_cert_pem: proxy.proxy.ca_cert_pem.clone(),
                    ca_key_pem: proxy.proxy.ca_key_pem.clone(),
                    proxy_rules: proxy.proxy.proxy_rules.clone(),
                    users: Vec::new(),
                }));
            }
            EndpointRef::HttpServer(server) => {
                sg.put_item(ConfigItem::HttpServer(HttpServer {
                    server_name: label.to_string(),
                    attachment,
                    listen_ips,
                    http_port: server.http_port,
                    https_port: server.https_port,
                    cert_pem: server.cert_pem.clone(),
                    key_pem: server.key_pem.clone(),
                    paths: server.paths.clone(),
                }));
            }
            EndpointRef::Client(_) | EndpointRef::NtpServer(_) | EndpointRef::NetbootServer(_) => {}
        }
        Ok(sg)
    }

    fn resolv_conf(&self, dns: &DnsClientConfig) -> Result<ResolvConf> {
        let mut dns_servers = Vec::new();
        for server in &dns.public_dns {
            dns_servers.push(parse_addr(server)?);
        }
        for label in &dns.private_dns {
            dns_servers.extend(self.endpoint_addrs(label, None)?);
        }
        Ok(ResolvConf { dns_servers })
    }

    /// Expand the reference tokens of a static DNS entry.
    fn resolve_dns_entry(&self, fqdn: &str, ip: &str) -> Result<Vec<DnsStaticEntry>> {
        let fqdn = match fqdn.strip_prefix(ENDPOINT_FQDN_REF_PREFIX) {
            Some(label) => self
                .parsed
                .endpoint(label)
                .ok_or_else(|| Error::compile(format!("missing endpoint {label}")))?
                .endpoint()
                .fqdn
                .clone(),
            None => fqdn.to_string(),
        };

        let host_ip = |family| self.parsed.host_ip(family).into_iter().collect::<Vec<_>>();
        let ips: Vec<IpAddr> = if ip == ADAM_IP_REF {
            host_ip(IpFamily::V4)
                .into_iter()
                .chain(host_ip(IpFamily::V6))
                .collect()
        } else if ip == ADAM_IPV4_REF {
            host_ip(IpFamily::V4)
        } else if ip == ADAM_IPV6_REF {
            host_ip(IpFamily::V6)
        } else if let Some(label) = ip.strip_prefix(ENDPOINT_IPV4_REF_PREFIX) {
            self.endpoint_addrs(label, Some(IpFamily::V4))?
        } else if let Some(label) = ip.strip_prefix(ENDPOINT_IPV6_REF_PREFIX) {
            self.endpoint_addrs(label, Some(IpFamily::V6))?
        } else if let Some(label) = ip.strip_prefix(ENDPOINT_IP_REF_PREFIX) {
            self.endpoint_addrs(label, None)?
        } else {
            vec![parse_addr(ip)?]
        };

        Ok(ips
            .into_iter()
            .map(|ip| DnsStaticEntry {
                fqdn: fqdn.clone(),
                ip,
            })
            .collect())
    }
}
