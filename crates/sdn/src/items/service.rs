use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnet::IpNet;

use super::{Dependency, IfUsage, ItemRef, ItemType, PhysIf, netns_dependency};
use crate::model::{HttpContent, ProxyPort, ProxyRule, UserCredentials};
use crate::util::MacAddr;

/// Where a service daemon runs: namespace plus the veth side it listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetAttachment {
    pub net_namespace: String,
    pub veth_name: String,
    /// Interface name of the veth side inside `net_namespace`.
    pub veth_peer_if_name: String,
}

impl NetAttachment {
    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        let mut deps: Vec<Dependency> = netns_dependency(&self.net_namespace).into_iter().collect();
        deps.push(Dependency::exists(
            ItemRef::new(ItemType::Veth, self.veth_name.clone()),
            "veth must exist",
        ));
        deps
    }
}

/// dhcpcd running on the host port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpClient {
    pub phys_if: PhysIf,
    pub log_file: String,
}

impl DhcpClient {
    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::if_handle(
            &self.phys_if.mac,
            IfUsage::L3,
            None,
            "interface must be used for L3",
        )]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticLease {
    pub mac: MacAddr,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpV4Config {
    pub subnet: IpNet,
    pub from_ip: IpAddr,
    pub to_ip: IpAddr,
    /// Advertised default gateway, unless disabled for the network.
    pub gateway: Option<IpAddr>,
    pub dns_servers: Vec<IpAddr>,
    pub ntp_server: Option<String>,
    pub wpad: Option<String>,
    pub static_leases: Vec<StaticLease>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpV6Config {
    pub subnet: IpNet,
    /// Stateful address range. Without one, DHCPv6 is stateless (SLAAC).
    pub ip_range: Option<(IpAddr, IpAddr)>,
    pub dns_servers: Vec<IpAddr>,
    pub ntp_server: Option<String>,
    pub static_leases: Vec<StaticLease>,
}

/// dnsmasq acting as a DHCP server for a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpServer {
    pub server_name: String,
    pub attachment: NetAttachment,
    pub domain_name: String,
    pub ipv4: Option<DhcpV4Config>,
    pub ipv6: Option<DhcpV6Config>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DnsStaticEntry {
    pub fqdn: String,
    pub ip: IpAddr,
}

/// dnsmasq acting as a DNS server for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsServer {
    pub server_name: String,
    pub attachment: NetAttachment,
    pub static_entries: Vec<DnsStaticEntry>,
    pub upstream_servers: Vec<IpAddr>,
}

/// Router advertisement daemon for the IPv6 subnet of a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Radvd {
    pub name: String,
    pub attachment: NetAttachment,
    pub prefix: IpNet,
    /// Addresses are assigned by DHCPv6.
    pub managed: bool,
    /// Other configuration (DNS, NTP) is available from DHCPv6.
    pub other_config: bool,
    /// Clients may autoconfigure addresses from the prefix.
    pub autonomous: bool,
    pub rdnss: Vec<IpAddr>,
    pub mtu: u16,
}

/// HTTP(S) proxy (goproxy), explicit or transparent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProxy {
    pub proxy_name: String,
    pub attachment: NetAttachment,
    /// None listens on all interfaces.
    pub listen_ip: Option<IpAddr>,
    pub hostname: String,
    /// Port zero disables plain HTTP proxying.
    pub http_port: ProxyPort,
    /// Empty disables HTTPS proxying.
    pub https_ports: Vec<ProxyPort>,
    pub transparent: bool,
    pub ca_cert_pem: String,
    pub ca_key_pem: String,
    pub proxy_rules: Vec<ProxyRule>,
    pub users: Vec<UserCredentials>,
}

/// Simple HTTP(S) server (httpsrv) returning static content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpServer {
    pub server_name: String,
    pub attachment: NetAttachment,
    pub listen_ips: Vec<IpAddr>,
    pub http_port: u16,
    pub https_port: u16,
    pub cert_pem: String,
    pub key_pem: String,
    pub paths: BTreeMap<String, HttpContent>,
}
