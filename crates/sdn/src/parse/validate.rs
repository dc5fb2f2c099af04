//! Field validation of the network model.
//!
//! Checks run in a fixed order and stop at the first failure: ports, bonds,
//! host config, networks, endpoints, firewall.

use std::collections::BTreeSet;
use std::net::IpAddr;

use ipnet::IpNet;

use super::cert::validate_cert_and_key;
use crate::model::{
    DnsServer, EndpointIpConfig, EndpointRef, ExplicitProxy, FwProto, HttpServer, MAX_MTU,
    MIN_MTU, Network, NetworkIpConfig, NetworkModel, Proxy, is_symbolic_ip,
};
use crate::util::addr::{host_bits, is_global_unicast, parse_addr, parse_subnet};
use crate::util::{IpFamily, MacAddr};
use crate::{Error, Result};

/// Routable host addresses found in the host config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostIps {
    pub ipv4: Option<IpAddr>,
    pub ipv6: Option<IpAddr>,
}

pub(super) fn validate_model(model: &NetworkModel) -> Result<HostIps> {
    validate_ports(model)?;
    validate_bonds(model)?;
    let host_ips = validate_host(model)?;
    for network in &model.networks {
        validate_network(network)?;
    }
    for ep in model.all_endpoints() {
        validate_endpoint(ep)?;
    }
    validate_firewall(model)?;
    Ok(host_ips)
}

fn validate_ports(model: &NetworkModel) -> Result<()> {
    let mut macs = BTreeSet::new();
    for port in &model.ports {
        let label = &port.logical_label;
        let mac: MacAddr = port.mac.parse().map_err(|e| {
            Error::validation(format!("port {} has invalid MAC address: {}", label, e))
        })?;
        if !macs.insert(mac) {
            return Err(Error::validation(format!(
                "port {} has duplicate MAC address {}",
                label, port.mac
            )));
        }
        if mac.has_prefix(&crate::model::HOST_PORT_MAC_PREFIX) {
            return Err(Error::validation(format!(
                "port {} has MAC address with prefix reserved for the host port",
                label
            )));
        }
        if !port.eve_connect.mac.is_empty() {
            port.eve_connect.mac.parse::<MacAddr>().map_err(|e| {
                Error::validation(format!(
                    "EVE-side of port {} has invalid MAC address: {}",
                    label, e
                ))
            })?;
        }
        let tc = &port.traffic_control;
        if tc.rate_limit != 0 {
            if tc.queue_limit == 0 {
                return Err(Error::validation(format!(
                    "RateLimit set for port {} without QueueLimit",
                    label
                )));
            }
            if tc.burst_limit == 0 {
                return Err(Error::validation(format!(
                    "RateLimit set for port {} without BurstLimit",
                    label
                )));
            }
        }
    }
    Ok(())
}

fn validate_bonds(model: &NetworkModel) -> Result<()> {
    for bond in &model.bonds {
        let label = &bond.logical_label;
        if bond.mii_monitor.enabled && bond.arp_monitor.enabled {
            return Err(Error::validation(format!(
                "bond {} has both MII and ARP monitoring enabled",
                label
            )));
        }
        for target in &bond.arp_monitor.ip_targets {
            match target.parse::<IpAddr>() {
                Ok(IpAddr::V4(_)) => {}
                _ => {
                    return Err(Error::validation(format!(
                        "bond {} has invalid ARP target IP ({})",
                        label, target
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_host(model: &NetworkModel) -> Result<HostIps> {
    let Some(host) = &model.host else {
        return Err(Error::validation("missing host configuration"));
    };
    let mut host_ips = HostIps::default();
    for ip in &host.host_ips {
        let addr = parse_addr(ip).map_err(|_| {
            Error::validation(format!("failed to parse host IP address {}", ip))
        })?;
        if is_global_unicast(&addr) {
            match addr {
                IpAddr::V4(_) => host_ips.ipv4 = Some(addr),
                IpAddr::V6(_) => host_ips.ipv6 = Some(addr),
            }
        }
    }
    if host_ips.ipv4.is_none() && host_ips.ipv6.is_none() {
        return Err(Error::validation(
            "eden SDN requires at least one routable host IP address",
        ));
    }
    if host.controller_port == 0 {
        return Err(Error::validation("missing controller port"));
    }
    Ok(host_ips)
}

fn validate_mtu(mtu: u16, what: &str, label: &str) -> Result<()> {
    if mtu == 0 {
        return Ok(());
    }
    if mtu < MIN_MTU {
        return Err(Error::validation(format!(
            "MTU {} configured for {} {} is too small",
            mtu, what, label
        )));
    }
    if mtu > MAX_MTU {
        return Err(Error::validation(format!(
            "MTU {} configured for {} {} is too large",
            mtu, what, label
        )));
    }
    Ok(())
}

fn check_family(
    expected: Option<IpFamily>,
    got: IpFamily,
    what: &str,
    label: &str,
    value: &str,
) -> Result<()> {
    match expected {
        Some(family) if family != got => Err(Error::validation(format!(
            "expected {} {} for {}, got: {}",
            family, what, label, value
        ))),
        _ => Ok(()),
    }
}

fn validate_network(network: &Network) -> Result<()> {
    let label = &network.logical_label;
    let mut subnets = Vec::new();
    if network.is_dual_stack() {
        let ds = &network.dual_stack;
        if !ds.ipv4.is_empty() {
            subnets.push(validate_network_ip_config(label, &ds.ipv4, Some(IpFamily::V4))?);
        }
        if !ds.ipv6.is_empty() {
            subnets.push(validate_network_ip_config(label, &ds.ipv6, Some(IpFamily::V6))?);
        }
        let (d4, d6) = (&ds.ipv4.dhcp.domain_name, &ds.ipv6.dhcp.domain_name);
        if !d4.is_empty() && !d6.is_empty() && d4 != d6 {
            return Err(Error::validation(format!(
                "dual-stack network {} is defined with two different domain names",
                label
            )));
        }
    } else {
        subnets.push(validate_network_ip_config(label, &network.ip_config, None)?);
    }

    if let Some(router) = &network.router {
        for route in &router.routes_towards_eve {
            parse_subnet(&route.dst_network).map_err(|_| {
                Error::validation(format!(
                    "network {} route {:?} has invalid destination",
                    label, route
                ))
            })?;
            let gw = parse_addr(&route.gateway).map_err(|_| {
                Error::validation(format!(
                    "network {} route {:?} has invalid gateway IP ({})",
                    label, route, route.gateway
                ))
            })?;
            if !subnets.iter().any(|s| s.contains(&gw)) {
                return Err(Error::validation(format!(
                    "network {} route {:?} has gateway IP ({}) which is not from within the network subnet(s)",
                    label, route, route.gateway
                )));
            }
        }
    }

    validate_mtu(network.mtu, "network", label)
}

fn validate_network_ip_config(
    label: &str,
    config: &NetworkIpConfig,
    expected: Option<IpFamily>,
) -> Result<IpNet> {
    let subnet = parse_subnet(&config.subnet)
        .map_err(|_| Error::validation(format!("network {} has invalid subnet", label)))?;
    let family = IpFamily::of_net(&subnet);
    check_family(expected, family, "subnet", &format!("network {}", label), &config.subnet)?;

    let gw = parse_addr(&config.gw_ip).map_err(|_| {
        Error::validation(format!(
            "network {} has invalid gateway IP ({})",
            label, config.gw_ip
        ))
    })?;
    if !subnet.contains(&gw) {
        return Err(Error::validation(format!(
            "network {} has gateway IP ({}) which is not inside the subnet ({})",
            label, config.gw_ip, config.subnet
        )));
    }

    let dhcp = &config.dhcp;
    if !dhcp.enable {
        return Ok(subnet);
    }

    let range = &dhcp.ip_range;
    if !range.is_empty() {
        let from = parse_addr(&range.from_ip).map_err(|_| {
            Error::validation(format!(
                "network {} has invalid DHCP range FromIP ({})",
                label, range.from_ip
            ))
        })?;
        let to = parse_addr(&range.to_ip).map_err(|_| {
            Error::validation(format!(
                "network {} has invalid DHCP range ToIP ({})",
                label, range.to_ip
            ))
        })?;
        if !subnet.contains(&from) || !subnet.contains(&to) {
            return Err(Error::validation(format!(
                "network {} has DHCP IP range outside of the subnet",
                label
            )));
        }
        if from > to {
            return Err(Error::validation(format!(
                "network {} has DHCP IP range where FromIP > ToIP",
                label
            )));
        }
    }

    for dns in &dhcp.dns.public_dns {
        let addr = parse_addr(dns).map_err(|_| {
            Error::validation(format!(
                "network {} has invalid public DNS server IP ({})",
                label, dns
            ))
        })?;
        check_family(
            Some(family),
            IpFamily::of(&addr),
            "DNS server address",
            &format!("network {}", label),
            dns,
        )?;
    }

    if !dhcp.public_ntp.is_empty() && !dhcp.private_ntp.is_empty() {
        return Err(Error::validation(format!(
            "network {} has both public and private NTP configured",
            label
        )));
    }

    for entry in &dhcp.static_entries {
        entry.mac.parse::<MacAddr>().map_err(|_| {
            Error::validation(format!(
                "network {} has static DHCP entry with invalid MAC address ({})",
                label, entry.mac
            ))
        })?;
        let ip = parse_addr(&entry.ip).map_err(|_| {
            Error::validation(format!(
                "network {} has static DHCP entry with invalid IP address ({})",
                label, entry.ip
            ))
        })?;
        check_family(
            Some(family),
            IpFamily::of(&ip),
            "address in static DHCP entry",
            &format!("network {}", label),
            &entry.ip,
        )?;
        if !subnet.contains(&ip) {
            return Err(Error::validation(format!(
                "network {} has static DHCP entry with IP ({}) outside of the subnet",
                label, entry.ip
            )));
        }
    }

    if !dhcp.wpad.is_empty() && family == IpFamily::V6 {
        return Err(Error::validation(format!(
            "network {} configured with WPAD URL ({}) which is not supported for IPv6",
            label, dhcp.wpad
        )));
    }
    Ok(subnet)
}

fn validate_endpoint_ip_config(
    label: &str,
    config: &EndpointIpConfig,
    expected: Option<IpFamily>,
) -> Result<()> {
    let subnet = parse_subnet(&config.subnet).map_err(|_| {
        Error::validation(format!(
            "endpoint {} with invalid subnet '{}'",
            label, config.subnet
        ))
    })?;
    check_family(
        expected,
        IpFamily::of_net(&subnet),
        "subnet",
        &format!("endpoint {}", label),
        &config.subnet,
    )?;
    if host_bits(&subnet) < 2 {
        return Err(Error::validation(format!(
            "endpoint {} uses subnet with less than 2 host IPs ({})",
            label, config.subnet
        )));
    }
    let ip = parse_addr(&config.ip).map_err(|_| {
        Error::validation(format!(
            "endpoint {} with invalid IP address ({})",
            label, config.ip
        ))
    })?;
    if !subnet.contains(&ip) {
        return Err(Error::validation(format!(
            "endpoint {} has IP ({}) address outside of the configured subnet ({})",
            label, config.ip, config.subnet
        )));
    }
    Ok(())
}

fn validate_endpoint(ep: EndpointRef<'_>) -> Result<()> {
    let endpoint = ep.endpoint();
    let label = &endpoint.logical_label;
    if endpoint.is_dual_stack() {
        let ds = &endpoint.dual_stack;
        if !ds.ipv4.is_empty() {
            validate_endpoint_ip_config(label, &ds.ipv4, Some(IpFamily::V4))?;
        }
        if !ds.ipv6.is_empty() {
            validate_endpoint_ip_config(label, &ds.ipv6, Some(IpFamily::V6))?;
        }
    } else if !endpoint.ip_config.is_empty() {
        validate_endpoint_ip_config(label, &endpoint.ip_config, None)?;
    }
    validate_mtu(endpoint.mtu, "endpoint", label)?;

    match ep {
        EndpointRef::DnsServer(dns) => validate_dns_server(dns),
        EndpointRef::HttpServer(server) => validate_http_server(server),
        EndpointRef::ExplicitProxy(proxy) => validate_explicit_proxy(proxy),
        EndpointRef::TransparentProxy(proxy) => validate_proxy(label, &proxy.proxy),
        EndpointRef::Client(_) | EndpointRef::NtpServer(_) | EndpointRef::NetbootServer(_) => {
            Ok(())
        }
    }
}

fn validate_dns_server(dns: &DnsServer) -> Result<()> {
    let label = &dns.endpoint.logical_label;
    for server in &dns.upstream_servers {
        parse_addr(server).map_err(|_| {
            Error::validation(format!(
                "DNS server {} has invalid upstream server IP ({})",
                label, server
            ))
        })?;
    }
    for entry in &dns.static_entries {
        if entry.fqdn.is_empty() {
            return Err(Error::validation(format!(
                "DNS server {} has static entry with empty FQDN",
                label
            )));
        }
        // Symbolic references are resolved by the compiler.
        if is_symbolic_ip(&entry.ip) {
            continue;
        }
        parse_addr(&entry.ip).map_err(|_| {
            Error::validation(format!(
                "DNS server {} has invalid static entry IP ({})",
                label, entry.ip
            ))
        })?;
    }
    Ok(())
}

fn validate_proxy(label: &str, proxy: &Proxy) -> Result<()> {
    for dns in &proxy.dns.public_dns {
        parse_addr(dns).map_err(|_| {
            Error::validation(format!(
                "proxy {} has invalid public DNS server IP ({})",
                label, dns
            ))
        })?;
    }
    if !proxy.ca_cert_pem.is_empty() || !proxy.ca_key_pem.is_empty() {
        validate_cert_and_key(&proxy.ca_cert_pem, &proxy.ca_key_pem, true).map_err(|e| {
            Error::validation(format!("proxy {} has invalid CA certificate: {}", label, e))
        })?;
    }
    let mut hosts = BTreeSet::new();
    for rule in &proxy.proxy_rules {
        if !hosts.insert(rule.req_host.as_str()) {
            return Err(Error::validation(format!(
                "proxy {} has duplicate rules",
                label
            )));
        }
    }
    Ok(())
}

fn validate_explicit_proxy(proxy: &ExplicitProxy) -> Result<()> {
    let label = &proxy.endpoint.logical_label;
    validate_proxy(label, &proxy.proxy)?;
    let (http, https) = (proxy.http_proxy.port, proxy.https_proxy.port);
    if http == 0 && https == 0 {
        return Err(Error::validation(format!(
            "Proxy {} without port numbers",
            label
        )));
    }
    if http == https {
        return Err(Error::validation(format!(
            "proxy {} with colliding ports",
            label
        )));
    }
    if proxy.users.iter().any(|u| u.username.is_empty()) {
        return Err(Error::validation(format!(
            "Proxy {} with empty username",
            label
        )));
    }
    Ok(())
}

fn validate_http_server(server: &HttpServer) -> Result<()> {
    let label = &server.endpoint.logical_label;
    for dns in &server.dns.public_dns {
        parse_addr(dns).map_err(|_| {
            Error::validation(format!(
                "HTTP server {} has invalid public DNS server IP ({})",
                label, dns
            ))
        })?;
    }
    if server.http_port == 0 && server.https_port == 0 {
        return Err(Error::validation(format!(
            "HTTP server {} without port numbers",
            label
        )));
    }
    if server.http_port == server.https_port {
        return Err(Error::validation(format!(
            "HTTP server {} with colliding ports",
            label
        )));
    }
    if !server.cert_pem.is_empty() || !server.key_pem.is_empty() {
        validate_cert_and_key(&server.cert_pem, &server.key_pem, false).map_err(|e| {
            Error::validation(format!(
                "HTTP server {} has invalid certificate: {}",
                label, e
            ))
        })?;
    }
    if server.https_port != 0 && server.cert_pem.is_empty() {
        return Err(Error::validation(format!(
            "HTTPS server {} without certificate",
            label
        )));
    }
    Ok(())
}

fn validate_firewall(model: &NetworkModel) -> Result<()> {
    for rule in &model.firewall.rules {
        for subnet in [&rule.src_subnet, &rule.dst_subnet] {
            if subnet.is_empty() {
                continue;
            }
            parse_subnet(subnet).map_err(|_| {
                Error::validation(format!("firewall rule with invalid subnet '{}'", subnet))
            })?;
        }
        if !rule.ports.is_empty() && !matches!(rule.protocol, FwProto::Tcp | FwProto::Udp) {
            return Err(Error::validation(format!(
                "firewall rule with non-empty set of ports ({:?}) but protocol is neither TCP nor UDP ({:?})",
                rule.ports, rule.protocol
            )));
        }
    }
    Ok(())
}
