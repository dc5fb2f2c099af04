//! Configuration files of the daemons run by the agent.
//!
//! Everything here is a pure function of the item, so the exact file
//! contents are tested without starting anything.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::Result;
use crate::items::{DhcpServer, DnsServer, HttpProxy, HttpServer, Radvd, ResolvConf, StaticLease};
use crate::model::{HttpContent, ProxyPort, ProxyRule, UserCredentials};
use crate::util::addr::netmask;

pub const DNSMASQ_CONF_DIR: &str = "/etc/dnsmasq";
pub const DNSMASQ_RUN_DIR: &str = "/run/dnsmasq";
pub const RADVD_CONF_DIR: &str = "/etc/radvd";
pub const RADVD_RUN_DIR: &str = "/run/radvd";
pub const HTTPSRV_CONF_DIR: &str = "/etc/httpsrv";
pub const HTTPSRV_RUN_DIR: &str = "/run/httpsrv";
pub const GOPROXY_CONF_DIR: &str = "/etc/goproxy";
pub const GOPROXY_RUN_DIR: &str = "/run/goproxy";

pub const DHCP_SERVER_PREFIX: &str = "dhcpsrv-";
pub const DNS_SERVER_PREFIX: &str = "dnssrv-";

/// Files owned by one daemon instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonFiles {
    pub conf: PathBuf,
    pub pid: PathBuf,
    pub log: PathBuf,
    /// Only dnsmasq acting as a DHCP server keeps leases.
    pub leases: Option<PathBuf>,
}

impl DaemonFiles {
    fn new(conf_dir: &str, run_dir: &str, name: &str, conf_ext: &str) -> Self {
        Self {
            conf: Path::new(conf_dir).join(format!("{name}.{conf_ext}")),
            pid: Path::new(run_dir).join(format!("{name}.pid")),
            log: Path::new(run_dir).join(format!("{name}.log")),
            leases: None,
        }
    }

    pub fn dhcp_server(server_name: &str) -> Self {
        let name = format!("{DHCP_SERVER_PREFIX}{server_name}");
        let mut files = Self::new(DNSMASQ_CONF_DIR, DNSMASQ_RUN_DIR, &name, "conf");
        files.leases = Some(Path::new(DNSMASQ_RUN_DIR).join(format!("{name}.leases")));
        files
    }

    pub fn dns_server(server_name: &str) -> Self {
        let name = format!("{DNS_SERVER_PREFIX}{server_name}");
        Self::new(DNSMASQ_CONF_DIR, DNSMASQ_RUN_DIR, &name, "conf")
    }

    pub fn radvd(name: &str) -> Self {
        Self::new(RADVD_CONF_DIR, RADVD_RUN_DIR, name, "conf")
    }

    pub fn http_server(name: &str) -> Self {
        Self::new(HTTPSRV_CONF_DIR, HTTPSRV_RUN_DIR, name, "json")
    }

    pub fn http_proxy(name: &str) -> Self {
        Self::new(GOPROXY_CONF_DIR, GOPROXY_RUN_DIR, name, "json")
    }

    /// Every file, for cleanup after the daemon stopped.
    pub fn all(&self) -> Vec<&Path> {
        let mut paths = vec![self.conf.as_path(), self.pid.as_path(), self.log.as_path()];
        paths.extend(self.leases.as_deref());
        paths
    }
}

/// `/etc/netns/<ns>/resolv.conf`.
pub fn resolv_conf(conf: &ResolvConf) -> String {
    let mut out = String::from("# Generated by SDN agent\n# Do not edit\n");
    for server in &conf.dns_servers {
        let _ = writeln!(out, "nameserver {server}");
    }
    out
}

fn dhcp_host(lease: &StaticLease) -> String {
    match lease.ip {
        IpAddr::V4(ip) => format!("dhcp-host={},{ip}", lease.mac),
        IpAddr::V6(ip) => format!("dhcp-host={},[{ip}]", lease.mac),
    }
}

fn bracketed(ips: &[IpAddr]) -> String {
    ips.iter()
        .map(|ip| format!("[{ip}]"))
        .collect::<Vec<_>>()
        .join(",")
}

fn joined(ips: &[IpAddr]) -> String {
    ips.iter()
        .map(IpAddr::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// dnsmasq configuration of a DHCP server. DNS is disabled (`port=0`).
pub fn dhcp_server_conf(server: &DhcpServer, files: &DaemonFiles) -> String {
    let mut lines = vec![
        format!("pid-file={}", files.pid.display()),
    ];
    if let Some(leases) = &files.leases {
        lines.push(format!("dhcp-leasefile={}", leases.display()));
    }
    lines.push("log-dhcp".into());
    lines.push(format!("log-facility={}", files.log.display()));
    lines.push("port=0".into());
    lines.push(format!("interface={}", server.attachment.veth_peer_if_name));

    if let Some(v4) = &server.ipv4 {
        lines.push(format!(
            "dhcp-range={},{},{},60m",
            v4.from_ip,
            v4.to_ip,
            netmask(&v4.subnet)
        ));
        if let Some(gw) = v4.gateway {
            lines.push(format!("dhcp-option=option:router,{gw}"));
        }
        if !server.domain_name.is_empty() {
            lines.push(format!("dhcp-option=option:domain-name,{}", server.domain_name));
        }
        if let Some(ntp) = &v4.ntp_server {
            lines.push(format!("dhcp-option=option:ntp-server,{ntp}"));
        }
        if let Some(wpad) = &v4.wpad {
            lines.push(format!("dhcp-option=252,\"{wpad}\""));
        }
        if !v4.dns_servers.is_empty() {
            lines.push(format!("dhcp-option=option:dns-server,{}", joined(&v4.dns_servers)));
        }
        lines.extend(v4.static_leases.iter().map(dhcp_host));
    }

    if let Some(v6) = &server.ipv6 {
        match v6.ip_range {
            Some((from, to)) => lines.push(format!(
                "dhcp-range={from},{to},{},60m",
                v6.subnet.prefix_len()
            )),
            None => lines.push(format!(
                "dhcp-range=::,constructor:{},ra-stateless",
                server.attachment.veth_peer_if_name
            )),
        }
        if !server.domain_name.is_empty() {
            lines.push(format!("dhcp-option=option6:domain-search,{}", server.domain_name));
        }
        if let Some(ntp) = &v6.ntp_server {
            lines.push(format!("dhcp-option=option6:ntp-server,[{ntp}]"));
        }
        if !v6.dns_servers.is_empty() {
            lines.push(format!(
                "dhcp-option=option6:dns-server,{}",
                bracketed(&v6.dns_servers)
            ));
        }
        lines.extend(v6.static_leases.iter().map(dhcp_host));
    }

    lines.join("\n") + "\n"
}

/// dnsmasq configuration of a DNS server. DHCP is disabled on the interface.
pub fn dns_server_conf(server: &DnsServer, files: &DaemonFiles) -> String {
    let iface = &server.attachment.veth_peer_if_name;
    let mut lines = vec![
        format!("pid-file={}", files.pid.display()),
        format!("interface={iface}"),
        format!("no-dhcp-interface={iface}"),
        "log-queries".to_string(),
        format!("log-facility={}", files.log.display()),
    ];
    lines.extend(server.upstream_servers.iter().map(|ip| format!("server={ip}")));
    lines.push("no-resolv".into());
    lines.extend(
        server
            .static_entries
            .iter()
            .map(|entry| format!("address=/{}/{}", entry.fqdn, entry.ip)),
    );
    lines.push("no-hosts".into());
    lines.join("\n") + "\n"
}

pub fn radvd_conf(radvd: &Radvd) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "interface {} {{", radvd.attachment.veth_peer_if_name);
    out.push_str("    AdvSendAdvert on;\n");
    if radvd.managed {
        out.push_str("    AdvManagedFlag on;\n");
    }
    if radvd.other_config {
        out.push_str("    AdvOtherConfigFlag on;\n");
    }
    if radvd.mtu > 0 {
        let _ = writeln!(out, "    AdvLinkMTU {};", radvd.mtu);
    }
    let _ = writeln!(out, "    prefix {} {{", radvd.prefix);
    out.push_str("        AdvOnLink on;\n");
    if !radvd.autonomous {
        out.push_str("        AdvAutonomous off;\n");
    }
    out.push_str("    };\n");
    if !radvd.rdnss.is_empty() {
        let servers: Vec<String> = radvd.rdnss.iter().map(IpAddr::to_string).collect();
        let _ = writeln!(out, "    RDNSS {} {{", servers.join(" "));
        out.push_str("        AdvRDNSSLifetime 3600;\n");
        out.push_str("    };\n");
    }
    out.push_str("};\n");
    out
}

/// Command line of radvd.
pub fn radvd_args(files: &DaemonFiles) -> Vec<String> {
    vec![
        "--config".into(),
        files.conf.display().to_string(),
        "--pidfile".into(),
        files.pid.display().to_string(),
        "--logfile".into(),
        files.log.display().to_string(),
        "--logmethod".into(),
        "logfile".into(),
        "--debug".into(),
        "5".into(),
    ]
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpSrvConfig<'a> {
    #[serde(rename = "listenIPs")]
    listen_ips: Vec<String>,
    log_file: String,
    pid_file: String,
    verbose: bool,
    http_port: u16,
    https_port: u16,
    #[serde(rename = "certPEM")]
    cert_pem: &'a str,
    #[serde(rename = "keyPEM")]
    key_pem: &'a str,
    paths: &'a BTreeMap<String, HttpContent>,
}

/// JSON configuration passed to httpsrv with `-c`.
pub fn http_server_conf(server: &HttpServer, files: &DaemonFiles) -> Result<String> {
    let config = HttpSrvConfig {
        listen_ips: server.listen_ips.iter().map(IpAddr::to_string).collect(),
        log_file: files.log.display().to_string(),
        pid_file: files.pid.display().to_string(),
        verbose: true,
        http_port: server.http_port,
        https_port: server.https_port,
        cert_pem: &server.cert_pem,
        key_pem: &server.key_pem,
        paths: &server.paths,
    };
    Ok(serde_json::to_string_pretty(&config)?)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyConfig<'a> {
    #[serde(rename = "listenIP")]
    listen_ip: String,
    hostname: &'a str,
    http_port: &'a ProxyPort,
    https_ports: &'a [ProxyPort],
    transparent: bool,
    log_file: String,
    pid_file: String,
    verbose: bool,
    #[serde(rename = "caCertPEM")]
    ca_cert_pem: &'a str,
    #[serde(rename = "caKeyPEM")]
    ca_key_pem: &'a str,
    proxy_rules: &'a [ProxyRule],
    users: &'a [UserCredentials],
}

/// JSON configuration passed to goproxy with `-c`.
pub fn http_proxy_conf(proxy: &HttpProxy, files: &DaemonFiles) -> Result<String> {
    let config = ProxyConfig {
        listen_ip: proxy.listen_ip.map(|ip| ip.to_string()).unwrap_or_default(),
        hostname: &proxy.hostname,
        http_port: &proxy.http_port,
        https_ports: &proxy.https_ports,
        transparent: proxy.transparent,
        log_file: files.log.display().to_string(),
        pid_file: files.pid.display().to_string(),
        verbose: true,
        ca_cert_pem: &proxy.ca_cert_pem,
        ca_key_pem: &proxy.ca_key_pem,
        proxy_rules: &proxy.proxy_rules,
        users: &proxy.users,
    };
    Ok(serde_json::to_string_pretty(&config)?)
}
