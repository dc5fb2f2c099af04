use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::DnsClientConfig;

/// All simulated remote endpoints, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoints {
    pub clients: Vec<Client>,
    pub dns_servers: Vec<DnsServer>,
    pub ntp_servers: Vec<NtpServer>,
    pub http_servers: Vec<HttpServer>,
    pub explicit_proxies: Vec<ExplicitProxy>,
    pub transparent_proxies: Vec<TransparentProxy>,
    pub netboot_servers: Vec<NetbootServer>,
}

/// Attributes shared by every endpoint kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoint {
    pub logical_label: String,
    pub fqdn: String,
    /// Single-stack IP configuration.
    #[serde(flatten)]
    pub ip_config: EndpointIpConfig,
    pub dual_stack: DualStackEndpoint,
    /// Attach the endpoint straight to a bridge instead of routing it.
    #[serde(rename = "directL2Connect")]
    pub direct_l2_connect: DirectL2EpConnect,
    /// Zero means the default (1500).
    pub mtu: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointIpConfig {
    pub subnet: String,
    pub ip: String,
}

impl EndpointIpConfig {
    pub fn is_empty(&self) -> bool {
        self.subnet.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualStackEndpoint {
    pub ipv4: EndpointIpConfig,
    pub ipv6: EndpointIpConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectL2EpConnect {
    /// Logical label of the bridge.
    pub bridge: String,
    #[serde(rename = "vlanID")]
    pub vlan_id: u16,
}

impl Endpoint {
    pub fn is_dual_stack(&self) -> bool {
        !self.dual_stack.ipv4.is_empty() || !self.dual_stack.ipv6.is_empty()
    }

    pub fn is_direct_l2(&self) -> bool {
        !self.direct_l2_connect.bridge.is_empty()
    }

    /// Non-empty IP configurations of the endpoint. Empty for L2-only endpoints.
    pub fn ip_configs(&self) -> Vec<&EndpointIpConfig> {
        let configs = if self.is_dual_stack() {
            vec![&self.dual_stack.ipv4, &self.dual_stack.ipv6]
        } else {
            vec![&self.ip_config]
        };
        configs.into_iter().filter(|c| !c.is_empty()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Client {
    #[serde(flatten)]
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DnsServer {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub static_entries: Vec<DnsEntry>,
    /// Literal IPs of upstream DNS servers.
    pub upstream_servers: Vec<String>,
}

/// Static DNS record. Both fields may be symbolic references such as
/// `endpoint-fqdn.<label>`, `endpoint-ip.<label>` or `adam-ip`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsEntry {
    pub fqdn: String,
    pub ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NtpServer {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub upstream_servers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpServer {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    #[serde(flatten)]
    pub dns: DnsClientConfig,
    pub http_port: u16,
    pub https_port: u16,
    #[serde(rename = "certPEM")]
    pub cert_pem: String,
    #[serde(rename = "keyPEM")]
    pub key_pem: String,
    pub paths: BTreeMap<String, HttpContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpContent {
    pub content_type: String,
    pub content: String,
}

/// Settings shared by explicit and transparent proxies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Proxy {
    #[serde(flatten)]
    pub dns: DnsClientConfig,
    /// CA used to sign certificates generated for MITM rules.
    #[serde(rename = "caCertPEM")]
    pub ca_cert_pem: String,
    #[serde(rename = "caKeyPEM")]
    pub ca_key_pem: String,
    pub proxy_rules: Vec<ProxyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyRule {
    /// Empty matches every host not matched by other rules.
    pub req_host: String,
    pub action: ProxyAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyAction {
    #[default]
    #[serde(rename = "forward", alias = "")]
    Forward,
    #[serde(rename = "reject")]
    Reject,
    #[serde(rename = "mitm")]
    Mitm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExplicitProxy {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    #[serde(flatten)]
    pub proxy: Proxy,
    pub http_proxy: ProxyPort,
    pub https_proxy: ProxyPort,
    pub users: Vec<UserCredentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyPort {
    /// Zero disables the listener.
    pub port: u16,
    pub listen_proto: ListenProto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListenProto {
    #[default]
    #[serde(rename = "http", alias = "")]
    Http,
    #[serde(rename = "https")]
    Https,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransparentProxy {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    #[serde(flatten)]
    pub proxy: Proxy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetbootServer {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub tftp_artifacts: Vec<NetbootArtifact>,
    pub http_artifacts: Vec<NetbootArtifact>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetbootArtifact {
    pub filename: String,
    #[serde(rename = "downloadFromURL")]
    pub download_from_url: String,
    pub entrypoint: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_proxy_json() {
        let json = r#"{
            "logicalLabel": "proxy1",
            "fqdn": "proxy.example.com",
            "subnet": "10.20.0.0/24",
            "ip": "10.20.0.10",
            "publicDNS": ["8.8.8.8"],
            "proxyRules": [{"reqHost": "example.com", "action": "mitm"}],
            "httpProxy": {"port": 9090},
            "httpsProxy": {"port": 9091, "listenProto": "https"},
            "users": [{"username": "user", "password": "pass"}]
        }"#;
        let p: ExplicitProxy = serde_json::from_str(json).unwrap();
        assert_eq!(p.endpoint.logical_label, "proxy1");
        assert_eq!(p.endpoint.ip_config.ip, "10.20.0.10");
        assert_eq!(p.proxy.dns.public_dns, vec!["8.8.8.8"]);
        assert_eq!(p.proxy.proxy_rules[0].action, ProxyAction::Mitm);
        assert_eq!(p.http_proxy.listen_proto, ListenProto::Http);
        assert_eq!(p.https_proxy.listen_proto, ListenProto::Https);
        assert_eq!(p.users.len(), 1);
    }

    #[test]
    fn test_endpoint_ip_configs() {
        let mut ep = Endpoint::default();
        assert!(ep.ip_configs().is_empty());

        ep.direct_l2_connect.bridge = "br".into();
        assert!(ep.is_direct_l2());

        ep.dual_stack.ipv6 = EndpointIpConfig {
            subnet: "2001:db8:1::/64".into(),
            ip: "2001:db8:1::10".into(),
        };
        assert!(ep.is_dual_stack());
        assert_eq!(ep.ip_configs().len(), 1);
    }

    #[test]
    fn test_http_server_paths() {
        let json = r#"{
            "logicalLabel": "web",
            "httpPort": 80,
            "paths": {"/hello": {"contentType": "text/plain", "content": "hi"}}
        }"#;
        let s: HttpServer = serde_json::from_str(json).unwrap();
        assert_eq!(s.http_port, 80);
        assert_eq!(s.paths["/hello"].content, "hi");
    }
}
