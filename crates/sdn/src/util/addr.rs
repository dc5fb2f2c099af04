//! Address parsing, formatting and subnet arithmetic.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error type for address parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),

    #[error("invalid MAC address: {0}")]
    InvalidMac(String),
}

pub type Result<T> = std::result::Result<T, AddrError>;

/// IP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    pub fn of_net(net: &IpNet) -> Self {
        match net {
            IpNet::V4(_) => IpFamily::V4,
            IpNet::V6(_) => IpFamily::V6,
        }
    }

    /// The all-zero "default" destination for this family.
    pub fn default_net(self) -> IpNet {
        match self {
            IpFamily::V4 => IpNet::V4(Ipv4Net::default()),
            IpFamily::V6 => IpNet::V6(Ipv6Net::default()),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => write!(f, "IPv4"),
            IpFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns true if this address starts with the given prefix bytes.
    pub fn has_prefix(&self, prefix: &[u8]) -> bool {
        prefix.len() <= 6 && self.0[..prefix.len()] == *prefix
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_mac(&self.0))
    }
}

impl FromStr for MacAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self> {
        parse_mac(s).map(MacAddr)
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse an IP address from string.
pub fn parse_addr(s: &str) -> Result<IpAddr> {
    s.parse()
        .map_err(|_| AddrError::InvalidAddress(s.to_string()))
}

/// Parse a subnet in CIDR notation. Host bits are masked off.
pub fn parse_subnet(s: &str) -> Result<IpNet> {
    s.parse::<IpNet>()
        .map(|net| net.trunc())
        .map_err(|_| AddrError::InvalidSubnet(s.to_string()))
}

/// Parse a MAC address from string (`:` or `-` separated).
pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let sep = if s.contains('-') { '-' } else { ':' };
    let parts: Vec<&str> = s.split(sep).collect();
    if parts.len() != 6 {
        return Err(AddrError::InvalidMac(s.to_string()));
    }

    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        if part.len() != 2 {
            return Err(AddrError::InvalidMac(s.to_string()));
        }
        mac[i] = u8::from_str_radix(part, 16).map_err(|_| AddrError::InvalidMac(s.to_string()))?;
    }

    Ok(mac)
}

/// Format a MAC address.
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Returns the address `n` positions after the network address of `net`.
pub fn nth_addr(net: &IpNet, n: u128) -> IpAddr {
    match net {
        IpNet::V4(net) => {
            let base = u32::from(net.network());
            IpAddr::V4(Ipv4Addr::from(base.wrapping_add(n as u32)))
        }
        IpNet::V6(net) => {
            let base = u128::from(net.network());
            IpAddr::V6(Ipv6Addr::from(base.wrapping_add(n)))
        }
    }
}

/// Last address of the subnet (IPv4 broadcast).
pub fn last_addr(net: &IpNet) -> IpAddr {
    match net {
        IpNet::V4(net) => IpAddr::V4(net.broadcast()),
        IpNet::V6(net) => IpAddr::V6(net.broadcast()),
    }
}

/// Address immediately before `addr`.
pub fn prev_addr(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(a) => IpAddr::V4(Ipv4Addr::from(u32::from(a).wrapping_sub(1))),
        IpAddr::V6(a) => IpAddr::V6(Ipv6Addr::from(u128::from(a).wrapping_sub(1))),
    }
}

/// Number of host bits in the subnet.
pub fn host_bits(net: &IpNet) -> u8 {
    net.max_prefix_len() - net.prefix_len()
}

/// Default host range of a subnet: first host up to the address before broadcast.
pub fn default_host_range(net: &IpNet) -> (IpAddr, IpAddr) {
    (nth_addr(net, 1), prev_addr(last_addr(net)))
}

/// Gateway used by an endpoint: first host of the subnet, or the second one
/// when the first is taken by the endpoint itself.
pub fn endpoint_gateway(net: &IpNet, endpoint_ip: IpAddr) -> IpAddr {
    let first = nth_addr(net, 1);
    if first == endpoint_ip {
        nth_addr(net, 2)
    } else {
        first
    }
}

/// Netmask of an IPv4 subnet in dotted-quad form.
pub fn netmask(net: &IpNet) -> IpAddr {
    net.netmask()
}

/// Returns true for globally routable unicast addresses.
pub fn is_global_unicast(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(a) => {
            !(a.is_unspecified()
                || a.is_loopback()
                || a.is_link_local()
                || a.is_multicast()
                || a.is_broadcast())
        }
        IpAddr::V6(a) => {
            !(a.is_unspecified()
                || a.is_loopback()
                || a.is_multicast()
                || (a.segments()[0] & 0xffc0) == 0xfe80)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac() {
        let mac = parse_mac("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(mac, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(parse_mac("02-fe-00-00-00-01").unwrap()[1], 0xfe);
        assert!(parse_mac("aa:bb:cc:dd:ee").is_err());
        assert!(parse_mac("aa:bb:cc:dd:ee:fff").is_err());
        assert!(parse_mac("zz:bb:cc:dd:ee:ff").is_err());
    }

    #[test]
    fn test_mac_prefix() {
        let mac: MacAddr = "02:fe:12:34:56:78".parse().unwrap();
        assert!(mac.has_prefix(&[0x02, 0xfe]));
        assert!(!mac.has_prefix(&[0x02, 0x00]));
        assert_eq!(mac.to_string(), "02:fe:12:34:56:78");
    }

    #[test]
    fn test_mac_serde() {
        let mac: MacAddr = serde_json::from_str("\"02:00:00:00:00:0a\"").unwrap();
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"02:00:00:00:00:0a\"");
    }

    #[test]
    fn test_parse_subnet_masks_host_bits() {
        let net = parse_subnet("10.0.0.5/24").unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/24");
        assert!(parse_subnet("10.0.0.0").is_err());
    }

    #[test]
    fn test_host_range() {
        let net = parse_subnet("10.0.0.0/24").unwrap();
        let (from, to) = default_host_range(&net);
        assert_eq!(from, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(to, "10.0.0.254".parse::<IpAddr>().unwrap());
        assert_eq!(host_bits(&net), 8);
    }

    #[test]
    fn test_endpoint_gateway() {
        let net = parse_subnet("10.1.0.0/30").unwrap();
        assert_eq!(
            endpoint_gateway(&net, "10.1.0.2".parse().unwrap()),
            "10.1.0.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            endpoint_gateway(&net, "10.1.0.1".parse().unwrap()),
            "10.1.0.2".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_global_unicast() {
        assert!(is_global_unicast(&"192.168.1.10".parse().unwrap()));
        assert!(is_global_unicast(&"2001:db8::1".parse().unwrap()));
        assert!(!is_global_unicast(&"127.0.0.1".parse().unwrap()));
        assert!(!is_global_unicast(&"fe80::1".parse().unwrap()));
        assert!(!is_global_unicast(&"169.254.0.1".parse().unwrap()));
    }
}
