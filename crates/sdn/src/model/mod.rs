//! Declarative network model.
//!
//! The model is the JSON document accepted by `PUT /net-model.json`. It
//! describes the emulated topology around the device under test: physical
//! ports, bonds and bridges on the L2 side, routed networks on top of them,
//! and simulated remote endpoints. Missing fields take their zero value.

mod endpoint;
mod labeled;
mod network;
mod status;

pub use endpoint::*;
pub use labeled::*;
pub use network::*;
pub use status::*;

use serde::{Deserialize, Serialize};

/// MAC prefix reserved for the port connecting the emulator with its host.
pub const HOST_PORT_MAC_PREFIX: [u8; 2] = [0x02, 0xfe];

/// Logical label given to the host port.
pub const HOST_PORT_LABEL: &str = "host-port";

pub const MIN_MTU: u16 = 1280;
pub const MAX_MTU: u16 = 16110;
pub const DEFAULT_MTU: u16 = 1500;

/// Complete topology description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkModel {
    pub ports: Vec<Port>,
    pub bonds: Vec<Bond>,
    pub bridges: Vec<Bridge>,
    pub networks: Vec<Network>,
    pub endpoints: Endpoints,
    pub firewall: Firewall,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostConfig>,
}

/// Physical network port connecting the emulator with the device under test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Port {
    pub logical_label: String,
    /// MAC address of the port on the emulator side.
    pub mac: String,
    #[serde(rename = "adminUP")]
    pub admin_up: bool,
    pub eve_connect: EveConnect,
    pub traffic_control: TrafficControl,
}

/// The device-side end of a port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EveConnect {
    pub eve_instance: String,
    pub mac: String,
}

/// Traffic shaping and impairment applied to egress of a port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrafficControl {
    /// Delay in milliseconds.
    pub delay: u32,
    /// Delay jitter in milliseconds.
    pub delay_jitter: u32,
    /// Percentages (0-100).
    pub loss_probability: u8,
    pub corrupt_probability: u8,
    pub duplicate_probability: u8,
    pub reorder_probability: u8,
    /// Rate limit in kbit/s.
    pub rate_limit: u32,
    /// Queue limit in KB.
    pub queue_limit: u32,
    /// Burst limit in KB.
    pub burst_limit: u32,
}

impl TrafficControl {
    pub fn is_empty(&self) -> bool {
        *self == TrafficControl::default()
    }

    /// Any of the netem (delay/loss/corruption/duplication/reordering) fields set.
    pub fn has_netem(&self) -> bool {
        self.delay != 0
            || self.delay_jitter != 0
            || self.loss_probability != 0
            || self.corrupt_probability != 0
            || self.duplicate_probability != 0
            || self.reorder_probability != 0
    }

    pub fn has_rate_limit(&self) -> bool {
        self.rate_limit != 0
    }
}

/// Link aggregation of multiple ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bond {
    pub logical_label: String,
    pub ports: Vec<String>,
    pub mode: BondMode,
    pub lacp_rate: LacpRate,
    pub mii_monitor: MiiMonitor,
    pub arp_monitor: ArpMonitor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BondMode {
    #[default]
    #[serde(rename = "balance-rr", alias = "")]
    BalanceRr,
    #[serde(rename = "active-backup")]
    ActiveBackup,
    #[serde(rename = "balance-xor")]
    BalanceXor,
    #[serde(rename = "broadcast")]
    Broadcast,
    #[serde(rename = "802.3ad")]
    Ieee8023ad,
    #[serde(rename = "balance-tlb")]
    BalanceTlb,
    #[serde(rename = "balance-alb")]
    BalanceAlb,
}

impl BondMode {
    /// Mode name as understood by the kernel bonding driver.
    pub fn as_str(&self) -> &'static str {
        match self {
            BondMode::BalanceRr => "balance-rr",
            BondMode::ActiveBackup => "active-backup",
            BondMode::BalanceXor => "balance-xor",
            BondMode::Broadcast => "broadcast",
            BondMode::Ieee8023ad => "802.3ad",
            BondMode::BalanceTlb => "balance-tlb",
            BondMode::BalanceAlb => "balance-alb",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LacpRate {
    #[default]
    #[serde(rename = "slow", alias = "")]
    Slow,
    #[serde(rename = "fast")]
    Fast,
}

impl LacpRate {
    pub fn as_str(&self) -> &'static str {
        match self {
            LacpRate::Slow => "slow",
            LacpRate::Fast => "fast",
        }
    }
}

/// MII link monitoring. Intervals are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MiiMonitor {
    pub enabled: bool,
    pub interval: u32,
    pub up_delay: u32,
    pub down_delay: u32,
}

/// ARP link monitoring. Interval is in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArpMonitor {
    pub enabled: bool,
    pub interval: u32,
    pub ip_targets: Vec<String>,
}

/// L2 bridge joining ports and bonds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bridge {
    pub logical_label: String,
    pub ports: Vec<String>,
    pub bonds: Vec<String>,
    #[serde(rename = "withSTP")]
    pub with_stp: bool,
}

/// Firewall applied to traffic forwarded between networks, endpoints and the outside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Firewall {
    pub rules: Vec<FwRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FwRule {
    /// Empty means any.
    pub src_subnet: String,
    pub dst_subnet: String,
    pub protocol: FwProto,
    /// Only valid with TCP or UDP.
    pub ports: Vec<u16>,
    pub action: FwAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FwProto {
    #[default]
    #[serde(rename = "any", alias = "")]
    Any,
    #[serde(rename = "icmp")]
    Icmp,
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "udp")]
    Udp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FwAction {
    #[default]
    #[serde(rename = "allow", alias = "")]
    Allow,
    #[serde(rename = "reject")]
    Reject,
    #[serde(rename = "drop")]
    Drop,
}

/// Connectivity between the emulator and the host running it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// Host IPs reachable from inside the emulated networks (the controller
    /// address that `adam-ip` tokens resolve to).
    #[serde(rename = "hostIPs")]
    pub host_ips: Vec<String>,
    pub network_type: NetworkType,
    /// Port on which the controller listens.
    pub controller_port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    #[default]
    #[serde(rename = "ipv4-only", alias = "")]
    Ipv4Only,
    #[serde(rename = "ipv6-only")]
    Ipv6Only,
    #[serde(rename = "dual-stack")]
    DualStack,
}

impl NetworkModel {
    pub fn port(&self, label: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.logical_label == label)
    }

    pub fn bond(&self, label: &str) -> Option<&Bond> {
        self.bonds.iter().find(|b| b.logical_label == label)
    }

    pub fn bridge(&self, label: &str) -> Option<&Bridge> {
        self.bridges.iter().find(|b| b.logical_label == label)
    }

    pub fn network(&self, label: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.logical_label == label)
    }
}
