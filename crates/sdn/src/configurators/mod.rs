//! Configurators: one per item type, applying items to the host.
//!
//! A configurator knows how to create, modify and delete the items of one
//! [`ItemType`]. Links, addresses and bridge VLANs go through netlink; routes,
//! rules, firewall chains, qdiscs and sysctls go through the usual command
//! line tools run by a [`CommandRunner`]; daemons are [`SupervisedProcess`]es.
//!
//! [`SupervisedProcess`]: crate::process::SupervisedProcess

pub mod conf;
mod daemons;
mod iptables;
mod link;
mod route;
mod sysctl;
mod tc;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use daemons::{
    DhcpClientConfigurator, DhcpServerConfigurator, DnsServerConfigurator,
    HttpProxyConfigurator, HttpServerConfigurator, RadvdConfigurator,
};
pub use iptables::{IptablesConfigurator, chain_create_commands, chain_delete_commands};
pub use link::{
    BondConfigurator, BridgeConfigurator, IfHandleConfigurator, NetNamespaceConfigurator,
    VethConfigurator, bond_create_args,
};
pub use route::{IpRuleConfigurator, RouteConfigurator, ip_rule_args, route_args};
pub use sysctl::{SysctlConfigurator, sysctl_settings};
pub use tc::{TrafficControlConfigurator, tc_qdisc_commands};

use crate::items::{ConfigItem, ItemType};
use crate::observe::{InterfaceLookup, NetIf};
use crate::os::CommandRunner;
use crate::util::MacAddr;
use crate::{Error, Result};

/// Unwrap the item variant a configurator handles.
macro_rules! item_as {
    ($item:expr, $variant:ident) => {
        match $item {
            $crate::items::ConfigItem::$variant(inner) => inner,
            other => {
                return Err($crate::Error::UnexpectedItem {
                    expected: $crate::items::ItemType::$variant.as_str(),
                    got: other.item_type().as_str(),
                })
            }
        }
    };
}
pub(crate) use item_as;

/// Applies items of one type.
#[async_trait]
pub trait Configurator: Send + Sync {
    async fn create(&self, item: &ConfigItem) -> Result<()>;

    async fn modify(&self, _old: &ConfigItem, _new: &ConfigItem) -> Result<()> {
        Err(Error::NotImplemented("modify"))
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()>;

    /// Whether changing `old` into `new` requires delete + create.
    fn needs_recreate(&self, _old: &ConfigItem, _new: &ConfigItem) -> bool {
        true
    }
}

/// Shared by all configurators.
#[derive(Clone)]
pub struct Context {
    pub lookup: Arc<dyn InterfaceLookup>,
    pub runner: CommandRunner,
}

impl Context {
    pub fn new(lookup: Arc<dyn InterfaceLookup>, runner: CommandRunner) -> Self {
        Self { lookup, runner }
    }

    /// Interface with the given MAC in the main namespace.
    pub(crate) fn netif(&self, mac: &MacAddr) -> Result<NetIf> {
        self.lookup
            .get_interface_by_mac(&mac.octets(), false)
            .ok_or_else(|| Error::InterfaceNotFound(mac.to_string()))
    }
}

/// Configurators by item type.
#[derive(Default)]
pub struct ConfiguratorRegistry {
    configurators: BTreeMap<ItemType, Box<dyn Configurator>>,
}

impl ConfiguratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a configurator for every item type.
    pub fn with_defaults(ctx: Context) -> Self {
        let mut registry = Self::new();
        registry.register(ItemType::PhysIf, Box::new(PhysIfConfigurator));
        registry.register(ItemType::IfHandle, Box::new(IfHandleConfigurator::new(ctx.clone())));
        registry.register(
            ItemType::NetNamespace,
            Box::new(NetNamespaceConfigurator::new(ctx.clone())),
        );
        registry.register(ItemType::Veth, Box::new(VethConfigurator));
        registry.register(ItemType::Bond, Box::new(BondConfigurator::new(ctx.clone())));
        registry.register(ItemType::Bridge, Box::new(BridgeConfigurator::new(ctx.clone())));
        registry.register(ItemType::Sysctl, Box::new(SysctlConfigurator::new(ctx.clone())));
        registry.register(ItemType::Route, Box::new(RouteConfigurator::new(ctx.clone())));
        registry.register(ItemType::IpRule, Box::new(IpRuleConfigurator::new(ctx.clone())));
        registry.register(
            ItemType::IptablesChain,
            Box::new(IptablesConfigurator::new(ctx.clone())),
        );
        registry.register(
            ItemType::Ip6tablesChain,
            Box::new(IptablesConfigurator::new(ctx.clone())),
        );
        registry.register(
            ItemType::TrafficControl,
            Box::new(TrafficControlConfigurator::new(ctx.clone())),
        );
        registry.register(ItemType::DhcpServer, Box::new(DhcpServerConfigurator));
        registry.register(ItemType::DnsServer, Box::new(DnsServerConfigurator));
        registry.register(ItemType::Radvd, Box::new(RadvdConfigurator));
        registry.register(ItemType::HttpProxy, Box::new(HttpProxyConfigurator));
        registry.register(ItemType::HttpServer, Box::new(HttpServerConfigurator));
        registry.register(ItemType::DhcpClient, Box::new(DhcpClientConfigurator::new(ctx)));
        registry
    }

    pub fn register(&mut self, item_type: ItemType, configurator: Box<dyn Configurator>) {
        self.configurators.insert(item_type, configurator);
    }

    pub fn get(&self, item_type: ItemType) -> Option<&dyn Configurator> {
        self.configurators.get(&item_type).map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.configurators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurators.is_empty()
    }
}

/// Physical interfaces are observed, never created.
struct PhysIfConfigurator;

#[async_trait]
impl Configurator for PhysIfConfigurator {
    async fn create(&self, _item: &ConfigItem) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _item: &ConfigItem) -> Result<()> {
        Ok(())
    }
}
