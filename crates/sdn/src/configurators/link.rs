use std::path::Path;

use async_trait::async_trait;
use nlink::netlink::bridge_vlan::BridgeVlanBuilder;
use nlink::netlink::link::{BridgeLink, VethLink};
use nlink::netlink::namespace;

use super::conf::resolv_conf;
use super::{Configurator, Context, item_as};
use crate::items::{Bond, ConfigItem, MAIN_NS, NetNamespace, VethPeer};
use crate::model::DEFAULT_MTU;
use crate::os::{self, NETNS_ETC_DIR};
use crate::{Error, Result};

/// Ignore an "already exists" failure.
fn ignore_exists(res: Result<()>, what: &str) -> Result<()> {
    match res {
        Err(e) if e.is_already_exists() => {
            tracing::debug!(what, "already exists");
            Ok(())
        }
        other => other,
    }
}

/// Admin state and MTU of a physical interface.
pub struct IfHandleConfigurator {
    ctx: Context,
}

impl IfHandleConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn apply(&self, item: &ConfigItem) -> Result<()> {
        let handle = item_as!(item, IfHandle);
        let netif = self.ctx.netif(&handle.mac)?;
        let conn = os::connection(MAIN_NS)?;
        if handle.mtu > 0 {
            conn.set_link_mtu_by_index(netif.if_index, u32::from(handle.mtu))
                .await?;
        }
        if handle.admin_up {
            conn.set_link_up_by_index(netif.if_index).await?;
        } else {
            conn.set_link_down_by_index(netif.if_index).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Configurator for IfHandleConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        self.apply(item).await
    }

    async fn modify(&self, _old: &ConfigItem, new: &ConfigItem) -> Result<()> {
        self.apply(new).await
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let handle = item_as!(item, IfHandle);
        // The interface may be gone already.
        let Ok(netif) = self.ctx.netif(&handle.mac) else {
            return Ok(());
        };
        let conn = os::connection(MAIN_NS)?;
        conn.set_link_down_by_index(netif.if_index).await?;
        Ok(())
    }

    fn needs_recreate(&self, old: &ConfigItem, new: &ConfigItem) -> bool {
        match (old, new) {
            (ConfigItem::IfHandle(old), ConfigItem::IfHandle(new)) => {
                old.usage != new.usage || old.master_label != new.master_label
            }
            _ => true,
        }
    }
}

pub struct NetNamespaceConfigurator {
    ctx: Context,
}

impl NetNamespaceConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn write_resolv_conf(&self, ns: &NetNamespace) -> Result<()> {
        let dir = Path::new(NETNS_ETC_DIR).join(&ns.ns_name);
        let path = dir.join("resolv.conf");
        match &ns.resolv_conf {
            Some(conf) => os::write_file(&path, resolv_conf(conf)).await,
            None => {
                os::remove_files([path.as_path()]).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Configurator for NetNamespaceConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let ns = item_as!(item, NetNamespace);
        if ns.ns_name == MAIN_NS {
            return Ok(());
        }
        let res = self
            .ctx
            .runner
            .run(MAIN_NS, "ip", ["netns", "add", ns.ns_name.as_str()])
            .await
            .map(|_| ());
        ignore_exists(res, &ns.ns_name)?;
        self.ctx
            .runner
            .run(&ns.ns_name, "ip", ["link", "set", "lo", "up"])
            .await?;
        if ns.resolv_conf.is_some() {
            self.write_resolv_conf(ns).await?;
        }
        Ok(())
    }

    async fn modify(&self, _old: &ConfigItem, new: &ConfigItem) -> Result<()> {
        let ns = item_as!(new, NetNamespace);
        self.write_resolv_conf(ns).await
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let ns = item_as!(item, NetNamespace);
        if ns.ns_name == MAIN_NS {
            return Ok(());
        }
        self.ctx
            .runner
            .run_ignore_missing(MAIN_NS, "ip", ["netns", "del", ns.ns_name.as_str()])
            .await?;
        let dir = Path::new(NETNS_ETC_DIR).join(&ns.ns_name);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove netns config dir");
        }
        Ok(())
    }

    fn needs_recreate(&self, _old: &ConfigItem, _new: &ConfigItem) -> bool {
        false
    }
}

pub struct VethConfigurator;

impl VethConfigurator {
    /// Configure one side of the pair, already moved into its namespace.
    async fn configure_peer(&self, peer: &VethPeer, mtu: u16) -> Result<()> {
        let conn = os::connection(&peer.net_namespace)?;
        let link = conn
            .get_link_by_name(&peer.if_name)
            .await?
            .ok_or_else(|| Error::InterfaceNotFound(peer.if_name.clone()))?;
        let index = link.ifindex();

        if let Some(master) = &peer.master_bridge {
            conn.set_link_master(&peer.if_name, &master.if_name).await?;
            if master.vlan_id != 0 {
                conn.add_bridge_vlan(
                    BridgeVlanBuilder::new(master.vlan_id)
                        .dev(&peer.if_name)
                        .pvid()
                        .untagged(),
                )
                .await?;
            }
        }
        conn.set_link_up_by_index(index).await?;
        for addr in &peer.ip_addresses {
            let res = conn
                .add_address_by_index(index, addr.addr(), addr.prefix_len())
                .await
                .map_err(Error::from);
            ignore_exists(res, &addr.to_string())?;
        }
        conn.set_link_mtu_by_index(index, u32::from(mtu)).await?;
        Ok(())
    }
}

#[async_trait]
impl Configurator for VethConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let veth = item_as!(item, Veth);
        let mtu = if veth.mtu == 0 { DEFAULT_MTU } else { veth.mtu };
        let conn = os::connection(MAIN_NS)?;
        conn.add_link(
            VethLink::new(&veth.peer1.if_name, &veth.peer2.if_name).mtu(u32::from(mtu)),
        )
        .await?;

        for peer in veth.peers() {
            if peer.net_namespace != MAIN_NS {
                let ns_fd = namespace::open(&peer.net_namespace)?;
                conn.set_link_netns_fd(&peer.if_name, ns_fd.as_raw_fd())
                    .await?;
            }
            self.configure_peer(peer, mtu).await?;
        }
        tracing::debug!(veth = %veth.veth_name, "veth created");
        Ok(())
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let veth = item_as!(item, Veth);
        // Removing one side removes the pair.
        let conn = os::connection(&veth.peer1.net_namespace)?;
        match conn.del_link(&veth.peer1.if_name).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => Ok(other?),
        }
    }
}

pub struct BridgeConfigurator {
    ctx: Context,
}

impl BridgeConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn add_port(&self, bridge: &str, port: &str, vlans: &[u16]) -> Result<()> {
        let conn = os::connection(MAIN_NS)?;
        conn.set_link_master(port, bridge).await?;
        for vid in vlans {
            conn.add_bridge_vlan_tagged(port, *vid).await?;
        }
        Ok(())
    }

    /// Interface names of the bridged physical ports.
    fn port_names(&self, bridge: &crate::items::Bridge) -> Result<Vec<String>> {
        bridge
            .ports
            .iter()
            .map(|port| self.ctx.netif(&port.mac).map(|netif| netif.if_name))
            .collect()
    }
}

#[async_trait]
impl Configurator for BridgeConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let bridge = item_as!(item, Bridge);
        let conn = os::connection(MAIN_NS)?;
        conn.add_link(
            BridgeLink::new(&bridge.if_name)
                .stp(bridge.with_stp)
                .vlan_filtering(!bridge.vlans.is_empty()),
        )
        .await?;

        let mut members = self.port_names(bridge)?;
        members.extend(bridge.bonds.iter().cloned());
        for member in &members {
            self.add_port(&bridge.if_name, member, &bridge.vlans).await?;
        }
        // Set after the members, which otherwise lower it to their own MTU.
        conn.set_link_mtu(&bridge.if_name, u32::from(bridge.mtu)).await?;
        conn.set_link_up(&bridge.if_name).await?;
        Ok(())
    }

    async fn modify(&self, old: &ConfigItem, new: &ConfigItem) -> Result<()> {
        let old = item_as!(old, Bridge);
        let new = item_as!(new, Bridge);
        let conn = os::connection(MAIN_NS)?;

        let mut old_members = self.port_names(old).unwrap_or_default();
        old_members.extend(old.bonds.iter().cloned());
        let mut new_members = self.port_names(new)?;
        new_members.extend(new.bonds.iter().cloned());

        for member in old_members.iter().filter(|m| !new_members.contains(m)) {
            match conn.set_link_nomaster(member).await {
                Err(e) if e.is_not_found() => {}
                other => other?,
            }
        }
        for member in &new_members {
            if old_members.contains(member) {
                for vid in old.vlans.iter().filter(|v| !new.vlans.contains(v)) {
                    conn.del_bridge_vlan(member, *vid).await?;
                }
                for vid in new.vlans.iter().filter(|v| !old.vlans.contains(v)) {
                    conn.add_bridge_vlan_tagged(member, *vid).await?;
                }
            } else {
                self.add_port(&new.if_name, member, &new.vlans).await?;
            }
        }
        if old.mtu != new.mtu || new_members.iter().any(|m| !old_members.contains(m)) {
            conn.set_link_mtu(&new.if_name, u32::from(new.mtu)).await?;
        }
        Ok(())
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let bridge = item_as!(item, Bridge);
        let conn = os::connection(MAIN_NS)?;
        match conn.del_link(&bridge.if_name).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => Ok(other?),
        }
    }

    fn needs_recreate(&self, old: &ConfigItem, new: &ConfigItem) -> bool {
        match (old, new) {
            (ConfigItem::Bridge(old), ConfigItem::Bridge(new)) => {
                old.with_stp != new.with_stp
                    || old.vlans.is_empty() != new.vlans.is_empty()
            }
            _ => true,
        }
    }
}

/// `ip link add` arguments creating the bond.
pub fn bond_create_args(bond: &Bond) -> Vec<String> {
    let mut args: Vec<String> = ["link", "add", bond.if_name.as_str(), "type", "bond", "mode"]
        .into_iter()
        .map(String::from)
        .collect();
    args.push(bond.mode.as_str().to_string());
    if bond.mode == crate::model::BondMode::Ieee8023ad {
        args.push("lacp_rate".into());
        args.push(bond.lacp_rate.as_str().to_string());
    }
    if bond.mii_monitor.enabled {
        let mii = &bond.mii_monitor;
        args.extend([
            "miimon".to_string(),
            mii.interval.to_string(),
            "updelay".to_string(),
            mii.up_delay.to_string(),
            "downdelay".to_string(),
            mii.down_delay.to_string(),
        ]);
    }
    if bond.arp_monitor.enabled {
        let arp = &bond.arp_monitor;
        args.extend(["arp_interval".to_string(), arp.interval.to_string()]);
        if !arp.ip_targets.is_empty() {
            args.extend(["arp_ip_target".to_string(), arp.ip_targets.join(",")]);
        }
    }
    args
}

pub struct BondConfigurator {
    ctx: Context,
}

impl BondConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// A slave must be down while it is enslaved.
    async fn enslave(&self, bond: &str, slave: &str) -> Result<()> {
        let conn = os::connection(MAIN_NS)?;
        conn.set_link_down(slave).await?;
        conn.set_link_master(slave, bond).await?;
        conn.set_link_up(slave).await?;
        Ok(())
    }

    fn slave_names(&self, bond: &Bond) -> Result<Vec<String>> {
        bond.aggregated_ports
            .iter()
            .map(|port| self.ctx.netif(&port.mac).map(|netif| netif.if_name))
            .collect()
    }
}

#[async_trait]
impl Configurator for BondConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let bond = item_as!(item, Bond);
        self.ctx
            .runner
            .run(MAIN_NS, "ip", bond_create_args(bond))
            .await?;
        for slave in self.slave_names(bond)? {
            self.enslave(&bond.if_name, &slave).await?;
        }
        let conn = os::connection(MAIN_NS)?;
        if bond.mtu > 0 {
            conn.set_link_mtu(&bond.if_name, u32::from(bond.mtu)).await?;
        }
        conn.set_link_up(&bond.if_name).await?;
        Ok(())
    }

    async fn modify(&self, old: &ConfigItem, new: &ConfigItem) -> Result<()> {
        let old = item_as!(old, Bond);
        let new = item_as!(new, Bond);
        let conn = os::connection(MAIN_NS)?;
        let old_slaves = self.slave_names(old).unwrap_or_default();
        let new_slaves = self.slave_names(new)?;
        for slave in old_slaves.iter().filter(|s| !new_slaves.contains(s)) {
            conn.set_link_nomaster(slave).await?;
        }
        for slave in new_slaves.iter().filter(|s| !old_slaves.contains(s)) {
            self.enslave(&new.if_name, slave).await?;
        }
        if new.mtu > 0 && new.mtu != old.mtu {
            conn.set_link_mtu(&new.if_name, u32::from(new.mtu)).await?;
        }
        Ok(())
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let bond = item_as!(item, Bond);
        let conn = os::connection(MAIN_NS)?;
        match conn.del_link(&bond.if_name).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => Ok(other?),
        }
    }

    fn needs_recreate(&self, old: &ConfigItem, new: &ConfigItem) -> bool {
        match (old, new) {
            (ConfigItem::Bond(old), ConfigItem::Bond(new)) => !old.same_attrs(new),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurators::tests::recording_context;
    use crate::items::{IfHandle, IfUsage, ResolvConf};
    use crate::model::{ArpMonitor, BondMode, LacpRate, MiiMonitor};

    fn bond(mode: BondMode) -> Bond {
        Bond {
            if_name: "bond-bond0".into(),
            logical_label: "bond0".into(),
            aggregated_ports: vec![],
            mode,
            lacp_rate: LacpRate::Fast,
            mii_monitor: MiiMonitor::default(),
            arp_monitor: ArpMonitor::default(),
            mtu: 0,
        }
    }

    #[test]
    fn test_bond_create_args() {
        let mut b = bond(BondMode::Ieee8023ad);
        b.mii_monitor = MiiMonitor {
            enabled: true,
            interval: 100,
            up_delay: 200,
            down_delay: 300,
        };
        assert_eq!(
            bond_create_args(&b).join(" "),
            "link add bond-bond0 type bond mode 802.3ad lacp_rate fast \
             miimon 100 updelay 200 downdelay 300"
        );

        let mut b = bond(BondMode::ActiveBackup);
        b.arp_monitor = ArpMonitor {
            enabled: true,
            interval: 1000,
            ip_targets: vec!["10.0.0.1".into(), "10.0.0.2".into()],
        };
        assert_eq!(
            bond_create_args(&b).join(" "),
            "link add bond-bond0 type bond mode active-backup \
             arp_interval 1000 arp_ip_target 10.0.0.1,10.0.0.2"
        );
    }

    #[test]
    fn test_bond_needs_recreate() {
        let c = BondConfigurator::new(recording_context());
        let old = ConfigItem::Bond(bond(BondMode::BalanceRr));
        let mut changed = bond(BondMode::BalanceRr);
        changed.mtu = 9000;
        assert!(!c.needs_recreate(&old, &ConfigItem::Bond(changed)));
        assert!(c.needs_recreate(&old, &ConfigItem::Bond(bond(BondMode::BalanceXor))));
    }

    #[test]
    fn test_if_handle_needs_recreate() {
        let c = IfHandleConfigurator::new(recording_context());
        let handle = IfHandle {
            mac: "02:00:00:00:00:01".parse().unwrap(),
            logical_label: "eveport0".into(),
            usage: IfUsage::Bridged,
            master_label: "bridge0".into(),
            admin_up: true,
            mtu: 1500,
        };
        let mut mtu_changed = handle.clone();
        mtu_changed.mtu = 9000;
        let mut usage_changed = handle.clone();
        usage_changed.usage = IfUsage::L3;
        usage_changed.master_label.clear();

        let old = ConfigItem::IfHandle(handle);
        assert!(!c.needs_recreate(&old, &ConfigItem::IfHandle(mtu_changed)));
        assert!(c.needs_recreate(&old, &ConfigItem::IfHandle(usage_changed)));
    }

    #[tokio::test]
    async fn test_netns_commands() {
        let ctx = recording_context();
        let c = NetNamespaceConfigurator::new(ctx.clone());
        let item = ConfigItem::NetNamespace(NetNamespace {
            ns_name: "endpoint-client".into(),
            resolv_conf: None,
        });
        c.create(&item).await.unwrap();
        c.delete(&item).await.unwrap();
        assert_eq!(
            ctx.runner.recorded(),
            [
                "ip netns add endpoint-client",
                "ip netns exec endpoint-client ip link set lo up",
                "ip netns del endpoint-client",
            ]
        );

        let main = ConfigItem::NetNamespace(NetNamespace {
            ns_name: MAIN_NS.into(),
            resolv_conf: Some(ResolvConf::default()),
        });
        c.create(&main).await.unwrap();
        assert_eq!(ctx.runner.recorded().len(), 3);
        assert!(!c.needs_recreate(&item, &main));
    }
}
