use async_trait::async_trait;

use super::{Configurator, Context, item_as};
use crate::Result;
use crate::items::{ConfigItem, MAIN_NS, Sysctl};

/// Keys that only exist once br_netfilter is loaded.
const BRIDGE_NF_KEYS: [&str; 2] = [
    "net.bridge.bridge-nf-call-iptables",
    "net.bridge.bridge-nf-call-ip6tables",
];

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

/// `key=value` settings applied for the item.
pub fn sysctl_settings(sysctl: &Sysctl) -> Vec<String> {
    let mut settings = vec![
        format!("net.ipv4.ip_forward={}", flag(sysctl.enable_ipv4_fwd)),
        format!("net.ipv6.conf.all.forwarding={}", flag(sysctl.enable_ipv6_fwd)),
    ];
    if sysctl.net_namespace == MAIN_NS {
        settings.push(format!(
            "{}={}",
            BRIDGE_NF_KEYS[0],
            flag(sysctl.bridge_nf_call_iptables)
        ));
        settings.push(format!(
            "{}={}",
            BRIDGE_NF_KEYS[1],
            flag(sysctl.bridge_nf_call_ip6tables)
        ));
    }
    settings
}

pub struct SysctlConfigurator {
    ctx: Context,
}

impl SysctlConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn apply(&self, sysctl: &Sysctl) -> Result<()> {
        for setting in sysctl_settings(sysctl) {
            let res = self
                .ctx
                .runner
                .run(&sysctl.net_namespace, "sysctl", ["-w", setting.as_str()])
                .await;
            match res {
                Ok(_) => {}
                Err(e) if BRIDGE_NF_KEYS.iter().any(|key| setting.starts_with(key)) => {
                    tracing::debug!(%setting, error = %e, "br_netfilter not available");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Configurator for SysctlConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let sysctl = item_as!(item, Sysctl);
        self.apply(sysctl).await
    }

    async fn modify(&self, _old: &ConfigItem, new: &ConfigItem) -> Result<()> {
        let sysctl = item_as!(new, Sysctl);
        self.apply(sysctl).await
    }

    /// Restores the kernel defaults.
    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let sysctl = item_as!(item, Sysctl);
        let defaults = Sysctl {
            net_namespace: sysctl.net_namespace.clone(),
            enable_ipv4_fwd: false,
            enable_ipv6_fwd: false,
            bridge_nf_call_iptables: true,
            bridge_nf_call_ip6tables: true,
        };
        self.apply(&defaults).await
    }

    fn needs_recreate(&self, _old: &ConfigItem, _new: &ConfigItem) -> bool {
        false
    }
}
