use async_trait::async_trait;

use super::{Configurator, Context, item_as};
use crate::Result;
use crate::items::{ConfigItem, IpRule, MAIN_NS, Route, RouteOutIf};
use crate::util::IpFamily;

fn family_flag(family: IpFamily) -> &'static str {
    match family {
        IpFamily::V4 => "-4",
        IpFamily::V6 => "-6",
    }
}

/// `ip route <op>` arguments. `out_if_name` resolves the output interface.
pub fn route_args(op: &str, route: &Route, out_if_name: Option<&str>) -> Vec<String> {
    let mut args = vec![family_flag(route.family()).to_string(), "route".into(), op.into()];
    if route.is_unreachable() {
        args.push("unreachable".into());
    }
    args.push(route.dst_net.to_string());
    if let Some(gw) = route.gw {
        args.extend(["via".to_string(), gw.to_string()]);
    }
    if let Some(dev) = out_if_name {
        args.extend(["dev".to_string(), dev.to_string()]);
    }
    args.extend([
        "table".to_string(),
        route.table.to_string(),
        "metric".to_string(),
        route.metric.to_string(),
    ]);
    args
}

pub struct RouteConfigurator {
    ctx: Context,
}

impl RouteConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn out_if_name(&self, route: &Route) -> Result<Option<String>> {
        match &route.out_if {
            None => Ok(None),
            Some(RouteOutIf::Veth { if_name, .. }) => Ok(Some(if_name.clone())),
            Some(RouteOutIf::PhysIf(phys_if)) => {
                Ok(Some(self.ctx.netif(&phys_if.mac)?.if_name))
            }
        }
    }
}

#[async_trait]
impl Configurator for RouteConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let route = item_as!(item, Route);
        let dev = self.out_if_name(route)?;
        let args = route_args("add", route, dev.as_deref());
        match self.ctx.runner.run(&route.net_namespace, "ip", args).await {
            Err(e) if e.is_already_exists() => {
                tracing::debug!(route = %route.name(), "route already exists");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let route = item_as!(item, Route);
        // Without the interface the kernel has removed the route already.
        let Ok(dev) = self.out_if_name(route) else {
            return Ok(());
        };
        let args = route_args("del", route, dev.as_deref());
        self.ctx
            .runner
            .run_ignore_missing(&route.net_namespace, "ip", args)
            .await
    }
}

/// `ip rule <op>` arguments.
pub fn ip_rule_args(op: &str, rule: &IpRule) -> Vec<String> {
    let mut args = vec![family_flag(rule.family()).to_string(), "rule".into(), op.into()];
    if let Some(src) = rule.src_net {
        args.extend(["from".to_string(), src.to_string()]);
    }
    if let Some(dst) = rule.dst_net {
        args.extend(["to".to_string(), dst.to_string()]);
    }
    args.extend([
        "table".to_string(),
        rule.table.to_string(),
        "priority".to_string(),
        rule.priority.to_string(),
    ]);
    args
}

pub struct IpRuleConfigurator {
    ctx: Context,
}

impl IpRuleConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Configurator for IpRuleConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let rule = item_as!(item, IpRule);
        match self
            .ctx
            .runner
            .run(MAIN_NS, "ip", ip_rule_args("add", rule))
            .await
        {
            Err(e) if e.is_already_exists() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let rule = item_as!(item, IpRule);
        self.ctx
            .runner
            .run_ignore_missing(MAIN_NS, "ip", ip_rule_args("del", rule))
            .await
    }
}
