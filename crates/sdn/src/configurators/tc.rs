use async_trait::async_trait;

use super::{Configurator, Context, item_as};
use crate::Result;
use crate::items::{ConfigItem, MAIN_NS};
use crate::model::TrafficControl;

fn tbf_args(tc: &TrafficControl) -> Vec<String> {
    let mut args = vec!["tbf".to_string()];
    if tc.rate_limit != 0 {
        args.extend(["rate".to_string(), format!("{}kbit", tc.rate_limit)]);
    }
    if tc.burst_limit != 0 {
        args.extend(["burst".to_string(), format!("{}kb", tc.burst_limit)]);
    }
    if tc.queue_limit != 0 {
        args.extend(["limit".to_string(), format!("{}kb", tc.queue_limit)]);
    }
    args
}

fn netem_args(tc: &TrafficControl) -> Vec<String> {
    let mut args = vec!["netem".to_string()];
    if tc.delay != 0 {
        args.extend(["delay".to_string(), format!("{}ms", tc.delay)]);
        if tc.delay_jitter != 0 {
            args.push(format!("{}ms", tc.delay_jitter));
        }
    }
    if tc.loss_probability != 0 {
        args.extend([
            "loss".to_string(),
            "random".to_string(),
            format!("{}%", tc.loss_probability),
        ]);
    }
    if tc.corrupt_probability != 0 {
        args.extend(["corrupt".to_string(), format!("{}%", tc.corrupt_probability)]);
    }
    if tc.duplicate_probability != 0 {
        args.extend(["duplicate".to_string(), format!("{}%", tc.duplicate_probability)]);
    }
    if tc.reorder_probability != 0 {
        args.extend(["reorder".to_string(), format!("{}%", tc.reorder_probability)]);
    }
    args
}

fn qdisc_add(dev: &str, position: &[&str], qdisc: Vec<String>) -> Vec<String> {
    let mut args: Vec<String> = ["qdisc", "add", "dev", dev]
        .into_iter()
        .chain(position.iter().copied())
        .map(String::from)
        .collect();
    args.extend(qdisc);
    args
}

/// `tc` argument vectors shaping egress of `dev`.
///
/// A rate limit alone installs tbf, impairments alone install netem, and both
/// chain netem below tbf.
pub fn tc_qdisc_commands(dev: &str, tc: &TrafficControl) -> Vec<Vec<String>> {
    match (tc.has_rate_limit(), tc.has_netem()) {
        (false, false) => Vec::new(),
        (true, false) => vec![qdisc_add(dev, &["root"], tbf_args(tc))],
        (false, true) => vec![qdisc_add(dev, &["root"], netem_args(tc))],
        (true, true) => vec![
            qdisc_add(dev, &["root", "handle", "1:"], tbf_args(tc)),
            qdisc_add(dev, &["parent", "1:1", "handle", "2:"], netem_args(tc)),
        ],
    }
}

pub struct TrafficControlConfigurator {
    ctx: Context,
}

impl TrafficControlConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Configurator for TrafficControlConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let tc = item_as!(item, TrafficControl);
        let netif = self.ctx.netif(&tc.phys_if.mac)?;
        for args in tc_qdisc_commands(&netif.if_name, &tc.config) {
            self.ctx.runner.run(MAIN_NS, "tc", args).await?;
        }
        Ok(())
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let tc = item_as!(item, TrafficControl);
        let Ok(netif) = self.ctx.netif(&tc.phys_if.mac) else {
            return Ok(());
        };
        self.ctx
            .runner
            .run_ignore_missing(
                MAIN_NS,
                "tc",
                ["qdisc", "del", "dev", netif.if_name.as_str(), "root"],
            )
            .await
    }
}
