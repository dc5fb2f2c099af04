use async_trait::async_trait;

use super::{Configurator, Context, item_as};
use crate::Result;
use crate::items::{ConfigItem, IptablesChain};

fn binary(chain: &IptablesChain) -> &'static str {
    if chain.for_ipv6 { "ip6tables" } else { "iptables" }
}

/// `-w` waits for the xtables lock held by concurrent invocations.
fn table_args(chain: &IptablesChain, op: &str) -> Vec<String> {
    vec![
        "-w".to_string(),
        "-t".to_string(),
        chain.table.clone(),
        op.to_string(),
        chain.chain_name.clone(),
    ]
}

/// Argument vectors that install the chain and its rules.
pub fn chain_create_commands(chain: &IptablesChain) -> Vec<Vec<String>> {
    let mut cmds = Vec::new();
    if !chain.is_builtin() {
        cmds.push(table_args(chain, "-N"));
    }
    for rule in &chain.rules {
        let mut args = table_args(chain, "-A");
        args.extend(rule.args.iter().cloned());
        cmds.push(args);
    }
    cmds
}

/// Argument vectors that remove what [`chain_create_commands`] installed.
///
/// Rules appended to a built-in chain are deleted one by one in reverse order;
/// a custom chain is flushed and removed.
pub fn chain_delete_commands(chain: &IptablesChain) -> Vec<Vec<String>> {
    if chain.is_builtin() {
        chain
            .rules
            .iter()
            .rev()
            .map(|rule| {
                let mut args = table_args(chain, "-D");
                args.extend(rule.args.iter().cloned());
                args
            })
            .collect()
    } else {
        vec![table_args(chain, "-F"), table_args(chain, "-X")]
    }
}

/// iptables and ip6tables chains.
pub struct IptablesConfigurator {
    ctx: Context,
}

impl IptablesConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn install(&self, chain: &IptablesChain) -> Result<()> {
        for args in chain_create_commands(chain) {
            self.ctx
                .runner
                .run(&chain.net_namespace, binary(chain), args)
                .await?;
        }
        Ok(())
    }

    async fn remove(&self, chain: &IptablesChain) -> Result<()> {
        for args in chain_delete_commands(chain) {
            self.ctx
                .runner
                .run_ignore_missing(&chain.net_namespace, binary(chain), args)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Configurator for IptablesConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let chain = item_as!(item, IptablesChain);
        tracing::debug!(chain = %chain.name(), rules = chain.rules.len(), "installing chain");
        self.install(chain).await
    }

    async fn modify(&self, old: &ConfigItem, new: &ConfigItem) -> Result<()> {
        let old = item_as!(old, IptablesChain);
        let new = item_as!(new, IptablesChain);
        self.remove(old).await?;
        self.install(new).await
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let chain = item_as!(item, IptablesChain);
        self.remove(chain).await
    }

    fn needs_recreate(&self, _old: &ConfigItem, _new: &ConfigItem) -> bool {
        false
    }
}
