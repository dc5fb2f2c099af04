//! The agent: model storage, state refresh and reconciliation.
//!
//! All operations serialize on one async mutex. Applying a model and the
//! periodic refresh both end with a reconcile pass against the host.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::Result;
use crate::compile::{CONFIG_GRAPH, compile, compile_host_connectivity};
use crate::configurators::{ConfiguratorRegistry, Context};
use crate::depgraph::Graph;
use crate::model::{ConfigError, NetworkModel, SdnStatus};
use crate::observe::{HostInterfaces, NetlinkInterfaceLookup, host_port, observe_current_state};
use crate::os::CommandRunner;
use crate::parse::{ParsedModel, parse};
use crate::reconcile::{ItemState, ReconcileStatus, Reconciler, State};

struct AgentState {
    model: NetworkModel,
    parsed: Option<ParsedModel>,
    current: State,
    intended: Graph,
    registry: ConfiguratorRegistry,
}

impl AgentState {
    async fn reconcile(&mut self) -> ReconcileStatus {
        let AgentState {
            current,
            intended,
            registry,
            ..
        } = self;
        Reconciler::new(registry).reconcile(current, intended).await
    }

    fn config_errors(&self) -> Vec<ConfigError> {
        self.current
            .iter()
            .filter_map(|(item_ref, entry)| match &entry.state {
                ItemState::Failed(err) => Some(ConfigError {
                    item_ref: item_ref.to_string(),
                    err_msg: err.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Shared handle on the agent.
pub struct Agent<L> {
    state: Arc<Mutex<AgentState>>,
    lookup: Arc<L>,
}

impl<L> Clone for Agent<L> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            lookup: Arc::clone(&self.lookup),
        }
    }
}

impl Agent<NetlinkInterfaceLookup> {
    /// Agent observing the host through netlink and applying items with the
    /// default configurators.
    pub fn netlink() -> Self {
        let lookup = Arc::new(NetlinkInterfaceLookup::new());
        let ctx = Context::new(lookup.clone(), CommandRunner::new());
        Self::new(lookup, ConfiguratorRegistry::with_defaults(ctx))
    }
}

impl<L: HostInterfaces + 'static> Agent<L> {
    pub fn new(lookup: Arc<L>, registry: ConfiguratorRegistry) -> Self {
        let state = AgentState {
            model: NetworkModel::default(),
            parsed: None,
            current: State::new(),
            intended: Graph::new(CONFIG_GRAPH),
            registry,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            lookup,
        }
    }

    /// Intended state of a parsed model, or of the host connectivity alone
    /// before any model was applied.
    fn intended_graph(&self, parsed: Option<&ParsedModel>) -> Result<Graph> {
        let lookup = self.lookup.as_ref();
        let Some(parsed) = parsed else {
            let mut graph = compile_host_connectivity(lookup);
            graph.put_subgraph(observe_current_state(&NetworkModel::default(), lookup));
            return Ok(graph);
        };
        let mut graph = compile(parsed, lookup)?;
        // Only interfaces that exist can satisfy dependencies.
        graph.put_subgraph(observe_current_state(parsed.model(), lookup));
        Ok(graph)
    }

    /// Bring up connectivity with the host before the first model arrives.
    ///
    /// The stored model stays empty and is not validated. A compile error
    /// leaves the host untouched and is returned to the caller.
    pub async fn bootstrap(&self) -> Result<ReconcileStatus> {
        let mut state = self.state.lock().await;
        if let Err(e) = self.lookup.refresh().await {
            tracing::warn!(error = %e, "failed to refresh interfaces");
        }
        let intended = self.intended_graph(state.parsed.as_ref())?;
        tracing::info!(items = intended.len(), "configuring host connectivity");
        state.intended = intended;
        Ok(state.reconcile().await)
    }

    /// Validate and apply a new network model.
    ///
    /// An invalid model is rejected without touching the stored model or the
    /// host. Failures to apply individual items are not errors here; they
    /// show up in [`status`](Self::status).
    pub async fn apply_model(&self, model: NetworkModel) -> Result<ReconcileStatus> {
        let parsed = parse(model.clone())?;
        let mut state = self.state.lock().await;
        if let Err(e) = self.lookup.refresh().await {
            tracing::warn!(error = %e, "failed to refresh interfaces");
        }
        let intended = self.intended_graph(Some(&parsed))?;
        tracing::info!(items = intended.len(), "applying network model");

        state.model = model;
        state.parsed = Some(parsed);
        state.intended = intended;
        Ok(state.reconcile().await)
    }

    pub async fn net_model(&self) -> NetworkModel {
        self.state.lock().await.model.clone()
    }

    /// Intended configuration in the Graphviz DOT language.
    pub async fn net_config_dot(&self) -> String {
        self.state.lock().await.intended.to_dot()
    }

    pub async fn status(&self) -> SdnStatus {
        let config_errors = self.state.lock().await.config_errors();
        let mut mgmt_ips = Vec::new();
        if let Some((netif, _)) = host_port(self.lookup.as_ref()) {
            match self.lookup.addresses(netif.if_index).await {
                Ok(addrs) => mgmt_ips = addrs.iter().map(|a| a.addr().to_string()).collect(),
                Err(e) => {
                    tracing::warn!(interface = %netif.if_name, error = %e, "failed to read host port addresses");
                }
            }
        }
        SdnStatus {
            mgmt_ips,
            config_errors,
        }
    }

    /// Re-observe the host and reconcile when physical interfaces changed.
    ///
    /// Returns true if a reconcile pass ran.
    pub async fn refresh(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        let changed = self.lookup.refresh().await?;
        let recompiled = changed.then(|| self.intended_graph(state.parsed.as_ref()));
        let mut needed = state
            .current
            .iter()
            .any(|(_, e)| matches!(e.state, ItemState::Failed(_)));
        match recompiled {
            Some(Ok(graph)) if graph != state.intended => {
                state.intended = graph;
                needed = true;
            }
            Some(Err(e)) => tracing::error!(error = %e, "failed to recompile network model"),
            _ => {}
        }
        if !needed {
            return Ok(false);
        }
        tracing::debug!(changed, "reconciling after refresh");
        state.reconcile().await;
        Ok(true)
    }
}
