//! Dependency-ordered reconciliation of the current state towards an intended graph.
//!
//! One pass diffs the recorded [`State`] against the intended [`Graph`]:
//! obsolete items (and items that must be recreated) are deleted dependents
//! first, then missing or changed items are created or modified dependencies
//! first. An item whose dependencies are not satisfied stays [`ItemState::Pending`]
//! until a later pass. Failures are recorded against the item and retried on
//! the next pass.
//!
//! Items are grouped into dependency layers. Operations within one layer do
//! not depend on each other and run concurrently, so a slow daemon start only
//! holds back the items that need it.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::configurators::{Configurator, ConfiguratorRegistry};
use crate::depgraph::Graph;
use crate::items::{ConfigItem, ItemRef};
use crate::model::ConfigError;
use crate::{Error, Result};

/// Outcome of the last operation applied to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Created,
    Failed(String),
    /// Waiting for its dependencies.
    Pending,
}

/// An item as last applied, with its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub item: ConfigItem,
    pub state: ItemState,
}

impl StateEntry {
    fn new(item: ConfigItem, state: ItemState) -> Self {
        Self { item, state }
    }

    pub fn is_created(&self) -> bool {
        self.state == ItemState::Created
    }
}

/// Current state: what the reconciler has applied so far.
#[derive(Debug, Clone, Default)]
pub struct State {
    items: BTreeMap<ItemRef, StateEntry>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, item_ref: &ItemRef) -> Option<&StateEntry> {
        self.items.get(item_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemRef, &StateEntry)> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn unmet_dependency(&self, item: &ConfigItem) -> Option<String> {
        item.dependencies().into_iter().find_map(|dep| {
            let satisfied = self
                .items
                .get(&dep.required)
                .is_some_and(|e| e.is_created() && dep.requirement.is_satisfied_by(&e.item));
            (!satisfied).then(|| format!("{}: {}", dep.required, dep.description))
        })
    }
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStatus {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    pub pending: usize,
    pub config_errors: Vec<ConfigError>,
}

impl ReconcileStatus {
    /// Returns true if the pass changed nothing on the host.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.modified == 0 && self.deleted == 0
    }

    fn record_error(&mut self, item_ref: &ItemRef, err: &Error) {
        self.config_errors.push(ConfigError {
            item_ref: item_ref.to_string(),
            err_msg: err.to_string(),
        });
    }
}

/// Orders item references so that every item comes after the items it depends on.
///
/// Edges to unknown references are ignored. Among items that are ready at the
/// same time the smallest reference goes first. Items on a dependency cycle
/// are appended in reference order.
pub fn dependency_order(deps: &BTreeMap<ItemRef, Vec<ItemRef>>) -> Vec<ItemRef> {
    let mut graph: DiGraph<&ItemRef, ()> = DiGraph::with_capacity(deps.len(), 0);
    let nodes: BTreeMap<&ItemRef, NodeIndex> =
        deps.keys().map(|r| (r, graph.add_node(r))).collect();
    for (item_ref, required) in deps {
        let Some(&to) = nodes.get(item_ref) else {
            continue;
        };
        for required in required {
            if let Some(&from) = nodes.get(required)
                && from != to
            {
                graph.update_edge(from, to, ());
            }
        }
    }

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BTreeMap<&ItemRef, NodeIndex> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .map(|n| (graph[n], n))
        .collect();
    let mut order = Vec::with_capacity(deps.len());
    while let Some((item_ref, node)) = ready.pop_first() {
        order.push(item_ref.clone());
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.insert(graph[next], next);
            }
        }
    }

    if order.len() < deps.len() {
        let placed: BTreeSet<ItemRef> = order.iter().cloned().collect();
        let cyclic: Vec<ItemRef> = deps.keys().filter(|r| !placed.contains(*r)).cloned().collect();
        tracing::warn!(items = cyclic.len(), "dependency cycle between items");
        order.extend(cyclic);
    }
    order
}

/// Groups item references into layers: every item lands in a later layer
/// than all the items it depends on.
///
/// Layers keep the relative order of [`dependency_order`]. Dependencies on
/// cyclic items placed later are ignored.
pub fn dependency_layers(deps: &BTreeMap<ItemRef, Vec<ItemRef>>) -> Vec<Vec<ItemRef>> {
    let mut depth: BTreeMap<ItemRef, usize> = BTreeMap::new();
    let mut layers: Vec<Vec<ItemRef>> = Vec::new();
    for item_ref in dependency_order(deps) {
        let level = deps
            .get(&item_ref)
            .into_iter()
            .flatten()
            .filter_map(|required| depth.get(required))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        if layers.len() <= level {
            layers.resize_with(level + 1, Vec::new);
        }
        layers[level].push(item_ref.clone());
        depth.insert(item_ref, level);
    }
    layers
}

/// Applies items through the registered configurators.
pub struct Reconciler<'a> {
    registry: &'a ConfiguratorRegistry,
}

impl<'a> Reconciler<'a> {
    pub fn new(registry: &'a ConfiguratorRegistry) -> Self {
        Self { registry }
    }

    fn configurator(&self, item: &ConfigItem) -> Result<&dyn Configurator> {
        self.registry
            .get(item.item_type())
            .ok_or(Error::NotImplemented("configurator for item type"))
    }

    fn needs_recreate(&self, old: &ConfigItem, new: &ConfigItem) -> bool {
        self.registry
            .get(new.item_type())
            .is_none_or(|c| c.needs_recreate(old, new))
    }

    /// Run one reconcile pass, moving `current` towards `intended`.
    pub async fn reconcile(&self, current: &mut State, intended: &Graph) -> ReconcileStatus {
        let intended: BTreeMap<&ItemRef, &ConfigItem> = intended.items().collect();
        let mut status = ReconcileStatus::default();

        let mut deps: BTreeMap<ItemRef, Vec<ItemRef>> = BTreeMap::new();
        let current_items = current.items.iter().map(|(r, e)| (r, &e.item));
        for (item_ref, item) in current_items.chain(intended.iter().map(|(r, i)| (*r, *i))) {
            deps.entry(item_ref.clone())
                .or_default()
                .extend(item.dependencies().into_iter().map(|d| d.required));
        }
        let layers = dependency_layers(&deps);

        let to_delete = self.obsolete_items(current, &intended);
        let mut failed = BTreeSet::new();

        for layer in layers.iter().rev() {
            let mut deletes = Vec::new();
            for item_ref in layer {
                let Some(entry) = current.items.get(item_ref) else {
                    continue;
                };
                if entry.item.external() {
                    if !intended.contains_key(item_ref) {
                        tracing::debug!(item = %item_ref, "external item gone");
                        current.items.remove(item_ref);
                    }
                    continue;
                }
                if !to_delete.contains(item_ref) {
                    continue;
                }
                match entry.state {
                    ItemState::Pending => {
                        current.items.remove(item_ref);
                    }
                    ItemState::Created => {
                        tracing::info!(item = %item_ref, "deleting item");
                        deletes.push((item_ref, entry.item.clone(), true));
                    }
                    // Possibly half-created; whatever is left goes away quietly.
                    ItemState::Failed(_) => deletes.push((item_ref, entry.item.clone(), false)),
                }
            }

            let results = join_all(deletes.iter().map(|(_, item, _)| self.delete(item))).await;
            for ((item_ref, item, was_created), result) in deletes.into_iter().zip(results) {
                match result {
                    Err(e) if was_created => {
                        tracing::error!(item = %item_ref, error = %e, "failed to delete item");
                        status.record_error(item_ref, &e);
                        current.items.insert(
                            item_ref.clone(),
                            StateEntry::new(item, ItemState::Failed(e.to_string())),
                        );
                        failed.insert(item_ref.clone());
                        continue;
                    }
                    Err(e) => tracing::debug!(item = %item_ref, error = %e, "cleanup of failed item"),
                    Ok(()) if was_created => status.deleted += 1,
                    Ok(()) => {}
                }
                current.items.remove(item_ref);
            }
        }

        for layer in &layers {
            let mut ops = Vec::new();
            for item_ref in layer {
                let Some(&item) = intended.get(item_ref) else {
                    continue;
                };
                if failed.contains(item_ref) {
                    continue;
                }
                if item.external() {
                    current
                        .items
                        .insert(item_ref.clone(), StateEntry::new(item.clone(), ItemState::Created));
                    continue;
                }
                let old = match current.items.get(item_ref) {
                    Some(e) if e.is_created() && e.item == *item => continue,
                    Some(e) if e.is_created() => Some(e.item.clone()),
                    _ => None,
                };
                if let Some(reason) = current.unmet_dependency(item) {
                    tracing::debug!(item = %item_ref, %reason, "item pending");
                    status.pending += 1;
                    let state = match old {
                        Some(_) => ItemState::Created,
                        None => ItemState::Pending,
                    };
                    let item = old.unwrap_or_else(|| item.clone());
                    current.items.insert(item_ref.clone(), StateEntry::new(item, state));
                    continue;
                }
                if old.is_some() {
                    tracing::info!(item = %item_ref, "modifying item");
                } else {
                    tracing::info!(item = %item_ref, "creating item");
                }
                ops.push((item_ref, item, old));
            }

            let results = join_all(ops.iter().map(|(_, item, old)| async move {
                match old {
                    Some(old) => self.modify(old, item).await,
                    None => self.create(item).await,
                }
            }))
            .await;
            for ((item_ref, item, old), result) in ops.into_iter().zip(results) {
                let state = match result {
                    Ok(()) => {
                        if old.is_some() {
                            status.modified += 1;
                        } else {
                            status.created += 1;
                        }
                        ItemState::Created
                    }
                    Err(e) => {
                        tracing::error!(item = %item_ref, error = %e, "failed to apply item");
                        status.record_error(item_ref, &e);
                        ItemState::Failed(e.to_string())
                    }
                };
                current
                    .items
                    .insert(item_ref.clone(), StateEntry::new(item.clone(), state));
            }
        }

        tracing::debug!(
            created = status.created,
            modified = status.modified,
            deleted = status.deleted,
            pending = status.pending,
            errors = status.config_errors.len(),
            "reconcile pass done"
        );
        status
    }

    /// Items to delete in this pass: everything no longer intended, everything
    /// to recreate, and every created item relying on one of those.
    fn obsolete_items(
        &self,
        current: &State,
        intended: &BTreeMap<&ItemRef, &ConfigItem>,
    ) -> BTreeSet<ItemRef> {
        let mut to_delete = BTreeSet::new();
        for (item_ref, entry) in current.iter() {
            if entry.item.external() {
                continue;
            }
            let delete = match intended.get(item_ref) {
                None => true,
                Some(new) => match entry.state {
                    ItemState::Created => {
                        entry.item != **new && self.needs_recreate(&entry.item, new)
                    }
                    ItemState::Failed(_) => true,
                    ItemState::Pending => false,
                },
            };
            if delete {
                to_delete.insert(item_ref.clone());
            }
        }

        loop {
            let broken: Vec<ItemRef> = current
                .iter()
                .filter(|(r, e)| e.is_created() && !e.item.external() && !to_delete.contains(*r))
                .filter(|(_, e)| {
                    e.item.dependencies().iter().any(|dep| {
                        to_delete.contains(&dep.required)
                            || intended
                                .get(&dep.required)
                                .is_none_or(|required| !dep.requirement.is_satisfied_by(required))
                    })
                })
                .map(|(r, _)| r.clone())
                .collect();
            if broken.is_empty() {
                return to_delete;
            }
            to_delete.extend(broken);
        }
    }

    async fn create(&self, item: &ConfigItem) -> Result<()> {
        self.configurator(item)?.create(item).await
    }

    async fn modify(&self, old: &ConfigItem, new: &ConfigItem) -> Result<()> {
        self.configurator(new)?.modify(old, new).await
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        self.configurator(item)?.delete(item).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;

    use super::*;
    use crate::items::{IfHandle, IfUsage, ItemType, NetNamespace, PhysIf, Sysctl};
    use crate::util::MacAddr;

    /// Records operations; fails those on the `fail` list.
    #[derive(Clone, Default)]
    struct Recorder {
        ops: Arc<Mutex<Vec<String>>>,
        fail: Arc<Mutex<BTreeSet<String>>>,
    }

    impl Recorder {
        fn op(&self, op: &str, item: &ConfigItem) -> Result<()> {
            let line = format!("{op} {}", item.item_ref());
            let should_fail = self.fail.lock().unwrap().contains(&line);
            self.ops.lock().unwrap().push(line);
            if should_fail {
                return Err(Error::Command {
                    cmd: op.to_string(),
                    status: "exit status: 1".into(),
                    output: "boom".into(),
                });
            }
            Ok(())
        }

        fn fail(&self, line: &str) {
            self.fail.lock().unwrap().insert(line.to_string());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.ops.lock().unwrap())
        }
    }

    struct MockConfigurator {
        rec: Recorder,
        recreate: bool,
    }

    #[async_trait]
    impl Configurator for MockConfigurator {
        async fn create(&self, item: &ConfigItem) -> Result<()> {
            self.rec.op("create", item)
        }

        async fn modify(&self, _old: &ConfigItem, new: &ConfigItem) -> Result<()> {
            self.rec.op("modify", new)
        }

        async fn delete(&self, item: &ConfigItem) -> Result<()> {
            self.rec.op("delete", item)
        }

        fn needs_recreate(&self, _old: &ConfigItem, _new: &ConfigItem) -> bool {
            self.recreate
        }
    }

    fn registry(rec: &Recorder) -> ConfiguratorRegistry {
        let mut registry = ConfiguratorRegistry::new();
        for item_type in ItemType::ALL {
            registry.register(
                item_type,
                Box::new(MockConfigurator {
                    rec: rec.clone(),
                    recreate: item_type != ItemType::Sysctl,
                }),
            );
        }
        registry
    }

    fn mac() -> MacAddr {
        "02:00:00:00:00:01".parse().unwrap()
    }

    fn netns(name: &str) -> ConfigItem {
        ConfigItem::NetNamespace(NetNamespace {
            ns_name: name.into(),
            resolv_conf: None,
        })
    }

    fn sysctl(ns: &str, fwd: bool) -> ConfigItem {
        ConfigItem::Sysctl(Sysctl {
            net_namespace: ns.into(),
            enable_ipv4_fwd: fwd,
            enable_ipv6_fwd: fwd,
            bridge_nf_call_iptables: false,
            bridge_nf_call_ip6tables: false,
        })
    }

    fn if_handle(usage: IfUsage) -> ConfigItem {
        ConfigItem::IfHandle(IfHandle {
            mac: mac(),
            logical_label: "eveport0".into(),
            usage,
            master_label: String::new(),
            admin_up: true,
            mtu: 1500,
        })
    }

    fn graph(items: impl IntoIterator<Item = ConfigItem>) -> Graph {
        let mut graph = Graph::new("SDN-Config");
        for item in items {
            graph.put_item("Test", item);
        }
        graph
    }

    #[test]
    fn test_dependency_order() {
        let a = ItemRef::new(ItemType::NetNamespace, "a");
        let b = ItemRef::new(ItemType::NetNamespace, "b");
        let c = ItemRef::new(ItemType::Sysctl, "a");
        let deps = BTreeMap::from([
            (c.clone(), vec![a.clone()]),
            (b.clone(), vec![c.clone(), ItemRef::new(ItemType::Veth, "unknown")]),
            (a.clone(), vec![]),
        ]);
        assert_eq!(dependency_order(&deps), [a.clone(), c.clone(), b.clone()]);

        let cyclic = BTreeMap::from([(a.clone(), vec![b.clone()]), (b.clone(), vec![a.clone()])]);
        assert_eq!(dependency_order(&cyclic), [a, b]);
    }

    #[test]
    fn test_dependency_layers() {
        let a = ItemRef::new(ItemType::NetNamespace, "a");
        let b = ItemRef::new(ItemType::NetNamespace, "b");
        let c = ItemRef::new(ItemType::Sysctl, "a");
        let d = ItemRef::new(ItemType::Veth, "b");
        let deps = BTreeMap::from([
            (a.clone(), vec![]),
            (b.clone(), vec![]),
            (c.clone(), vec![a.clone()]),
            (d.clone(), vec![b.clone(), c.clone()]),
        ]);
        assert_eq!(dependency_layers(&deps), [vec![a, b], vec![c], vec![d]]);
    }

    /// Takes a while to create or delete anything.
    struct SlowConfigurator(Duration);

    #[async_trait]
    impl Configurator for SlowConfigurator {
        async fn create(&self, _item: &ConfigItem) -> Result<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }

        async fn delete(&self, _item: &ConfigItem) -> Result<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_independent_items_run_concurrently() {
        let delay = Duration::from_millis(300);
        let mut registry = ConfiguratorRegistry::new();
        registry.register(ItemType::NetNamespace, Box::new(SlowConfigurator(delay)));
        let reconciler = Reconciler::new(&registry);
        let mut state = State::new();

        let started = Instant::now();
        let status = reconciler
            .reconcile(&mut state, &graph([netns("ns1"), netns("ns2")]))
            .await;
        assert_eq!(status.created, 2);
        assert!(started.elapsed() < 2 * delay);

        let started = Instant::now();
        let status = reconciler.reconcile(&mut state, &graph([])).await;
        assert_eq!(status.deleted, 2);
        assert!(started.elapsed() < 2 * delay);
    }

    #[tokio::test]
    async fn test_create_in_dependency_order() {
        let rec = Recorder::default();
        let registry = registry(&rec);
        let mut state = State::new();
        let intended = graph([sysctl("ns1", true), netns("ns1")]);

        let status = Reconciler::new(&registry).reconcile(&mut state, &intended).await;
        assert_eq!(status.created, 2);
        assert!(status.config_errors.is_empty());
        assert_eq!(
            rec.take(),
            ["create Network-Namespace/ns1", "create Sysctl/ns1"]
        );

        // Nothing changed, nothing to do.
        let status = Reconciler::new(&registry).reconcile(&mut state, &intended).await;
        assert!(status.is_noop());
        assert!(rec.take().is_empty());
    }

    #[tokio::test]
    async fn test_delete_dependents_first() {
        let rec = Recorder::default();
        let registry = registry(&rec);
        let mut state = State::new();
        let reconciler = Reconciler::new(&registry);
        reconciler
            .reconcile(&mut state, &graph([netns("ns1"), sysctl("ns1", true)]))
            .await;
        rec.take();

        let status = reconciler.reconcile(&mut state, &graph([])).await;
        assert_eq!(status.deleted, 2);
        assert_eq!(rec.take(), ["delete Sysctl/ns1", "delete Network-Namespace/ns1"]);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_modify_or_recreate() {
        let rec = Recorder::default();
        let registry = registry(&rec);
        let mut state = State::new();
        let reconciler = Reconciler::new(&registry);
        let external = ConfigItem::PhysIf(PhysIf::new(mac(), "eveport0"));
        reconciler
            .reconcile(
                &mut state,
                &graph([netns("ns1"), sysctl("ns1", true), external.clone(), if_handle(IfUsage::L3)]),
            )
            .await;
        assert_eq!(
            rec.take(),
            ["create Network-Namespace/ns1", "create Interface-Handle/02:00:00:00:00:01", "create Sysctl/ns1"]
        );

        let status = reconciler
            .reconcile(
                &mut state,
                &graph([netns("ns1"), sysctl("ns1", false), external, if_handle(IfUsage::Bridged)]),
            )
            .await;
        assert_eq!(status.modified, 1);
        assert_eq!(
            rec.take(),
            [
                "delete Interface-Handle/02:00:00:00:00:01",
                "create Interface-Handle/02:00:00:00:00:01",
                "modify Sysctl/ns1",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_dependency_is_pending() {
        let rec = Recorder::default();
        let registry = registry(&rec);
        let mut state = State::new();
        let reconciler = Reconciler::new(&registry);

        // The physical interface is not observed yet.
        let status = reconciler
            .reconcile(&mut state, &graph([if_handle(IfUsage::L3)]))
            .await;
        assert_eq!(status.pending, 1);
        assert!(rec.take().is_empty());
        let handle_ref = ItemRef::new(ItemType::IfHandle, mac().to_string());
        assert_eq!(state.get(&handle_ref).unwrap().state, ItemState::Pending);

        let phys_if = ConfigItem::PhysIf(PhysIf::new(mac(), "eveport0"));
        reconciler
            .reconcile(&mut state, &graph([if_handle(IfUsage::L3), phys_if.clone()]))
            .await;
        assert_eq!(rec.take(), ["create Interface-Handle/02:00:00:00:00:01"]);
        assert!(state.get(&handle_ref).unwrap().is_created());

        // The interface disappears: its handle goes with it.
        reconciler
            .reconcile(&mut state, &graph([if_handle(IfUsage::L3)]))
            .await;
        assert_eq!(rec.take(), ["delete Interface-Handle/02:00:00:00:00:01"]);
        assert_eq!(state.get(&handle_ref).unwrap().state, ItemState::Pending);
        assert!(state.get(&phys_if.item_ref()).is_none());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_retried() {
        let rec = Recorder::default();
        let registry = registry(&rec);
        let mut state = State::new();
        let reconciler = Reconciler::new(&registry);
        rec.fail("create Network-Namespace/ns1");

        let intended = graph([netns("ns1"), sysctl("ns1", true)]);
        let status = reconciler.reconcile(&mut state, &intended).await;
        assert_eq!(status.pending, 1);
        assert_eq!(
            status.config_errors,
            [ConfigError {
                item_ref: "Network-Namespace/ns1".into(),
                err_msg: "command `create` failed (exit status: 1): boom".into(),
            }]
        );
        assert_eq!(rec.take(), ["create Network-Namespace/ns1"]);

        rec.fail.lock().unwrap().clear();
        let status = reconciler.reconcile(&mut state, &intended).await;
        assert!(status.config_errors.is_empty());
        assert_eq!(
            rec.take(),
            ["delete Network-Namespace/ns1", "create Network-Namespace/ns1", "create Sysctl/ns1"]
        );
    }
}
