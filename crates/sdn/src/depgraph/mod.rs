//! Graph of configuration items grouped into named sub-graphs.

mod dot;

use std::collections::BTreeMap;

use crate::items::{ConfigItem, ItemRef};

/// Named group of configuration items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubGraph {
    pub name: String,
    pub items: BTreeMap<ItemRef, ConfigItem>,
}

impl SubGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: BTreeMap::new(),
        }
    }

    /// Insert or replace an item.
    pub fn put_item(&mut self, item: ConfigItem) {
        self.items.insert(item.item_ref(), item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Graph of configuration items.
///
/// Item references are unique across the whole graph. Putting an item that
/// already exists in another sub-graph moves it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    pub name: String,
    pub subgraphs: BTreeMap<String, SubGraph>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subgraphs: BTreeMap::new(),
        }
    }

    /// Get a sub-graph, creating an empty one if needed.
    pub fn subgraph_mut(&mut self, name: &str) -> &mut SubGraph {
        self.subgraphs
            .entry(name.to_string())
            .or_insert_with(|| SubGraph::new(name))
    }

    /// Replace a sub-graph as a whole.
    pub fn put_subgraph(&mut self, subgraph: SubGraph) {
        for item_ref in subgraph.items.keys() {
            for (name, other) in self.subgraphs.iter_mut() {
                if *name != subgraph.name {
                    other.items.remove(item_ref);
                }
            }
        }
        self.subgraphs.insert(subgraph.name.clone(), subgraph);
    }

    pub fn put_item(&mut self, subgraph: &str, item: ConfigItem) {
        let item_ref = item.item_ref();
        for (name, other) in self.subgraphs.iter_mut() {
            if name != subgraph {
                other.items.remove(&item_ref);
            }
        }
        self.subgraph_mut(subgraph).put_item(item);
    }

    pub fn get(&self, item_ref: &ItemRef) -> Option<&ConfigItem> {
        self.subgraphs.values().find_map(|sg| sg.items.get(item_ref))
    }

    /// Name of the sub-graph holding the item.
    pub fn subgraph_of(&self, item_ref: &ItemRef) -> Option<&str> {
        self.subgraphs
            .values()
            .find(|sg| sg.items.contains_key(item_ref))
            .map(|sg| sg.name.as_str())
    }

    /// Iterate over all items, ordered by sub-graph name then item reference.
    pub fn items(&self) -> impl Iterator<Item = (&ItemRef, &ConfigItem)> {
        self.subgraphs.values().flat_map(|sg| sg.items.iter())
    }

    pub fn len(&self) -> usize {
        self.subgraphs.values().map(SubGraph::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the graph in the Graphviz DOT language.
    pub fn to_dot(&self) -> String {
        dot::render(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{ItemType, NetNamespace};

    fn netns(name: &str) -> ConfigItem {
        ConfigItem::NetNamespace(NetNamespace {
            ns_name: name.into(),
            resolv_conf: None,
        })
    }

    #[test]
    fn test_put_and_get() {
        let mut graph = Graph::new("SDN-Config");
        graph.put_item("Network-lan", netns("network-lan"));
        graph.put_item("Endpoint-dns", netns("endpoint-dns"));
        assert_eq!(graph.len(), 2);

        let item_ref = ItemRef::new(ItemType::NetNamespace, "network-lan");
        assert!(graph.get(&item_ref).is_some());
        assert_eq!(graph.subgraph_of(&item_ref), Some("Network-lan"));
    }

    #[test]
    fn test_put_item_moves_between_subgraphs() {
        let mut graph = Graph::new("SDN-Config");
        graph.put_item("A", netns("ns"));
        graph.put_item("B", netns("ns"));
        assert_eq!(graph.len(), 1);
        assert_eq!(
            graph.subgraph_of(&ItemRef::new(ItemType::NetNamespace, "ns")),
            Some("B")
        );
    }

    #[test]
    fn test_put_subgraph_replaces() {
        let mut graph = Graph::new("SDN-Config");
        graph.put_item("Physical-Interfaces", netns("a"));
        let mut sg = SubGraph::new("Physical-Interfaces");
        sg.put_item(netns("b"));
        graph.put_subgraph(sg);
        assert_eq!(graph.len(), 1);
        assert!(graph.get(&ItemRef::new(ItemType::NetNamespace, "b")).is_some());
    }
}
