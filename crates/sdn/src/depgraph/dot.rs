use std::collections::BTreeSet;
use std::fmt::Write;

use super::Graph;
use crate::items::ItemRef;

pub(super) fn render(graph: &Graph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph {} {{", quote(&graph.name));
    let _ = writeln!(out, "  compound=true;");
    let _ = writeln!(out, "  node [shape=box, style=filled, fillcolor=white];");

    for (idx, sg) in graph.subgraphs.values().enumerate() {
        if sg.is_empty() {
            continue;
        }
        let _ = writeln!(out, "  subgraph cluster_{idx} {{");
        let _ = writeln!(out, "    label={};", quote(&sg.name));
        for (item_ref, item) in &sg.items {
            let mut attrs = format!(
                "label={}",
                quote(&format!("{}\\n{}", item_ref.item_type, item.label()))
            );
            if item.external() {
                attrs.push_str(", fillcolor=lightgrey");
            }
            let _ = writeln!(out, "    {} [{attrs}];", node_id(item_ref));
        }
        let _ = writeln!(out, "  }}");
    }

    let mut missing = BTreeSet::new();
    for (item_ref, item) in graph.items() {
        for dep in item.dependencies() {
            if graph.get(&dep.required).is_none() {
                missing.insert(dep.required.clone());
            }
            let _ = writeln!(
                out,
                "  {} -> {} [tooltip={}];",
                node_id(item_ref),
                node_id(&dep.required),
                quote(&dep.description)
            );
        }
    }
    for item_ref in &missing {
        let _ = writeln!(
            out,
            "  {} [label={}, style=dashed, color=grey, fontcolor=grey];",
            node_id(item_ref),
            quote(&item_ref.to_string())
        );
    }

    out.push_str("}\n");
    out
}

fn node_id(item_ref: &ItemRef) -> String {
    quote(&item_ref.to_string())
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}
