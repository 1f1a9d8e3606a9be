use crate::system::Group;
use crate::store::types::child_name;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Data dependencies between the children of `group`.
///
/// One node per child, in registration order. An edge `a -> b` means some
/// output of `a` feeds an input of `b` through a connection `group` owns.
/// Connections owned deeper in the tree stay inside one child and add nothing.
pub fn dataflow_graph(group: &Group) -> DiGraph<String, ()> {
    let mut graph = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    for sub in group.subsystems(false) {
        nodes.insert(sub.name(), graph.add_node(sub.name().to_string()));
    }

    for (tgt, src) in group.connections().iter() {
        let from = child_name(src, group.pathname()).and_then(|n| nodes.get(n));
        let to = child_name(tgt, group.pathname()).and_then(|n| nodes.get(n));
        if let (Some(&from), Some(&to)) = (from, to) {
            graph.update_edge(from, to, ());
        }
    }
    graph
}

/// Groups of children that depend on each other in a loop.
///
/// Each entry lists the members of one strongly connected component, ordered
/// as the children were added. A single-pass evaluation of such a group uses
/// stale inputs for at least one member.
pub fn feedback_cycles(group: &Group) -> Vec<Vec<String>> {
    let graph = dataflow_graph(group);
    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|mut scc| {
            // Node indices follow registration order.
            scc.sort();
            scc.into_iter().map(|n| graph[n].clone()).collect()
        })
        .collect();
    cycles.sort();
    cycles
}
