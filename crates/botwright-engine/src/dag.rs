//! Dependency resolution over the step graph.
//!
//! Steps and their `depends_on` edges form a directed graph modeled with
//! `petgraph`. Ordering uses Kahn's algorithm with the declared step order as
//! the tie-break for every ready set, so independent steps keep their authored
//! order and the result is deterministic. A cycle is reported with the
//! implicated step ids; the caller decides the fallback.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use botwright_types::WorkflowError;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::definition::StepDefinition;

/// Compute a topological execution order, returned as indices into `steps`.
///
/// Dependency ids that name no step in the workflow are ignored here; unmet
/// dependencies are enforced at run time. A self-dependency or any larger
/// cycle yields `CycleDetected` listing the unresolved step ids.
pub fn resolve_order<C>(steps: &[StepDefinition<C>]) -> Result<Vec<usize>, WorkflowError> {
    if steps.is_empty() {
        return Ok(Vec::new());
    }

    let id_to_pos: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    // Nodes are added in declared order, so NodeIndex order == declared order
    // and a min-heap of node indices gives the declared-order tie-break.
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();

    for (pos, step) in steps.iter().enumerate() {
        let mut seen_deps = HashSet::new();
        for dep in &step.depends_on {
            if let Some(&from) = id_to_pos.get(dep.as_str()) {
                if seen_deps.insert(from) {
                    graph.add_edge(nodes[from], nodes[pos], ());
                }
            }
        }
    }

    let mut in_degree: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = nodes
        .iter()
        .filter(|n| in_degree[n.index()] == 0)
        .map(|&n| Reverse(n))
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(graph[node]);
        for succ in graph.neighbors_directed(node, Direction::Outgoing) {
            in_degree[succ.index()] -= 1;
            if in_degree[succ.index()] == 0 {
                ready.push(Reverse(succ));
            }
        }
    }

    if order.len() < steps.len() {
        let resolved: HashSet<usize> = order.iter().copied().collect();
        let unresolved: Vec<&str> = steps
            .iter()
            .enumerate()
            .filter(|(i, _)| !resolved.contains(i))
            .map(|(_, s)| s.id.as_str())
            .collect();
        return Err(WorkflowError::CycleDetected(unresolved.join(", ")));
    }

    Ok(order)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
