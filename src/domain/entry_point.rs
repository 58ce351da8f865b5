//! Entry Point Detection Module
//!
//! Picks traversal roots for a merge run from the shape of the call graph.

use std::collections::HashSet;
use tracing::info;

use crate::domain::callgraph::CallGraph;

/// How the roots were chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootKind {
    /// Callers that nothing calls
    Uncalled,
    /// Every caller is also a callee; the first caller seen stands in
    CycleFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    pub nodes: Vec<String>,
    pub kind: RootKind,
}

/// Callers that never appear as a callee, in first-seen caller order.
/// A graph made only of cycles falls back to its first caller; an empty graph
/// has no roots.
pub fn detect_roots(graph: &CallGraph) -> Roots {
    let callees: HashSet<&String> = graph.forward().values().flatten().collect();

    let nodes: Vec<String> = graph
        .caller_order()
        .iter()
        .filter(|c| !callees.contains(c))
        .cloned()
        .collect();

    if nodes.is_empty() {
        if let Some(first) = graph.caller_order().first() {
            info!("No uncalled caller, falling back to {}", first);
            return Roots {
                nodes: vec![first.clone()],
                kind: RootKind::CycleFallback,
            };
        }
    }

    Roots {
        nodes,
        kind: RootKind::Uncalled,
    }
}
