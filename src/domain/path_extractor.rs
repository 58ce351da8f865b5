//! Path Extraction
//!
//! Depth-bounded forward traversal from one entry point over the edge store,
//! followed by a strict prune against the relevant set.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::domain::callgraph::CallEdge;
use crate::domain::store::EdgeStore;
use crate::error::{GraphError, Result};

/// Explicit-stack frames. `Exit` pops a node off the current path once all
/// frames pushed by its expansion have been consumed.
enum Frame {
    Visit(String, usize),
    Exit(String),
}

/// Forward traversal sourced live from an [`EdgeStore`], one callee query per
/// expanded node.
pub struct PathExtractor<'a> {
    store: &'a dyn EdgeStore,
    max_depth: usize,
    only_propagating: bool,
}

impl<'a> PathExtractor<'a> {
    pub fn new(store: &'a dyn EdgeStore, max_depth: usize) -> Self {
        Self {
            store,
            max_depth,
            only_propagating: false,
        }
    }

    /// Restrict expansion to edges already flagged by the relevance pass.
    pub fn only_propagating(mut self, only: bool) -> Self {
        self.only_propagating = only;
        self
    }

    /// Emit every `caller->callee, depth D` seen while expanding from `entry`.
    ///
    /// A node at `depth >= max_depth` is not expanded. A node already on the
    /// current path is not re-expanded, nor is one expanded earlier from another
    /// branch; the edge leading to it is still recorded.
    pub fn extract(&self, entry: &str) -> Result<Vec<CallEdge>> {
        info!("Starting traversal from entry: {} (max depth {})", entry, self.max_depth);

        let mut edges = Vec::new();
        let mut stack = vec![Frame::Visit(entry.to_string(), 0)];
        let mut visited: HashSet<String> = HashSet::new();
        let mut in_stack: HashSet<String> = HashSet::new();

        while let Some(frame) = stack.pop() {
            let (current, depth) = match frame {
                Frame::Exit(node) => {
                    in_stack.remove(&node);
                    continue;
                }
                Frame::Visit(node, depth) => (node, depth),
            };

            if depth >= self.max_depth {
                debug!("Skipping {} at depth limit ({})", current, depth);
                continue;
            }
            if in_stack.contains(&current) {
                debug!("Skipping {}: loop back onto current path", current);
                continue;
            }
            if !visited.insert(current.clone()) {
                continue;
            }

            let mut seen = HashSet::new();
            let callees: Vec<String> = self
                .store
                .callees(&current, self.only_propagating)?
                .into_iter()
                .filter(|c| seen.insert(c.clone()))
                .collect();

            in_stack.insert(current.clone());
            stack.push(Frame::Exit(current.clone()));

            for callee in callees.iter() {
                edges.push(CallEdge::new(&current, callee, Some(depth + 1)));
            }
            // reversed so the first callee is expanded first
            for callee in callees.into_iter().rev() {
                if !visited.contains(&callee) {
                    stack.push(Frame::Visit(callee, depth + 1));
                }
            }
        }

        info!("Traversal from {} produced {} edge(s)", entry, edges.len());
        Ok(edges)
    }
}

/// Callees kept for one caller after the strict prune, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedCaller {
    pub caller: String,
    pub callees: Vec<(String, Option<usize>)>,
}

/// Result of [`prune_strict`]: callers in first-seen order, none with an empty
/// callee list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunedGraph {
    pub callers: Vec<PrunedCaller>,
}

impl PrunedGraph {
    pub fn edges(&self) -> impl Iterator<Item = CallEdge> + '_ {
        self.callers.iter().flat_map(|pc| {
            pc.callees
                .iter()
                .map(move |(callee, depth)| CallEdge::new(&pc.caller, callee, *depth))
        })
    }

    pub fn edge_count(&self) -> usize {
        self.callers.iter().map(|pc| pc.callees.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }
}

/// Keep an edge only when both endpoints are relevant; drop callers left
/// without callees. The result is validated before it is returned.
pub fn prune_strict(edges: &[CallEdge], relevant: &HashSet<String>) -> Result<PrunedGraph> {
    let mut pruned = PrunedGraph::default();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for edge in edges {
        if !relevant.contains(&edge.caller) || !relevant.contains(&edge.callee) {
            continue;
        }
        match index.get(edge.caller.as_str()) {
            Some(&i) => pruned.callers[i].callees.push((edge.callee.clone(), edge.depth)),
            None => {
                index.insert(&edge.caller, pruned.callers.len());
                pruned.callers.push(PrunedCaller {
                    caller: edge.caller.clone(),
                    callees: vec![(edge.callee.clone(), edge.depth)],
                });
            }
        }
    }

    validate_pruned(&pruned, relevant)?;
    info!(
        "Strict prune kept {} of {} edge(s) across {} caller(s)",
        pruned.edge_count(),
        edges.len(),
        pruned.callers.len()
    );
    Ok(pruned)
}

/// Every retained endpoint must be relevant. A violation means extraction and
/// pruning disagree, so it is reported as a hard error.
pub fn validate_pruned(pruned: &PrunedGraph, relevant: &HashSet<String>) -> Result<()> {
    for edge in pruned.edges() {
        if !relevant.contains(&edge.caller) || !relevant.contains(&edge.callee) {
            return Err(GraphError::InvariantViolation {
                caller: edge.caller,
                callee: edge.callee,
            });
        }
    }
    Ok(())
}
