// Call graph structures for logreach.
// Nodes are opaque method signatures; edges carry the metadata persisted by the edge store.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One persisted caller -> callee row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub call_seq: Option<u32>, // call order within the caller
    pub enabled: bool,
    pub caller: String,
    pub callee: String,
    pub call_line_no: Option<u32>,
    pub call_return_type: String,
    pub log_propagation: bool, // set by the relevance pass only
}

impl EdgeRecord {
    pub fn new(call_seq: u32, caller: &str, callee: &str) -> Self {
        Self {
            call_seq: Some(call_seq),
            enabled: true,
            caller: caller.to_string(),
            callee: callee.to_string(),
            call_line_no: None,
            call_return_type: String::new(),
            log_propagation: false,
        }
    }
}

/// An edge as it appears in a flat dump, optionally annotated with the hop
/// distance from a traversal root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallEdge {
    pub caller: String,
    pub callee: String,
    pub depth: Option<usize>,
}

impl CallEdge {
    pub fn new(caller: &str, callee: &str, depth: Option<usize>) -> Self {
        Self {
            caller: caller.to_string(),
            callee: callee.to_string(),
            depth,
        }
    }
}

impl fmt::Display for CallEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.depth {
            Some(depth) => write!(f, "{}->{}, depth {}", self.caller, self.callee, depth),
            None => write!(f, "{}->{}", self.caller, self.callee),
        }
    }
}

/// In-memory call graph: ordered forward adjacency plus its derived reverse mapping.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    forward: HashMap<String, Vec<String>>,
    reverse: HashMap<String, HashSet<String>>,
    nodes: HashSet<String>,
    // callers in first-seen order
    callers: Vec<String>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges<I, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut graph = Self::new();
        for (caller, callee) in edges {
            graph.add_edge(caller.as_ref(), callee.as_ref());
        }
        graph
    }

    /// Adds `caller -> callee`. Repeated callees collapse onto their first occurrence.
    /// Returns false when the edge was already present.
    pub fn add_edge(&mut self, caller_id: &str, callee_id: &str) -> bool {
        if self.contains_edge(caller_id, callee_id) {
            return false;
        }
        if !self.forward.contains_key(caller_id) {
            self.callers.push(caller_id.to_string());
        }
        self.forward
            .entry(caller_id.to_string())
            .or_default()
            .push(callee_id.to_string());

        self.reverse
            .entry(callee_id.to_string())
            .or_default()
            .insert(caller_id.to_string());
        self.nodes.insert(caller_id.to_string());
        self.nodes.insert(callee_id.to_string());
        true
    }

    /// Callees of `node` in call order.
    pub fn callees(&self, node: &str) -> &[String] {
        self.forward.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Callers of `node`, unordered.
    pub fn callers(&self, node: &str) -> impl Iterator<Item = &String> {
        self.reverse.get(node).into_iter().flatten()
    }

    pub fn in_degree(&self, node: &str) -> usize {
        self.reverse.get(node).map_or(0, |c| c.len())
    }

    pub fn contains_node(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    /// Answered from the reverse map, which holds exactly the forward edges.
    pub fn contains_edge(&self, caller: &str, callee: &str) -> bool {
        self.reverse.get(callee).map_or(false, |c| c.contains(caller))
    }

    pub fn nodes(&self) -> &HashSet<String> {
        &self.nodes
    }

    pub fn forward(&self) -> &HashMap<String, Vec<String>> {
        &self.forward
    }

    pub fn reverse(&self) -> &HashMap<String, HashSet<String>> {
        &self.reverse
    }

    /// Callers in the order they were first added.
    pub fn caller_order(&self) -> &[String] {
        &self.callers
    }

    pub fn edge_count(&self) -> usize {
        self.forward.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All edges, callers in first-seen order and callees in call order.
    pub fn edges(&self) -> impl Iterator<Item = (&String, &String)> {
        self.callers
            .iter()
            .flat_map(move |caller| self.callees(caller).iter().map(move |callee| (caller, callee)))
    }
}
