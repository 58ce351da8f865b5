//! Bottom-up merge of per-node analyses over a possibly cyclic call graph.
//!
//! Every node moves `unseen -> in_stack -> processed` exactly once. The walk is
//! an explicit-stack post-order: a node is finalised once all of its children
//! are processed, or immediately when every unprocessed child is already on the
//! stack (a cycle back to an ancestor). Children are folded into the parent in
//! call order through an injected [`Combiner`].

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::domain::analysis_text::extract_log_sequence;
use crate::domain::callgraph::CallGraph;
use crate::ports::{Combiner, NodeContext};

/// Everything a merge run produced.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Node -> merged result
    pub merged: BTreeMap<String, String>,
    /// Node -> latest normalised analysis; starts as the input analysis map
    pub latest: BTreeMap<String, String>,
    /// The most recent folded value of the whole run
    pub last_folded: Option<String>,
    /// Nodes in the order they were finalised
    pub finalized: Vec<String>,
    /// Nodes finalised early to break a cycle
    pub forced: Vec<String>,
}

/// Iterative post-order merger. Holds only read-only inputs; each call to
/// [`StackDfsMerger::merge`] starts from fresh traversal state.
pub struct StackDfsMerger<'a, C: Combiner + ?Sized> {
    graph: &'a CallGraph,
    code_map: &'a HashMap<String, String>,
    analysis_map: &'a HashMap<String, String>,
    combiner: &'a C,
}

impl<'a, C: Combiner + ?Sized> StackDfsMerger<'a, C> {
    pub fn new(
        graph: &'a CallGraph,
        code_map: &'a HashMap<String, String>,
        analysis_map: &'a HashMap<String, String>,
        combiner: &'a C,
    ) -> Self {
        Self {
            graph,
            code_map,
            analysis_map,
            combiner,
        }
    }

    pub fn merge<S: AsRef<str>>(&self, roots: &[S]) -> MergeOutcome {
        let mut run = MergeRun {
            stack: Vec::new(),
            in_stack: HashSet::new(),
            processed: HashSet::new(),
            outcome: MergeOutcome {
                latest: self
                    .analysis_map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                ..MergeOutcome::default()
            },
        };

        for root in roots {
            run.push(root.as_ref());
        }

        while let Some(current) = run.stack.last().cloned() {
            if run.processed.contains(&current) {
                run.pop();
                continue;
            }

            let pending: Vec<&String> = self
                .graph
                .callees(&current)
                .iter()
                .filter(|c| !run.processed.contains(*c))
                .collect();

            if pending.is_empty() {
                self.finalize(&mut run, &current);
                continue;
            }

            let fresh: Vec<&String> = pending
                .into_iter()
                .rev()
                .filter(|c| !run.in_stack.contains(*c))
                .collect();

            if fresh.is_empty() {
                warn!("Cycle reached through {}, finalising with partial results", current);
                run.outcome.forced.push(current.clone());
                self.finalize(&mut run, &current);
            } else {
                for child in fresh {
                    run.push(child);
                }
            }
        }

        run.outcome
    }

    /// Run the leaf or parent rule, mark `node` processed and pop it.
    fn finalize(&self, run: &mut MergeRun, node: &str) {
        if self.graph.callees(node).is_empty() {
            self.process_leaf(run, node);
        } else {
            self.merge_parent(run, node);
        }
        run.processed.insert(node.to_string());
        run.outcome.finalized.push(node.to_string());
        run.pop();
    }

    fn process_leaf(&self, run: &mut MergeRun, node: &str) {
        let analysis = match run.outcome.latest.get(node).filter(|a| !a.is_empty()) {
            Some(a) => extract_log_sequence(a),
            None => {
                warn!("{} has no analysis, leaving it unmerged", node);
                return;
            }
        };
        debug!("Leaf {} keeps its own analysis", node);
        run.outcome.merged.insert(node.to_string(), analysis.clone());
        run.outcome.latest.insert(node.to_string(), analysis);
    }

    fn merge_parent(&self, run: &mut MergeRun, node: &str) {
        let parent_code = self.code_map.get(node).map(|s| s.as_str()).unwrap_or_else(|| {
            warn!("{} has no source", node);
            ""
        });
        let mut parent_log = match run.outcome.latest.get(node).filter(|a| !a.is_empty()) {
            Some(a) => extract_log_sequence(a),
            None => {
                warn!("{} has no analysis of its own", node);
                String::new()
            }
        };
        if !parent_log.is_empty() {
            run.outcome.merged.insert(node.to_string(), parent_log.clone());
            run.outcome.latest.insert(node.to_string(), parent_log.clone());
        }

        for child in self.graph.callees(node) {
            let Some(child_code) = self.code_map.get(child) else {
                debug!("Skipping child {} of {}: no source", child, node);
                continue;
            };
            let child_log = match run.outcome.latest.get(child).filter(|a| !a.is_empty()) {
                Some(a) => extract_log_sequence(a),
                None => {
                    debug!("Skipping child {} of {}: no analysis", child, node);
                    continue;
                }
            };

            let parent_ctx = NodeContext {
                node,
                analysis: &parent_log,
                source: parent_code,
            };
            let child_ctx = NodeContext {
                node: child,
                analysis: &child_log,
                source: child_code,
            };

            let merged = match self.combiner.combine(&parent_ctx, &child_ctx) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!("Combining {} into {} failed: {}", child, node, e);
                    continue;
                }
            };

            let normalised = extract_log_sequence(&merged);
            run.outcome.merged.insert(node.to_string(), merged);
            run.outcome.latest.insert(node.to_string(), normalised.clone());
            run.outcome.last_folded = Some(normalised.clone());
            debug!("Merged {} into {}", child, node);
            parent_log = normalised;
        }

        if !run.outcome.merged.contains_key(node) {
            warn!("{} has neither analysis nor mergeable children", node);
        }
    }
}

/// Traversal state for a single merge invocation.
struct MergeRun {
    stack: Vec<String>,
    in_stack: HashSet<String>,
    processed: HashSet<String>,
    outcome: MergeOutcome,
}

impl MergeRun {
    fn push(&mut self, node: &str) {
        if !self.processed.contains(node) && !self.in_stack.contains(node) {
            debug!("Adding {} to stack", node);
            self.stack.push(node.to_string());
            self.in_stack.insert(node.to_string());
        }
    }

    fn pop(&mut self) -> Option<String> {
        let node = self.stack.pop()?;
        self.in_stack.remove(&node);
        debug!("Popping {} from stack", node);
        Some(node)
    }
}
