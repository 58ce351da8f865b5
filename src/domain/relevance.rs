//! Log-reachability over the reverse call graph.
//!
//! A node is *relevant* when some chain of enabled calls starting at it ends in
//! a logging call. Logging calls are recognised purely by name.

use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

use crate::domain::callgraph::CallGraph;

/// Case-insensitive keyword matcher over method signatures.
#[derive(Debug, Clone)]
pub struct LogKeywords {
    keywords: Vec<String>,
}

impl LogKeywords {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// True when the signature's name part (everything before the parameter
    /// list) contains one of the keywords. Parameter types are ignored so that
    /// a method merely taking a `Logger` argument is not a logging call.
    pub fn is_logging_method(&self, signature: &str) -> bool {
        let name = signature.split('(').next().unwrap_or(signature).to_lowercase();
        self.keywords.iter().any(|kw| name.contains(kw.as_str()))
    }
}

impl Default for LogKeywords {
    fn default() -> Self {
        Self::new(["log", "logger", "logging", "debug", "info", "warn", "error", "trace", "fatal"])
    }
}

/// Every node of the graph whose name matches the keyword set, sorted.
pub fn find_log_leaves(graph: &CallGraph, keywords: &LogKeywords) -> Vec<String> {
    let mut seeds: Vec<String> = graph
        .nodes()
        .iter()
        .filter(|n| keywords.is_logging_method(n))
        .cloned()
        .collect();
    seeds.sort();
    seeds
}

/// Single-threaded backward BFS from `seeds`. The returned set holds the seeds
/// plus every node with a path into one of them.
pub fn propagate(graph: &CallGraph, seeds: &[String]) -> HashSet<String> {
    info!("Running backward BFS from {} seed(s)", seeds.len());
    let mut marked: HashSet<String> = seeds.iter().cloned().collect();
    let mut frontier: VecDeque<&str> = seeds.iter().map(|s| s.as_str()).collect();

    let mut processed = 0usize;
    while let Some(current) = frontier.pop_front() {
        processed += 1;
        if processed % 50_000 == 0 {
            debug!("BFS processed {} nodes", processed);
        }
        for predecessor in graph.callers(current) {
            if marked.insert(predecessor.clone()) {
                frontier.push_back(predecessor.as_str());
            }
        }
    }

    info!("BFS finished, {} node(s) marked", marked.len());
    marked
}

/// Seeds from the keyword predicate, then [`propagate`].
pub fn find_relevant_nodes(graph: &CallGraph, keywords: &LogKeywords) -> HashSet<String> {
    let seeds = find_log_leaves(graph, keywords);
    propagate(graph, &seeds)
}

/// Marked nodes with no marked caller: candidates for traversal entry points.
pub fn entry_candidates(graph: &CallGraph, marked: &HashSet<String>) -> Vec<String> {
    let mut out: Vec<String> = marked
        .iter()
        .filter(|n| graph.callers(n).all(|c| !marked.contains(c)))
        .cloned()
        .collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> CallGraph {
        // main -> svc -> Logger:info(String)
        // main -> util -> math
        // orphan -> svc
        // x <-> y (cycle without logging)
        CallGraph::from_edges([
            ("App:main()", "Svc:handle()"),
            ("Svc:handle()", "Logger:info(java.lang.String)"),
            ("App:main()", "Util:compute()"),
            ("Util:compute()", "Math:abs(int)"),
            ("Orphan:run()", "Svc:handle()"),
            ("X:a()", "Y:b()"),
            ("Y:b()", "X:a()"),
        ])
    }

    #[test]
    fn test_keyword_match_ignores_parameters() {
        let kw = LogKeywords::default();
        assert!(kw.is_logging_method("org.slf4j.Logger:info(java.lang.String)"));
        assert!(kw.is_logging_method("Foo:WARN()"));
        assert!(!kw.is_logging_method("Foo:bar(org.slf4j.Logger)"));
    }

    #[test]
    fn test_exact_relevant_set() {
        let graph = sample_graph();
        let relevant = find_relevant_nodes(&graph, &LogKeywords::default());

        let expected: HashSet<String> = [
            "Logger:info(java.lang.String)",
            "Svc:handle()",
            "App:main()",
            "Orphan:run()",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(relevant, expected);
    }

    #[test]
    fn test_propagation_is_idempotent() {
        let graph = sample_graph();
        let kw = LogKeywords::default();
        assert_eq!(find_relevant_nodes(&graph, &kw), find_relevant_nodes(&graph, &kw));
    }

    #[test]
    fn test_cycle_into_log_marks_both() {
        let graph = CallGraph::from_edges([("p", "q"), ("q", "p"), ("q", "Log:debug()")]);
        let relevant = find_relevant_nodes(&graph, &LogKeywords::default());
        assert!(relevant.contains("p"));
        assert!(relevant.contains("q"));
    }

    #[test]
    fn test_entry_candidates() {
        let graph = sample_graph();
        let relevant = find_relevant_nodes(&graph, &LogKeywords::default());
        assert_eq!(entry_candidates(&graph, &relevant), vec!["App:main()", "Orphan:run()"]);
    }
}
