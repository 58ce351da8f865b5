// Use cases wiring the domain passes to files and stores.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::PrunerConfig;
use crate::domain::callgraph::{CallEdge, CallGraph};
use crate::domain::entry_point::{detect_roots, RootKind};
use crate::domain::merge::{MergeOutcome, StackDfsMerger};
use crate::domain::path_extractor::{prune_strict, PathExtractor};
use crate::domain::relevance::{entry_candidates, find_log_leaves, find_relevant_nodes, LogKeywords};
use crate::domain::store::EdgeStore;
use crate::infrastructure::side_maps::{load_json_map, write_json};
use crate::infrastructure::{
    ConcurrentPruner, EdgeImporter, GraphLoader, GraphSource, ImportReport, PruneReport,
};
use crate::ports::Combiner;

pub const CALL_DEPS_FILE: &str = "call_deps.txt";
pub const PRUNED_CALL_DEPS_FILE: &str = "pruned_call_deps.txt";
pub const START_NODES_FILE: &str = "start_node.txt";
pub const MERGED_FILE: &str = "merge_single_log.json";
pub const LATEST_FILE: &str = "merge_single_info.json";

pub struct ImportUsecase<'a> {
    pub store: &'a dyn EdgeStore,
    pub batch_size: usize,
}

impl<'a> ImportUsecase<'a> {
    pub fn run(&self, input: &Path, replace: bool) -> Result<ImportReport> {
        if replace {
            self.store.clear().context("Failed to clear edge store")?;
        }
        EdgeImporter::new(self.store, self.batch_size)
            .import_file(input)
            .with_context(|| format!("Failed to import {}", input.display()))
    }
}

pub struct PruneUsecase<'a> {
    pub store: &'a dyn EdgeStore,
    pub keywords: &'a LogKeywords,
    pub config: &'a PrunerConfig,
}

impl<'a> PruneUsecase<'a> {
    /// Flag every edge on a path to a logging call. Entry candidates are
    /// written to `start_nodes_out` once the pass has completed.
    pub fn run(&self, start_nodes_out: Option<&Path>) -> Result<PruneReport> {
        let graph = GraphLoader::load(GraphSource::Store(self.store)).context("Failed to load graph from store")?;
        let seeds = find_log_leaves(&graph, self.keywords);
        info!("{} logging leaf node(s) found", seeds.len());

        let report = ConcurrentPruner::new(&graph, self.store, self.config)
            .run(&seeds)
            .context("Relevance pass failed")?;

        if let (Some(path), false) = (start_nodes_out, report.interrupted) {
            let candidates = entry_candidates(&graph, &report.marked);
            GraphLoader::write_nodes(path, &candidates)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} entry candidate(s) to {}", candidates.len(), path.display());
        }

        report.ensure_persisted()?;
        Ok(report)
    }
}

#[derive(Debug)]
pub struct ExtractSummary {
    pub edges: Vec<CallEdge>,
    pub pruned_edges: usize,
    pub call_deps: PathBuf,
    pub pruned_call_deps: PathBuf,
}

pub struct ExtractUsecase<'a> {
    pub store: &'a dyn EdgeStore,
    pub keywords: &'a LogKeywords,
    pub max_depth: usize,
    pub only_propagating: bool,
}

impl<'a> ExtractUsecase<'a> {
    /// Extract the bounded subgraph under `entry`, then keep only edges whose
    /// endpoints both reach a logging call.
    pub fn run(&self, entry: &str, output_dir: &Path) -> Result<ExtractSummary> {
        let edges = PathExtractor::new(self.store, self.max_depth)
            .only_propagating(self.only_propagating)
            .extract(entry)
            .with_context(|| format!("Failed to extract paths from {}", entry))?;

        let call_deps = output_dir.join(CALL_DEPS_FILE);
        GraphLoader::write_dump(&call_deps, &edges)?;

        // relevance is judged on the extracted subgraph only
        let graph = CallGraph::from_edges(edges.iter().map(|e| (e.caller.as_str(), e.callee.as_str())));
        let relevant: HashSet<String> = find_relevant_nodes(&graph, self.keywords);
        let pruned = prune_strict(&edges, &relevant)?;

        let pruned_call_deps = output_dir.join(PRUNED_CALL_DEPS_FILE);
        let pruned_edges: Vec<CallEdge> = pruned.edges().collect();
        GraphLoader::write_dump(&pruned_call_deps, &pruned_edges)?;

        info!(
            "Extracted {} edge(s) from {}, {} kept after pruning",
            edges.len(),
            entry,
            pruned_edges.len()
        );
        Ok(ExtractSummary {
            edges,
            pruned_edges: pruned_edges.len(),
            call_deps,
            pruned_call_deps,
        })
    }
}

pub struct MergeInputs<'a> {
    pub call_chain: &'a Path,
    pub code_map: &'a Path,
    pub analysis_map: &'a Path,
    /// Explicit roots; detected from the graph when empty
    pub roots: &'a [String],
}

pub struct MergeUsecase<'a> {
    pub combiner: &'a dyn Combiner,
}

impl<'a> MergeUsecase<'a> {
    pub fn run(&self, inputs: &MergeInputs<'_>, output_dir: &Path) -> Result<MergeOutcome> {
        let dump = GraphLoader::load_dump(inputs.call_chain)
            .with_context(|| format!("Failed to read {}", inputs.call_chain.display()))?;
        let code_map = load_json_map(inputs.code_map)?;
        let analysis_map = load_json_map(inputs.analysis_map)?;

        let roots: Vec<String> = if inputs.roots.is_empty() {
            let detected = detect_roots(&dump.graph);
            if detected.kind == RootKind::CycleFallback {
                info!("Graph is fully cyclic, starting from {:?}", detected.nodes);
            }
            detected.nodes
        } else {
            inputs.roots.to_vec()
        };

        let outcome = StackDfsMerger::new(&dump.graph, &code_map, &analysis_map, self.combiner).merge(&roots);

        write_json(&output_dir.join(MERGED_FILE), &outcome.merged)?;
        write_json(&output_dir.join(LATEST_FILE), &outcome.latest)?;
        info!(
            "Merged {} node(s) from {} root(s), {} forced by cycles",
            outcome.merged.len(),
            roots.len(),
            outcome.forced.len()
        );
        Ok(outcome)
    }
}
