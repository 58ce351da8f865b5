use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::domain::callgraph::{CallEdge, CallGraph};
use crate::domain::store::EdgeStore;
use crate::error::Result;

/// Where a call graph is materialised from.
pub enum GraphSource<'a> {
    /// Enabled rows of an edge store
    Store(&'a dyn EdgeStore),
    /// A flat `caller->callee[, depth N]` dump
    Dump(&'a Path),
}

/// A parsed dump: the edges in file order plus the graph built from them.
#[derive(Debug, Default)]
pub struct LoadedDump {
    pub edges: Vec<CallEdge>,
    pub graph: CallGraph,
    pub skipped: usize,
}

pub struct GraphLoader;

impl GraphLoader {
    pub fn load(source: GraphSource<'_>) -> Result<CallGraph> {
        match source {
            GraphSource::Store(store) => Self::load_from_store(store),
            GraphSource::Dump(path) => Ok(Self::load_dump(path)?.graph),
        }
    }

    pub fn load_from_store(store: &dyn EdgeStore) -> Result<CallGraph> {
        let mut graph = CallGraph::new();
        for row in store.enabled_edges()? {
            graph.add_edge(&row.caller, &row.callee);
        }
        info!(
            "Loaded graph from store: {} nodes, {} edges",
            graph.nodes().len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    pub fn load_dump(path: &Path) -> Result<LoadedDump> {
        let file = File::open(path)?;
        let mut dump = LoadedDump::default();

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_edge_line(&line) {
                Some(edge) => {
                    dump.graph.add_edge(&edge.caller, &edge.callee);
                    dump.edges.push(edge);
                }
                None => {
                    debug!("Skipping malformed line {} in {}: {:?}", line_no + 1, path.display(), line);
                    dump.skipped += 1;
                }
            }
        }

        info!(
            "Loaded {} edge(s) from {} ({} skipped)",
            dump.edges.len(),
            path.display(),
            dump.skipped
        );
        Ok(dump)
    }

    /// Write edges one per line in dump format.
    pub fn write_dump<'e, I>(path: &Path, edges: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'e CallEdge>,
    {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut out = BufWriter::new(File::create(path)?);
        let mut written = 0;
        for edge in edges {
            writeln!(out, "{}", edge)?;
            written += 1;
        }
        out.flush()?;
        Ok(written)
    }

    /// Write one node per line.
    pub fn write_nodes(path: &Path, nodes: &[String]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut out = BufWriter::new(File::create(path)?);
        for node in nodes {
            writeln!(out, "{}", node)?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Parse `caller->callee` or `caller->callee, depth N`.
///
/// Returns `None` for a line without exactly one `->` or with an empty endpoint.
/// A depth suffix that is not an integer leaves the depth unset.
pub fn parse_edge_line(line: &str) -> Option<CallEdge> {
    let (caller, rest) = line.trim().split_once("->")?;
    if rest.contains("->") {
        return None;
    }
    let caller = caller.trim();
    let rest = rest.trim();

    let (callee, depth) = match rest.rsplit_once(", depth") {
        Some((callee, depth)) => (callee.trim(), depth.trim().parse::<usize>().ok()),
        None => (rest, None),
    };

    if caller.is_empty() || callee.is_empty() {
        return None;
    }
    Some(CallEdge::new(caller, callee, depth))
}
