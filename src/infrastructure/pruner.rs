//! Concurrent relevance pass.
//!
//! N workers from a dedicated rayon pool expand a shared backward frontier.
//! Each expansion reports its `(predecessor, node)` edges to a single writer
//! thread that commits `log_propagation` flags in batches. The frontier is
//! snapshotted to a JSON checkpoint every `checkpoint_interval` expansions.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::PrunerConfig;
use crate::domain::callgraph::CallGraph;
use crate::domain::store::EdgeStore;
use crate::error::{GraphError, Result};
use crate::infrastructure::checkpoint::{Checkpoint, CheckpointStore};
use crate::infrastructure::concurrency::build_worker_pool;

/// How long an idle worker sleeps before re-checking the stop flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

type MarkedEdge = (String, String);

#[derive(Debug, Default)]
pub struct PruneReport {
    pub marked: HashSet<String>,
    pub processed: u64,
    pub edges_sent: usize,
    pub rows_updated: usize,
    pub committed_batches: usize,
    pub failed_batches: usize,
    pub resumed: bool,
    pub interrupted: bool,
}

impl PruneReport {
    /// Fails when any writer batch could not be committed.
    pub fn ensure_persisted(&self) -> Result<()> {
        if self.failed_batches > 0 {
            return Err(GraphError::Persistence {
                failed_batches: self.failed_batches,
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct Frontier {
    queue: VecDeque<String>,
    marked: HashSet<String>,
    in_flight: HashSet<String>,
    active: usize,
}

impl Frontier {
    fn from_seeds(seeds: &[String]) -> Self {
        let mut frontier = Frontier::default();
        for seed in seeds {
            if frontier.marked.insert(seed.clone()) {
                frontier.queue.push_back(seed.clone());
            }
        }
        frontier
    }

    fn resume(checkpoint: Checkpoint) -> Self {
        let mut frontier = Frontier {
            marked: checkpoint.marked.into_iter().collect(),
            ..Default::default()
        };
        let mut queued = HashSet::new();
        for node in checkpoint.bfs_queue {
            if queued.insert(node.clone()) {
                // a queued node is marked by construction
                frontier.marked.insert(node.clone());
                frontier.queue.push_back(node);
            }
        }
        frontier
    }

    fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    /// In-flight nodes go first so a resumed pass re-expands them.
    fn snapshot(&self) -> Checkpoint {
        let mut bfs_queue: Vec<String> = self.in_flight.iter().cloned().collect();
        bfs_queue.sort();
        bfs_queue.extend(self.queue.iter().cloned());

        let mut marked: Vec<String> = self.marked.iter().cloned().collect();
        marked.sort();
        Checkpoint { marked, bfs_queue }
    }
}

struct Shared<'a> {
    graph: &'a CallGraph,
    state: Mutex<Frontier>,
    work: Condvar,
    processed: AtomicU64,
    edges_sent: AtomicUsize,
    checkpoints: &'a CheckpointStore,
    // held across snapshot and save so files never go backwards
    checkpoint_lock: Mutex<()>,
    interval: u64,
    stop: &'a AtomicBool,
}

impl Shared<'_> {
    fn next_node(&self) -> Option<String> {
        let mut state = self.state.lock();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(node) = state.queue.pop_front() {
                state.active += 1;
                state.in_flight.insert(node.clone());
                return Some(node);
            }
            if state.active == 0 {
                // nothing queued and nobody can enqueue more
                self.work.notify_all();
                return None;
            }
            self.work.wait_for(&mut state, IDLE_POLL);
        }
    }

    fn finish(&self, node: &str, predecessors: Vec<String>) {
        let mut state = self.state.lock();
        for pred in predecessors {
            // check and enqueue under the same lock
            if state.marked.insert(pred.clone()) {
                state.queue.push_back(pred);
            }
        }
        state.in_flight.remove(node);
        state.active -= 1;
        drop(state);
        self.work.notify_all();
    }

    fn save_checkpoint(&self) {
        let _guard = self.checkpoint_lock.lock();
        let snapshot = self.state.lock().snapshot();
        match self.checkpoints.save(&snapshot) {
            Ok(()) => info!(
                "Checkpoint: {} processed, {} marked, {} queued",
                self.processed.load(Ordering::Relaxed),
                snapshot.marked.len(),
                snapshot.bfs_queue.len()
            ),
            Err(e) => warn!("Failed to write checkpoint: {}", e),
        }
    }
}

fn run_worker(shared: &Shared<'_>, tx: Sender<MarkedEdge>) {
    while let Some(node) = shared.next_node() {
        let predecessors: Vec<String> = shared.graph.callers(&node).cloned().collect();
        for pred in &predecessors {
            match tx.send((pred.clone(), node.clone())) {
                Ok(()) => {
                    shared.edges_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => error!("Writer queue closed, edge {}->{} not persisted", pred, node),
            }
        }
        shared.finish(&node, predecessors);

        let done = shared.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % shared.interval == 0 {
            shared.save_checkpoint();
        }
    }
}

#[derive(Debug, Default)]
struct WriterStats {
    rows_updated: usize,
    committed_batches: usize,
    failed_batches: usize,
}

impl WriterStats {
    fn commit(&mut self, store: &dyn EdgeStore, batch: &mut Vec<MarkedEdge>) {
        match store.mark_log_propagation(batch) {
            Ok(changed) => {
                debug!("Committed batch of {} edge(s), {} row(s) changed", batch.len(), changed);
                self.rows_updated += changed;
                self.committed_batches += 1;
            }
            Err(e) => {
                error!(
                    "Failed to commit batch of {} edge(s): {}; batch: {:?}",
                    batch.len(),
                    e,
                    batch
                );
                self.failed_batches += 1;
            }
        }
        batch.clear();
    }
}

/// Drains the queue until every sender is gone, then flushes the store.
fn run_writer(store: &dyn EdgeStore, rx: Receiver<MarkedEdge>, batch_size: usize) -> WriterStats {
    let mut stats = WriterStats::default();
    let mut batch = Vec::with_capacity(batch_size);

    for edge in rx.iter() {
        batch.push(edge);
        if batch.len() >= batch_size {
            stats.commit(store, &mut batch);
        }
    }
    if !batch.is_empty() {
        stats.commit(store, &mut batch);
    }
    if let Err(e) = store.flush() {
        error!("Failed to flush edge store: {}", e);
        stats.failed_batches += 1;
    }
    stats
}

/// Checkpointed, multi-worker version of [`crate::domain::relevance::propagate`]
/// that also persists the `log_propagation` flag of every traversed edge.
pub struct ConcurrentPruner<'a> {
    graph: &'a CallGraph,
    store: &'a dyn EdgeStore,
    config: PrunerConfig,
    stop: Arc<AtomicBool>,
}

impl<'a> ConcurrentPruner<'a> {
    pub fn new(graph: &'a CallGraph, store: &'a dyn EdgeStore, config: &PrunerConfig) -> Self {
        Self {
            graph,
            store,
            config: config.clone(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raising the returned flag makes workers finish their current node and
    /// exit; the pass then writes a final checkpoint and flushes the writer.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the pass from `seeds`, or from the checkpoint when one is present.
    pub fn run(&self, seeds: &[String]) -> Result<PruneReport> {
        let checkpoints = CheckpointStore::new(&self.config.checkpoint_path);
        let (frontier, resumed) = match checkpoints.load() {
            Some(cp) => (Frontier::resume(cp), true),
            None => (Frontier::from_seeds(seeds), false),
        };
        info!(
            "Starting relevance pass: {} marked, {} queued{}",
            frontier.marked.len(),
            frontier.queue.len(),
            if resumed { " (resumed)" } else { "" }
        );

        let pool = build_worker_pool(self.config.workers)?;
        let workers = pool.current_num_threads();
        let shared = Shared {
            graph: self.graph,
            state: Mutex::new(frontier),
            work: Condvar::new(),
            processed: AtomicU64::new(0),
            edges_sent: AtomicUsize::new(0),
            checkpoints: &checkpoints,
            checkpoint_lock: Mutex::new(()),
            interval: self.config.checkpoint_interval.max(1),
            stop: &self.stop,
        };

        let (tx, rx) = crossbeam_channel::bounded(self.config.channel_capacity.max(1));
        let store = self.store;
        let batch_size = self.config.batch_size.max(1);

        let joined = thread::scope(|s| {
            let writer = s.spawn(move || run_writer(store, rx, batch_size));
            pool.scope(|ps| {
                for _ in 0..workers {
                    let tx = tx.clone();
                    let shared = &shared;
                    ps.spawn(move |_| run_worker(shared, tx));
                }
            });
            // last sender gone: the writer drains and exits
            drop(tx);
            writer.join()
        });
        let stats = joined.unwrap_or_else(|_| {
            error!("Writer thread panicked; unflushed edges were lost");
            WriterStats {
                failed_batches: 1,
                ..Default::default()
            }
        });

        let processed = shared.processed.load(Ordering::Relaxed);
        let edges_sent = shared.edges_sent.load(Ordering::Relaxed);
        let frontier = shared.state.into_inner();
        let interrupted = self.stop.load(Ordering::SeqCst) && !frontier.is_drained();

        if interrupted {
            checkpoints.save(&frontier.snapshot())?;
            warn!(
                "Relevance pass stopped after {} node(s); {} queued node(s) saved to {}",
                processed,
                frontier.queue.len() + frontier.in_flight.len(),
                checkpoints.path().display()
            );
        } else {
            checkpoints.remove()?;
            info!(
                "Relevance pass finished: {} processed, {} marked, {} row(s) flagged",
                processed,
                frontier.marked.len(),
                stats.rows_updated
            );
        }
        if stats.failed_batches > 0 {
            error!("{} writer batch(es) failed", stats.failed_batches);
        }

        Ok(PruneReport {
            marked: frontier.marked,
            processed,
            edges_sent,
            rows_updated: stats.rows_updated,
            committed_batches: stats.committed_batches,
            failed_batches: stats.failed_batches,
            resumed,
            interrupted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::callgraph::EdgeRecord;
    use crate::domain::relevance::{find_log_leaves, propagate, LogKeywords};
    use crate::domain::store::MemoryEdgeStore;
    use std::path::Path;
    use std::time::Instant;
    use tempfile::tempdir;

    const EDGES: &[(&str, &str)] = &[
        ("App:main()", "Svc:handle()"),
        ("Svc:handle()", "Logger:info(String)"),
        ("App:main()", "Util:compute()"),
        ("Util:compute()", "Math:abs(int)"),
        ("Orphan:run()", "Svc:handle()"),
        ("Svc:handle()", "Svc:retry()"),
        ("Svc:retry()", "Svc:handle()"),
    ];

    fn setup() -> (CallGraph, MemoryEdgeStore) {
        let store = MemoryEdgeStore::new();
        let rows: Vec<EdgeRecord> = EDGES
            .iter()
            .enumerate()
            .map(|(i, (a, b))| EdgeRecord::new(i as u32, a, b))
            .collect();
        store.insert_edges(&rows).unwrap();
        (CallGraph::from_edges(EDGES.iter().copied()), store)
    }

    fn config(dir: &Path, workers: usize) -> PrunerConfig {
        PrunerConfig {
            workers,
            batch_size: 2,
            checkpoint_interval: 1,
            checkpoint_path: dir.join("bfs_checkpoint.json"),
            channel_capacity: 4,
        }
    }

    #[test]
    fn test_matches_reference_bfs() {
        let dir = tempdir().unwrap();
        let (graph, store) = setup();
        let seeds = find_log_leaves(&graph, &LogKeywords::default());

        let report = ConcurrentPruner::new(&graph, &store, &config(dir.path(), 4))
            .run(&seeds)
            .unwrap();

        assert_eq!(report.marked, propagate(&graph, &seeds));
        assert!(!report.interrupted);
        assert!(!report.resumed);
        report.ensure_persisted().unwrap();
        // checkpoint removed after a clean pass
        assert!(!dir.path().join("bfs_checkpoint.json").exists());

        assert!(store.get_edges("Orphan:run()", "Svc:handle()").unwrap()[0].log_propagation);
        assert!(store.get_edges("Svc:retry()", "Svc:handle()").unwrap()[0].log_propagation);
        assert!(!store.get_edges("App:main()", "Util:compute()").unwrap()[0].log_propagation);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let (graph, store) = setup();
        let seeds = vec!["Logger:info(String)".to_string()];
        let cfg = config(dir.path(), 2);

        let first = ConcurrentPruner::new(&graph, &store, &cfg).run(&seeds).unwrap();
        let second = ConcurrentPruner::new(&graph, &store, &cfg).run(&seeds).unwrap();
        assert_eq!(first.marked, second.marked);
        assert!(first.rows_updated > 0);
        assert_eq!(second.rows_updated, 0);
    }

    #[test]
    fn test_stop_then_resume() {
        let dir = tempdir().unwrap();
        let (graph, store) = setup();
        let seeds = vec!["Logger:info(String)".to_string()];
        let cfg = config(dir.path(), 2);

        let pruner = ConcurrentPruner::new(&graph, &store, &cfg);
        pruner.stop_handle().store(true, Ordering::SeqCst);
        let stopped = pruner.run(&seeds).unwrap();
        assert!(stopped.interrupted);
        assert_eq!(stopped.processed, 0);

        let saved = CheckpointStore::new(&cfg.checkpoint_path).load().unwrap();
        assert_eq!(saved.bfs_queue, seeds);

        let resumed = ConcurrentPruner::new(&graph, &store, &cfg).run(&[]).unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.marked, propagate(&graph, &seeds));
        assert!(!cfg.checkpoint_path.exists());
    }

    #[test]
    fn test_in_flight_nodes_are_checkpointed() {
        let mut frontier = Frontier::from_seeds(&["a".to_string(), "b".to_string()]);
        let taken = frontier.queue.pop_front().unwrap();
        frontier.in_flight.insert(taken);

        let cp = frontier.snapshot();
        assert_eq!(cp.bfs_queue, vec!["a", "b"]);
        assert_eq!(cp.marked, vec!["a", "b"]);
    }

    struct BrokenStore;

    impl EdgeStore for BrokenStore {
        fn insert_edges(&self, rows: &[EdgeRecord]) -> Result<usize> {
            Ok(rows.len())
        }
        fn enabled_edges(&self) -> Result<Vec<EdgeRecord>> {
            Ok(Vec::new())
        }
        fn callees(&self, _: &str, _: bool) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn mark_log_propagation(&self, _: &[(String, String)]) -> Result<usize> {
            Err(GraphError::Config("read-only".into()))
        }
        fn get_edges(&self, _: &str, _: &str) -> Result<Vec<EdgeRecord>> {
            Ok(Vec::new())
        }
        fn len(&self) -> Result<usize> {
            Ok(0)
        }
        fn clear(&self) -> Result<()> {
            Ok(())
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_batches_surface_after_pass() {
        let dir = tempdir().unwrap();
        let (graph, _) = setup();
        let seeds = vec!["Logger:info(String)".to_string()];
        let cfg = config(dir.path(), 2);

        let report = ConcurrentPruner::new(&graph, &BrokenStore, &cfg).run(&seeds).unwrap();
        assert_eq!(report.marked, propagate(&graph, &seeds));
        assert!(report.failed_batches > 0);
        assert!(matches!(
            report.ensure_persisted(),
            Err(GraphError::Persistence { .. })
        ));
        assert!(!cfg.checkpoint_path.exists());
    }

    /// Holds every commit until the test drops `release`, so the pass can be
    /// inspected while it is still running.
    struct GatedStore {
        inner: MemoryEdgeStore,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl EdgeStore for GatedStore {
        fn insert_edges(&self, rows: &[EdgeRecord]) -> Result<usize> {
            self.inner.insert_edges(rows)
        }
        fn enabled_edges(&self) -> Result<Vec<EdgeRecord>> {
            self.inner.enabled_edges()
        }
        fn callees(&self, caller: &str, only_propagating: bool) -> Result<Vec<String>> {
            self.inner.callees(caller, only_propagating)
        }
        fn mark_log_propagation(&self, edges: &[(String, String)]) -> Result<usize> {
            let _ = self.entered.try_send(());
            // returns once the sender side is dropped
            let _ = self.release.recv();
            self.inner.mark_log_propagation(edges)
        }
        fn get_edges(&self, caller: &str, callee: &str) -> Result<Vec<EdgeRecord>> {
            self.inner.get_edges(caller, callee)
        }
        fn len(&self) -> Result<usize> {
            self.inner.len()
        }
        fn clear(&self) -> Result<()> {
            self.inner.clear()
        }
        fn flush(&self) -> Result<()> {
            self.inner.flush()
        }
    }

    /// `N0 -> N1 -> ... -> N{len-1} -> Logger:info(String)`
    fn chain(len: usize) -> (CallGraph, Vec<EdgeRecord>) {
        let mut names: Vec<String> = (0..len).map(|i| format!("N{}:run()", i)).collect();
        names.push("Logger:info(String)".to_string());
        let rows: Vec<EdgeRecord> = names
            .windows(2)
            .map(|w| EdgeRecord::new(1, &w[0], &w[1]))
            .collect();
        let graph = CallGraph::from_edges(rows.iter().map(|r| (r.caller.as_str(), r.callee.as_str())));
        (graph, rows)
    }

    fn gated(rows: &[EdgeRecord]) -> (GatedStore, Receiver<()>, Sender<()>) {
        let inner = MemoryEdgeStore::new();
        inner.insert_edges(rows).unwrap();
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(0);
        let store = GatedStore {
            inner,
            entered: entered_tx,
            release: release_rx,
        };
        (store, entered_rx, release_tx)
    }

    fn wait_for_file(path: &Path) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if path.exists() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_checkpoint_is_readable_mid_pass() {
        let dir = tempdir().unwrap();
        let (graph, rows) = chain(40);
        let (store, entered, release) = gated(&rows);
        let seeds = vec!["Logger:info(String)".to_string()];
        let cfg = config(dir.path(), 8);

        let (written, mid_pass, report) = thread::scope(|s| {
            let pruner = ConcurrentPruner::new(&graph, &store, &cfg);
            let pass = s.spawn(move || pruner.run(&seeds));

            let _ = entered.recv();
            let written = wait_for_file(&cfg.checkpoint_path);
            let mid_pass = CheckpointStore::new(&cfg.checkpoint_path).load();
            // let the writer go before asserting so a failure cannot hang the scope
            drop(release);
            (written, mid_pass, pass.join().unwrap().unwrap())
        });

        assert!(written);
        let cp = mid_pass.expect("checkpoint written mid-pass must parse");
        assert!(cp.marked.contains(&"Logger:info(String)".to_string()));
        assert!(!cp.bfs_queue.is_empty());
        assert!(cp.bfs_queue.iter().all(|n| cp.marked.contains(n)));

        assert!(!report.interrupted);
        assert_eq!(report.marked.len(), 41);
        assert_eq!(report.rows_updated, 40);
        assert!(!cfg.checkpoint_path.exists());
    }

    #[test]
    fn test_stop_mid_pass_then_resume() {
        let dir = tempdir().unwrap();
        let (graph, rows) = chain(40);
        let (store, entered, release) = gated(&rows);
        let seeds = vec!["Logger:info(String)".to_string()];
        let cfg = config(dir.path(), 4);

        let stopped = thread::scope(|s| {
            let pruner = ConcurrentPruner::new(&graph, &store, &cfg);
            let stop = pruner.stop_handle();
            let pass = s.spawn(move || pruner.run(&seeds));

            // writer is parked on its first batch, so the chain cannot be done
            let _ = entered.recv();
            stop.store(true, Ordering::SeqCst);
            drop(release);
            pass.join().unwrap().unwrap()
        });

        assert!(stopped.interrupted);
        assert!(stopped.processed > 0);
        assert!(stopped.processed < 41);
        stopped.ensure_persisted().unwrap();

        let saved = CheckpointStore::new(&cfg.checkpoint_path).load().unwrap();
        assert!(!saved.bfs_queue.is_empty());

        let resumed = ConcurrentPruner::new(&graph, &store.inner, &cfg).run(&[]).unwrap();
        assert!(resumed.resumed);
        assert!(!resumed.interrupted);
        assert_eq!(resumed.marked, propagate(&graph, &["Logger:info(String)".to_string()]));
        assert!(rows
            .iter()
            .all(|r| store.inner.get_edges(&r.caller, &r.callee).unwrap()[0].log_propagation));
        assert!(!cfg.checkpoint_path.exists());
    }
}
