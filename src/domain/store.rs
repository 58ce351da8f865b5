use crate::domain::callgraph::EdgeRecord;
use crate::error::Result;
use dashmap::DashMap;
use sled::Db;
use std::collections::HashSet;

/// Trait for edge storage backends.
/// Implementations must be thread-safe (Send + Sync): the relevance pass reads
/// from worker threads while a dedicated writer thread commits flags.
pub trait EdgeStore: Send + Sync {
    /// Bulk insert raw rows. Returns the number of rows written.
    fn insert_edges(&self, rows: &[EdgeRecord]) -> Result<usize>;

    /// Every row with `enabled = true`.
    fn enabled_edges(&self) -> Result<Vec<EdgeRecord>>;

    /// Callees of `caller` over enabled rows, ordered by `call_seq`.
    /// With `only_propagating`, rows without the log_propagation flag are skipped.
    fn callees(&self, caller: &str, only_propagating: bool) -> Result<Vec<String>>;

    /// Set `log_propagation = 1` on every row matching one of the pairs.
    /// The batch is applied atomically. Returns the number of rows changed.
    fn mark_log_propagation(&self, pairs: &[(String, String)]) -> Result<usize>;

    /// All rows for one caller/callee pair.
    fn get_edges(&self, caller: &str, callee: &str) -> Result<Vec<EdgeRecord>>;

    fn len(&self) -> Result<usize>;

    fn clear(&self) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

/// Rows without a sequence number sort after every sequenced row.
fn seq_key(record: &EdgeRecord) -> u32 {
    record.call_seq.unwrap_or(u32::MAX)
}

// ============================================================================
// MemoryEdgeStore - Fast in-memory storage using DashMap
// ============================================================================

#[derive(Default)]
pub struct MemoryEdgeStore {
    // caller -> rows sorted by call_seq
    by_caller: DashMap<String, Vec<EdgeRecord>>,
}

impl MemoryEdgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EdgeStore for MemoryEdgeStore {
    fn insert_edges(&self, rows: &[EdgeRecord]) -> Result<usize> {
        for row in rows {
            let mut entry = self.by_caller.entry(row.caller.clone()).or_default();
            // upper bound keeps insertion order among equal sequence numbers
            let pos = entry.partition_point(|r| seq_key(r) <= seq_key(row));
            entry.insert(pos, row.clone());
        }
        Ok(rows.len())
    }

    fn enabled_edges(&self) -> Result<Vec<EdgeRecord>> {
        Ok(self
            .by_caller
            .iter()
            .flat_map(|entry| entry.value().iter().filter(|r| r.enabled).cloned().collect::<Vec<_>>())
            .collect())
    }

    fn callees(&self, caller: &str, only_propagating: bool) -> Result<Vec<String>> {
        Ok(self
            .by_caller
            .get(caller)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.enabled && (!only_propagating || r.log_propagation))
                    .map(|r| r.callee.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn mark_log_propagation(&self, pairs: &[(String, String)]) -> Result<usize> {
        let mut changed = 0;
        for (caller, callee) in pairs {
            if let Some(mut rows) = self.by_caller.get_mut(caller) {
                for row in rows.iter_mut().filter(|r| &r.callee == callee) {
                    if !row.log_propagation {
                        row.log_propagation = true;
                        changed += 1;
                    }
                }
            }
        }
        Ok(changed)
    }

    fn get_edges(&self, caller: &str, callee: &str) -> Result<Vec<EdgeRecord>> {
        Ok(self
            .by_caller
            .get(caller)
            .map(|rows| rows.iter().filter(|r| r.callee == callee).cloned().collect())
            .unwrap_or_default())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.by_caller.iter().map(|e| e.value().len()).sum())
    }

    fn clear(&self) -> Result<()> {
        self.by_caller.clear();
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// DiskEdgeStore - Scalable disk-based storage using sled
// ============================================================================

/// Separator between caller bytes and the ordering suffix. 0xFF never occurs
/// in UTF-8, so a prefix scan on `caller + SEP` matches that caller exactly.
const SEP: u8 = 0xFF;

pub struct DiskEdgeStore {
    db: Db,
    // key: caller | SEP | call_seq (BE) | row id (BE), value: bincode EdgeRecord
    edges_tree: sled::Tree,
}

impl DiskEdgeStore {
    pub fn new(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        let edges_tree = db.open_tree("edges")?;

        Ok(Self { db, edges_tree })
    }

    fn caller_prefix(caller: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(caller.len() + 1);
        key.extend_from_slice(caller.as_bytes());
        key.push(SEP);
        key
    }

    fn row_key(record: &EdgeRecord, row_id: u64) -> Vec<u8> {
        let mut key = Self::caller_prefix(&record.caller);
        key.extend_from_slice(&seq_key(record).to_be_bytes());
        key.extend_from_slice(&row_id.to_be_bytes());
        key
    }

    fn rows_for(&self, caller: &str) -> impl Iterator<Item = Result<(sled::IVec, EdgeRecord)>> {
        self.edges_tree
            .scan_prefix(Self::caller_prefix(caller))
            .map(|item| {
                let (key, bytes) = item?;
                let record: EdgeRecord = bincode::deserialize(&bytes)?;
                Ok((key, record))
            })
    }
}

impl EdgeStore for DiskEdgeStore {
    fn insert_edges(&self, rows: &[EdgeRecord]) -> Result<usize> {
        let mut batch = sled::Batch::default();
        for row in rows {
            let row_id = self.db.generate_id()?;
            batch.insert(Self::row_key(row, row_id), bincode::serialize(row)?);
        }
        self.edges_tree.apply_batch(batch)?;
        Ok(rows.len())
    }

    fn enabled_edges(&self) -> Result<Vec<EdgeRecord>> {
        let mut out = Vec::new();
        for item in self.edges_tree.iter() {
            let (_, bytes) = item?;
            let record: EdgeRecord = bincode::deserialize(&bytes)?;
            if record.enabled {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn callees(&self, caller: &str, only_propagating: bool) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for row in self.rows_for(caller) {
            let (_, record) = row?;
            if record.enabled && (!only_propagating || record.log_propagation) {
                out.push(record.callee);
            }
        }
        Ok(out)
    }

    fn mark_log_propagation(&self, pairs: &[(String, String)]) -> Result<usize> {
        let mut batch = sled::Batch::default();
        let mut changed = 0;
        let mut seen = HashSet::new();
        for (caller, callee) in pairs {
            if !seen.insert((caller, callee)) {
                continue;
            }
            for row in self.rows_for(caller) {
                let (key, mut record) = row?;
                if &record.callee == callee && !record.log_propagation {
                    record.log_propagation = true;
                    batch.insert(key, bincode::serialize(&record)?);
                    changed += 1;
                }
            }
        }
        self.edges_tree.apply_batch(batch)?;
        Ok(changed)
    }

    fn get_edges(&self, caller: &str, callee: &str) -> Result<Vec<EdgeRecord>> {
        let mut out = Vec::new();
        for row in self.rows_for(caller) {
            let (_, record) = row?;
            if record.callee == callee {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.edges_tree.len())
    }

    fn clear(&self) -> Result<()> {
        self.edges_tree.clear()?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
