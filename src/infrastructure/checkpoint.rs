//! Checkpoint Module
//!
//! Persists the frontier of an interrupted relevance pass so a later run can
//! resume instead of starting from the seeds again.
//!
//! File layout (JSON):
//! - `marked` - every node already known to reach a logging call
//! - `bfs_queue` - nodes still waiting to be expanded, including the ones a
//!   worker was holding when the snapshot was taken

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub marked: Vec<String>,
    pub bfs_queue: Vec<String>,
}

/// Checkpoint file manager. Saves through one store are serialised, since
/// they share a temp file.
pub struct CheckpointStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Load the checkpoint if one exists.
    /// A file that cannot be read or parsed is reported and ignored.
    pub fn load(&self) -> Option<Checkpoint> {
        if !self.path.exists() {
            debug!("No checkpoint at {}", self.path.display());
            return None;
        }

        match self.read() {
            Ok(cp) => {
                info!(
                    "Resuming from checkpoint {}: {} marked, {} queued",
                    self.path.display(),
                    cp.marked.len(),
                    cp.bfs_queue.len()
                );
                Some(cp)
            }
            Err(e) => {
                error!(
                    "Failed to load checkpoint {}: {}; starting from seeds",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Write the snapshot through a temporary file so a crash mid-write
    /// leaves the previous checkpoint intact.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string(checkpoint)?;
        let tmp = self.path.with_extension("json.tmp");
        let _guard = self.write_lock.lock();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(
            "Checkpoint saved: {} marked, {} queued",
            checkpoint.marked.len(),
            checkpoint.bfs_queue.len()
        );
        Ok(())
    }

    /// Delete the checkpoint.
    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            info!("Removed checkpoint {}", self.path.display());
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Checkpoint> {
        let mut contents = String::new();
        File::open(&self.path)?.read_to_string(&mut contents)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
