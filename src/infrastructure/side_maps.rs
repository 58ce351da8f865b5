use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;

/// Load a JSON object of `Node -> text`. A missing file yields an empty map
/// so a merge can still run on whatever the other map provides.
pub fn load_json_map(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        warn!("Side map {} not found, continuing with an empty map", path.display());
        return Ok(HashMap::new());
    }
    let map: HashMap<String, String> = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    info!("Loaded {} entries from {}", map.len(), path.display());
    Ok(map)
}

/// Write any serialisable value as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    out.flush()?;
    Ok(())
}
