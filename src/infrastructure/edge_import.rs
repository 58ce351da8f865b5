use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use crate::domain::callgraph::EdgeRecord;
use crate::domain::store::EdgeStore;
use crate::error::Result;

/// Leading `(XX)` call-type tag on the callee column.
static CALL_TYPE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\([^)]+\)").unwrap());

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub batches: usize,
}

/// Loads tab-separated call-graph generator output into an [`EdgeStore`].
///
/// Columns: `call_seq  enabled  caller  callee  call_line_no  call_return_type`.
/// Extra columns are ignored.
pub struct EdgeImporter<'a> {
    store: &'a dyn EdgeStore,
    batch_size: usize,
}

impl<'a> EdgeImporter<'a> {
    pub fn new(store: &'a dyn EdgeStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn import_file(&self, path: &Path) -> Result<ImportReport> {
        info!("Importing method calls from {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        self.import_lines(reader.lines())
    }

    pub fn import_lines<I>(&self, lines: I) -> Result<ImportReport>
    where
        I: IntoIterator<Item = std::io::Result<String>>,
    {
        let mut report = ImportReport::default();
        let mut pending = Vec::with_capacity(self.batch_size);

        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_method_call(&line) {
                Some(record) => pending.push(record),
                None => {
                    debug!("Skipping short row: {:?}", line);
                    report.skipped += 1;
                }
            }
            if pending.len() >= self.batch_size {
                report.imported += self.store.insert_edges(&pending)?;
                report.batches += 1;
                pending.clear();
            }
        }

        if !pending.is_empty() {
            report.imported += self.store.insert_edges(&pending)?;
            report.batches += 1;
        }
        self.store.flush()?;

        info!(
            "Imported {} row(s) in {} batch(es), skipped {}",
            report.imported, report.batches, report.skipped
        );
        Ok(report)
    }
}

/// Parse one tab-separated row. Integer columns that fail to parse become
/// `None`; an unparseable `enabled` column counts as disabled.
pub fn parse_method_call(line: &str) -> Option<EdgeRecord> {
    let cols: Vec<&str> = line.trim().split('\t').collect();
    if cols.len() < 6 {
        return None;
    }

    let enabled = cols[1].trim().parse::<i64>().map(|v| v != 0).unwrap_or(false);
    Some(EdgeRecord {
        call_seq: cols[0].trim().parse().ok(),
        enabled,
        caller: cols[2].to_string(),
        callee: CALL_TYPE_TAG.replace(cols[3], "").into_owned(),
        call_line_no: cols[4].trim().parse().ok(),
        call_return_type: cols[5].to_string(),
        log_propagation: false,
    })
}
