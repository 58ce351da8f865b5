use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GraphError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Edge store location
    pub store: StoreConfig,

    /// Logging-leaf classification
    pub relevance: RelevanceConfig,

    /// Concurrent propagation pass
    pub pruner: PrunerConfig,

    /// Forward path extraction
    pub extractor: ExtractorConfig,

    /// Merge engine settings
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory of the sled edge database
    pub path: PathBuf,

    /// Rows per insert batch during import
    pub insert_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// Case-insensitive substrings that mark a node as a logging call
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrunerConfig {
    /// BFS worker count; 0 means half the available cores
    pub workers: usize,

    /// Marked edges per log_propagation commit
    pub batch_size: usize,

    /// Processed nodes between checkpoint snapshots
    pub checkpoint_interval: u64,

    /// Checkpoint file, removed after a clean run
    pub checkpoint_path: PathBuf,

    /// Capacity of the writer queue
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Maximum hop distance expanded from the entry point
    pub max_depth: usize,

    /// Only follow edges already flagged by the pruner
    pub require_log_propagation: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// External program used as the combiner; concatenation when unset
    pub combiner_command: Option<Vec<String>>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logreach.db"),
            insert_batch_size: 50_000,
        }
    }
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            keywords: ["log", "logger", "logging", "debug", "info", "warn", "error", "trace", "fatal"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            batch_size: 1000,
            checkpoint_interval: 1000,
            checkpoint_path: PathBuf::from("bfs_checkpoint.json"),
            channel_capacity: 10_000,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            require_log_propagation: false,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| GraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GraphError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the given file, or the first candidate file found, or the defaults.
    /// An explicit path that does not exist is an error.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                let p = p.as_ref();
                if !p.exists() {
                    return Err(GraphError::Config(format!(
                        "configuration file {} not found",
                        p.display()
                    )));
                }
                Self::load(p)
            }
            None => {
                let candidates = ["logreach.toml", ".logreach.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.pruner.batch_size == 0 {
            return Err(GraphError::Config("pruner.batch_size must be positive".into()));
        }
        if self.pruner.checkpoint_interval == 0 {
            return Err(GraphError::Config("pruner.checkpoint_interval must be positive".into()));
        }
        if self.pruner.channel_capacity == 0 {
            return Err(GraphError::Config("pruner.channel_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logreach.toml");
        std::fs::write(&path, "[pruner]\nworkers = 3\n\n[extractor]\nmax_depth = 4\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.pruner.workers, 3);
        assert_eq!(config.pruner.batch_size, 1000);
        assert_eq!(config.extractor.max_depth, 4);
        assert!(config.relevance.keywords.contains(&"logger".to_string()));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.toml");
        let mut config = Config::default();
        config.merge.combiner_command = Some(vec!["python3".into(), "bridge.py".into()]);
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.merge.combiner_command, config.merge.combiner_command);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[pruner]\nbatch_size = 0\n").unwrap();

        assert!(matches!(Config::load(&path), Err(GraphError::Config(_))));
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("logreach.tmol");
        assert!(matches!(
            Config::load_or_default(Some(&missing)),
            Err(GraphError::Config(_))
        ));
    }

    #[test]
    fn test_merge_section_defaults_to_concatenation() {
        let config = Config::default();
        assert!(config.merge.combiner_command.is_none());

        let dir = tempdir().unwrap();
        let path = dir.path().join("logreach.toml");
        std::fs::write(&path, "[store]\npath = \"edges.db\"\n").unwrap();
        let loaded = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.store.path, PathBuf::from("edges.db"));
        assert!(loaded.merge.combiner_command.is_none());
    }
}
