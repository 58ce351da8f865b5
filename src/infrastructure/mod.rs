// Infrastructure for logreach: file formats, persistence helpers and the
// concurrent relevance pass.

pub mod checkpoint;
pub mod combiner;
pub mod concurrency;
pub mod edge_import;
pub mod graph_loader;
pub mod pruner;
pub mod side_maps;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use combiner::{CommandCombiner, ConcatCombiner};
pub use edge_import::{EdgeImporter, ImportReport};
pub use graph_loader::{GraphLoader, GraphSource, LoadedDump};
pub use pruner::{ConcurrentPruner, PruneReport};
