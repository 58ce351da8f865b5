pub mod analysis_text;
pub mod callgraph;
pub mod entry_point;
pub mod merge;
pub mod path_extractor;
pub mod relevance;
pub mod store;
