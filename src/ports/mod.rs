use crate::error::Result;

/// What the merge engine knows about one node when it asks for a fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeContext<'a> {
    pub node: &'a str,
    /// Current analysis text (the running result for a parent, the merged result for a child)
    pub analysis: &'a str,
    /// Source code or other metadata blob
    pub source: &'a str,
}

/// Folds a child's information into its parent's running result.
///
/// Implementations may be non-deterministic (the production backend is a
/// language model); the merge engine only relies on each call returning a
/// string or an error.
pub trait Combiner {
    fn combine(&self, parent: &NodeContext<'_>, child: &NodeContext<'_>) -> Result<String>;
}

impl<F> Combiner for F
where
    F: Fn(&NodeContext<'_>, &NodeContext<'_>) -> Result<String>,
{
    fn combine(&self, parent: &NodeContext<'_>, child: &NodeContext<'_>) -> Result<String> {
        self(parent, child)
    }
}
