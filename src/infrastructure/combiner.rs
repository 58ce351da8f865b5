//! Combiner backends for the merge engine.

use serde_json::json;
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::ports::{Combiner, NodeContext};

/// Appends the child's analysis to the parent's running result.
#[derive(Debug, Clone, Default)]
pub struct ConcatCombiner {
    separator: String,
}

impl ConcatCombiner {
    pub fn new(separator: &str) -> Self {
        Self {
            separator: separator.to_string(),
        }
    }
}

impl Combiner for ConcatCombiner {
    fn combine(&self, parent: &NodeContext<'_>, child: &NodeContext<'_>) -> Result<String> {
        let sep = if self.separator.is_empty() { "\n" } else { self.separator.as_str() };
        Ok(format!("{}{}{}", parent.analysis, sep, child.analysis))
    }
}

/// Runs an external program once per fold.
///
/// The request `{"parent": {...}, "child": {...}}` (each with `node`,
/// `analysis` and `source`) is written to the program's stdin; its stdout,
/// trimmed, is the combined result. A non-zero exit is a combine failure.
#[derive(Debug, Clone)]
pub struct CommandCombiner {
    program: String,
    args: Vec<String>,
}

impl CommandCombiner {
    /// `argv[0]` is the program, the rest its arguments.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| GraphError::Config("combiner_command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn request(parent: &NodeContext<'_>, child: &NodeContext<'_>) -> serde_json::Value {
        json!({ "parent": Self::side(parent), "child": Self::side(child) })
    }

    fn side(ctx: &NodeContext<'_>) -> serde_json::Value {
        json!({
            "node": ctx.node,
            "analysis": ctx.analysis,
            "source": ctx.source,
        })
    }
}

impl Combiner for CommandCombiner {
    fn combine(&self, parent: &NodeContext<'_>, child: &NodeContext<'_>) -> Result<String> {
        let payload = serde_json::to_vec(&Self::request(parent, child))?;
        debug!("Combining {} <- {} via {}", parent.node, child.node, self.program);

        let mut proc = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = proc
            .stdin
            .take()
            .ok_or_else(|| GraphError::Combine("combiner stdin unavailable".into()))?;
        // feed stdin on a side thread so a chatty child cannot block on a full stdout pipe
        let feeder = thread::spawn(move || stdin.write_all(&payload));

        let output = proc.wait_with_output()?;
        match feeder.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Combiner closed stdin early: {}", e),
            Err(_) => return Err(GraphError::Combine("stdin feeder panicked".into())),
        }

        if !output.status.success() {
            return Err(GraphError::Combine(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
