// Command-line entry point for logreach.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use logreach::application::{
    ExtractUsecase, ImportUsecase, MergeInputs, MergeUsecase, PruneUsecase, START_NODES_FILE,
};
use logreach::config::Config;
use logreach::domain::entry_point::detect_roots;
use logreach::domain::relevance::LogKeywords;
use logreach::domain::store::DiskEdgeStore;
use logreach::infrastructure::{CommandCombiner, ConcatCombiner, GraphLoader};
use logreach::ports::Combiner;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./logreach.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Edge store directory, overrides store.path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a tab-separated method_call file into the edge store
    Import {
        /// method_call.txt produced by the call-graph generator
        #[arg(short, long)]
        input: PathBuf,

        /// Keep existing rows instead of clearing the store first
        #[arg(long)]
        append: bool,
    },

    /// Flag every edge that lies on a path to a logging call
    Prune {
        /// Directory for the entry-candidate list
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Worker count, overrides pruner.workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Extract the bounded call subgraph under an entry point
    Extract {
        /// Entry method signature
        #[arg(short, long)]
        entry: String,

        /// Maximum depth, overrides extractor.max_depth
        #[arg(short, long)]
        depth: Option<usize>,

        /// Only follow edges flagged by `prune`
        #[arg(long)]
        only_propagating: bool,

        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
    },

    /// Fold per-node analyses bottom-up over a pruned call chain
    Merge {
        /// Call chain dump (`caller->callee, depth N` per line)
        #[arg(long)]
        call_chain: PathBuf,

        /// JSON map of node -> source code
        #[arg(long)]
        code_map: PathBuf,

        /// JSON map of node -> single-node analysis
        #[arg(long)]
        analysis_map: PathBuf,

        /// Traversal roots; detected from the call chain when omitted
        #[arg(long = "root")]
        roots: Vec<String>,

        /// External combiner program and arguments, overrides merge.combiner_command
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        combiner: Vec<String>,

        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
    },

    /// Print the merge roots of a call chain dump
    Roots {
        #[arg(long)]
        call_chain: PathBuf,
    },

    /// Write the default configuration
    InitConfig {
        #[arg(short, long, default_value = "logreach.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing::subscriber::set_global_default(log_subscriber(cli.verbose, std::io::stderr))
        .context("Failed to install log subscriber")?;

    let mut config = Config::load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(store) = cli.store {
        config.store.path = store;
    }

    match cli.command {
        Commands::Import { input, append } => run_import(&config, &input, append),
        Commands::Prune { output_dir, workers } => {
            if let Some(workers) = workers {
                config.pruner.workers = workers;
            }
            run_prune(&config, &output_dir)
        }
        Commands::Extract {
            entry,
            depth,
            only_propagating,
            output_dir,
        } => {
            if let Some(depth) = depth {
                config.extractor.max_depth = depth;
            }
            if only_propagating {
                config.extractor.require_log_propagation = true;
            }
            run_extract(&config, &entry, &output_dir)
        }
        Commands::Merge {
            call_chain,
            code_map,
            analysis_map,
            roots,
            combiner,
            output_dir,
        } => {
            if !combiner.is_empty() {
                config.merge.combiner_command = Some(combiner);
            }
            let inputs = MergeInputs {
                call_chain: &call_chain,
                code_map: &code_map,
                analysis_map: &analysis_map,
                roots: &roots,
            };
            run_merge(&config, &inputs, &output_dir)
        }
        Commands::Roots { call_chain } => run_roots(&call_chain),
        Commands::InitConfig { output } => {
            config.save(&output)?;
            println!("Wrote default configuration to {}", output.display());
            Ok(())
        }
    }
}

/// `RUST_LOG` applies only when no `-v` is given.
fn log_subscriber<W>(verbose: u8, writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("logreach=info")),
        1 => EnvFilter::new("logreach=debug"),
        _ => EnvFilter::new("logreach=trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer)
        .finish()
}

fn open_store(config: &Config) -> Result<DiskEdgeStore> {
    let path = config.store.path.to_string_lossy();
    DiskEdgeStore::new(&path).with_context(|| format!("Failed to open edge store at {}", path))
}

fn run_import(config: &Config, input: &Path, append: bool) -> Result<()> {
    let store = open_store(config)?;
    let usecase = ImportUsecase {
        store: &store,
        batch_size: config.store.insert_batch_size,
    };
    let report = usecase.run(input, !append)?;
    println!(
        "Imported {} edge(s) ({} malformed line(s) skipped)",
        report.imported, report.skipped
    );
    Ok(())
}

fn run_prune(config: &Config, output_dir: &Path) -> Result<()> {
    let store = open_store(config)?;
    let keywords = LogKeywords::new(&config.relevance.keywords);
    let start_nodes = output_dir.join(START_NODES_FILE);

    let usecase = PruneUsecase {
        store: &store,
        keywords: &keywords,
        config: &config.pruner,
    };
    let report = usecase.run(Some(start_nodes.as_path()))?;
    println!(
        "Marked {} node(s), flagged {} edge row(s){}",
        report.marked.len(),
        report.rows_updated,
        if report.resumed { " (resumed from checkpoint)" } else { "" }
    );
    Ok(())
}

fn run_extract(config: &Config, entry: &str, output_dir: &Path) -> Result<()> {
    let store = open_store(config)?;
    let keywords = LogKeywords::new(&config.relevance.keywords);
    let usecase = ExtractUsecase {
        store: &store,
        keywords: &keywords,
        max_depth: config.extractor.max_depth,
        only_propagating: config.extractor.require_log_propagation,
    };
    let summary = usecase.run(entry, output_dir)?;
    println!(
        "Extracted {} edge(s) to {}, {} kept in {}",
        summary.edges.len(),
        summary.call_deps.display(),
        summary.pruned_edges,
        summary.pruned_call_deps.display()
    );
    Ok(())
}

fn run_merge(config: &Config, inputs: &MergeInputs<'_>, output_dir: &Path) -> Result<()> {
    let combiner: Box<dyn Combiner> = match &config.merge.combiner_command {
        Some(argv) => Box::new(CommandCombiner::from_argv(argv)?),
        None => {
            info!("No combiner command configured, concatenating analyses");
            Box::new(ConcatCombiner::default())
        }
    };

    let outcome = MergeUsecase {
        combiner: &*combiner,
    }
    .run(inputs, output_dir)?;
    println!(
        "Merged {} node(s); results written to {}",
        outcome.merged.len(),
        output_dir.display()
    );
    Ok(())
}

fn run_roots(call_chain: &Path) -> Result<()> {
    let dump = GraphLoader::load_dump(call_chain)
        .with_context(|| format!("Failed to read {}", call_chain.display()))?;
    for root in detect_roots(&dump.graph).nodes {
        println!("{}", root);
    }
    Ok(())
}
