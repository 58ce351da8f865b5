use std::collections::HashMap;
use std::fs;

use logreach::application::{
    ExtractUsecase, ImportUsecase, MergeInputs, MergeUsecase, PruneUsecase, LATEST_FILE, MERGED_FILE,
};
use logreach::config::PrunerConfig;
use logreach::domain::callgraph::CallGraph;
use logreach::domain::merge::StackDfsMerger;
use logreach::domain::relevance::LogKeywords;
use logreach::domain::store::DiskEdgeStore;
use logreach::infrastructure::ConcatCombiner;
use logreach::ports::NodeContext;
use logreach::Result;
use tempfile::tempdir;

const METHOD_CALLS: &str = "\
1\t1\tApp:main()\tSvc:start()\t10\tvoid
2\t1\tApp:main()\tUtil:fmt()\t11\tjava.lang.String
1\t1\tSvc:start()\tDao:load()\t20\tvoid
2\t1\tSvc:start()\t(INT)Logger:info(java.lang.String)\t21\tvoid
1\t1\tDao:load()\t(INT)Logger:error(java.lang.String)\t30\tvoid
1\t1\tUtil:fmt()\tStr:cat()\t40\tjava.lang.String
broken row
";

#[test]
fn import_prune_extract_merge() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("output");
    let input = dir.path().join("method_call.txt");
    fs::write(&input, METHOD_CALLS).unwrap();

    let store = DiskEdgeStore::new(dir.path().join("db").to_str().unwrap()).unwrap();
    let imported = ImportUsecase { store: &store, batch_size: 4 }.run(&input, true).unwrap();
    assert_eq!(imported.imported, 6);
    assert_eq!(imported.skipped, 1);

    let keywords = LogKeywords::default();
    let config = PrunerConfig {
        workers: 2,
        checkpoint_path: dir.path().join("bfs_checkpoint.json"),
        ..PrunerConfig::default()
    };
    let start_nodes = out.join("start_node.txt");
    let pruned = PruneUsecase {
        store: &store,
        keywords: &keywords,
        config: &config,
    }
    .run(Some(start_nodes.as_path()))
    .unwrap();
    assert_eq!(pruned.marked.len(), 5);
    assert_eq!(fs::read_to_string(&start_nodes).unwrap(), "App:main()\n");

    let summary = ExtractUsecase {
        store: &store,
        keywords: &keywords,
        max_depth: 10,
        only_propagating: true,
    }
    .run("App:main()", &out)
    .unwrap();
    let expected_chain = "\
App:main()->Svc:start(), depth 1
Svc:start()->Dao:load(), depth 2
Svc:start()->Logger:info(java.lang.String), depth 2
Dao:load()->Logger:error(java.lang.String), depth 3
";
    assert_eq!(fs::read_to_string(&summary.call_deps).unwrap(), expected_chain);
    assert_eq!(fs::read_to_string(&summary.pruned_call_deps).unwrap(), expected_chain);

    let analysis = dir.path().join("analysis.json");
    fs::write(
        &analysis,
        r#"{
            "App:main()": "A",
            "Svc:start()": "S",
            "Dao:load()": "D",
            "Logger:info(java.lang.String)": "I",
            "Logger:error(java.lang.String)": "E"
        }"#,
    )
    .unwrap();
    let code = dir.path().join("code.json");
    fs::write(
        &code,
        r#"{
            "App:main()": "void main() {}",
            "Svc:start()": "void start() {}",
            "Dao:load()": "void load() {}",
            "Logger:info(java.lang.String)": "void info(String s) {}",
            "Logger:error(java.lang.String)": "void error(String s) {}"
        }"#,
    )
    .unwrap();

    let combiner = ConcatCombiner::new("+");
    let outcome = MergeUsecase { combiner: &combiner }
        .run(
            &MergeInputs {
                call_chain: &summary.pruned_call_deps,
                code_map: &code,
                analysis_map: &analysis,
                roots: &[],
            },
            &out,
        )
        .unwrap();

    assert_eq!(outcome.merged["Dao:load()"], "D+E");
    assert_eq!(outcome.merged["Svc:start()"], "S+D+E+I");
    assert_eq!(outcome.merged["App:main()"], "A+S+D+E+I");
    assert_eq!(outcome.last_folded.as_deref(), Some("A+S+D+E+I"));
    assert!(outcome.forced.is_empty());

    let merged: HashMap<String, String> =
        serde_json::from_str(&fs::read_to_string(out.join(MERGED_FILE)).unwrap()).unwrap();
    assert_eq!(merged["App:main()"], "A+S+D+E+I");
    assert!(out.join(LATEST_FILE).exists());
}

/// Replies the way a chatty model would: prose around a fenced payload.
fn fenced_reply(parent: &NodeContext<'_>, child: &NodeContext<'_>) -> Result<String> {
    Ok(format!("reply\n```xml\n{}{}\n```\nbye", parent.analysis, child.analysis))
}

#[test]
fn merge_normalises_fenced_combiner_output_over_a_cycle() {
    // r -> p -> q -> p
    let graph = CallGraph::from_edges([("r", "p"), ("p", "q"), ("q", "p")]);
    let nodes = ["r", "p", "q"];
    let code: HashMap<String, String> = nodes.iter().map(|n| (n.to_string(), format!("src {}", n))).collect();
    let analysis: HashMap<String, String> = nodes.iter().map(|n| (n.to_string(), n.to_uppercase())).collect();

    let outcome = StackDfsMerger::new(&graph, &code, &analysis, &fenced_reply).merge(&["r"]);

    // q is reached through p and closes the cycle with partial results
    assert_eq!(outcome.forced, vec!["q"]);
    assert_eq!(outcome.finalized, vec!["q", "p", "r"]);
    // raw reply is kept in merged, the fenced payload in latest
    assert!(outcome.merged["q"].starts_with("reply"));
    assert_eq!(outcome.latest["q"], "QP");
    assert_eq!(outcome.latest["p"], "PQP");
    assert_eq!(outcome.latest["r"], "RPQP");
    assert_eq!(outcome.last_folded.as_deref(), Some("RPQP"));
}
