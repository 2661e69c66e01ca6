//! Integration tests: CLI smoke tests and end-to-end library scenarios with
//! configuration files and the JSONL event log.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{archive, dir, file, find_spec, write_known, write_manifest};
use kbscan::core::config::Config;
use kbscan::kb::memory::MemoryKb;
use kbscan::logger::events::{EventLogConfig, spawn_logger};
use kbscan::model::tree::{MerkleTree, NodeSpec};
use kbscan::scan::scan;
use serde_json::Value;

fn fixture() -> NodeSpec {
    dir(
        "proj",
        vec![
            file("Cargo.toml", b"[package]"),
            dir("src", vec![file("main.rs", b"fn main() {}"), file("util.rs", b"pub fn f() {}")]),
            dir("third_party", vec![file("json.hpp", b"json")]),
        ],
    )
    .spec()
}

/// Manifest and kb-state files where `third_party` and `src/main.rs` are archived.
fn inputs(dir: &Path) -> (PathBuf, PathBuf) {
    let spec = fixture();
    let known = archive(
        &[find_spec(&spec, "third_party"), find_spec(&spec, "src/main.rs")],
        &[],
    );
    (write_manifest(dir, &spec), write_known(dir, &known))
}

#[test]
fn help_command_prints_usage() {
    let home = tempfile::tempdir().unwrap();
    let result = common::run_cli_case("help_command_prints_usage", home.path(), &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: kbscan [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn scan_prints_directory_table() {
    let home = tempfile::tempdir().unwrap();
    let (tree, known) = inputs(home.path());
    let result = common::run_cli_case(
        "scan_prints_directory_table",
        home.path(),
        &[
            "--no-color",
            "scan",
            "--tree",
            tree.to_str().unwrap(),
            "--known",
            known.to_str().unwrap(),
            "--policy",
            "content-first",
        ],
    );
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(result.stdout.contains("Archive Scan Results (content-first)"));
    assert!(result.stdout.contains("third_party"));
    assert!(
        result.stdout.contains("partial"),
        "src should be partially known; log: {}",
        result.log_path.display()
    );
}

#[test]
fn scan_json_reports_summary_and_nodes() {
    let home = tempfile::tempdir().unwrap();
    let (tree, known) = inputs(home.path());
    let result = common::run_cli_case(
        "scan_json_reports_summary_and_nodes",
        home.path(),
        &[
            "scan",
            "--tree",
            tree.to_str().unwrap(),
            "--known",
            known.to_str().unwrap(),
            "--json",
        ],
    );
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    let payload: Value = serde_json::from_str(result.stdout.trim()).expect("valid json");
    assert_eq!(payload["command"], "scan");
    assert_eq!(payload["summary"]["policy"], "directory-first");
    assert_eq!(payload["partial"], false);
    let nodes = payload["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 7);
    let third_party = nodes
        .iter()
        .find(|n| n["path"] == "third_party")
        .expect("third_party node");
    assert_eq!(third_party["known"], true);
    assert_eq!(third_party["known_percent"], 100);
    let src = nodes.iter().find(|n| n["path"] == "src").unwrap();
    assert_eq!(src["known_percent"], 50);
    assert_eq!(src["class"], "partial");
}

#[test]
fn bench_emits_csv_rows_for_every_policy() {
    let home = tempfile::tempdir().unwrap();
    let (tree, known) = inputs(home.path());
    let result = common::run_cli_case(
        "bench_emits_csv_rows_for_every_policy",
        home.path(),
        &[
            "bench",
            "--tree",
            tree.to_str().unwrap(),
            "--known",
            known.to_str().unwrap(),
            "--repo-id",
            "1",
            "--origin",
            "https://example.org/proj",
            "--commit",
            "deadbeef",
            "--kb-state",
            "snapshot-1",
            "--with-minimum",
        ],
    );
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    let lines: Vec<&str> = result.stdout.lines().collect();
    assert_eq!(lines.len(), 8, "header + 6 policies + min; log: {}", result.log_path.display());
    assert!(lines[0].starts_with("repo_id,origin,commit,kb_state,repo_size,algorithm"));
    assert!(lines.iter().any(|l| l.contains(",directory-first,")));
    assert!(lines.iter().any(|l| l.contains(",random,")));
    // third_party + main.rs known, Cargo.toml + util.rs missing.
    assert_eq!(lines[7], "1,https://example.org/proj,deadbeef,snapshot-1,7,min,,4,0");
}

#[test]
fn bench_without_header_runs_selected_policies() {
    let home = tempfile::tempdir().unwrap();
    let (tree, known) = inputs(home.path());
    let result = common::run_cli_case(
        "bench_without_header_runs_selected_policies",
        home.path(),
        &[
            "bench",
            "--tree",
            tree.to_str().unwrap(),
            "--known",
            known.to_str().unwrap(),
            "--policy",
            "greedy-bfs",
            "--no-header",
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let lines: Vec<&str> = result.stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(",greedy-bfs,"));
}

#[test]
fn malformed_manifest_is_a_user_error() {
    let home = tempfile::tempdir().unwrap();
    let tree = home.path().join("tree.json");
    std::fs::write(&tree, "{ not json").unwrap();
    let known = home.path().join("known.txt");
    std::fs::write(&known, "").unwrap();
    let result = common::run_cli_case(
        "malformed_manifest_is_a_user_error",
        home.path(),
        &["scan", "--tree", tree.to_str().unwrap(), "--known", known.to_str().unwrap()],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("KBS-2201"), "log: {}", result.log_path.display());
}

#[test]
fn missing_explicit_config_is_a_user_error() {
    let home = tempfile::tempdir().unwrap();
    let (tree, known) = inputs(home.path());
    let missing = home.path().join("nope.toml");
    let result = common::run_cli_case(
        "missing_explicit_config_is_a_user_error",
        home.path(),
        &[
            "--config",
            missing.to_str().unwrap(),
            "scan",
            "--tree",
            tree.to_str().unwrap(),
            "--known",
            known.to_str().unwrap(),
        ],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("KBS-1002"));
}

#[test]
fn config_file_selects_policy_and_log_path() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("events.jsonl");
    let config_path = dir.path().join("kbscan.toml");
    std::fs::write(
        &config_path,
        format!(
            "[scheduler]\npolicy = \"content-first\"\nmax_batch_size = 2\n\n[logging]\nenabled = true\n\n[paths]\njsonl_log = {:?}\n",
            log_path.to_str().unwrap()
        ),
    )
    .unwrap();
    let config = Config::load(Some(&config_path)).unwrap();
    assert_eq!(config.scheduler.max_batch_size, 2);

    let spec = fixture();
    let tree = MerkleTree::from_spec(&spec).unwrap();
    let kb = Arc::new(MemoryKb::new(archive(&[&spec], &[])));
    let (logger, handle) = spawn_logger(EventLogConfig::from_config(&config).unwrap()).unwrap();
    let report = scan(&tree, &config, kb.clone(), &logger).unwrap();
    logger.shutdown();
    handle.join().unwrap();

    assert_eq!(report.summary.policy, "content-first");
    // Four contents in batches of two.
    assert_eq!(report.summary.batches_issued, 2);
    assert!(kb.answered_batches().iter().all(|b| b.len() <= 2));

    let log = std::fs::read_to_string(&log_path).unwrap();
    let events: Vec<Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.first().unwrap()["event"], "scan_start");
    assert_eq!(events.last().unwrap()["event"], "scan_complete");
    assert_eq!(
        events.iter().filter(|e| e["event"] == "batch_dispatched").count(),
        2
    );
}

#[test]
fn scan_attaches_provenance_to_archived_nodes() {
    let home = tempfile::tempdir().unwrap();
    let (tree, known) = inputs(home.path());
    let spec = fixture();
    let third_party = find_spec(&spec, "third_party").id.clone();
    let records = home.path().join("provenance.json");
    std::fs::write(
        &records,
        serde_json::json!({
            "records": { third_party.as_str(): { "origin": "https://github.com/nlohmann/json" } }
        })
        .to_string(),
    )
    .unwrap();
    let result = common::run_cli_case(
        "scan_attaches_provenance_to_archived_nodes",
        home.path(),
        &[
            "scan",
            "--tree",
            tree.to_str().unwrap(),
            "--known",
            known.to_str().unwrap(),
            "--provenance",
            records.to_str().unwrap(),
            "--json",
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload: Value = serde_json::from_str(result.stdout.trim()).expect("valid json");
    let nodes = payload["nodes"].as_array().unwrap();
    let origin_of = |path: &str| {
        nodes.iter().find(|n| n["path"] == path).unwrap()["provenance"]["origin"].clone()
    };
    assert_eq!(origin_of("third_party"), "https://github.com/nlohmann/json");
    assert_eq!(origin_of("third_party/json.hpp"), "https://github.com/nlohmann/json");
    assert_eq!(origin_of("src/main.rs"), Value::Null);
}

#[test]
fn provenance_requiring_credentials_is_reported() {
    let home = tempfile::tempdir().unwrap();
    let (tree, known) = inputs(home.path());
    let records = home.path().join("provenance.json");
    std::fs::write(&records, r#"{"auth_required": true}"#).unwrap();
    let result = common::run_cli_case(
        "provenance_requiring_credentials_is_reported",
        home.path(),
        &[
            "scan",
            "--tree",
            tree.to_str().unwrap(),
            "--known",
            known.to_str().unwrap(),
            "--provenance",
            records.to_str().unwrap(),
        ],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("KBS-2101"), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("requires authentication"));
}
