#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use kbscan::model::identifier::Identifier;
use kbscan::model::tree::{NodeKind, NodeSpec};
use proptest::prelude::*;
use sha2::{Digest, Sha256};

// ──────────────────── Merkle fixtures ────────────────────

/// A tree described by names and file bytes; identifiers are derived so that
/// equal subtrees always share an identifier.
#[derive(Debug, Clone)]
pub enum Fixture {
    File(String, Vec<u8>),
    Dir(String, Vec<Fixture>),
}

pub fn file(name: &str, bytes: &[u8]) -> Fixture {
    Fixture::File(name.to_string(), bytes.to_vec())
}

pub fn dir(name: &str, children: Vec<Fixture>) -> Fixture {
    Fixture::Dir(name.to_string(), children)
}

fn digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash.iter()
        .take(20)
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl Fixture {
    pub fn name(&self) -> &str {
        match self {
            Self::File(name, _) | Self::Dir(name, _) => name,
        }
    }

    /// Manifest form with derived identifiers.
    pub fn spec(&self) -> NodeSpec {
        match self {
            Self::File(name, bytes) => {
                NodeSpec::content(name.clone(), Identifier::from_digest(NodeKind::Content, &digest(bytes)))
            }
            Self::Dir(name, children) => {
                let mut specs: Vec<NodeSpec> = children.iter().map(Self::spec).collect();
                specs.sort_by(|a, b| a.name.cmp(&b.name));
                let mut manifest = Vec::new();
                for child in &specs {
                    manifest.extend_from_slice(child.name.as_bytes());
                    manifest.push(0);
                    manifest.extend_from_slice(child.kind.tag().as_bytes());
                    manifest.push(0);
                    manifest.extend_from_slice(child.id.as_str().as_bytes());
                    manifest.push(b'\n');
                }
                NodeSpec::directory(
                    name.clone(),
                    Identifier::from_digest(NodeKind::Directory, &digest(&manifest)),
                    specs,
                )
            }
        }
    }
}

/// Every identifier in a subtree, root included.
pub fn subtree_ids(spec: &NodeSpec) -> Vec<Identifier> {
    let mut out = vec![spec.id.clone()];
    for child in &spec.children {
        out.extend(subtree_ids(child));
    }
    out
}

/// Archive holding the given subtrees in full, plus loose identifiers.
pub fn archive(subtrees: &[&NodeSpec], loose: &[Identifier]) -> HashSet<Identifier> {
    subtrees
        .iter()
        .flat_map(|spec| subtree_ids(spec))
        .chain(loose.iter().cloned())
        .collect()
}

/// Find a node of the manifest by its slash-separated path below the root.
pub fn find_spec<'a>(root: &'a NodeSpec, path: &str) -> &'a NodeSpec {
    path.split('/').fold(root, |node, part| {
        node.children
            .iter()
            .find(|c| c.name == part)
            .unwrap_or_else(|| panic!("no entry {part} in {}", node.name))
    })
}

pub fn write_manifest(dir: &Path, spec: &NodeSpec) -> PathBuf {
    let path = dir.join("tree.json");
    fs::write(&path, serde_json::to_string_pretty(spec).expect("serialize manifest"))
        .expect("write manifest");
    path
}

pub fn write_known(dir: &Path, known: &HashSet<Identifier>) -> PathBuf {
    let path = dir.join("known.txt");
    let mut lines: Vec<&str> = known.iter().map(Identifier::as_str).collect();
    lines.sort_unstable();
    let body = format!("# archived identifiers\n{}\n", lines.join("\n"));
    fs::write(&path, body).expect("write kb state");
    path
}

// ──────────────────── proptest strategies ────────────────────

/// Random fixture trees up to four levels deep. File bodies come from a
/// small alphabet so identical files (and directories) show up often.
pub fn arb_fixture() -> impl Strategy<Value = Fixture> {
    let leaf = (0_u8..6).prop_map(|body| Fixture::File(String::new(), vec![body]));
    let tree = leaf.prop_recursive(4, 48, 5, |inner| {
        prop::collection::vec(inner, 0..5).prop_map(|children| Fixture::Dir(String::new(), children))
    });
    tree.prop_map(|fixture| name_children(fixture, "root"))
}

fn name_children(fixture: Fixture, name: &str) -> Fixture {
    match fixture {
        Fixture::File(_, bytes) => Fixture::File(name.to_string(), bytes),
        Fixture::Dir(_, children) => Fixture::Dir(
            name.to_string(),
            children
                .into_iter()
                .enumerate()
                .map(|(i, child)| {
                    let prefix = if matches!(child, Fixture::File(..)) { "f" } else { "d" };
                    name_children(child, &format!("{prefix}{i}"))
                })
                .collect(),
        ),
    }
}

/// Wrap a generated fixture so the root is always a directory.
pub fn rooted(fixture: Fixture) -> Fixture {
    match fixture {
        Fixture::File(_, bytes) => dir("root", vec![Fixture::File("f0".to_string(), bytes)]),
        dir @ Fixture::Dir(..) => dir,
    }
}

/// Add an empty `bare` directory next to the files of every directory
/// that holds files.
pub fn plant_bare(fixture: Fixture) -> Fixture {
    match fixture {
        file @ Fixture::File(..) => file,
        Fixture::Dir(name, children) => {
            let has_files = children.iter().any(|c| matches!(c, Fixture::File(..)));
            let mut children: Vec<Fixture> = children.into_iter().map(plant_bare).collect();
            if has_files {
                children.push(Fixture::Dir("bare".to_string(), Vec::new()));
            }
            Fixture::Dir(name, children)
        }
    }
}

/// Archive made of the subtrees picked by `mask` (one flag per node in
/// pre-order), closed under the Merkle property.
pub fn archive_from_mask(spec: &NodeSpec, mask: &[bool]) -> HashSet<Identifier> {
    fn walk<'a>(spec: &'a NodeSpec, mask: &[bool], index: &mut usize, picked: &mut Vec<&'a NodeSpec>) {
        if mask.get(*index).copied().unwrap_or(false) {
            picked.push(spec);
        }
        *index += 1;
        for child in &spec.children {
            walk(child, mask, index, picked);
        }
    }
    let mut picked = Vec::new();
    walk(spec, mask, &mut 0, &mut picked);
    archive(&picked, &[])
}

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_kbscan") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "kbscan.exe" } else { "kbscan" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve kbscan binary path for integration test"),
    }
}

/// Run the binary with event logging off and a throwaway HOME, keeping a
/// transcript of the run for post-mortems.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("kbscan-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env("KBS_LOGGING_ENABLED", "false")
        .env_remove("KBS_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute kbscan command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
