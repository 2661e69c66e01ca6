//! Top-level CLI definition and dispatch.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use clap::{Args, Parser, Subcommand};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use kbscan::core::config::Config;
use kbscan::core::errors::ScanError;
use kbscan::kb::client::KbClient;
use kbscan::kb::memory::MemoryKb;
use kbscan::kb::provenance::{MemoryProvenance, ProvenanceReport, collect_provenance};
use kbscan::logger::events::{EventLogConfig, LoggerHandle, spawn_logger};
use kbscan::model::tree::MerkleTree;
use kbscan::report::aggregate::{DirectoryClass, DirectoryStats};
use kbscan::report::bench::{self, BenchmarkMeta, BenchmarkRow};
use kbscan::scan::{self, ScanReport};
use kbscan::scheduler::policy::PolicyKind;
use kbscan::scheduler::summary::ScanSummary;

/// kbscan: classify a source tree against an archive with as few queries as possible.
#[derive(Debug, Parser)]
#[command(
    name = "kbscan",
    author,
    version,
    about = "Merkle-aware archive scanner",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (summary only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Classify a tree manifest against a knowledge-base state.
    Scan(ScanArgs),
    /// Compare traversal policies and print benchmark rows.
    Bench(BenchArgs),
}

#[derive(Debug, Clone, Args)]
struct InputArgs {
    /// JSON tree manifest produced by the tree builder.
    #[arg(long, value_name = "PATH")]
    tree: PathBuf,
    /// Known identifiers (JSON array or one per line).
    #[arg(long, value_name = "PATH")]
    known: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Traversal policy (defaults to the configured one).
    #[arg(long, value_name = "POLICY")]
    policy: Option<PolicyKind>,
    /// Provenance records (JSON) to look up for archived nodes.
    #[arg(long, value_name = "PATH")]
    provenance: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct BenchArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Policies to run; repeat for several. All policies when omitted.
    #[arg(long = "policy", value_name = "POLICY")]
    policies: Vec<PolicyKind>,
    /// Repository identifier recorded in each row.
    #[arg(long, default_value = "", value_name = "ID")]
    repo_id: String,
    /// Repository origin URL recorded in each row.
    #[arg(long, default_value = "", value_name = "URL")]
    origin: String,
    /// Commit recorded in each row.
    #[arg(long, default_value = "", value_name = "SHA")]
    commit: String,
    /// Knowledge-base state label recorded in each row.
    #[arg(long, default_value = "", value_name = "LABEL")]
    kb_state: String,
    /// Append the oracle lower-bound row.
    #[arg(long)]
    with_minimum: bool,
    /// Omit the CSV header line.
    #[arg(long)]
    no_header: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<ScanError> for CliError {
    fn from(error: ScanError) -> Self {
        match error {
            ScanError::InvalidConfig { .. }
            | ScanError::MissingConfig { .. }
            | ScanError::ConfigParse { .. }
            | ScanError::InvalidTree { .. }
            | ScanError::ProvenanceAuthRequired { .. }
            | ScanError::Serialization { .. } => Self::User(error.to_string()),
            ScanError::QueryExhaustion { .. } => Self::Partial(error.to_string()),
            _ => Self::Runtime(error.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    let config = Config::load(cli.config.as_deref())?;
    let (logger, log_thread) = start_logger(cli, &config);

    let result = match &cli.command {
        Command::Scan(args) => run_scan(cli, &config, &logger, args),
        Command::Bench(args) => run_bench(cli, &config, &logger, args),
    };

    logger.shutdown();
    if let Some(handle) = log_thread {
        let _ = handle.join();
    }
    if cli.verbose && logger.dropped_events() > 0 {
        eprintln!("kbscan: {} log events dropped", logger.dropped_events());
    }
    result
}

fn start_logger(cli: &Cli, config: &Config) -> (LoggerHandle, Option<JoinHandle<()>>) {
    let Some(log_config) = EventLogConfig::from_config(config) else {
        return (LoggerHandle::disabled(), None);
    };
    let path = log_config.jsonl.path.clone();
    match spawn_logger(log_config) {
        Ok((handle, thread)) => {
            if cli.verbose {
                eprintln!("kbscan: logging events to {}", path.display());
            }
            (handle, Some(thread))
        }
        Err(e) => {
            eprintln!("kbscan: event log disabled: {e}");
            (LoggerHandle::disabled(), None)
        }
    }
}

fn load_inputs(input: &InputArgs) -> Result<(MerkleTree, Arc<MemoryKb>), CliError> {
    let tree = MerkleTree::load_manifest(&input.tree)?;
    let kb = MemoryKb::from_state_file(&input.known)?;
    Ok((tree, Arc::new(kb)))
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

fn run_scan(
    cli: &Cli,
    config: &Config,
    logger: &LoggerHandle,
    args: &ScanArgs,
) -> Result<(), CliError> {
    let (tree, kb) = load_inputs(&args.input)?;
    let mut config = config.clone();
    if let Some(policy) = args.policy {
        config.scheduler.policy = policy;
    }
    if cli.verbose {
        eprintln!(
            "kbscan: {} nodes, {} known identifiers, policy {}",
            tree.len(),
            kb.known_len(),
            config.scheduler.policy
        );
    }

    let client: Arc<dyn KbClient> = kb;
    let report = scan::scan(&tree, &config, client, logger)?;

    let provenance = match &args.provenance {
        Some(path) => {
            let source = MemoryProvenance::from_path(path)?;
            Some(collect_provenance(&tree, &report.statuses, &source, &config.scheduler)?)
        }
        None => None,
    };

    match output_mode(cli) {
        OutputMode::Human => {
            print_scan_human(cli, &tree, &report);
            if let Some(provenance) = &provenance {
                print_provenance_human(&tree, provenance);
            }
        }
        OutputMode::Json => write_json_line(&scan_json(&tree, &report, provenance.as_ref()))?,
    }

    if report.summary.is_partial() {
        return Err(CliError::Partial(format!(
            "scan incomplete: {} node(s) errored{}",
            report.summary.errored.len(),
            if report.summary.timed_out {
                ", deadline reached"
            } else {
                ""
            }
        )));
    }
    Ok(())
}

fn class_label(class: DirectoryClass) -> &'static str {
    match class {
        DirectoryClass::FullyKnown => "known",
        DirectoryClass::PartiallyKnown => "partial",
        DirectoryClass::Unknown => "unknown",
        DirectoryClass::Undetermined => "undetermined",
    }
}

fn colored_class(stats: &DirectoryStats) -> String {
    let label = format!("{:<12}", class_label(stats.class));
    match stats.class {
        DirectoryClass::FullyKnown => label.green().to_string(),
        DirectoryClass::PartiallyKnown => label.yellow().to_string(),
        DirectoryClass::Unknown => label.red().to_string(),
        DirectoryClass::Undetermined => label.dimmed().to_string(),
    }
}

fn print_scan_human(cli: &Cli, tree: &MerkleTree, report: &ScanReport) {
    let summary = &report.summary;
    if !cli.quiet {
        println!("Archive Scan Results ({})\n", summary.policy.bold());
        println!("  {:<12}  {:>6}  {:<60}", "Class", "Known", "Directory");
        println!("  {}", "-".repeat(82));
        for &node in tree.bfs_order() {
            let Some(stats) = report.classification.directory(node) else {
                continue;
            };
            println!(
                "  {}  {:>5}%  {:<60}",
                colored_class(stats),
                stats.known_percent,
                tree.node(node).path.display()
            );
        }
        println!();
    }
    print_summary_human(summary);
    if !cli.quiet && !summary.errored.is_empty() {
        println!("\n  {}", "Undetermined nodes:".yellow());
        for node in &summary.errored {
            println!("    {}  {}  ({})", node.path.display(), node.identifier, node.reason);
        }
    }
}

fn print_summary_human(summary: &ScanSummary) {
    println!(
        "  Queries: {} batches, {} identifiers, {} retries, {} nodes pruned in {:.2}s",
        summary.batches_issued,
        summary.identifiers_queried,
        summary.retries,
        summary.nodes_pruned,
        summary.elapsed().as_secs_f64(),
    );
    println!(
        "  Directories: {} known, {} partial, {} unknown, {} undetermined",
        summary.directories.fully_known,
        summary.directories.partially_known,
        summary.directories.unknown,
        summary.directories.undetermined,
    );
    println!(
        "  Contents: {} known, {} unknown, {} undetermined",
        summary.contents.known, summary.contents.unknown, summary.contents.undetermined,
    );
    if summary.timed_out {
        println!("  {}", "Scan deadline reached; results are partial.".red());
    }
}

/// Print the topmost node of every provenance hit, then failed lookups.
fn print_provenance_human(tree: &MerkleTree, provenance: &ProvenanceReport) {
    println!("\n  {}", "Provenance:".bold());
    for (&node, found) in &provenance.by_node {
        let covered = tree
            .parent(node)
            .is_some_and(|parent| provenance.by_node.contains_key(&parent));
        if covered {
            continue;
        }
        println!(
            "    {}  {}  {}",
            tree.node(node).path.display(),
            found.origin.as_deref().unwrap_or("-"),
            found.revision.as_deref().unwrap_or("-"),
        );
    }
    for (&node, reason) in &provenance.failed {
        println!(
            "    {}  {}",
            tree.node(node).path.display(),
            format!("lookup failed: {reason}").yellow()
        );
    }
}

fn scan_json(tree: &MerkleTree, report: &ScanReport, provenance: Option<&ProvenanceReport>) -> Value {
    let nodes: Vec<Value> = tree
        .iter()
        .map(|(id, node)| {
            let class = report.classification.node(id);
            let mut entry = json!({
                "path": node.path.to_string_lossy(),
                "identifier": node.identifier.as_str(),
                "kind": node.kind.tag(),
                "known": class.known,
                "status": class.status,
                "known_percent": report.classification.known_percent(id),
                "class": class.directory.map(|d| class_label(d.class)),
            });
            if let Some(provenance) = provenance {
                entry["provenance"] = json!(provenance.by_node.get(&id));
            }
            entry
        })
        .collect();
    json!({
        "command": "scan",
        "summary": report.summary,
        "partial": report.summary.is_partial(),
        "nodes": nodes,
    })
}

// ---------------------------------------------------------------------------
// bench
// ---------------------------------------------------------------------------

fn run_bench(
    cli: &Cli,
    config: &Config,
    logger: &LoggerHandle,
    args: &BenchArgs,
) -> Result<(), CliError> {
    let (tree, kb) = load_inputs(&args.input)?;
    let meta = BenchmarkMeta {
        repo_id: args.repo_id.clone(),
        origin: args.origin.clone(),
        commit: args.commit.clone(),
        kb_state: args.kb_state.clone(),
    };
    let policies: Vec<PolicyKind> = if args.policies.is_empty() {
        PolicyKind::ALL.to_vec()
    } else {
        args.policies.clone()
    };

    let mut rows = Vec::with_capacity(policies.len() + 1);
    for kind in policies {
        let policy = kind.build(config.scheduler.random_seed);
        let client: Arc<dyn KbClient> = kb.clone();
        let summary = match scan::scan_with_policy(&tree, policy.as_ref(), config, client, logger) {
            Ok(report) => report.summary,
            Err(ScanError::QueryExhaustion { summary }) => {
                eprintln!("kbscan: {kind}: no classification progress");
                *summary
            }
            Err(e) => return Err(e.into()),
        };
        if cli.verbose {
            eprintln!(
                "kbscan: {kind}: {} batches, {} identifiers",
                summary.batches_issued, summary.identifiers_queried
            );
        }
        rows.push(BenchmarkRow::from_summary(&meta, &tree, &summary));
    }
    if args.with_minimum {
        let minimum = bench::minimum_queries(&tree, |id| kb.contains(id));
        rows.push(BenchmarkRow::minimum(&meta, &tree, minimum));
    }

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&json!({ "command": "bench", "rows": rows }))?,
        OutputMode::Human => write_csv_rows(&rows, !args.no_header)?,
    }
    Ok(())
}

fn write_csv_rows(rows: &[BenchmarkRow], header: bool) -> Result<(), CliError> {
    let stdout = io::stdout().lock();
    bench::write_csv(stdout, rows, header)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("KBS_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref())
}

/// Human output is the default even when piped: `bench` prints CSV there.
fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        _ => OutputMode::Human,
    }
}
