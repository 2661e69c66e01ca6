//! JSONL writer: one self-contained JSON object per scan event.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! tailing reader never sees a partial line. Failures degrade the writer
//! instead of surfacing to the scan:
//! 1. Primary file path
//! 2. stderr with `[KBS-JSONL]` prefix
//! 3. Silent discard

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ScanError};

const BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ScanStart,
    BatchDispatched,
    BatchRetried,
    BatchFailed,
    IdentifiersRejected,
    ScanComplete,
    Error,
}

/// A single JSONL line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<u64>,
    /// Identifiers in the batch, or affected by the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            policy: None,
            batch_id: None,
            size: None,
            attempt: None,
            backoff_ms: None,
            duration_ms: None,
            nodes: None,
            config_hash: None,
            identifiers: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Where lines currently go; only ever moves down the list.
enum Sink {
    File(BufWriter<File>),
    Stderr,
    Discard,
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Rotate once the file would grow past this size.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// Append-only JSONL writer with size rotation and degradation.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    bytes_written: u64,
}

impl JsonlWriter {
    pub fn open(config: JsonlConfig) -> Self {
        let (sink, bytes_written) = match open_append(&config.path) {
            Ok((file, size)) => (Sink::File(BufWriter::with_capacity(BUFFER_BYTES, file)), size),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[KBS-JSONL] {e}, using stderr");
                (Sink::Stderr, 0)
            }
        };
        Self {
            config,
            sink,
            bytes_written,
        }
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[KBS-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File(file) = &mut self.sink {
            let _ = file.flush();
        }
    }

    pub fn state(&self) -> &'static str {
        match self.sink {
            Sink::File(_) => "normal",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if matches!(self.sink, Sink::File(_)) && self.bytes_written + len > self.config.max_size_bytes {
            self.rotate();
        }

        loop {
            let written = match &mut self.sink {
                Sink::File(file) => file.write_all(line.as_bytes()).is_ok(),
                Sink::Stderr => write!(io::stderr(), "[KBS-JSONL] {line}").is_ok(),
                Sink::Discard => return,
            };
            if written {
                if matches!(self.sink, Sink::File(_)) {
                    self.bytes_written += len;
                }
                return;
            }
            self.degrade();
        }
    }

    fn degrade(&mut self) {
        self.sink = match self.sink {
            Sink::File(_) => {
                let _ = writeln!(io::stderr(), "[KBS-JSONL] primary write failed, using stderr");
                Sink::Stderr
            }
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
    }

    /// Shift `path.N` to `path.N+1`, dropping the oldest, then reopen.
    fn rotate(&mut self) {
        self.flush();
        let base = &self.config.path;
        let keep = self.config.max_rotated_files;

        if keep == 0 {
            let _ = fs::remove_file(base);
        } else {
            for index in (1..keep).rev() {
                let _ = rename(rotated_name(base, index), rotated_name(base, index + 1));
            }
            let _ = rename(base, rotated_name(base, 1));
        }

        match open_append(base) {
            Ok((file, _)) => {
                self.sink = Sink::File(BufWriter::with_capacity(BUFFER_BYTES, file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ScanError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ScanError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `scan.jsonl` → `scan.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
