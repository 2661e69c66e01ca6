//! Scan event channel: a logger thread owns the [`JsonlWriter`] and every
//! other thread sends [`ScanEvent`]s through a bounded crossbeam channel.
//! `try_send()` keeps the coordinator and workers from ever blocking on
//! logging back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::Config;
use crate::core::errors::{Result, ScanError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    ScanStarted {
        policy: String,
        nodes: usize,
        config_hash: String,
    },
    BatchDispatched {
        batch_id: u64,
        size: usize,
    },
    BatchRetried {
        batch_id: u64,
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },
    BatchFailed {
        batch_id: u64,
        size: usize,
        error: String,
    },
    IdentifiersRejected {
        batch_id: u64,
        identifiers: Vec<String>,
    },
    ScanCompleted {
        policy: String,
        batches: usize,
        identifiers: usize,
        retries: usize,
        duration_ms: u64,
        timed_out: bool,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable sender side of the event log.
///
/// A disabled handle swallows every event, so callers never branch on
/// whether logging is configured.
#[derive(Debug, Clone, Default)]
pub struct LoggerHandle {
    tx: Option<Sender<ScanEvent>>,
    dropped_events: Arc<AtomicU64>,
}

impl LoggerHandle {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub const fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Non-blocking send. A full channel drops the event and bumps the counter.
    pub fn send(&self, event: ScanEvent) {
        if let Some(tx) = &self.tx
            && let Err(TrySendError::Full(_)) = tx.try_send(event)
        {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and stop.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ScanEvent::Shutdown);
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl EventLogConfig {
    /// Derive logger settings from the effective configuration.
    /// Returns `None` when logging is disabled.
    pub fn from_config(config: &Config) -> Option<Self> {
        config.logging.enabled.then(|| Self {
            jsonl: JsonlConfig {
                path: config.paths.jsonl_log.clone(),
                max_size_bytes: config.logging.max_size_bytes,
                max_rotated_files: config.logging.max_rotated_files,
            },
            channel_capacity: config.logging.channel_capacity,
        })
    }
}

/// Spawn the logger thread.
///
/// The thread runs until [`LoggerHandle::shutdown`] is called or every
/// handle has been dropped.
pub fn spawn_logger(config: EventLogConfig) -> Result<(LoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ScanEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = LoggerHandle {
        tx: Some(tx),
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("kbscan-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl, &dropped_clone))
        .map_err(|e| ScanError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(rx: &Receiver<ScanEvent>, jsonl_config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ScanEvent::Shutdown) {
            break;
        }
        if let Some(entry) = event_to_log_entry(event) {
            jsonl.write_entry(&entry);
        }
    }

    jsonl.flush();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: ScanEvent) -> Option<LogEntry> {
    let entry = match event {
        ScanEvent::ScanStarted {
            policy,
            nodes,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::ScanStart, Severity::Info);
            e.policy = Some(policy);
            e.nodes = Some(nodes);
            e.config_hash = Some(config_hash);
            e
        }
        ScanEvent::BatchDispatched { batch_id, size } => {
            let mut e = LogEntry::new(EventType::BatchDispatched, Severity::Info);
            e.batch_id = Some(batch_id);
            e.size = Some(size);
            e
        }
        ScanEvent::BatchRetried {
            batch_id,
            attempt,
            backoff_ms,
            error,
        } => {
            let mut e = LogEntry::new(EventType::BatchRetried, Severity::Warning);
            e.batch_id = Some(batch_id);
            e.attempt = Some(attempt);
            e.backoff_ms = Some(backoff_ms);
            e.error_message = Some(error);
            e
        }
        ScanEvent::BatchFailed {
            batch_id,
            size,
            error,
        } => {
            let mut e = LogEntry::new(EventType::BatchFailed, Severity::Error);
            e.batch_id = Some(batch_id);
            e.size = Some(size);
            e.error_code = Some("KBS-2001".to_string());
            e.error_message = Some(error);
            e
        }
        ScanEvent::IdentifiersRejected {
            batch_id,
            identifiers,
        } => {
            let mut e = LogEntry::new(EventType::IdentifiersRejected, Severity::Warning);
            e.batch_id = Some(batch_id);
            e.size = Some(identifiers.len());
            e.error_code = Some("KBS-2002".to_string());
            e.identifiers = Some(identifiers);
            e
        }
        ScanEvent::ScanCompleted {
            policy,
            batches,
            identifiers,
            retries,
            duration_ms,
            timed_out,
        } => {
            let severity = if timed_out {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::ScanComplete, severity);
            e.policy = Some(policy);
            e.nodes = Some(identifiers);
            e.duration_ms = Some(duration_ms);
            e.details = Some(format!(
                "batches={batches} retries={retries} timed_out={timed_out}"
            ));
            e
        }
        ScanEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Error);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        ScanEvent::Shutdown => return None,
    };
    Some(entry)
}
