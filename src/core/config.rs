//! Configuration system: TOML file + env var overrides + smart defaults.
//!
//! The effective [`Config`] is built once before a scan starts and handed to
//! the scheduler by value; nothing in the core reads ambient state afterwards.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ScanError};
use crate::scheduler::policy::PolicyKind;

/// Maximum number of identifiers the archive accepts in one existence request.
pub const QUERY_LIMIT: usize = 1000;

/// Full kbscan configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Query scheduler knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on identifiers per existence request.
    pub max_batch_size: usize,
    /// Maximum number of outstanding requests.
    pub concurrency: usize,
    /// Retries per batch after the first attempt (transient failures only).
    pub retry_limit: u32,
    /// First backoff delay; doubles on each further retry.
    pub backoff_base_ms: u64,
    /// Ceiling for the backoff delay.
    pub backoff_max_ms: u64,
    /// Per-request deadline.
    pub batch_timeout_ms: u64,
    /// Whole-scan deadline. 0 disables it.
    pub scan_timeout_ms: u64,
    /// Traversal policy chosen at scan start.
    pub policy: PolicyKind,
    /// Seed for the random policy.
    pub random_seed: u64,
}

/// JSONL event log tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub channel_capacity: usize,
}

/// Filesystem paths used by kbscan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: QUERY_LIMIT,
            concurrency: 4,
            retry_limit: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 8_000,
            batch_timeout_ms: 30_000,
            scan_timeout_ms: 0,
            policy: PolicyKind::DirectoryFirst,
            random_seed: 0,
        }
    }
}

impl SchedulerConfig {
    /// Deadline applied to each `batch_exists` call.
    #[must_use]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Optional deadline for the whole scan.
    #[must_use]
    pub fn scan_timeout(&self) -> Option<Duration> {
        (self.scan_timeout_ms > 0).then(|| Duration::from_millis(self.scan_timeout_ms))
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        let delay = self.backoff_base_ms.saturating_mul(1_u64 << shift);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 3,
            channel_capacity: 1024,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[KBS-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("kbscan").join("config.toml"),
            jsonl_log: home_dir
                .join(".local")
                .join("share")
                .join("kbscan")
                .join("scan.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ScanError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(ScanError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for log correlation (FNV-1a).
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let s = &mut self.scheduler;
        set_parsed(&mut lookup, "KBS_SCHEDULER_MAX_BATCH_SIZE", &mut s.max_batch_size)?;
        set_parsed(&mut lookup, "KBS_SCHEDULER_CONCURRENCY", &mut s.concurrency)?;
        set_parsed(&mut lookup, "KBS_SCHEDULER_RETRY_LIMIT", &mut s.retry_limit)?;
        set_parsed(&mut lookup, "KBS_SCHEDULER_BACKOFF_BASE_MS", &mut s.backoff_base_ms)?;
        set_parsed(&mut lookup, "KBS_SCHEDULER_BACKOFF_MAX_MS", &mut s.backoff_max_ms)?;
        set_parsed(&mut lookup, "KBS_SCHEDULER_BATCH_TIMEOUT_MS", &mut s.batch_timeout_ms)?;
        set_parsed(&mut lookup, "KBS_SCHEDULER_SCAN_TIMEOUT_MS", &mut s.scan_timeout_ms)?;
        set_parsed(&mut lookup, "KBS_SCHEDULER_POLICY", &mut s.policy)?;
        set_parsed(&mut lookup, "KBS_SCHEDULER_RANDOM_SEED", &mut s.random_seed)?;

        set_parsed(&mut lookup, "KBS_LOGGING_ENABLED", &mut self.logging.enabled)?;
        if let Some(raw) = lookup("KBS_LOGGING_JSONL_PATH") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.max_batch_size == 0 || s.max_batch_size > QUERY_LIMIT {
            return Err(ScanError::InvalidConfig {
                details: format!(
                    "scheduler.max_batch_size must be in [1, {QUERY_LIMIT}], got {}",
                    s.max_batch_size
                ),
            });
        }
        if s.concurrency == 0 {
            return Err(ScanError::InvalidConfig {
                details: "scheduler.concurrency must be >= 1".to_string(),
            });
        }
        if s.backoff_base_ms > s.backoff_max_ms {
            return Err(ScanError::InvalidConfig {
                details: format!(
                    "scheduler.backoff_base_ms ({}) must be <= scheduler.backoff_max_ms ({})",
                    s.backoff_base_ms, s.backoff_max_ms
                ),
            });
        }
        if s.batch_timeout_ms == 0 {
            return Err(ScanError::InvalidConfig {
                details: "scheduler.batch_timeout_ms must be > 0".to_string(),
            });
        }
        if self.logging.enabled && self.logging.channel_capacity == 0 {
            return Err(ScanError::InvalidConfig {
                details: "logging.channel_capacity must be >= 1 when logging is enabled"
                    .to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<T>()
            .map_err(|error| ScanError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}
