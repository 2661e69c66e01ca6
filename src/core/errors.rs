//! KBS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::kb::client::KbError;
use crate::kb::provenance::ProvenanceError;
use crate::scheduler::summary::ScanSummary;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Top-level error type for the scanner core.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("[KBS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[KBS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[KBS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[KBS-1101] invalid source tree: {details}")]
    InvalidTree { details: String },

    #[error("[KBS-2001] transient query failure: {details}")]
    TransientQuery { details: String },

    #[error("[KBS-2002] identifier {identifier} rejected: {details}")]
    PermanentQuery { identifier: String, details: String },

    #[error(
        "[KBS-2003] query exhaustion: no classification progress after {} batches",
        summary.batches_issued
    )]
    QueryExhaustion { summary: Box<ScanSummary> },

    #[error("[KBS-2101] provenance lookup for {identifier} requires authentication")]
    ProvenanceAuthRequired { identifier: String },

    #[error("[KBS-2102] no provenance recorded for {identifier}")]
    ProvenanceNotFound { identifier: String },

    #[error("[KBS-2201] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[KBS-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[KBS-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[KBS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ScanError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "KBS-1001",
            Self::MissingConfig { .. } => "KBS-1002",
            Self::ConfigParse { .. } => "KBS-1003",
            Self::InvalidTree { .. } => "KBS-1101",
            Self::TransientQuery { .. } => "KBS-2001",
            Self::PermanentQuery { .. } => "KBS-2002",
            Self::QueryExhaustion { .. } => "KBS-2003",
            Self::ProvenanceAuthRequired { .. } => "KBS-2101",
            Self::ProvenanceNotFound { .. } => "KBS-2102",
            Self::Serialization { .. } => "KBS-2201",
            Self::Io { .. } => "KBS-3002",
            Self::ChannelClosed { .. } => "KBS-3003",
            Self::Runtime { .. } => "KBS-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientQuery { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<KbError> for ScanError {
    fn from(value: KbError) -> Self {
        match value {
            KbError::Rejected { identifier, reason } => Self::PermanentQuery {
                identifier: identifier.to_string(),
                details: reason,
            },
            other => Self::TransientQuery {
                details: other.to_string(),
            },
        }
    }
}

impl From<ProvenanceError> for ScanError {
    fn from(value: ProvenanceError) -> Self {
        match value {
            ProvenanceError::AuthRequired { identifier } => Self::ProvenanceAuthRequired {
                identifier: identifier.to_string(),
            },
            ProvenanceError::NotFound { identifier } => Self::ProvenanceNotFound {
                identifier: identifier.to_string(),
            },
            ProvenanceError::Transient { details } => Self::TransientQuery { details },
        }
    }
}
