//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use kbscan::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, SchedulerConfig};
pub use crate::core::errors::{Result, ScanError};

// Model
pub use crate::model::identifier::Identifier;
pub use crate::model::status::{Status, StatusTable};
pub use crate::model::tree::{MerkleNode, MerkleTree, NodeId, NodeKind, NodeSpec, TreeBuilder};

// Archive
pub use crate::kb::client::{BatchAnswer, KbClient, KbError, Lookup, QueryOptions};
pub use crate::kb::memory::MemoryKb;
pub use crate::kb::provenance::{Provenance, ProvenanceClient, ProvenanceError, collect_provenance};

// Scheduling
pub use crate::scan::{ScanReport, scan, scan_with_policy};
pub use crate::scheduler::engine::QueryScheduler;
pub use crate::scheduler::policy::{PolicyKind, ScanView, TraversalPolicy};
pub use crate::scheduler::summary::ScanSummary;

// Reporting
pub use crate::report::aggregate::{Classification, DirectoryClass, classify};
pub use crate::report::bench::{BenchmarkMeta, BenchmarkRow, minimum_queries};

// Logging
pub use crate::logger::events::{LoggerHandle, ScanEvent};
