#![forbid(unsafe_code)]

//! kbscan: classify a source tree against a remote archive's existence
//! oracle with as few round trips as possible.
//!
//! Every file and directory of the tree carries a content-derived
//! identifier. A directory found in the archive implies its whole subtree is
//! archived too, so the scheduler prunes it instead of asking about each
//! descendant. Which nodes get asked first is up to a pluggable
//! [`TraversalPolicy`](scheduler::policy::TraversalPolicy); every policy
//! reaches the same classification, only the number of queries differs.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use kbscan::prelude::*;
//!
//! let tree = MerkleTree::load_manifest(Path::new("tree.json"))?;
//! let kb = Arc::new(MemoryKb::from_state_file(Path::new("known.txt"))?);
//! let report = scan(&tree, &Config::default(), kb, &LoggerHandle::disabled())?;
//! println!("{} identifiers queried", report.summary.identifiers_queried);
//! # Ok::<(), ScanError>(())
//! ```

pub mod prelude;

pub mod core;
pub mod kb;
pub mod logger;
pub mod model;
pub mod report;
pub mod scan;
pub mod scheduler;
