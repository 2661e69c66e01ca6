//! Provenance lookups: where a known object was first archived.
//!
//! This path is separate from the pruning scheduler. It runs after a scan,
//! only touches nodes the archive may hold, and keeps "needs credentials"
//! apart from "nothing recorded".

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::SchedulerConfig;
use crate::core::errors::{Result, ScanError};
use crate::model::identifier::Identifier;
use crate::model::status::{Status, StatusTable};
use crate::model::tree::{MerkleTree, NodeId};

/// Archive metadata attached to a known object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub origin: Option<String>,
    pub revision: Option<String>,
    pub release: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvenanceError {
    #[error("provenance for {identifier} requires authentication")]
    AuthRequired { identifier: Identifier },

    #[error("no provenance recorded for {identifier}")]
    NotFound { identifier: Identifier },

    #[error("transient provenance failure: {details}")]
    Transient { details: String },
}

/// Permission-gated provenance service.
pub trait ProvenanceClient: Send + Sync {
    fn get_provenance(&self, identifier: &Identifier) -> std::result::Result<Provenance, ProvenanceError>;
}

/// Provenance resolved for a scanned tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceReport {
    pub by_node: BTreeMap<NodeId, Provenance>,
    /// Nodes whose lookup kept failing transiently, with the last error.
    pub failed: BTreeMap<NodeId, String>,
    /// Number of distinct identifiers looked up.
    pub lookups: usize,
    /// Transient failures that were retried.
    pub retries: u32,
}

#[derive(Debug, Clone)]
enum Lookup {
    Found(Provenance),
    Missing,
    Failed(String),
}

/// Resolve provenance top-down.
///
/// A directory hit covers its whole subtree; a miss on a directory descends
/// into its children. Nodes whose effective status is not known or errored
/// are never asked about, but their subtrees are still visited.
///
/// Transient failures are retried with the scheduler's backoff. A lookup
/// that still fails is recorded in [`ProvenanceReport::failed`] and treated
/// as a miss. `AuthRequired` aborts the walk.
pub fn collect_provenance(
    tree: &MerkleTree,
    statuses: &StatusTable,
    client: &dyn ProvenanceClient,
    retry: &SchedulerConfig,
) -> Result<ProvenanceReport> {
    let effective = statuses.effective_all(tree);
    let mut report = ProvenanceReport::default();
    let mut cache: HashMap<Identifier, Lookup> = HashMap::new();
    let mut queue = VecDeque::from([tree.root()]);

    while let Some(node) = queue.pop_front() {
        let askable = matches!(
            effective[node.index()],
            Status::Known | Status::Unresolved
        );
        let lookup = if askable {
            let identifier = tree.identifier(node);
            if let Some(cached) = cache.get(identifier) {
                cached.clone()
            } else {
                report.lookups += 1;
                let lookup = lookup_with_retry(client, identifier, retry, &mut report.retries)?;
                cache.insert(identifier.clone(), lookup.clone());
                lookup
            }
        } else {
            Lookup::Missing
        };

        match lookup {
            Lookup::Found(provenance) => {
                for covered in tree.descendants(node) {
                    report.by_node.insert(covered, provenance.clone());
                }
                report.by_node.insert(node, provenance);
            }
            Lookup::Failed(reason) => {
                report.failed.insert(node, reason);
                queue.extend(tree.children(node).iter().copied());
            }
            Lookup::Missing => queue.extend(tree.children(node).iter().copied()),
        }
    }
    Ok(report)
}

fn lookup_with_retry(
    client: &dyn ProvenanceClient,
    identifier: &Identifier,
    retry: &SchedulerConfig,
    retries: &mut u32,
) -> Result<Lookup> {
    let mut attempt = 0_u32;
    loop {
        match client.get_provenance(identifier) {
            Ok(provenance) => return Ok(Lookup::Found(provenance)),
            Err(ProvenanceError::NotFound { .. }) => return Ok(Lookup::Missing),
            Err(ProvenanceError::Transient { details }) => {
                if attempt >= retry.retry_limit {
                    return Ok(Lookup::Failed(details));
                }
                attempt += 1;
                *retries += 1;
                thread::sleep(retry.backoff_for(attempt));
            }
            Err(other) => return Err(other.into()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProvenanceFile {
    #[serde(default)]
    auth_required: bool,
    #[serde(default)]
    records: HashMap<Identifier, Provenance>,
}

/// Map-backed [`ProvenanceClient`] for tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryProvenance {
    records: HashMap<Identifier, Provenance>,
    auth_required: bool,
    faults: Mutex<VecDeque<ProvenanceError>>,
    asked: Mutex<Vec<Identifier>>,
}

impl MemoryProvenance {
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (Identifier, Provenance)>,
    {
        Self {
            records: records.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Load a records file: a JSON object with an optional `auth_required`
    /// flag and a `records` map from identifier to provenance.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ScanError::io(path, source))?;
        let file: ProvenanceFile = serde_json::from_str(&raw)?;
        Ok(Self {
            records: file.records,
            auth_required: file.auth_required,
            ..Self::default()
        })
    }

    /// Make the next lookup fail with `error`. Faults are consumed in order.
    pub fn push_fault(&self, error: ProvenanceError) {
        self.faults.lock().push_back(error);
    }

    /// Refuse every lookup as unauthenticated.
    #[must_use]
    pub const fn requiring_auth(mut self) -> Self {
        self.auth_required = true;
        self
    }

    pub fn asked(&self) -> Vec<Identifier> {
        self.asked.lock().clone()
    }
}

impl ProvenanceClient for MemoryProvenance {
    fn get_provenance(&self, identifier: &Identifier) -> std::result::Result<Provenance, ProvenanceError> {
        self.asked.lock().push(identifier.clone());
        if let Some(fault) = self.faults.lock().pop_front() {
            return Err(fault);
        }
        if self.auth_required {
            return Err(ProvenanceError::AuthRequired {
                identifier: identifier.clone(),
            });
        }
        self.records
            .get(identifier)
            .cloned()
            .ok_or_else(|| ProvenanceError::NotFound {
                identifier: identifier.clone(),
            })
    }
}
