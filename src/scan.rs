//! One-call entry point: schedule queries, then classify.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::config::Config;
use crate::core::errors::{Result, ScanError};
use crate::kb::client::KbClient;
use crate::logger::events::{LoggerHandle, ScanEvent};
use crate::model::status::{Status, StatusTable};
use crate::model::tree::MerkleTree;
use crate::report::aggregate::{self, Classification};
use crate::scheduler::engine::QueryScheduler;
use crate::scheduler::policy::TraversalPolicy;
use crate::scheduler::summary::ScanSummary;

/// Everything a renderer or reporter needs after a scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub summary: ScanSummary,
    pub classification: Classification,
    pub statuses: StatusTable,
}

/// Scan `tree` with the policy selected in `config`.
pub fn scan(
    tree: &MerkleTree,
    config: &Config,
    client: Arc<dyn KbClient>,
    logger: &LoggerHandle,
) -> Result<ScanReport> {
    let policy = config.scheduler.policy.build(config.scheduler.random_seed);
    scan_with_policy(tree, policy.as_ref(), config, client, logger)
}

/// Scan `tree` with an explicit policy.
///
/// Returns [`ScanError::QueryExhaustion`] when a non-empty tree ends with no
/// node resolved at all; otherwise the report may still be partial, which
/// [`ScanSummary::is_partial`] tells.
pub fn scan_with_policy(
    tree: &MerkleTree,
    policy: &dyn TraversalPolicy,
    config: &Config,
    client: Arc<dyn KbClient>,
    logger: &LoggerHandle,
) -> Result<ScanReport> {
    let outcome = QueryScheduler::new(tree, config)
        .with_logger(logger.clone())
        .run(policy, client)?;

    let resolved = outcome.statuses.count(Status::Known) + outcome.statuses.count(Status::NotKnown);
    if !tree.is_empty() && resolved == 0 {
        let error = ScanError::QueryExhaustion {
            summary: Box::new(outcome.summary),
        };
        logger.send(ScanEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        });
        return Err(error);
    }

    let classification = aggregate::classify(tree, &outcome.statuses);
    Ok(ScanReport {
        summary: outcome.summary,
        classification,
        statuses: outcome.statuses,
    })
}
