//! Query scheduler: the coordinator loop that owns all status writes.
//!
//! The coordinator asks the policy for candidates, admits them into
//! batches, hands batches to the worker pool and applies answers as they
//! come back. Workers never see the status table, so the admission check
//! ("already resolved, pruned, in flight or queried?") and the status update
//! it depends on always happen on the same thread.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::RecvTimeoutError;

use crate::core::config::{Config, SchedulerConfig};
use crate::core::errors::Result;
use crate::kb::client::{KbClient, Lookup};
use crate::logger::events::{LoggerHandle, ScanEvent};
use crate::model::identifier::Identifier;
use crate::model::status::{Status, StatusTable};
use crate::model::tree::{MerkleTree, NodeId};
use crate::report::aggregate;
use crate::scheduler::policy::{ScanView, TraversalPolicy};
use crate::scheduler::summary::ScanSummary;
use crate::scheduler::worker::{Job, JobResult, Outcome, WorkerPool};

const MISSING_ANSWER: &str = "missing from archive response";
const DEADLINE_REASON: &str = "scan deadline exceeded";

/// Final state of one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerOutcome {
    pub statuses: StatusTable,
    pub summary: ScanSummary,
}

/// Drives one traversal policy against one archive client.
pub struct QueryScheduler<'a> {
    tree: &'a MerkleTree,
    config: SchedulerConfig,
    config_hash: String,
    logger: LoggerHandle,
}

impl<'a> QueryScheduler<'a> {
    pub fn new(tree: &'a MerkleTree, config: &Config) -> Self {
        Self {
            tree,
            config: config.scheduler.clone(),
            config_hash: config
                .stable_hash()
                .unwrap_or_else(|_| "unknown".to_string()),
            logger: LoggerHandle::disabled(),
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: LoggerHandle) -> Self {
        self.logger = logger;
        self
    }

    /// Classify every node of the tree.
    ///
    /// Transient failures and rejections end up as errored nodes in the
    /// summary; only infrastructure failures (threads, channels) surface as
    /// `Err`.
    pub fn run(
        &self,
        policy: &dyn TraversalPolicy,
        client: Arc<dyn KbClient>,
    ) -> Result<SchedulerOutcome> {
        let started = Instant::now();
        let deadline = self.config.scan_timeout().map(|limit| started + limit);
        let concurrency = self.config.concurrency.max(1);
        let max_batch = self.config.max_batch_size.max(1);
        let grace = self.config.batch_timeout();

        self.logger.send(ScanEvent::ScanStarted {
            policy: policy.name().to_string(),
            nodes: self.tree.len(),
            config_hash: self.config_hash.clone(),
        });

        let pool = WorkerPool::spawn(&client, &self.config, deadline, &self.logger)?;
        let mut state = RunState::new(self.tree);
        let mut policy_idle = false;
        let mut stragglers = false;

        loop {
            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if !expired {
                while state.in_flight.len() < concurrency {
                    let batch = {
                        let view = ScanView::new(self.tree, &state.effective, &state.queried);
                        state.admit(&policy.next_batch(&view, max_batch), max_batch)
                    };
                    if batch.is_empty() {
                        policy_idle = true;
                        break;
                    }
                    policy_idle = false;
                    state.dispatch(batch, &pool, &self.logger)?;
                }
            }

            if state.in_flight.is_empty() {
                state.summary.timed_out = expired && !policy_idle;
                break;
            }

            let wait = if expired {
                Some(grace)
            } else {
                deadline.map(|d| d.saturating_duration_since(Instant::now()))
            };
            match pool.recv(wait) {
                Ok(result) => {
                    state.apply(result, &self.logger);
                    policy_idle = false;
                }
                Err(RecvTimeoutError::Timeout) if expired => {
                    state.abandon_in_flight(DEADLINE_REASON);
                    state.summary.timed_out = true;
                    stragglers = true;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    state.abandon_in_flight("worker pool stopped");
                    break;
                }
            }
        }
        pool.shutdown(!stragglers);

        let mut summary = state.summary;
        summary.policy = policy.name().to_string();
        summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        aggregate::summarize(self.tree, &state.statuses, &mut summary);

        self.logger.send(ScanEvent::ScanCompleted {
            policy: summary.policy.clone(),
            batches: summary.batches_issued,
            identifiers: summary.identifiers_queried,
            retries: summary.retries,
            duration_ms: summary.elapsed_ms,
            timed_out: summary.timed_out,
        });

        Ok(SchedulerOutcome {
            statuses: state.statuses,
            summary,
        })
    }
}

// ---------------------------------------------------------------------------
// Coordinator state
// ---------------------------------------------------------------------------

struct RunState<'a> {
    tree: &'a MerkleTree,
    statuses: StatusTable,
    /// Own status overridden by known ancestors, kept in step with `statuses`.
    effective: Vec<Status>,
    /// Every identifier ever dispatched.
    queried: HashSet<Identifier>,
    in_flight: HashMap<u64, Vec<Identifier>>,
    summary: ScanSummary,
    next_batch_id: u64,
}

impl<'a> RunState<'a> {
    fn new(tree: &'a MerkleTree) -> Self {
        Self {
            tree,
            statuses: StatusTable::new(tree),
            effective: vec![Status::Unresolved; tree.len()],
            queried: HashSet::new(),
            in_flight: HashMap::new(),
            summary: ScanSummary::default(),
            next_batch_id: 1,
        }
    }

    /// Turn policy proposals into a batch of never-sent identifiers.
    /// Proposals past `max_batch` are dropped; the policy offers them again.
    fn admit(&self, proposed: &[NodeId], max_batch: usize) -> Vec<Identifier> {
        let mut batch: Vec<Identifier> = Vec::new();
        let mut seen: HashSet<&Identifier> = HashSet::new();
        for node in proposed {
            if batch.len() >= max_batch {
                break;
            }
            if self.effective[node.index()] != Status::Unresolved {
                continue;
            }
            let identifier = self.tree.identifier(*node);
            if self.queried.contains(identifier) || !seen.insert(identifier) {
                continue;
            }
            batch.push(identifier.clone());
        }
        batch
    }

    fn dispatch(
        &mut self,
        batch: Vec<Identifier>,
        pool: &WorkerPool,
        logger: &LoggerHandle,
    ) -> Result<()> {
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        self.summary.batches_issued += 1;
        self.summary.identifiers_queried += batch.len();
        self.queried.extend(batch.iter().cloned());
        self.in_flight.insert(batch_id, batch.clone());
        logger.send(ScanEvent::BatchDispatched {
            batch_id,
            size: batch.len(),
        });
        pool.submit(Job {
            batch_id,
            identifiers: batch,
        })
    }

    fn apply(&mut self, result: JobResult, logger: &LoggerHandle) {
        let JobResult {
            batch_id,
            identifiers,
            outcome,
            retries,
            rejected,
        } = result;
        self.in_flight.remove(&batch_id);
        self.summary.retries += retries as usize;

        let mut rejected_ids: Vec<String> = Vec::new();
        for (identifier, reason) in &rejected {
            self.settle_errored(identifier, reason);
            rejected_ids.push(identifier.to_string());
        }
        let answered = identifiers
            .iter()
            .filter(|id| !rejected.iter().any(|(r, _)| r == *id));

        match outcome {
            Outcome::Answered(answer) => {
                for identifier in answered {
                    match answer.get(identifier) {
                        Some(Lookup::Present) => self.settle_known(identifier),
                        Some(Lookup::Absent) => self.settle_not_known(identifier),
                        Some(Lookup::Rejected(reason)) => {
                            self.settle_errored(identifier, reason);
                            rejected_ids.push(identifier.to_string());
                        }
                        None => self.settle_errored(identifier, MISSING_ANSWER),
                    }
                }
            }
            Outcome::Failed(error) => {
                let reason = error.to_string();
                logger.send(ScanEvent::BatchFailed {
                    batch_id,
                    size: identifiers.len(),
                    error: reason.clone(),
                });
                for identifier in answered {
                    self.settle_errored(identifier, &reason);
                }
            }
        }

        if !rejected_ids.is_empty() {
            logger.send(ScanEvent::IdentifiersRejected {
                batch_id,
                identifiers: rejected_ids,
            });
        }
    }

    /// Known applies to every node sharing the identifier and covers their
    /// subtrees.
    fn settle_known(&mut self, identifier: &Identifier) {
        let tree = self.tree;
        for node in tree.nodes_with(identifier) {
            self.statuses.resolve(*node, Status::Known);
            self.effective[node.index()] = Status::Known;
            for below in tree.descendants(*node) {
                if self.effective[below.index()] == Status::Known {
                    continue;
                }
                if self.statuses.own(below) == Status::Unresolved {
                    self.summary.nodes_pruned += 1;
                }
                self.effective[below.index()] = Status::Known;
            }
        }
    }

    fn settle_not_known(&mut self, identifier: &Identifier) {
        let tree = self.tree;
        for node in tree.nodes_with(identifier) {
            if self.effective[node.index()] == Status::Known {
                continue;
            }
            if self.statuses.resolve(*node, Status::NotKnown) {
                self.effective[node.index()] = Status::NotKnown;
            }
        }
    }

    fn settle_errored(&mut self, identifier: &Identifier, reason: &str) {
        let tree = self.tree;
        for node in tree.nodes_with(identifier) {
            if self.effective[node.index()] == Status::Known {
                continue;
            }
            if self.statuses.mark_errored(*node, reason) {
                self.effective[node.index()] = Status::Errored;
            }
        }
    }

    fn abandon_in_flight(&mut self, reason: &str) {
        let pending: Vec<Identifier> = self.in_flight.drain().flat_map(|(_, ids)| ids).collect();
        for identifier in &pending {
            self.settle_errored(identifier, reason);
        }
    }
}
