//! Bounded pool of archive workers.
//!
//! Jobs flow in over a bounded channel sized to the concurrency limit and
//! results flow back over an unbounded one. Workers never touch node status:
//! they only talk to the archive, retry transient failures and report.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender};

use crate::core::config::SchedulerConfig;
use crate::core::errors::{Result, ScanError};
use crate::kb::client::{BatchAnswer, KbClient, KbError, QueryOptions};
use crate::logger::events::{LoggerHandle, ScanEvent};
use crate::model::identifier::Identifier;

/// One admitted batch.
#[derive(Debug, Clone)]
pub struct Job {
    pub batch_id: u64,
    pub identifiers: Vec<Identifier>,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Answered(BatchAnswer),
    Failed(KbError),
}

/// What a worker reports back for a [`Job`].
#[derive(Debug, Clone)]
pub struct JobResult {
    pub batch_id: u64,
    pub identifiers: Vec<Identifier>,
    pub outcome: Outcome,
    /// Transient failures that were retried.
    pub retries: u32,
    /// Identifiers the archive refused as a whole call; stripped and re-sent.
    pub rejected: Vec<(Identifier, String)>,
}

#[derive(Debug, Clone)]
struct RetrySettings {
    options: QueryOptions,
    scheduler: SchedulerConfig,
    deadline: Option<Instant>,
}

impl RetrySettings {
    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Handle owned by the coordinator.
pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    results: Receiver<JobResult>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        client: &Arc<dyn KbClient>,
        config: &SchedulerConfig,
        deadline: Option<Instant>,
        logger: &LoggerHandle,
    ) -> Result<Self> {
        let workers = config.concurrency.max(1);
        let (job_tx, job_rx) = channel::bounded::<Job>(workers);
        let (result_tx, result_rx) = channel::unbounded::<JobResult>();
        let settings = RetrySettings {
            options: QueryOptions {
                max_batch: config.max_batch_size,
                timeout: config.batch_timeout(),
            },
            scheduler: config.clone(),
            deadline,
        };

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let client = Arc::clone(client);
            let settings = settings.clone();
            let logger = logger.clone();
            let handle = thread::Builder::new()
                .name(format!("kbscan-worker-{index}"))
                .spawn(move || worker_thread(&job_rx, &result_tx, &client, &settings, &logger))
                .map_err(|e| ScanError::Runtime {
                    details: format!("failed to spawn worker thread: {e}"),
                })?;
            handles.push(handle);
        }

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handles,
        })
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        let Some(jobs) = &self.jobs else {
            return Err(ScanError::ChannelClosed {
                component: "worker pool",
            });
        };
        jobs.send(job).map_err(|_| ScanError::ChannelClosed {
            component: "worker pool",
        })
    }

    /// Wait for the next result. `None` blocks until one arrives.
    pub fn recv(&self, wait: Option<Duration>) -> std::result::Result<JobResult, RecvTimeoutError> {
        match wait {
            Some(timeout) => self.results.recv_timeout(timeout),
            None => self
                .results
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        }
    }

    /// Close the job queue. With `wait`, join every worker; otherwise leave
    /// stragglers to finish their current call and exit on their own.
    pub fn shutdown(mut self, wait: bool) {
        self.jobs = None;
        if wait {
            for handle in self.handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

fn worker_thread(
    jobs: &Receiver<Job>,
    results: &Sender<JobResult>,
    client: &Arc<dyn KbClient>,
    settings: &RetrySettings,
    logger: &LoggerHandle,
) {
    while let Ok(job) = jobs.recv() {
        let result = run_job(job, client, settings, logger);
        if results.send(result).is_err() {
            break;
        }
    }
}

/// Send one batch, retrying transient failures with capped exponential
/// backoff. A call that has not answered within the per-call timeout counts
/// as a timeout.
fn run_job(job: Job, client: &Arc<dyn KbClient>, settings: &RetrySettings, logger: &LoggerHandle) -> JobResult {
    let Job {
        batch_id,
        identifiers,
    } = job;
    let mut remaining = identifiers.clone();
    let mut retries = 0_u32;
    let mut rejected = Vec::new();

    let outcome = loop {
        if settings.deadline_passed() {
            break Outcome::Failed(KbError::Transient {
                details: "scan deadline reached".to_string(),
            });
        }

        let answer = timed_call(client, &remaining, settings.options, batch_id);

        match answer {
            Ok(answer) => break Outcome::Answered(answer),
            Err(KbError::Rejected { identifier, reason }) if remaining.contains(&identifier) => {
                remaining.retain(|id| *id != identifier);
                rejected.push((identifier, reason));
                if remaining.is_empty() {
                    break Outcome::Answered(BatchAnswer::new());
                }
            }
            Err(error) if error.is_transient() && retries < settings.scheduler.retry_limit => {
                retries += 1;
                let backoff = settings.scheduler.backoff_for(retries);
                logger.send(ScanEvent::BatchRetried {
                    batch_id,
                    attempt: retries,
                    backoff_ms: millis(backoff),
                    error: error.to_string(),
                });
                let sleep_for = settings.deadline.map_or(backoff, |deadline| {
                    backoff.min(deadline.saturating_duration_since(Instant::now()))
                });
                thread::sleep(sleep_for);
            }
            Err(error) => break Outcome::Failed(error),
        }
    };

    JobResult {
        batch_id,
        identifiers,
        outcome,
        retries,
        rejected,
    }
}

/// Run one archive call on its own thread and wait at most the per-call
/// timeout for it. A call still running past the limit is abandoned; its
/// late reply lands in a channel nobody reads.
fn timed_call(
    client: &Arc<dyn KbClient>,
    identifiers: &[Identifier],
    options: QueryOptions,
    batch_id: u64,
) -> std::result::Result<BatchAnswer, KbError> {
    let (reply_tx, reply_rx) = channel::bounded(1);
    let client = Arc::clone(client);
    let identifiers = identifiers.to_vec();
    let started = Instant::now();
    let spawned = thread::Builder::new()
        .name(format!("kbscan-call-{batch_id}"))
        .spawn(move || {
            let _ = reply_tx.send(client.batch_exists(&identifiers, &options));
        });
    if let Err(e) = spawned {
        return Err(KbError::Transient {
            details: format!("failed to spawn archive call: {e}"),
        });
    }

    match reply_rx.recv_timeout(options.timeout) {
        Ok(answer) => answer,
        Err(RecvTimeoutError::Timeout) => Err(KbError::Timeout {
            elapsed_ms: millis(started.elapsed()),
            limit_ms: millis(options.timeout),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(KbError::Transient {
            details: "archive call ended without an answer".to_string(),
        }),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::client::Lookup;
    use crate::kb::memory::MemoryKb;
    use crate::model::tree::NodeKind;

    fn id(n: u8) -> Identifier {
        Identifier::from_digest(NodeKind::Content, &format!("{n:02x}").repeat(20))
    }

    fn settings(retry_limit: u32) -> RetrySettings {
        RetrySettings {
            options: QueryOptions {
                max_batch: 10,
                timeout: Duration::from_secs(5),
            },
            scheduler: SchedulerConfig {
                retry_limit,
                backoff_base_ms: 1,
                backoff_max_ms: 4,
                ..SchedulerConfig::default()
            },
            deadline: None,
        }
    }

    fn client(kb: &Arc<MemoryKb>) -> Arc<dyn KbClient> {
        kb.clone()
    }

    fn job(ids: Vec<Identifier>) -> Job {
        Job {
            batch_id: 1,
            identifiers: ids,
        }
    }

    #[test]
    fn transient_failure_is_retried() {
        let kb = Arc::new(MemoryKb::new([id(1)]));
        kb.push_fault(KbError::Transient {
            details: "503".to_string(),
        });
        let result = run_job(job(vec![id(1)]), &client(&kb), &settings(3), &LoggerHandle::disabled());
        assert_eq!(result.retries, 1);
        match result.outcome {
            Outcome::Answered(answer) => assert_eq!(answer.get(&id(1)), Some(&Lookup::Present)),
            Outcome::Failed(e) => panic!("unexpected failure: {e}"),
        }
        assert_eq!(kb.calls().len(), 2);
    }

    #[test]
    fn retries_exhaust_into_failure() {
        let kb = Arc::new(MemoryKb::new([]));
        for _ in 0..3 {
            kb.push_fault(KbError::Transient {
                details: "503".to_string(),
            });
        }
        let result = run_job(job(vec![id(1)]), &client(&kb), &settings(2), &LoggerHandle::disabled());
        assert_eq!(result.retries, 2);
        assert!(matches!(result.outcome, Outcome::Failed(KbError::Transient { .. })));
    }

    #[test]
    fn whole_call_rejection_strips_one_identifier() {
        let kb = Arc::new(MemoryKb::new([id(2)]));
        kb.push_fault(KbError::Rejected {
            identifier: id(1),
            reason: "unsupported".to_string(),
        });
        let result = run_job(job(vec![id(1), id(2)]), &client(&kb), &settings(0), &LoggerHandle::disabled());
        assert_eq!(result.retries, 0);
        assert_eq!(result.rejected, vec![(id(1), "unsupported".to_string())]);
        assert_eq!(kb.answered_batches(), vec![vec![id(2)]]);
        assert!(matches!(result.outcome, Outcome::Answered(_)));
    }

    #[test]
    fn slow_answer_counts_as_timeout() {
        let kb = Arc::new(MemoryKb::new([id(1)]).with_latency(Duration::from_millis(30)));
        let mut s = settings(0);
        s.options.timeout = Duration::from_millis(5);
        let result = run_job(job(vec![id(1)]), &client(&kb), &s, &LoggerHandle::disabled());
        assert!(matches!(result.outcome, Outcome::Failed(KbError::Timeout { .. })));
    }

    #[test]
    fn hung_call_is_cut_off_at_the_timeout_on_every_attempt() {
        let kb = Arc::new(MemoryKb::new([id(1)]).with_latency(Duration::from_millis(500)));
        let mut s = settings(3);
        s.options.timeout = Duration::from_millis(20);
        let started = Instant::now();
        let result = run_job(job(vec![id(1)]), &client(&kb), &s, &LoggerHandle::disabled());
        assert!(
            started.elapsed() < Duration::from_millis(400),
            "took {:?}",
            started.elapsed()
        );
        assert_eq!(result.retries, 3);
        assert!(matches!(result.outcome, Outcome::Failed(KbError::Timeout { limit_ms: 20, .. })));
    }

    #[test]
    fn permanent_batch_error_is_not_retried() {
        let kb = Arc::new(MemoryKb::new([]));
        kb.push_fault(KbError::BatchTooLarge { size: 11, max: 10 });
        let result = run_job(job(vec![id(1)]), &client(&kb), &settings(3), &LoggerHandle::disabled());
        assert_eq!(result.retries, 0);
        assert!(matches!(result.outcome, Outcome::Failed(KbError::BatchTooLarge { .. })));
    }

    #[test]
    fn pool_processes_jobs_concurrently() {
        let kb: Arc<dyn KbClient> = Arc::new(MemoryKb::new([id(1)]));
        let config = SchedulerConfig {
            concurrency: 2,
            ..SchedulerConfig::default()
        };
        let pool = WorkerPool::spawn(&kb, &config, None, &LoggerHandle::disabled()).unwrap();
        pool.submit(Job {
            batch_id: 1,
            identifiers: vec![id(1)],
        })
        .unwrap();
        pool.submit(Job {
            batch_id: 2,
            identifiers: vec![id(2)],
        })
        .unwrap();
        let mut seen = vec![
            pool.recv(Some(Duration::from_secs(5))).unwrap().batch_id,
            pool.recv(Some(Duration::from_secs(5))).unwrap().batch_id,
        ];
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
        pool.shutdown(true);
    }
}
