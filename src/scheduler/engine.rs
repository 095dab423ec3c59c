//! Job lifecycle engine: the control loop binding capacity discovery, the
//! result history, the staleness queue, and job execution.
//!
//! One cycle: poll active jobs and free terminal or timed-out slots, snapshot
//! idle capacity, subtract nodes that already hold a job, build the staleness
//! queue, then submit until the concurrency cap is reached. The loop never
//! exits on its own; cycle errors are logged and retried after a fallback
//! sleep.

use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::cluster::{idle_nodes, CapacityApi};
use crate::config::Config;
use crate::jobs::{JobScheduler, JobSpec, JobState};
use crate::scheduler::queue::build_queue;
use crate::storage::{self, Pool, RunResult};

const FALLBACK_SLEEP_SECS: u64 = 60;

/// A submitted-but-not-yet-terminal job bound to exactly one node.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub node: String,
    pub test: String,
    pub job_id: String,
    pub submitted_at: i64,
    pub state: JobState,
}

/// Per-cycle accounting, mostly for logs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub idle: usize,
    pub queued: usize,
    pub submitted: usize,
    pub completed: usize,
    pub timed_out: usize,
}

/// Single-writer scheduling state. Owns the active-job map; nothing else
/// mutates it. The map is keyed by node, which enforces the one-active-job-
/// per-node invariant structurally.
pub struct Orchestrator<C, J> {
    pool: Pool,
    capacity: C,
    jobs: J,
    cfg: Config,
    active: HashMap<String, ActiveJob>,
}

impl<C: CapacityApi, J: JobScheduler> Orchestrator<C, J> {
    pub fn new(pool: Pool, capacity: C, jobs: J, cfg: Config) -> Self {
        Self {
            pool,
            capacity,
            jobs,
            cfg,
            active: HashMap::new(),
        }
    }

    pub fn active_jobs(&self) -> &HashMap<String, ActiveJob> {
        &self.active
    }

    /// Run scheduling cycles forever on the configured interval.
    pub async fn run(&mut self) {
        info!(
            interval_mins = self.cfg.check_interval_mins,
            cap = self.cfg.max_concurrent_jobs,
            "Orchestrator started"
        );

        let mut interval = tokio::time::interval(self.cfg.check_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.run_cycle().await {
                Ok(stats) => {
                    info!(
                        idle = stats.idle,
                        queued = stats.queued,
                        submitted = stats.submitted,
                        completed = stats.completed,
                        timed_out = stats.timed_out,
                        active = self.active.len(),
                        "Cycle complete"
                    );
                }
                Err(e) => {
                    error!("Cycle failed: {e:#}");
                    tokio::time::sleep(std::time::Duration::from_secs(FALLBACK_SLEEP_SECS))
                        .await;
                }
            }
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleStats> {
        self.run_cycle_at(Utc::now().timestamp()).await
    }

    /// One full cycle with an injected clock.
    pub async fn run_cycle_at(&mut self, now: i64) -> Result<CycleStats> {
        let mut stats = CycleStats::default();

        self.poll_active(now, &mut stats).await;

        // Capacity API outage degrades to an empty idle set for this cycle.
        let nodes = match self.capacity.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Capacity snapshot failed, treating as no idle nodes: {e:#}");
                Vec::new()
            }
        };
        let mut idle = idle_nodes(&nodes);
        idle.retain(|n| !self.active.contains_key(n));
        stats.idle = idle.len();

        let latest = storage::latest_by_node(&self.pool)?;
        let queue = build_queue(
            &idle,
            &latest,
            self.cfg.staleness_threshold(),
            now,
            self.cfg.queue_strategy,
        );
        stats.queued = queue.len();

        for candidate in queue {
            if self.active.len() >= self.cfg.max_concurrent_jobs {
                break;
            }
            // Belt and braces: the idle set already excludes active nodes.
            if self.active.contains_key(&candidate.node) {
                continue;
            }

            let spec = JobSpec {
                node: candidate.node.clone(),
                test: self.cfg.test_name.clone(),
                image: self.cfg.job_image.clone(),
                command: self.cfg.job_command.clone(),
                gpus: self.cfg.gpus_per_node,
            };

            match self.jobs.submit(&spec).await {
                Ok(job_id) => {
                    info!(node = %candidate.node, job = %job_id, "Submitted validation job");
                    self.active.insert(
                        candidate.node.clone(),
                        ActiveJob {
                            node: candidate.node,
                            test: spec.test,
                            job_id,
                            submitted_at: now,
                            state: JobState::Pending,
                        },
                    );
                    stats.submitted += 1;
                }
                // One bad node must not starve the rest of the queue.
                Err(e) => warn!(node = %candidate.node, "Submission failed: {e:#}"),
            }
        }

        Ok(stats)
    }

    /// Poll every active job; free slots for terminal and timed-out jobs.
    async fn poll_active(&mut self, now: i64, stats: &mut CycleStats) {
        let nodes: Vec<String> = self.active.keys().cloned().collect();
        let max_queue_secs = self.cfg.max_queue_time().as_secs() as i64;

        for node in nodes {
            let Some(job) = self.active.get(&node).cloned() else {
                continue;
            };

            // Timeout applies from submission regardless of pending/running.
            if now - job.submitted_at > max_queue_secs {
                warn!(node = %node, job = %job.job_id, "Job exceeded max queue time, cancelling");
                if let Err(e) = self.jobs.cancel(&job.job_id).await {
                    warn!(node = %node, job = %job.job_id, "Cancel failed: {e:#}");
                }
                // The slot frees as soon as cancellation is requested; the
                // external scheduler may hold the pod a little longer.
                self.finish(&job, RunResult::Incomplete, now);
                stats.timed_out += 1;
                continue;
            }

            match self.jobs.status(&job.job_id).await {
                Ok(state) if state.is_terminal() => {
                    let result = match state {
                        JobState::Completed => RunResult::Pass,
                        _ => RunResult::Fail,
                    };
                    info!(node = %node, job = %job.job_id, state = %state, "Job finished");
                    self.finish(&job, result, now);
                    stats.completed += 1;
                }
                Ok(state) => {
                    if let Some(entry) = self.active.get_mut(&node) {
                        entry.state = state;
                    }
                }
                // Transient scheduler outage; the job stays active and the
                // state is re-queried next cycle.
                Err(e) => warn!(node = %node, job = %job.job_id, "Status poll failed: {e:#}"),
            }
        }
    }

    /// Record the job-level outcome and release the node's slot.
    ///
    /// The benchmark pod appends its own, richer outcome row when it gets far
    /// enough; the engine only writes when no row newer than the submission
    /// exists for this (node, test). A failed write leaves the job active so
    /// the outcome is re-derived from job status on a later cycle.
    fn finish(&mut self, job: &ActiveJob, result: RunResult, now: i64) {
        let already_recorded =
            match storage::has_run_since(&self.pool, &job.node, &job.test, job.submitted_at) {
                Ok(found) => found,
                Err(e) => {
                    warn!(node = %job.node, "Outcome lookup failed, keeping job active: {e:#}");
                    return;
                }
            };

        if !already_recorded {
            if let Err(e) = storage::insert_run(&self.pool, &job.node, &job.test, now, result) {
                warn!(node = %job.node, "Outcome write failed, keeping job active: {e:#}");
                return;
            }
        }

        self.active.remove(&job.node);
    }
}
