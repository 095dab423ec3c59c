//! clusterdoctor -- continuous validation for GPU clusters.
//!
//! This crate provides the core library for recording validation outcomes,
//! deciding which idle nodes are stale, planning conflict-free all-pairs
//! bandwidth rounds, and driving a bounded-concurrency job loop against the
//! cluster's external scheduler.

pub mod cluster;
pub mod config;
pub mod jobs;
pub mod scheduler;
pub mod storage;

use anyhow::Result;

/// Start the orchestrator: open the store, wire the kubectl adapters, and
/// run scheduling cycles (forever, or once for manual triggering).
pub async fn orchestrate(cfg: config::Config, once: bool) -> Result<()> {
    tracing::info!(db_path = %cfg.db_path, "Initializing result store");
    let pool = storage::open_pool(&cfg.db_path)?;

    let capacity = cluster::kubectl::KubectlCapacity::new(cfg.node_filter.clone());
    let jobs = jobs::kubectl::KubectlJobs::new(cfg.namespace.clone());
    let mut orchestrator = scheduler::Orchestrator::new(pool, capacity, jobs, cfg);

    if once {
        let stats = orchestrator.run_cycle().await?;
        tracing::info!(
            idle = stats.idle,
            queued = stats.queued,
            submitted = stats.submitted,
            completed = stats.completed,
            timed_out = stats.timed_out,
            "Manual cycle complete"
        );
    } else {
        orchestrator.run().await;
    }

    Ok(())
}
