//! Scheduling core: staleness queue, all-pairs rounds, job lifecycle engine.

pub mod engine;
pub mod pairs;
pub mod queue;

pub use self::engine::{ActiveJob, Orchestrator};
pub use self::queue::{build_queue, Candidate, QueueStrategy};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The pairing generator produced rounds that fail the coverage oracle.
    /// This is a logic defect in the scheduler, not an environmental
    /// condition; callers must not retry past it.
    #[error("pairing verification failed: {0}")]
    PairingVerification(String),
}
