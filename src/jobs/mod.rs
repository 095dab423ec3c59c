//! Job execution -- trait seam plus kubectl/Volcano adapter.

pub mod kubectl;

use anyhow::Result;

/// External scheduler's view of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// What to run; opaque to the scheduling core.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub node: String,
    pub test: String,
    pub image: String,
    pub command: Vec<String>,
    pub gpus: u32,
}

/// Submission, status polling, and cancellation against the external
/// scheduler. Cancellation is a request; the job may take further polls to
/// reach a terminal state.
#[async_trait::async_trait]
pub trait JobScheduler: Send + Sync {
    async fn submit(&self, spec: &JobSpec) -> Result<String>;
    async fn status(&self, job_id: &str) -> Result<JobState>;
    async fn cancel(&self, job_id: &str) -> Result<()>;
}
