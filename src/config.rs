//! Orchestrator configuration -- TOML file with defaults for every field.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::scheduler::QueueStrategy;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database path (shared with benchmark pods via PVC).
    pub db_path: String,
    /// Namespace for vcjob submission.
    pub namespace: String,
    /// Substring filter scoping validation to a hardware class.
    pub node_filter: Option<String>,
    /// Cluster-wide cap on simultaneously active validation jobs.
    pub max_concurrent_jobs: usize,
    /// Jobs older than this are cancelled and recorded as incomplete.
    pub max_queue_time_mins: u64,
    /// Sleep between scheduling cycles.
    pub check_interval_mins: u64,
    /// Nodes tested more recently than this are skipped.
    pub staleness_threshold_days: u64,
    pub queue_strategy: QueueStrategy,
    /// Test name recorded in the run log.
    pub test_name: String,
    pub job_image: String,
    pub job_command: Vec<String>,
    pub gpus_per_node: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "data/validation.db".to_string(),
            namespace: "gcr-admin".to_string(),
            node_filter: Some("hgx".to_string()),
            max_concurrent_jobs: 2,
            max_queue_time_mins: 30,
            check_interval_mins: 5,
            staleness_threshold_days: 7,
            queue_strategy: QueueStrategy::OldestFirst,
            test_name: "dl_test".to_string(),
            job_image: "registry.local/cluster-validate:latest".to_string(),
            job_command: vec![
                "python3".to_string(),
                "/opt/validation/run_suite.py".to_string(),
            ],
            gpus_per_node: 8,
        }
    }
}

impl Config {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", p.display()))
            }
        }
    }

    pub fn max_queue_time(&self) -> Duration {
        Duration::from_secs(self.max_queue_time_mins * 60)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_mins * 60)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_days * 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_operational_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.max_concurrent_jobs, 2);
        assert_eq!(cfg.max_queue_time(), Duration::from_secs(30 * 60));
        assert_eq!(cfg.check_interval(), Duration::from_secs(5 * 60));
        assert_eq!(cfg.staleness_threshold(), Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: Config =
            toml::from_str("max_concurrent_jobs = 5\nqueue_strategy = \"shuffle\"").unwrap();
        assert_eq!(cfg.max_concurrent_jobs, 5);
        assert_eq!(cfg.queue_strategy, QueueStrategy::Shuffle);
        assert_eq!(cfg.staleness_threshold_days, 7);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<Config>("no_such_field = 1").is_err());
    }
}
