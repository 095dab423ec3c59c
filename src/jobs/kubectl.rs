//! Volcano vcjob adapter driven through kubectl.

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

use super::{JobScheduler, JobSpec, JobState};

/// Label carried by every job this system submits, so strays can be listed
/// and purged as a group.
pub const JOB_GROUP_LABEL: &str = "gcr-cluster-validation";

pub struct KubectlJobs {
    namespace: String,
}

impl KubectlJobs {
    pub fn new(namespace: String) -> Self {
        Self { namespace }
    }

    /// Delete every vcjob in the namespace carrying the validation label.
    pub async fn purge_validation_jobs(&self) -> Result<usize> {
        let raw = run_kubectl_stdout(&[
            "get",
            "vcjob",
            "-n",
            &self.namespace,
            "--no-headers",
            "-o",
            "custom-columns=NAME:.metadata.name",
        ])
        .await
        .context("Failed to list validation jobs")?;

        let mut deleted = 0;
        for name in validation_job_names(&raw) {
            match self.cancel(name).await {
                Ok(()) => {
                    tracing::info!(job = %name, "Deleted validation job");
                    deleted += 1;
                }
                Err(e) => tracing::warn!(job = %name, "Failed to delete job: {e:#}"),
            }
        }
        Ok(deleted)
    }
}

/// Names from a `kubectl get vcjob` listing that belong to this system.
fn validation_job_names(raw: &str) -> Vec<&str> {
    raw.lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && name.contains(JOB_GROUP_LABEL))
        .collect()
}

async fn run_kubectl_stdout(args: &[&str]) -> Result<String> {
    let output = tokio::process::Command::new("kubectl")
        .args(args)
        .output()
        .await
        .context("Failed to execute kubectl")?;

    if !output.status.success() {
        anyhow::bail!(
            "kubectl {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Job names must be DNS-1123 labels: lowercase alphanumerics and dashes,
/// at most 63 characters.
fn job_name(spec: &JobSpec) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let raw = format!("{}-{}-{}-{}", JOB_GROUP_LABEL, spec.test, spec.node, &suffix[..8]);
    let mut name: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    name.truncate(63);
    name.trim_matches('-').to_string()
}

fn render_manifest(name: &str, namespace: &str, spec: &JobSpec) -> String {
    let command_json =
        serde_json::to_string(&spec.command).unwrap_or_else(|_| "[]".to_string());

    format!(
        "apiVersion: batch.volcano.sh/v1alpha1
kind: Job
metadata:
  name: {name}
  namespace: {namespace}
  labels:
    app: {JOB_GROUP_LABEL}
spec:
  minAvailable: 1
  schedulerName: volcano
  tasks:
    - replicas: 1
      name: validate
      template:
        spec:
          restartPolicy: Never
          nodeName: {node}
          containers:
            - name: validate
              image: {image}
              command: {command_json}
              env:
                - name: TARGET_NODE
                  value: \"{node}\"
                - name: TEST_NAME
                  value: \"{test}\"
              resources:
                limits:
                  nvidia.com/gpu: {gpus}
",
        name = name,
        namespace = namespace,
        node = spec.node,
        image = spec.image,
        test = spec.test,
        gpus = spec.gpus,
    )
}

fn parse_phase(doc: &serde_json::Value) -> JobState {
    match doc["status"]["state"]["phase"].as_str() {
        Some("Running") | Some("Restarting") | Some("Completing") => JobState::Running,
        Some("Completed") => JobState::Completed,
        Some("Failed") | Some("Aborted") | Some("Terminated") => JobState::Failed,
        // Pending / Inqueue / not yet reported
        _ => JobState::Pending,
    }
}

#[async_trait::async_trait]
impl JobScheduler for KubectlJobs {
    async fn submit(&self, spec: &JobSpec) -> Result<String> {
        let name = job_name(spec);
        let manifest = render_manifest(&name, &self.namespace, spec);

        let mut child = tokio::process::Command::new("kubectl")
            .args(["create", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn kubectl create")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(manifest.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "kubectl create for {} failed: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(name)
    }

    async fn status(&self, job_id: &str) -> Result<JobState> {
        let raw = run_kubectl_stdout(&[
            "get", "vcjob", "-n", &self.namespace, job_id, "-o", "json",
        ])
        .await?;
        let doc: serde_json::Value =
            serde_json::from_str(&raw).context("Failed to parse vcjob JSON")?;
        Ok(parse_phase(&doc))
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        run_kubectl_stdout(&["delete", "vcjob", "-n", &self.namespace, job_id]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobSpec {
        JobSpec {
            node: "hgx-node-01".to_string(),
            test: "dl_test".to_string(),
            image: "registry.local/validate:latest".to_string(),
            command: vec!["python3".to_string(), "run.py".to_string()],
            gpus: 8,
        }
    }

    #[test]
    fn test_job_name_is_dns_label() {
        let name = job_name(&spec());
        assert!(name.len() <= 63);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert!(name.starts_with(JOB_GROUP_LABEL));
        assert!(!name.ends_with('-'));
    }

    #[test]
    fn test_job_names_are_unique() {
        assert_ne!(job_name(&spec()), job_name(&spec()));
    }

    #[test]
    fn test_manifest_pins_node_and_gpus() {
        let m = render_manifest("j1", "gcr-admin", &spec());
        assert!(m.contains("nodeName: hgx-node-01"));
        assert!(m.contains("nvidia.com/gpu: 8"));
        assert!(m.contains("namespace: gcr-admin"));
        assert!(m.contains("[\"python3\",\"run.py\"]"));
    }

    #[test]
    fn test_validation_job_names_keeps_only_labelled() {
        let raw = format!(
            "{label}-dl-test-hgx-01-abcd1234\n  {label}-nccl-hgx-02-ef567890  \nsomeone-elses-job\n\n",
            label = JOB_GROUP_LABEL
        );
        let names = validation_job_names(&raw);
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.contains(JOB_GROUP_LABEL)));
    }

    #[test]
    fn test_parse_phase_mapping() {
        let doc = |phase: &str| serde_json::json!({"status": {"state": {"phase": phase}}});
        assert_eq!(parse_phase(&doc("Pending")), JobState::Pending);
        assert_eq!(parse_phase(&doc("Inqueue")), JobState::Pending);
        assert_eq!(parse_phase(&doc("Running")), JobState::Running);
        assert_eq!(parse_phase(&doc("Completed")), JobState::Completed);
        assert_eq!(parse_phase(&doc("Aborted")), JobState::Failed);
        assert_eq!(parse_phase(&serde_json::json!({})), JobState::Pending);
    }
}
