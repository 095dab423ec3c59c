//! kubectl-backed capacity discovery.
//!
//! Per-node GPU usage is aggregated from the cluster-wide pod list; capacity
//! and allocatable counts come from the node objects. A pod's effective GPU
//! request is max(sum of app containers, max of init containers), matching
//! how the kube scheduler accounts init containers.

use anyhow::{Context, Result};
use std::collections::HashMap;

use super::{CapacityApi, NodeCapacity};

const GPU_RESOURCE: &str = "nvidia.com/gpu";

pub struct KubectlCapacity {
    /// Substring filter on node names (e.g. "hgx" to scope to HGX hardware).
    node_filter: Option<String>,
}

impl KubectlCapacity {
    pub fn new(node_filter: Option<String>) -> Self {
        Self { node_filter }
    }
}

async fn run_kubectl(args: &[&str]) -> Result<String> {
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

fn gpu_request(container: &serde_json::Value) -> u32 {
    container["resources"]["requests"][GPU_RESOURCE]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Sum effective GPU usage per node from the pods JSON document.
fn usage_by_node(pods: &serde_json::Value) -> HashMap<String, u32> {
    let mut usage: HashMap<String, u32> = HashMap::new();

    for pod in pods["items"].as_array().unwrap_or(&Vec::new()) {
        let Some(node) = pod["spec"]["nodeName"].as_str() else {
            continue;
        };
        // Terminal pods no longer hold their request
        if matches!(pod["status"]["phase"].as_str(), Some("Succeeded") | Some("Failed")) {
            continue;
        }

        let empty = Vec::new();
        let app_req: u32 = pod["spec"]["containers"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .map(gpu_request)
            .sum();
        let init_req: u32 = pod["spec"]["initContainers"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .map(gpu_request)
            .max()
            .unwrap_or(0);

        *usage.entry(node.to_string()).or_insert(0) += app_req.max(init_req);
    }

    usage
}

/// Parse `kubectl get nodes` custom-columns output: NAME CAP ALLOC per line.
fn parse_node_lines(
    output: &str,
    usage: &HashMap<String, u32>,
    node_filter: Option<&str>,
) -> Vec<NodeCapacity> {
    let mut nodes = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(filter) = node_filter {
            if !line.contains(filter) {
                continue;
            }
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }

        // "<none>" appears for nodes without the GPU resource
        let capacity = parts[1].parse().unwrap_or(0);
        let allocatable = parts[2].parse().unwrap_or(0);

        nodes.push(NodeCapacity {
            node: parts[0].to_string(),
            capacity,
            allocatable,
            used: usage.get(parts[0]).copied().unwrap_or(0),
        });
    }

    nodes
}

#[async_trait::async_trait]
impl CapacityApi for KubectlCapacity {
    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>> {
        let pods_raw = run_kubectl(&["get", "pods", "-A", "-o", "json"]).await?;
        let pods: serde_json::Value =
            serde_json::from_str(&pods_raw).context("Failed to parse pods JSON")?;
        let usage = usage_by_node(&pods);

        let columns = "custom-columns=NAME:.metadata.name,\
             CAP:.status.capacity.nvidia\\.com/gpu,\
             ALLOC:.status.allocatable.nvidia\\.com/gpu";
        let nodes_raw = run_kubectl(&["get", "nodes", "--no-headers", "-o", columns]).await?;

        Ok(parse_node_lines(
            &nodes_raw,
            &usage,
            self.node_filter.as_deref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_by_node_counts_requests() {
        let pods = serde_json::json!({
            "items": [
                {
                    "spec": {
                        "nodeName": "hgx-01",
                        "containers": [
                            {"resources": {"requests": {"nvidia.com/gpu": "4"}}},
                            {"resources": {"requests": {"nvidia.com/gpu": "2"}}}
                        ],
                        "initContainers": [
                            {"resources": {"requests": {"nvidia.com/gpu": "8"}}}
                        ]
                    },
                    "status": {"phase": "Running"}
                },
                {
                    "spec": {
                        "nodeName": "hgx-01",
                        "containers": [
                            {"resources": {"requests": {"nvidia.com/gpu": "1"}}}
                        ]
                    },
                    "status": {"phase": "Succeeded"}
                },
                {
                    "spec": {"containers": []},
                    "status": {"phase": "Pending"}
                }
            ]
        });

        let usage = usage_by_node(&pods);
        // init container max (8) beats app sum (6); terminal pod ignored
        assert_eq!(usage.get("hgx-01"), Some(&8));
        assert_eq!(usage.len(), 1);
    }

    #[test]
    fn test_parse_node_lines_filters_and_defaults() {
        let output = "hgx-01   8   8\nhgx-02   8   <none>\ncpu-01   <none>   <none>\n";
        let mut usage = HashMap::new();
        usage.insert("hgx-01".to_string(), 3u32);

        let nodes = parse_node_lines(output, &usage, Some("hgx"));
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node, "hgx-01");
        assert_eq!(nodes[0].used, 3);
        assert_eq!(nodes[0].free(), 5);
        assert_eq!(nodes[1].allocatable, 0); // <none> -> 0
    }

    #[test]
    fn test_parse_node_lines_skips_malformed() {
        let nodes = parse_node_lines("justonefield\n\n", &HashMap::new(), None);
        assert!(nodes.is_empty());
    }
}
