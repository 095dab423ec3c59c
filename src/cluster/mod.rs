//! Cluster capacity discovery -- trait seam plus kubectl adapter.

pub mod kubectl;

use anyhow::Result;

/// Accelerator capacity snapshot for one node.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeCapacity {
    pub node: String,
    pub capacity: u32,
    pub allocatable: u32,
    pub used: u32,
}

impl NodeCapacity {
    pub fn free(&self) -> i64 {
        self.allocatable as i64 - self.used as i64
    }

    /// Fully idle: every allocatable accelerator is free, and there is at
    /// least one. Nodes reporting zero allocatable GPUs never qualify.
    pub fn fully_idle(&self) -> bool {
        self.allocatable > 0 && self.used == 0
    }
}

/// Read-only view of cluster capacity, refreshed each scheduling cycle.
#[async_trait::async_trait]
pub trait CapacityApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>>;
}

/// Names of nodes with all accelerators free.
pub fn idle_nodes(nodes: &[NodeCapacity]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| n.fully_idle())
        .map(|n| n.node.clone())
        .collect()
}

/// Column totals for the capacity table.
#[derive(Debug, Default, Clone, Copy)]
pub struct CapacityTotals {
    pub capacity: u32,
    pub allocatable: u32,
    pub used: u32,
    pub free: i64,
}

pub fn totals(nodes: &[NodeCapacity]) -> CapacityTotals {
    nodes.iter().fold(CapacityTotals::default(), |mut acc, n| {
        acc.capacity += n.capacity;
        acc.allocatable += n.allocatable;
        acc.used += n.used;
        acc.free += n.free();
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(node: &str, alloc: u32, used: u32) -> NodeCapacity {
        NodeCapacity {
            node: node.to_string(),
            capacity: alloc,
            allocatable: alloc,
            used,
        }
    }

    #[test]
    fn test_fully_idle_requires_all_free() {
        assert!(cap("a", 8, 0).fully_idle());
        assert!(!cap("b", 8, 1).fully_idle());
        assert!(!cap("c", 0, 0).fully_idle()); // no GPUs at all
    }

    #[test]
    fn test_idle_nodes_filters_partial() {
        let nodes = vec![cap("a", 8, 0), cap("b", 8, 3), cap("c", 4, 0)];
        assert_eq!(idle_nodes(&nodes), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_totals_sum_columns() {
        let nodes = vec![cap("a", 8, 2), cap("b", 4, 4)];
        let t = totals(&nodes);
        assert_eq!(t.allocatable, 12);
        assert_eq!(t.used, 6);
        assert_eq!(t.free, 6);
    }
}
