//! Staleness priority queue over idle nodes.
//!
//! Rebuilt from scratch every cycle from the idle-node snapshot and the
//! latest-status projection; never persisted.

use std::collections::HashMap;
use std::time::Duration;

use rand::seq::SliceRandom;

/// One queued node with the evidence that put it there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node: String,
    /// Epoch seconds of the most recent recorded run; `None` means never
    /// tested, which sorts ahead of every real timestamp.
    pub last_tested: Option<i64>,
}

/// Ordering applied to the qualifying set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueStrategy {
    /// Never-tested nodes first, then ascending last-tested timestamp.
    /// Ties break by node name so output is reproducible.
    #[default]
    OldestFirst,
    /// Random order over the qualifying set.
    Shuffle,
}

/// Build the test-urgency queue for one scheduling cycle.
///
/// A node qualifies if it has never been tested or its latest run is older
/// than `threshold`. Recently-tested nodes are excluded outright. A zero
/// threshold qualifies every idle node.
pub fn build_queue(
    idle_nodes: &[String],
    latest: &HashMap<String, i64>,
    threshold: Duration,
    now: i64,
    strategy: QueueStrategy,
) -> Vec<Candidate> {
    let threshold_secs = threshold.as_secs() as i64;

    let mut queue: Vec<Candidate> = idle_nodes
        .iter()
        .filter_map(|node| {
            let last_tested = latest.get(node).copied().filter(|&ts| ts > 0);
            let qualifies = match last_tested {
                None => true,
                Some(ts) => now - ts > threshold_secs,
            };
            qualifies.then(|| Candidate {
                node: node.clone(),
                last_tested,
            })
        })
        .collect();

    match strategy {
        QueueStrategy::OldestFirst => {
            queue.sort_by(|a, b| {
                let ka = (a.last_tested.unwrap_or(0), a.node.as_str());
                let kb = (b.last_tested.unwrap_or(0), b.node.as_str());
                ka.cmp(&kb)
            });
        }
        QueueStrategy::Shuffle => {
            queue.shuffle(&mut rand::thread_rng());
        }
    }

    queue
}
