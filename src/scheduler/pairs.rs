//! All-pairs round scheduler for parallel pairwise tests (e.g., AllReduce).
//!
//! Computes a near-1-factorization of the complete graph K_n with the classic
//! circle method: every unordered pair of participants meets exactly once,
//! and no participant appears twice within a round, so all pairs in a round
//! can run concurrently. Even n gives n-1 rounds of n/2 pairs; odd n gives n
//! rounds with one participant idle per round.

use std::collections::BTreeSet;

use super::SchedulerError;

pub type Pair = (String, String);
pub type Round = Vec<Pair>;

/// Generate the round schedule covering every unordered pair exactly once.
///
/// Fewer than two participants yields an empty schedule.
pub fn schedule(participants: &[String]) -> Vec<Round> {
    if participants.len() < 2 {
        return Vec::new();
    }
    // Odd participant counts get a BYE slot; pairs touching it are dropped.
    let mut arr: Vec<Option<&str>> = participants.iter().map(|s| Some(s.as_str())).collect();
    if arr.len() % 2 == 1 {
        arr.push(None);
    }
    let n = arr.len();
    let half = n / 2;

    let mut rounds = Vec::with_capacity(n - 1);
    for _ in 0..n - 1 {
        let mut round = Vec::with_capacity(half);
        for i in 0..half {
            if let (Some(a), Some(b)) = (arr[i], arr[n - 1 - i]) {
                round.push((a.to_string(), b.to_string()));
            }
        }
        rounds.push(round);

        // Rotate everything but the fixed first element:
        // [a0, a1, ..., a_{n-2}, a_{n-1}] -> [a0, a_{n-1}, a1, ..., a_{n-2}]
        if n > 2 {
            let last = arr.pop().unwrap_or(None);
            arr.insert(1, last);
        }
    }

    rounds
}

/// Outcome of the coverage oracle.
#[derive(Debug, Default)]
pub struct CoverageReport {
    /// (round index, offending pair) where a participant repeated in-round.
    pub duplicates: Vec<(usize, Pair)>,
    /// Unordered pairs expected but never scheduled.
    pub missing: Vec<Pair>,
    /// Unordered pairs scheduled more than once or outside the participant set.
    pub extra: Vec<Pair>,
}

impl CoverageReport {
    pub fn is_ok(&self) -> bool {
        self.duplicates.is_empty() && self.missing.is_empty() && self.extra.is_empty()
    }
}

fn canonical(a: &str, b: &str) -> Pair {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Check per-round uniqueness and global exactly-once coverage.
pub fn coverage(rounds: &[Round], participants: &[String]) -> CoverageReport {
    let mut report = CoverageReport::default();

    for (i, round) in rounds.iter().enumerate() {
        let mut used = BTreeSet::new();
        for (a, b) in round {
            if !used.insert(a.clone()) || !used.insert(b.clone()) {
                report.duplicates.push((i, (a.clone(), b.clone())));
            }
        }
    }

    let mut want = BTreeSet::new();
    for (i, a) in participants.iter().enumerate() {
        for b in &participants[i + 1..] {
            want.insert(canonical(a, b));
        }
    }

    let mut seen = BTreeSet::new();
    for round in rounds {
        for (a, b) in round {
            let pair = canonical(a, b);
            if !seen.insert(pair.clone()) || !want.contains(&pair) {
                report.extra.push(pair);
            }
        }
    }

    report.missing = want.difference(&seen).cloned().collect();
    report
}

/// Correctness oracle: logs each violation and returns overall validity.
///
/// A false return means the generator itself is defective; treat it as fatal
/// for the scheduling run.
pub fn verify(rounds: &[Round], participants: &[String]) -> bool {
    let report = coverage(rounds, participants);

    for (round, (a, b)) in &report.duplicates {
        tracing::warn!(round = *round, a = %a, b = %b, "Participant repeats within round");
    }
    if !report.missing.is_empty() {
        tracing::warn!(
            count = report.missing.len(),
            first = ?report.missing.first(),
            "Pairs missing from schedule"
        );
    }
    if !report.extra.is_empty() {
        tracing::warn!(
            count = report.extra.len(),
            first = ?report.extra.first(),
            "Duplicate or unexpected pairs in schedule"
        );
    }

    report.is_ok()
}

/// Generate and verify in one step, failing loudly on a coverage defect.
pub fn checked_schedule(participants: &[String]) -> Result<Vec<Round>, SchedulerError> {
    let rounds = schedule(participants);
    let report = coverage(&rounds, participants);
    if report.is_ok() {
        Ok(rounds)
    } else {
        Err(SchedulerError::PairingVerification(format!(
            "{} in-round duplicates, {} missing, {} extra pairs for {} participants",
            report.duplicates.len(),
            report.missing.len(),
            report.extra.len(),
            participants.len()
        )))
    }
}

/// Expand node-index pairs into flat per-GPU rank lists for NCCL launch
/// configs: node index i owns ranks [i*ranks_per_node, (i+1)*ranks_per_node).
pub fn expand_ranks(rounds: &[Vec<(usize, usize)>], ranks_per_node: usize) -> Vec<Vec<Vec<usize>>> {
    rounds
        .iter()
        .map(|round| {
            round
                .iter()
                .map(|&(left, right)| {
                    let mut ranks: Vec<usize> =
                        (left * ranks_per_node..(left + 1) * ranks_per_node).collect();
                    ranks.extend(right * ranks_per_node..(right + 1) * ranks_per_node);
                    ranks
                })
                .collect()
        })
        .collect()
}
