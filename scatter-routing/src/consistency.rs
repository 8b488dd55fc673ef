//! Replica consistency repair - every partition on exactly one node.
//!
//! The one-replica and explicit-partition paths can observe routing tables
//! where a partition is claimed by several nodes (the balancer saw the
//! topology mid-change). Sending such a table as-is would fetch the same
//! partition twice, so conflicts are repaired by keeping unique claims and
//! choosing one claimant at random otherwise.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::Rng;
use scatter_core::{NodeId, PartitionId};
use tracing::warn;

/// Repairs duplicate-partition assignments using the given RNG.
///
/// Post-invariants: the output maps each partition to exactly one node, and
/// the union of output partitions equals the union of input partitions.
///
/// The RNG is injected so tests can seed it; production callers use
/// [`repair_with_thread_rng`].
#[must_use]
pub fn repair<R: Rng>(
    assignments: &HashMap<NodeId, HashSet<PartitionId>>,
    rng: &mut R,
) -> HashMap<NodeId, HashSet<PartitionId>> {
    // Invert to partition -> claimants. BTreeMap gives a deterministic
    // iteration order so a seeded RNG yields a reproducible repair.
    let mut claimants: BTreeMap<PartitionId, Vec<NodeId>> = BTreeMap::new();
    for (node, partitions) in assignments {
        for partition in partitions {
            claimants.entry(*partition).or_default().push(*node);
        }
    }

    let mut repaired: HashMap<NodeId, HashSet<PartitionId>> = HashMap::new();
    for (partition, mut nodes) in claimants {
        let owner = if nodes.len() == 1 {
            nodes[0]
        } else {
            nodes.sort_by_key(|n| n.get());
            warn!(
                partition = %partition,
                claimants = nodes.len(),
                "partition claimed by multiple nodes, repairing"
            );
            nodes[rng.gen_range(0..nodes.len())]
        };
        repaired.entry(owner).or_default().insert(partition);
    }
    repaired
}

/// Repairs duplicate-partition assignments using the process-wide RNG.
#[must_use]
pub fn repair_with_thread_rng(
    assignments: &HashMap<NodeId, HashSet<PartitionId>>,
) -> HashMap<NodeId, HashSet<PartitionId>> {
    repair(assignments, &mut rand::thread_rng())
}
