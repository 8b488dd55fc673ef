//! Deterministic balancers for dispatch tests.
//!
//! [`TableBalancer`] places ids from an explicit replica table, rotating
//! through each id's replica list on successive probes so the exclusion
//! paths can discover alternates. [`TableFactory`] hands a prebuilt
//! balancer to the cache; [`RejectingFactory`] rejects every snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use scatter_core::{Capabilities, ClusterId, Endpoint, NodeId, PartitionId};
use scatter_routing::{InvalidClusterError, LoadBalancer, LoadBalancerFactory};

/// Balancer backed by explicit replica and partition tables.
pub struct TableBalancer {
    /// Replica list per id, in preference order.
    replicas: HashMap<u64, Vec<NodeId>>,
    /// Physical partition ownership, for the partition-addressed paths.
    partitions: HashMap<NodeId, HashSet<PartitionId>>,
    /// Node membership per sub-cluster.
    clusters: HashMap<ClusterId, HashSet<NodeId>>,
    /// Per-id probe cursor; successive probes walk the replica list.
    cursors: Mutex<HashMap<u64, usize>>,
}

impl TableBalancer {
    /// Creates a balancer from a replica table.
    #[must_use]
    pub fn new(replicas: HashMap<u64, Vec<NodeId>>) -> Self {
        Self {
            replicas,
            partitions: HashMap::new(),
            clusters: HashMap::new(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Adds physical partition ownership.
    #[must_use]
    pub fn with_partitions(mut self, partitions: HashMap<NodeId, HashSet<PartitionId>>) -> Self {
        self.partitions = partitions;
        self
    }

    /// Adds sub-cluster membership.
    #[must_use]
    pub fn with_clusters(mut self, clusters: HashMap<ClusterId, HashSet<NodeId>>) -> Self {
        self.clusters = clusters;
        self
    }
}

impl LoadBalancer<u64> for TableBalancer {
    fn next_node(&self, id: &u64, _caps: Capabilities) -> Option<NodeId> {
        let list = self.replicas.get(id)?;
        if list.is_empty() {
            return None;
        }
        let mut cursors = self.cursors.lock().expect("lock poisoned");
        let cursor = cursors.entry(*id).or_insert(0);
        let index = *cursor % list.len();
        *cursor += 1;
        Some(list[index])
    }

    fn nodes_for_one_replica(
        &self,
        _id: &u64,
        _caps: Capabilities,
    ) -> HashMap<NodeId, HashSet<PartitionId>> {
        self.partitions.clone()
    }

    fn nodes_for_partitioned_id(&self, id: &u64, _caps: Capabilities) -> HashSet<NodeId> {
        self.replicas
            .get(id)
            .map(|list| list.iter().copied().collect())
            .unwrap_or_default()
    }

    fn nodes_for_partitions(
        &self,
        _id: &u64,
        partitions: &HashSet<PartitionId>,
        _caps: Capabilities,
    ) -> HashMap<NodeId, HashSet<PartitionId>> {
        let mut assignment: HashMap<NodeId, HashSet<PartitionId>> = HashMap::new();
        for (node, owned) in &self.partitions {
            let subset: HashSet<PartitionId> = owned.intersection(partitions).copied().collect();
            if !subset.is_empty() {
                assignment.insert(*node, subset);
            }
        }
        assignment
    }

    fn nodes_for_partitioned_ids_in_n_replicas(
        &self,
        ids: &HashSet<u64>,
        replicas: u32,
        _caps: Capabilities,
    ) -> HashMap<NodeId, HashSet<u64>> {
        let mut assignment: HashMap<NodeId, HashSet<u64>> = HashMap::new();
        for id in ids {
            if let Some(list) = self.replicas.get(id) {
                for node in list.iter().take(replicas as usize) {
                    assignment.entry(*node).or_default().insert(*id);
                }
            }
        }
        assignment
    }

    fn nodes_for_partitioned_ids_in_one_cluster(
        &self,
        ids: &HashSet<u64>,
        cluster: ClusterId,
        _caps: Capabilities,
    ) -> HashMap<NodeId, HashSet<u64>> {
        let members = self.clusters.get(&cluster).cloned().unwrap_or_default();
        let mut assignment: HashMap<NodeId, HashSet<u64>> = HashMap::new();
        for id in ids {
            if let Some(list) = self.replicas.get(id) {
                if let Some(node) = list.iter().find(|node| members.contains(node)) {
                    assignment.entry(*node).or_default().insert(*id);
                }
            }
        }
        assignment
    }
}

/// Factory that publishes a prebuilt balancer for any non-empty snapshot.
pub struct TableFactory {
    balancer: Arc<TableBalancer>,
}

impl TableFactory {
    /// Wraps a prebuilt balancer.
    #[must_use]
    pub fn new(balancer: Arc<TableBalancer>) -> Self {
        Self { balancer }
    }
}

impl LoadBalancerFactory<u64> for TableFactory {
    fn new_load_balancer(
        &self,
        _endpoints: &[Endpoint],
    ) -> Result<Arc<dyn LoadBalancer<u64>>, InvalidClusterError> {
        Ok(Arc::clone(&self.balancer) as Arc<dyn LoadBalancer<u64>>)
    }
}

/// Factory that rejects every snapshot.
pub struct RejectingFactory {
    /// Rejection message handed to the cache.
    pub message: &'static str,
}

impl LoadBalancerFactory<u64> for RejectingFactory {
    fn new_load_balancer(
        &self,
        _endpoints: &[Endpoint],
    ) -> Result<Arc<dyn LoadBalancer<u64>>, InvalidClusterError> {
        Err(InvalidClusterError::new(self.message))
    }
}
