//! Request router - maps sets of partitioned ids to node assignments.
//!
//! The router folds load-balancer observations into a `node -> ids`
//! assignment under one of four policies: standard, N-replica,
//! cluster-pinned, and exclusion-aware (used by the retry paths). It is
//! purely functional over the balancer within a single call.

use std::collections::{HashMap, HashSet};

use scatter_core::{Capabilities, ClusterId, NodeId, PartitionedId};

use crate::balancer::LoadBalancer;

/// Maximum balancer probes per id when routing around excluded nodes.
pub const ROUTE_PROBES_MAX: u32 = 3;

/// Configuration for the router.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// Balancer probes per id in the exclusion-aware mode.
    pub max_reroute_probes: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_reroute_probes: ROUTE_PROBES_MAX,
        }
    }
}

/// Routes sets of partitioned ids to cluster nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Router {
    /// Configuration.
    config: RouterConfig,
}

impl Router {
    /// Creates a router with the given configuration.
    #[must_use]
    pub const fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Creates a router with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RouterConfig::default())
    }

    /// Standard mode: one node per id via `next_node`.
    ///
    /// The result is a partition of `ids`: every id appears under exactly
    /// one node.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NoNodesAvailable`] if the balancer declines
    /// any id.
    pub fn assign<K: PartitionedId>(
        &self,
        balancer: &dyn LoadBalancer<K>,
        ids: &HashSet<K>,
        caps: Capabilities,
    ) -> Result<HashMap<NodeId, HashSet<K>>, RoutingError> {
        let mut assignment: HashMap<NodeId, HashSet<K>> = HashMap::new();
        for id in ids {
            let node = balancer.next_node(id, caps).ok_or_else(|| {
                RoutingError::NoNodesAvailable {
                    detail: format!("no assignable node for id {id:?}"),
                }
            })?;
            assignment.entry(node).or_default().insert(id.clone());
        }
        Ok(assignment)
    }

    /// N-replica mode: each id placed on up to `replicas` distinct nodes.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NoNodesAvailable`] if the balancer places
    /// nothing for a non-empty id set.
    pub fn assign_replicated<K: PartitionedId>(
        &self,
        balancer: &dyn LoadBalancer<K>,
        ids: &HashSet<K>,
        replicas: u32,
        caps: Capabilities,
    ) -> Result<HashMap<NodeId, HashSet<K>>, RoutingError> {
        let assignment = balancer.nodes_for_partitioned_ids_in_n_replicas(ids, replicas, caps);
        if assignment.is_empty() && !ids.is_empty() {
            return Err(RoutingError::NoNodesAvailable {
                detail: format!("no replicas available for {} ids", ids.len()),
            });
        }
        Ok(assignment)
    }

    /// Cluster-pinned mode: placement restricted to one sub-cluster.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NoNodesAvailable`] if the balancer places
    /// nothing for a non-empty id set.
    pub fn assign_in_cluster<K: PartitionedId>(
        &self,
        balancer: &dyn LoadBalancer<K>,
        ids: &HashSet<K>,
        cluster: ClusterId,
        caps: Capabilities,
    ) -> Result<HashMap<NodeId, HashSet<K>>, RoutingError> {
        let assignment = balancer.nodes_for_partitioned_ids_in_one_cluster(ids, cluster, caps);
        if assignment.is_empty() && !ids.is_empty() {
            return Err(RoutingError::NoNodesAvailable {
                detail: format!("no nodes available in {cluster} for {} ids", ids.len()),
            });
        }
        Ok(assignment)
    }

    /// Exclusion-aware mode: like standard, but never assigns to a node in
    /// `excluded`. Probes the balancer up to `max_attempts` times per id and
    /// accepts the first assignment outside the excluded set.
    ///
    /// The output never contains an excluded node.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::InvalidAttempts`] when `max_attempts` is
    /// zero (programmer error), and [`RoutingError::NoNodesAvailable`] when
    /// no unexcluded node turns up within the probe budget.
    pub fn assign_excluding<K: PartitionedId>(
        &self,
        balancer: &dyn LoadBalancer<K>,
        ids: &HashSet<K>,
        excluded: &HashSet<NodeId>,
        max_attempts: u32,
        caps: Capabilities,
    ) -> Result<HashMap<NodeId, HashSet<K>>, RoutingError> {
        if max_attempts == 0 {
            return Err(RoutingError::InvalidAttempts { attempts: max_attempts });
        }

        let mut assignment: HashMap<NodeId, HashSet<K>> = HashMap::new();
        for id in ids {
            let mut chosen = None;
            for _ in 0..max_attempts {
                match balancer.next_node(id, caps) {
                    Some(node) if !excluded.contains(&node) => {
                        chosen = Some(node);
                        break;
                    }
                    _ => {}
                }
            }
            let node = chosen.ok_or_else(|| RoutingError::NoNodesAvailable {
                detail: format!(
                    "no unexcluded node for id {id:?} within {max_attempts} probes ({} excluded)",
                    excluded.len()
                ),
            })?;
            assignment.entry(node).or_default().insert(id.clone());
        }
        Ok(assignment)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RouterConfig {
        &self.config
    }
}

/// Errors from routing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// No node could be assigned for one or more ids.
    NoNodesAvailable {
        /// Which placement failed.
        detail: String,
    },
    /// The probe budget was not positive.
    InvalidAttempts {
        /// The offending attempt count.
        attempts: u32,
    },
}

impl std::fmt::Display for RoutingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoNodesAvailable { detail } => write!(f, "no nodes available: {detail}"),
            Self::InvalidAttempts { attempts } => {
                write!(f, "invalid probe budget: {attempts}")
            }
        }
    }
}

impl std::error::Error for RoutingError {}

impl From<RoutingError> for scatter_core::Error {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::NoNodesAvailable { detail } => Self::NoNodesAvailable { detail },
            RoutingError::InvalidAttempts { .. } => Self::InvalidArgument {
                name: "max_attempts",
                reason: "must be positive",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use scatter_core::PartitionId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Balancer that assigns id to `nodes[id % nodes.len()]`.
    struct ModuloBalancer {
        nodes: Vec<NodeId>,
    }

    impl ModuloBalancer {
        fn new(count: u64) -> Self {
            Self {
                nodes: (1..=count).map(NodeId::new).collect(),
            }
        }
    }

    impl LoadBalancer<u64> for ModuloBalancer {
        fn next_node(&self, id: &u64, _caps: Capabilities) -> Option<NodeId> {
            let index = usize::try_from(*id).ok()? % self.nodes.len();
            Some(self.nodes[index])
        }

        fn nodes_for_one_replica(
            &self,
            _id: &u64,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<PartitionId>> {
            HashMap::new()
        }

        fn nodes_for_partitioned_id(&self, id: &u64, caps: Capabilities) -> HashSet<NodeId> {
            self.next_node(id, caps).into_iter().collect()
        }

        fn nodes_for_partitions(
            &self,
            _id: &u64,
            _partitions: &HashSet<PartitionId>,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<PartitionId>> {
            HashMap::new()
        }

        fn nodes_for_partitioned_ids_in_n_replicas(
            &self,
            ids: &HashSet<u64>,
            replicas: u32,
            caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<u64>> {
            let mut assignment: HashMap<NodeId, HashSet<u64>> = HashMap::new();
            for id in ids {
                for offset in 0..replicas as u64 {
                    if let Some(node) = self.next_node(&(id + offset), caps) {
                        assignment.entry(node).or_default().insert(*id);
                    }
                }
            }
            assignment
        }

        fn nodes_for_partitioned_ids_in_one_cluster(
            &self,
            ids: &HashSet<u64>,
            _cluster: ClusterId,
            caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<u64>> {
            let mut assignment: HashMap<NodeId, HashSet<u64>> = HashMap::new();
            for id in ids {
                if let Some(node) = self.next_node(id, caps) {
                    assignment.entry(node).or_default().insert(*id);
                }
            }
            assignment
        }
    }

    /// Balancer that declines every id.
    struct EmptyBalancer;

    impl LoadBalancer<u64> for EmptyBalancer {
        fn next_node(&self, _id: &u64, _caps: Capabilities) -> Option<NodeId> {
            None
        }

        fn nodes_for_one_replica(
            &self,
            _id: &u64,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<PartitionId>> {
            HashMap::new()
        }

        fn nodes_for_partitioned_id(&self, _id: &u64, _caps: Capabilities) -> HashSet<NodeId> {
            HashSet::new()
        }

        fn nodes_for_partitions(
            &self,
            _id: &u64,
            _partitions: &HashSet<PartitionId>,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<PartitionId>> {
            HashMap::new()
        }

        fn nodes_for_partitioned_ids_in_n_replicas(
            &self,
            _ids: &HashSet<u64>,
            _replicas: u32,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<u64>> {
            HashMap::new()
        }

        fn nodes_for_partitioned_ids_in_one_cluster(
            &self,
            _ids: &HashSet<u64>,
            _cluster: ClusterId,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<u64>> {
            HashMap::new()
        }
    }

    /// Balancer whose successive `next_node` calls walk a fixed node list.
    struct RotatingBalancer {
        nodes: Vec<NodeId>,
        cursor: AtomicUsize,
    }

    impl LoadBalancer<u64> for RotatingBalancer {
        fn next_node(&self, _id: &u64, _caps: Capabilities) -> Option<NodeId> {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
            Some(self.nodes[index])
        }

        fn nodes_for_one_replica(
            &self,
            _id: &u64,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<PartitionId>> {
            HashMap::new()
        }

        fn nodes_for_partitioned_id(&self, _id: &u64, _caps: Capabilities) -> HashSet<NodeId> {
            self.nodes.iter().copied().collect()
        }

        fn nodes_for_partitions(
            &self,
            _id: &u64,
            _partitions: &HashSet<PartitionId>,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<PartitionId>> {
            HashMap::new()
        }

        fn nodes_for_partitioned_ids_in_n_replicas(
            &self,
            _ids: &HashSet<u64>,
            _replicas: u32,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<u64>> {
            HashMap::new()
        }

        fn nodes_for_partitioned_ids_in_one_cluster(
            &self,
            _ids: &HashSet<u64>,
            _cluster: ClusterId,
            _caps: Capabilities,
        ) -> HashMap<NodeId, HashSet<u64>> {
            HashMap::new()
        }
    }

    #[test]
    fn test_assign_partitions_ids_across_nodes() {
        let router = Router::with_defaults();
        let balancer = ModuloBalancer::new(2);
        let ids: HashSet<u64> = [1, 2, 3].into();

        let assignment = router
            .assign(&balancer, &ids, Capabilities::none())
            .expect("all ids placeable");

        // Union of values equals the input set.
        let mut union: HashSet<u64> = HashSet::new();
        for subset in assignment.values() {
            for id in subset {
                // Values are pairwise disjoint.
                assert!(union.insert(*id), "id {id} assigned twice");
            }
        }
        assert_eq!(union, ids);

        // Modulo placement: 2 -> node-1, {1, 3} -> node-2.
        assert_eq!(assignment[&NodeId::new(1)], HashSet::from([2]));
        assert_eq!(assignment[&NodeId::new(2)], HashSet::from([1, 3]));
    }

    #[test]
    fn test_assign_fails_when_balancer_declines() {
        let router = Router::with_defaults();
        let ids: HashSet<u64> = [5].into();

        let result = router.assign(&EmptyBalancer, &ids, Capabilities::none());
        assert!(matches!(result, Err(RoutingError::NoNodesAvailable { .. })));
    }

    #[test]
    fn test_assign_replicated_covers_each_id_n_times() {
        let router = Router::with_defaults();
        let balancer = ModuloBalancer::new(3);
        let ids: HashSet<u64> = [10, 11].into();

        let assignment = router
            .assign_replicated(&balancer, &ids, 2, Capabilities::none())
            .expect("replicas available");

        for id in &ids {
            let holders = assignment
                .iter()
                .filter(|(_, subset)| subset.contains(id))
                .count();
            assert_eq!(holders, 2, "id {id} should be placed on 2 replicas");
        }
    }

    #[test]
    fn test_assign_replicated_empty_placement_fails() {
        let router = Router::with_defaults();
        let ids: HashSet<u64> = [1].into();

        let result =
            router.assign_replicated(&EmptyBalancer, &ids, 2, Capabilities::none());
        assert!(matches!(result, Err(RoutingError::NoNodesAvailable { .. })));
    }

    #[test]
    fn test_assign_in_cluster_delegates() {
        let router = Router::with_defaults();
        let balancer = ModuloBalancer::new(2);
        let ids: HashSet<u64> = [4, 5].into();

        let assignment = router
            .assign_in_cluster(&balancer, &ids, ClusterId::new(1), Capabilities::none())
            .expect("cluster has nodes");

        let union: HashSet<u64> = assignment.values().flatten().copied().collect();
        assert_eq!(union, ids);
    }

    #[test]
    fn test_assign_excluding_rejects_zero_attempts() {
        let router = Router::with_defaults();
        let balancer = ModuloBalancer::new(2);
        let ids: HashSet<u64> = [1].into();

        let result = router.assign_excluding(
            &balancer,
            &ids,
            &HashSet::new(),
            0,
            Capabilities::none(),
        );
        assert!(matches!(result, Err(RoutingError::InvalidAttempts { .. })));
    }

    #[test]
    fn test_assign_excluding_skips_excluded_nodes() {
        let router = Router::with_defaults();
        let balancer = RotatingBalancer {
            nodes: vec![NodeId::new(1), NodeId::new(2)],
            cursor: AtomicUsize::new(0),
        };
        let ids: HashSet<u64> = [7].into();
        let excluded: HashSet<NodeId> = [NodeId::new(1)].into();

        let assignment = router
            .assign_excluding(&balancer, &ids, &excluded, ROUTE_PROBES_MAX, Capabilities::none())
            .expect("alternate node exists");

        assert!(!assignment.contains_key(&NodeId::new(1)));
        assert_eq!(assignment[&NodeId::new(2)], HashSet::from([7]));
    }

    #[test]
    fn test_assign_excluding_exhausts_probe_budget() {
        let router = Router::with_defaults();
        // Only one node, and it is excluded.
        let balancer = ModuloBalancer::new(1);
        let ids: HashSet<u64> = [3].into();
        let excluded: HashSet<NodeId> = [NodeId::new(1)].into();

        let result = router.assign_excluding(
            &balancer,
            &ids,
            &excluded,
            ROUTE_PROBES_MAX,
            Capabilities::none(),
        );
        assert!(matches!(result, Err(RoutingError::NoNodesAvailable { .. })));
    }
}
