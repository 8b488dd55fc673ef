//! Load balancer contract - pluggable placement of partitioned ids on nodes.
//!
//! The balancer owns every placement decision: which node serves a
//! partitioned id, which replicas hold a physical partition, and how
//! capability constraints narrow the candidate set. The router consumes
//! these observations; it never hashes keys itself.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use scatter_core::{Capabilities, ClusterId, Endpoint, NodeId, PartitionId, PartitionedId};

/// Placement oracle for partitioned ids.
///
/// Implementations may be non-deterministic (round-robin, random, load
/// aware); callers must treat each method call as an independent
/// observation. Implementations must be immutable once published: topology
/// changes are expressed by building a new balancer, never by mutating a
/// live one.
pub trait LoadBalancer<K: PartitionedId>: Send + Sync {
    /// Returns the node that should serve `id` under the given constraints,
    /// or `None` if no eligible node exists.
    fn next_node(&self, id: &K, caps: Capabilities) -> Option<NodeId>;

    /// Returns one full replica of the partition space reachable from `id`,
    /// as physical partition numbers grouped by owning node.
    fn nodes_for_one_replica(
        &self,
        id: &K,
        caps: Capabilities,
    ) -> HashMap<NodeId, HashSet<PartitionId>>;

    /// Returns every node holding a replica of the partition that `id`
    /// hashes to.
    fn nodes_for_partitioned_id(&self, id: &K, caps: Capabilities) -> HashSet<NodeId>;

    /// Returns owners for an explicit set of physical partitions, grouped
    /// by node.
    fn nodes_for_partitions(
        &self,
        id: &K,
        partitions: &HashSet<PartitionId>,
        caps: Capabilities,
    ) -> HashMap<NodeId, HashSet<PartitionId>>;

    /// Places each id on up to `replicas` distinct nodes, subject to
    /// availability. Ids are grouped by assigned node; an id appears under
    /// several nodes when replicated.
    fn nodes_for_partitioned_ids_in_n_replicas(
        &self,
        ids: &HashSet<K>,
        replicas: u32,
        caps: Capabilities,
    ) -> HashMap<NodeId, HashSet<K>>;

    /// Places each id on a node restricted to the given sub-cluster.
    fn nodes_for_partitioned_ids_in_one_cluster(
        &self,
        ids: &HashSet<K>,
        cluster: ClusterId,
        caps: Capabilities,
    ) -> HashMap<NodeId, HashSet<K>>;
}

/// Error raised when an endpoint set cannot form a valid balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidClusterError {
    /// Why the endpoint set was rejected.
    pub message: String,
}

impl InvalidClusterError {
    /// Creates an error with the given rejection reason.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for InvalidClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cluster: {}", self.message)
    }
}

impl std::error::Error for InvalidClusterError {}

impl From<InvalidClusterError> for scatter_core::Error {
    fn from(err: InvalidClusterError) -> Self {
        Self::InvalidCluster {
            message: err.message,
        }
    }
}

/// Builds a balancer from the current cluster membership.
///
/// Invoked by the balancer cache on every membership change. A factory may
/// reject an endpoint set (no live nodes, replica constraints unmet) by
/// returning [`InvalidClusterError`]; the cache caches that rejection.
pub trait LoadBalancerFactory<K: PartitionedId>: Send + Sync {
    /// Constructs a balancer over the given endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidClusterError`] if the endpoints cannot form a
    /// valid cluster.
    fn new_load_balancer(
        &self,
        endpoints: &[Endpoint],
    ) -> Result<Arc<dyn LoadBalancer<K>>, InvalidClusterError>;
}
