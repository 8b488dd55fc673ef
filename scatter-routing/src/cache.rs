//! Balancer cache - the single published load-balancer cell.
//!
//! Membership updates replace the whole cell atomically; send paths read a
//! consistent snapshot. A failed balancer construction is cached and
//! rethrown on every read until the next successful update.

use std::sync::{Arc, RwLock};

use scatter_core::{Endpoint, NodeId, PartitionedId, Result};
use tracing::{info, warn};

use crate::balancer::{LoadBalancer, LoadBalancerFactory};

/// The three states of the published balancer cell.
enum BalancerCell<K: PartitionedId> {
    /// No membership snapshot has produced a balancer yet.
    Absent,
    /// The last snapshot was rejected by the factory.
    Invalid(crate::InvalidClusterError),
    /// A balancer built from the most recent accepted snapshot.
    Valid(Arc<dyn LoadBalancer<K>>),
}

/// Holds the current load balancer, or the reason there is none.
///
/// # Thread Safety
///
/// The cell is replaced wholesale under a write lock; readers clone the
/// inner `Arc` under a read lock. Any read that begins after an update
/// completes observes that update or a later one.
pub struct BalancerCache<K: PartitionedId> {
    /// Builds balancers from membership snapshots.
    factory: Arc<dyn LoadBalancerFactory<K>>,
    /// The published cell.
    cell: RwLock<BalancerCell<K>>,
}

impl<K: PartitionedId> BalancerCache<K> {
    /// Creates a disconnected cache around the given factory.
    #[must_use]
    pub fn new(factory: Arc<dyn LoadBalancerFactory<K>>) -> Self {
        Self {
            factory,
            cell: RwLock::new(BalancerCell::Absent),
        }
    }

    /// Publishes a new membership snapshot.
    ///
    /// An empty endpoint set disconnects the cache. A factory rejection is
    /// cached so subsequent reads fail with the same error until the next
    /// successful update.
    pub fn update(&self, endpoints: &[Endpoint]) {
        let next = if endpoints.is_empty() {
            info!("membership update with no endpoints, disconnecting");
            BalancerCell::Absent
        } else {
            match self.factory.new_load_balancer(endpoints) {
                Ok(balancer) => {
                    info!(endpoints = endpoints.len(), "published new load balancer");
                    BalancerCell::Valid(balancer)
                }
                Err(err) => {
                    warn!(error = %err, "load balancer construction failed");
                    BalancerCell::Invalid(err)
                }
            }
        };

        let mut cell = self.cell.write().expect("lock poisoned");
        *cell = next;
    }

    /// Returns the current balancer.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` before the first non-empty update and after
    /// any empty update; returns the cached `InvalidCluster` error while
    /// the last snapshot stands rejected.
    pub fn read(&self) -> Result<Arc<dyn LoadBalancer<K>>> {
        let cell = self.cell.read().expect("lock poisoned");
        match &*cell {
            BalancerCell::Absent => Err(scatter_core::Error::NotConnected),
            BalancerCell::Invalid(err) => Err(err.clone().into()),
            BalancerCell::Valid(balancer) => Ok(Arc::clone(balancer)),
        }
    }

    /// Returns true if a balancer is currently published.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let cell = self.cell.read().expect("lock poisoned");
        matches!(&*cell, BalancerCell::Valid(_))
    }
}

impl<K: PartitionedId> std::fmt::Debug for BalancerCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = {
            let cell = self.cell.read().expect("lock poisoned");
            match &*cell {
                BalancerCell::Absent => "absent",
                BalancerCell::Invalid(_) => "invalid",
                BalancerCell::Valid(_) => "valid",
            }
        };
        f.debug_struct("BalancerCache").field("state", &state).finish()
    }
}

/// Convenience: the set of node ids named by an endpoint snapshot.
#[must_use]
pub fn endpoint_nodes(endpoints: &[Endpoint]) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = endpoints.iter().map(|e| e.node).collect();
    nodes.sort_by_key(|n| n.get());
    nodes
}
