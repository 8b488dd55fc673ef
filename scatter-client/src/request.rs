//! Partitioned sub-request - one per-node slice of a fan-out.
//!
//! A sub-request is immutable after construction. The request builder is
//! carried alongside the built payload so a retry can rebuild the payload
//! for a different node and id subset.

use std::collections::HashSet;
use std::sync::Arc;

use scatter_core::{NodeId, PartitionedId};

/// Builds a request payload for one `(node, ids)` assignment.
///
/// Invoked once per sub-request, and again on every retry with the new
/// node and the surviving id subset.
pub type RequestBuilder<K, Req> = Arc<dyn Fn(NodeId, &HashSet<K>) -> Req + Send + Sync>;

/// One per-node slice of a fanned-out request.
///
/// The attempt counter starts at zero and increments on every rebuild;
/// the retry engine compares it against the retry budget.
pub struct PartitionedRequest<K: PartitionedId, Req> {
    /// The target node.
    node: NodeId,
    /// The partitioned ids this sub-request covers.
    ids: HashSet<K>,
    /// The built payload.
    payload: Req,
    /// How many times this logical sub-request has been rebuilt.
    attempt: u32,
    /// Rebuilds the payload for a new node on retry.
    builder: RequestBuilder<K, Req>,
}

impl<K: PartitionedId, Req> PartitionedRequest<K, Req> {
    /// Builds the initial sub-request for an assignment.
    #[must_use]
    pub fn new(node: NodeId, ids: HashSet<K>, builder: RequestBuilder<K, Req>) -> Self {
        let payload = builder(node, &ids);
        Self {
            node,
            ids,
            payload,
            attempt: 0,
            builder,
        }
    }

    /// Rebuilds this sub-request for an alternate node and id subset,
    /// incrementing the attempt counter.
    #[must_use]
    pub fn rebuild_for(&self, node: NodeId, ids: HashSet<K>) -> Self {
        let payload = (self.builder)(node, &ids);
        Self {
            node,
            ids,
            payload,
            attempt: self.attempt + 1,
            builder: Arc::clone(&self.builder),
        }
    }

    /// The target node.
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// The partitioned ids this sub-request covers.
    #[must_use]
    pub const fn ids(&self) -> &HashSet<K> {
        &self.ids
    }

    /// The built payload.
    #[must_use]
    pub const fn payload(&self) -> &Req {
        &self.payload
    }

    /// How many times this logical sub-request has been rebuilt.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl<K: PartitionedId, Req> std::fmt::Debug for PartitionedRequest<K, Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedRequest")
            .field("node", &self.node)
            .field("ids", &self.ids)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
