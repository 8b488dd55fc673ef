//! Dispatcher - the send surface of the partitioned RPC client.
//!
//! One logical operation - "send to a set of partitioned ids" - routed
//! through the balancer, fanned out as one sub-request per node, and
//! streamed back through a response iterator. Convenience forms specialize
//! to a single id, a fixed payload, an aggregated result set, and the
//! replica- and partition-addressed paths.
//!
//! # Control flow
//!
//! ```text
//! caller ──> Dispatcher ──> Router ──> per-node sub-request ──> Transport
//!                                                                   │
//! caller <── ResponseIterator <── ResponseQueue <── completion <────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use scatter_core::{
    Capabilities, Endpoint, Error, Limits, NodeId, PartitionId, PartitionedId, Result,
};
use scatter_routing::{consistency, BalancerCache, LoadBalancerFactory, Router};
use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::Serializer;
use crate::config::{DispatcherConfig, SendOptions};
use crate::iterator::{IteratorHandle, ResponseIterator, SubResponse};
use crate::request::{PartitionedRequest, RequestBuilder};
use crate::retry::{submit, CompletionSink, SubmitContext};
use crate::selective::RetryTracker;
use crate::transport::Transport;

/// Client-side dispatch core for a partitioned RPC framework.
///
/// The dispatcher is cheap to share behind an `Arc`; every send is
/// independent. Cluster membership drives [`Dispatcher::update_load_balancer`];
/// sends fail with `NotConnected` until the first snapshot is published.
pub struct Dispatcher<K: PartitionedId, Req, Resp, T> {
    /// The transport collaborator.
    transport: Arc<T>,
    /// The published balancer cell.
    cache: Arc<BalancerCache<K>>,
    /// Routing policies.
    router: Router,
    /// Serializer forwarded with every sub-request.
    serializer: Arc<dyn Serializer<Req, Resp>>,
    /// System limits.
    limits: Limits,
}

impl<K, Req, Resp, T> Dispatcher<K, Req, Resp, T>
where
    K: PartitionedId,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
    T: Transport<Req, Resp>,
{
    /// Creates a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        transport: Arc<T>,
        factory: Arc<dyn LoadBalancerFactory<K>>,
        serializer: Arc<dyn Serializer<Req, Resp>>,
        config: DispatcherConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            cache: Arc::new(BalancerCache::new(factory)),
            router: Router::new(config.router),
            serializer,
            limits: config.limits,
        })
    }

    /// Publishes a new membership snapshot.
    ///
    /// Called by the cluster-membership collaborator on every change.
    pub fn update_load_balancer(&self, endpoints: &[Endpoint]) {
        self.cache.update(endpoints);
    }

    /// Returns true if a balancer is currently published.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.cache.is_connected()
    }

    /// Sends to a set of partitioned ids, building one payload per target
    /// node.
    ///
    /// Exactly one result per sub-request eventually reaches the returned
    /// iterator, in completion order; retries may grow the count.
    ///
    /// # Errors
    ///
    /// Fails synchronously on empty ids, violated limits, a disconnected
    /// or invalid cluster, and unplaceable ids. Per-sub-request failures
    /// never fail the send; they arrive as iterator results.
    pub fn send<F>(
        &self,
        ids: HashSet<K>,
        build: F,
        options: SendOptions,
    ) -> Result<ResponseIterator<K, Resp>>
    where
        F: Fn(NodeId, &HashSet<K>) -> Req + Send + Sync + 'static,
    {
        if ids.is_empty() {
            return Err(Error::InvalidArgument {
                name: "ids",
                reason: "must not be empty",
            });
        }
        if ids.len() > self.limits.max_ids_per_request as usize {
            return Err(Error::InvalidArgument {
                name: "ids",
                reason: "exceeds max_ids_per_request",
            });
        }
        if let Some(replicas) = options.replicas {
            if replicas == 0 || replicas > self.limits.max_replicas {
                return Err(Error::InvalidArgument {
                    name: "replicas",
                    reason: "must be in 1..=max_replicas",
                });
            }
        }

        let balancer = self.cache.read()?;
        let assignment = match (options.replicas, options.cluster) {
            (Some(replicas), _) => self.router.assign_replicated(
                balancer.as_ref(),
                &ids,
                replicas,
                options.capabilities,
            ),
            (None, Some(cluster)) => self.router.assign_in_cluster(
                balancer.as_ref(),
                &ids,
                cluster,
                options.capabilities,
            ),
            (None, None) => self.router.assign(balancer.as_ref(), &ids, options.capabilities),
        }
        .map_err(Error::from)?;

        if assignment.len() > self.limits.max_fanout_nodes as usize {
            return Err(Error::InvalidArgument {
                name: "ids",
                reason: "fan-out exceeds max_fanout_nodes",
            });
        }

        debug!(
            ids = ids.len(),
            nodes = assignment.len(),
            selective = options.routing.selective_retry,
            "dispatching"
        );

        let builder: RequestBuilder<K, Req> = Arc::new(build);
        let (iterator, handle) = ResponseIterator::with_expected(assignment.len());

        // Selective retry only pays off with several nodes in play; a
        // single sub-request degenerates to whole-sub-request retry.
        let selective = options.routing.selective_retry
            && options.retry_strategy.is_some()
            && assignment.len() > 1;

        if selective {
            let strategy = options.retry_strategy.unwrap_or_default();
            let (tx, rx) = mpsc::unbounded_channel();
            // In selective mode the per-id timers own all retrying; the
            // whole-sub-request budget does not apply.
            let ctx = self.submit_context(
                options.capabilities,
                0,
                handle.clone(),
                CompletionSink::Tracker(tx),
            );
            let tracker = RetryTracker::new(
                &assignment,
                rx,
                ctx.clone(),
                Arc::clone(&builder),
                strategy,
                options.routing.duplicates_ok,
            );
            tokio::spawn(tracker.run());
            for (node, node_ids) in assignment {
                let request = PartitionedRequest::new(node, node_ids, Arc::clone(&builder));
                submit(ctx.clone(), request);
            }
        } else {
            let ctx = self.submit_context(
                options.capabilities,
                options.max_retry,
                handle.clone(),
                CompletionSink::Direct(handle.clone()),
            );
            for (node, node_ids) in assignment {
                let request = PartitionedRequest::new(node, node_ids, Arc::clone(&builder));
                submit(ctx.clone(), request);
            }
        }

        Ok(iterator)
    }

    /// Sends to a single partitioned id and awaits its one response.
    ///
    /// # Errors
    ///
    /// Fails synchronously like [`Dispatcher::send`]; the sub-request's
    /// own failure is returned from the await.
    pub async fn send_one<F>(&self, id: K, build: F, options: SendOptions) -> Result<Resp>
    where
        F: Fn(NodeId, &HashSet<K>) -> Req + Send + Sync + 'static,
    {
        let ids = std::iter::once(id).collect();
        let mut iterator = self.send(ids, build, options)?;
        match iterator.next().await? {
            Some(response) => response.outcome,
            None => Err(Error::Cancelled {
                operation: "send_one",
            }),
        }
    }

    /// Sends the same payload to every target node.
    ///
    /// # Errors
    ///
    /// Fails synchronously like [`Dispatcher::send`].
    pub fn send_same(
        &self,
        ids: HashSet<K>,
        request: Req,
        options: SendOptions,
    ) -> Result<ResponseIterator<K, Resp>>
    where
        Req: Clone,
    {
        self.send(ids, move |_node, _ids| request.clone(), options)
    }

    /// Sends and drains the iterator into a vector, in completion order.
    ///
    /// # Errors
    ///
    /// Fails synchronously like [`Dispatcher::send`]; fails with
    /// `Cancelled` if the iterator is closed mid-drain.
    pub async fn send_collect<F>(
        &self,
        ids: HashSet<K>,
        build: F,
        options: SendOptions,
    ) -> Result<Vec<SubResponse<K, Resp>>>
    where
        F: Fn(NodeId, &HashSet<K>) -> Req + Send + Sync + 'static,
    {
        let mut iterator = self.send(ids, build, options)?;
        let mut results = Vec::new();
        while let Some(response) = iterator.next().await? {
            results.push(response);
        }
        Ok(results)
    }

    /// Sends the same payload to every replica holding `id`'s partition,
    /// with a whole-sub-request retry budget per replica.
    ///
    /// # Errors
    ///
    /// Fails with `NoNodesAvailable` when no replica holds the partition,
    /// and synchronously on a disconnected or invalid cluster.
    pub fn send_to_replicas(
        &self,
        id: &K,
        request: Req,
        max_retry: u32,
        caps: Capabilities,
    ) -> Result<ResponseIterator<K, Resp>>
    where
        Req: Clone,
    {
        let balancer = self.cache.read()?;
        let nodes = balancer.nodes_for_partitioned_id(id, caps);
        if nodes.is_empty() {
            return Err(Error::NoNodesAvailable {
                detail: format!("no replica holds id {id:?}"),
            });
        }

        let (iterator, handle) = ResponseIterator::with_expected(nodes.len());
        let builder: RequestBuilder<K, Req> = Arc::new(move |_node, _ids| request.clone());
        let ctx = self.submit_context(
            caps,
            max_retry,
            handle.clone(),
            CompletionSink::Direct(handle.clone()),
        );
        for node in nodes {
            let ids = std::iter::once(id.clone()).collect();
            let sub_request = PartitionedRequest::new(node, ids, Arc::clone(&builder));
            submit(ctx.clone(), sub_request);
        }
        Ok(iterator)
    }

    /// Sends to one full replica of the partition space reachable from
    /// `id`, one sub-request per owning node, after consistency repair.
    ///
    /// # Errors
    ///
    /// Fails with `NoNodesAvailable` when the balancer reports no owners,
    /// and synchronously on a disconnected or invalid cluster.
    pub fn send_to_one_replica<F>(
        &self,
        id: &K,
        build: F,
        caps: Capabilities,
    ) -> Result<ResponseIterator<PartitionId, Resp>>
    where
        F: Fn(NodeId, &HashSet<PartitionId>) -> Req + Send + Sync + 'static,
    {
        let balancer = self.cache.read()?;
        let assignment = balancer.nodes_for_one_replica(id, caps);
        self.send_fixed_partitions(assignment, build, "no replica owners")
    }

    /// Sends to the owners of an explicit partition set, one sub-request
    /// per owning node, after consistency repair.
    ///
    /// # Errors
    ///
    /// Fails with `NoNodesAvailable` when the balancer reports no owners,
    /// and synchronously on a disconnected or invalid cluster.
    pub fn send_to_partitions<F>(
        &self,
        id: &K,
        partitions: &HashSet<PartitionId>,
        build: F,
        caps: Capabilities,
    ) -> Result<ResponseIterator<PartitionId, Resp>>
    where
        F: Fn(NodeId, &HashSet<PartitionId>) -> Req + Send + Sync + 'static,
    {
        let balancer = self.cache.read()?;
        let assignment = balancer.nodes_for_partitions(id, partitions, caps);
        self.send_fixed_partitions(assignment, build, "no partition owners")
    }

    /// Shared tail of the partition-addressed paths: repair duplicate
    /// claims, then fan out with a fixed iterator.
    fn send_fixed_partitions<F>(
        &self,
        assignment: HashMap<NodeId, HashSet<PartitionId>>,
        build: F,
        missing: &str,
    ) -> Result<ResponseIterator<PartitionId, Resp>>
    where
        F: Fn(NodeId, &HashSet<PartitionId>) -> Req + Send + Sync + 'static,
    {
        if assignment.is_empty() {
            return Err(Error::NoNodesAvailable {
                detail: missing.to_string(),
            });
        }

        let repaired = consistency::repair_with_thread_rng(&assignment);
        let (iterator, handle) = ResponseIterator::with_expected(repaired.len());
        for (node, partitions) in repaired {
            let payload = build(node, &partitions);
            self.spawn_plain(&handle, node, partitions, payload);
        }
        Ok(iterator)
    }

    /// Spawns a retry-free sub-request driver: transport outcome straight
    /// into the iterator.
    fn spawn_plain<C: PartitionedId>(
        &self,
        handle: &IteratorHandle<C, Resp>,
        node: NodeId,
        ids: HashSet<C>,
        payload: Req,
    ) {
        let transport = Arc::clone(&self.transport);
        let serializer = Arc::clone(&self.serializer);
        let handle = handle.clone();
        tokio::spawn(async move {
            let outcome = transport
                .send_request(node, &payload, serializer.as_ref())
                .await
                .map_err(|err| Error::Network(err.kind()));
            handle.publish(SubResponse {
                node,
                ids,
                outcome,
            });
        });
    }

    /// Assembles a submission context for one send.
    fn submit_context(
        &self,
        caps: Capabilities,
        max_retry: u32,
        handle: IteratorHandle<K, Resp>,
        sink: CompletionSink<K, Resp>,
    ) -> SubmitContext<K, Req, Resp, T> {
        SubmitContext {
            transport: Arc::clone(&self.transport),
            serializer: Arc::clone(&self.serializer),
            cache: Arc::clone(&self.cache),
            router: self.router,
            caps,
            max_retry,
            handle,
            sink,
        }
    }
}

impl<K: PartitionedId, Req, Resp, T> std::fmt::Debug for Dispatcher<K, Req, Resp, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
