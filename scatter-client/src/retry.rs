//! Retry engine - whole-sub-request retry against alternate replicas.
//!
//! Each sub-request is driven by a spawned task: submit to the transport,
//! await the outcome, deliver it into the completion sink. On a retriable
//! failure with budget left, the surviving ids are rerouted around the
//! failed node and re-submitted; a reroute that itself fails surfaces the
//! *original* failure, so a broken topology cannot loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use scatter_core::{Capabilities, Error, NodeId, PartitionedId};
use scatter_routing::{BalancerCache, Router};
use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::Serializer;
use crate::iterator::{IteratorHandle, SubResponse};
use crate::request::PartitionedRequest;
use crate::transport::{Transport, TransportError};

/// Timing policy for selective retry.
///
/// The strategy answers one question: after `attempt` dispatches of an id,
/// how long to wait before dispatch `attempt + 1` - or `None` when the
/// budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    /// Patience for the initial dispatch.
    pub initial_timeout: Duration,
    /// Multiplier applied per retry.
    pub backoff_multiplier: u32,
    /// Cap on any single wait.
    pub max_timeout: Duration,
    /// Retries allowed per id after the initial dispatch.
    pub max_retries: u32,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_millis(100),
            backoff_multiplier: 2,
            max_timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl RetryStrategy {
    /// Returns the patience granted to retry number `retry` (1-based), or
    /// `None` when the strategy denies further attempts.
    #[must_use]
    pub fn timeout_for_retry(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }
        let factor = self.backoff_multiplier.saturating_pow(retry - 1);
        let timeout = self.initial_timeout.saturating_mul(factor);
        Some(timeout.min(self.max_timeout))
    }
}

/// Where completed sub-request results go.
///
/// Plain dispatches deliver straight to the iterator; selective-retry
/// dispatches deliver to the tracker task, which forwards, dedups, or
/// drops before the iterator sees anything.
pub(crate) enum CompletionSink<K: PartitionedId, R> {
    /// Deliver directly to the response iterator.
    Direct(IteratorHandle<K, R>),
    /// Deliver to the selective-retry tracker.
    Tracker(mpsc::UnboundedSender<SubResponse<K, R>>),
}

impl<K: PartitionedId, R> CompletionSink<K, R> {
    /// Delivers one completed result.
    pub(crate) fn deliver(&self, response: SubResponse<K, R>) {
        match self {
            Self::Direct(handle) => handle.publish(response),
            Self::Tracker(tx) => {
                // Tracker gone means the iterator closed; drop silently.
                let _ = tx.send(response);
            }
        }
    }
}

impl<K: PartitionedId, R> Clone for CompletionSink<K, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(handle) => Self::Direct(handle.clone()),
            Self::Tracker(tx) => Self::Tracker(tx.clone()),
        }
    }
}

/// Everything a sub-request driver needs: transport, routing context for
/// reroutes, the retry budget, and the completion sink.
pub(crate) struct SubmitContext<K: PartitionedId, Req, Resp, T> {
    /// The transport collaborator.
    pub transport: Arc<T>,
    /// Serializer forwarded to the transport.
    pub serializer: Arc<dyn Serializer<Req, Resp>>,
    /// Balancer source for reroutes.
    pub cache: Arc<BalancerCache<K>>,
    /// Router for reroutes.
    pub router: Router,
    /// Capability constraints forwarded on reroute.
    pub caps: Capabilities,
    /// Whole-sub-request retries allowed per sub-request.
    pub max_retry: u32,
    /// Resize access to the parent iterator.
    pub handle: IteratorHandle<K, Resp>,
    /// Completion sink.
    pub sink: CompletionSink<K, Resp>,
}

impl<K: PartitionedId, Req, Resp, T> Clone for SubmitContext<K, Req, Resp, T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            serializer: Arc::clone(&self.serializer),
            cache: Arc::clone(&self.cache),
            router: self.router,
            caps: self.caps,
            max_retry: self.max_retry,
            handle: self.handle.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Spawns the driver task for one sub-request.
pub(crate) fn submit<K, Req, Resp, T>(
    ctx: SubmitContext<K, Req, Resp, T>,
    request: PartitionedRequest<K, Req>,
) where
    K: PartitionedId,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
    T: Transport<Req, Resp>,
{
    tokio::spawn(drive(ctx, request));
}

/// Drives one sub-request to completion, re-submitting on retriable
/// failure. Boxed because a retry fans out into further `drive` calls.
fn drive<K, Req, Resp, T>(
    ctx: SubmitContext<K, Req, Resp, T>,
    request: PartitionedRequest<K, Req>,
) -> BoxFuture<'static, ()>
where
    K: PartitionedId,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
    T: Transport<Req, Resp>,
{
    async move {
        let outcome = ctx
            .transport
            .send_request(request.node(), request.payload(), ctx.serializer.as_ref())
            .await;

        match outcome {
            Ok(response) => ctx.sink.deliver(SubResponse {
                node: request.node(),
                ids: request.ids().clone(),
                outcome: Ok(response),
            }),
            Err(err) => handle_failure(&ctx, &request, &err),
        }
    }
    .boxed()
}

/// Handles a failed sub-request: reroute and re-submit when the failure is
/// retriable and budget remains, otherwise deliver the failure.
fn handle_failure<K, Req, Resp, T>(
    ctx: &SubmitContext<K, Req, Resp, T>,
    request: &PartitionedRequest<K, Req>,
    err: &TransportError,
) where
    K: PartitionedId,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
    T: Transport<Req, Resp>,
{
    if err.is_retriable() && request.attempt() < ctx.max_retry {
        match reroute(ctx, request) {
            Ok(assignment) if !assignment.is_empty() => {
                debug!(
                    node = %request.node(),
                    ids = request.ids().len(),
                    attempt = request.attempt(),
                    fanout = assignment.len(),
                    "retrying failed sub-request on alternate nodes"
                );
                // One of the new sub-requests reuses the failed one's slot;
                // the rest must be accounted for before submission.
                let extra = i64::try_from(assignment.len()).unwrap_or(i64::MAX) - 1;
                if extra > 0 {
                    ctx.handle.add_and_get(extra);
                }
                for (node, ids) in assignment {
                    let retried = request.rebuild_for(node, ids);
                    tokio::spawn(drive(ctx.clone(), retried));
                }
                return;
            }
            Ok(_) => {
                debug!(node = %request.node(), "reroute produced no assignment");
            }
            Err(reroute_err) => {
                debug!(
                    node = %request.node(),
                    error = %reroute_err,
                    "reroute failed, surfacing original failure"
                );
            }
        }
    }

    ctx.sink.deliver(SubResponse {
        node: request.node(),
        ids: request.ids().clone(),
        outcome: Err(Error::Network(err.kind())),
    });
}

/// Recomputes the assignment for a failed sub-request's ids, excluding the
/// node that just failed.
fn reroute<K, Req, Resp, T>(
    ctx: &SubmitContext<K, Req, Resp, T>,
    request: &PartitionedRequest<K, Req>,
) -> scatter_core::Result<std::collections::HashMap<NodeId, HashSet<K>>>
where
    K: PartitionedId,
{
    let balancer = ctx.cache.read()?;
    let excluded: HashSet<NodeId> = HashSet::from([request.node()]);
    ctx.router
        .assign_excluding(
            balancer.as_ref(),
            request.ids(),
            &excluded,
            ctx.router.config().max_reroute_probes,
            ctx.caps,
        )
        .map_err(Into::into)
}
