//! Selective retry - per-id timeouts and partial re-dispatch.
//!
//! A tracker task owns the per-id state machine. Sub-request results flow
//! through the tracker before the consumer sees them: fresh coverage is
//! forwarded, duplicate coverage is dropped (unless configured otherwise),
//! and ids whose patience expires are re-routed to replicas not yet tried.
//!
//! # State machine (per id)
//!
//! ```text
//! Awaiting ──response──> Satisfied
//!    │ timer
//!    ▼
//! Retrying(1) ──response──> Satisfied
//!    │ timer                              any failure result
//!    ▼                                    ──────────────────> Exhausted
//! Retrying(n) ──strategy denies──> Exhausted
//! ```
//!
//! Every dispatch produces exactly one tracker-visible result (sub-request
//! failures are not retried whole in selective mode; the per-id timers own
//! all retrying), so the tracker exits once `outstanding` reaches zero.

use std::collections::{HashMap, HashSet};

use scatter_core::{Error, NodeId, PartitionedId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::iterator::SubResponse;
use crate::request::{PartitionedRequest, RequestBuilder};
use crate::retry::{submit, RetryStrategy, SubmitContext};
use crate::transport::Transport;

/// Per-id dispatch state.
enum IdState {
    /// Initial dispatch in flight; the timer is armed with the strategy's
    /// initial timeout.
    Awaiting {
        /// When patience runs out.
        deadline: Instant,
        /// Nodes contacted so far, in order.
        tried: Vec<NodeId>,
    },
    /// A retry dispatch is in flight.
    Retrying {
        /// Retries dispatched so far (1-based).
        attempt: u32,
        /// When patience runs out.
        deadline: Instant,
        /// Nodes contacted so far, in order.
        tried: Vec<NodeId>,
    },
    /// A response covering this id was forwarded.
    Satisfied,
    /// The retry budget is spent; a failure was surfaced.
    Exhausted,
}

impl IdState {
    const fn is_terminal(&self) -> bool {
        matches!(self, Self::Satisfied | Self::Exhausted)
    }

    const fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Awaiting { deadline, .. } | Self::Retrying { deadline, .. } => Some(*deadline),
            Self::Satisfied | Self::Exhausted => None,
        }
    }
}

/// Tracker task state for one selective-retry send.
pub(crate) struct RetryTracker<K: PartitionedId, Req, Resp, T> {
    /// Results arriving from sub-request drivers.
    rx: mpsc::UnboundedReceiver<SubResponse<K, Resp>>,
    /// Submission context for re-dispatches (sink points back at us).
    ctx: SubmitContext<K, Req, Resp, T>,
    /// Rebuilds payloads for re-dispatched id subsets.
    builder: RequestBuilder<K, Req>,
    /// Timing policy.
    strategy: RetryStrategy,
    /// Whether duplicate coverage is forwarded instead of dropped.
    duplicates_ok: bool,
    /// Per-id dispatch state.
    states: HashMap<K, IdState>,
    /// Sub-requests in flight; one result owed per entry.
    outstanding: usize,
}

impl<K, Req, Resp, T> RetryTracker<K, Req, Resp, T>
where
    K: PartitionedId,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
    T: Transport<Req, Resp>,
{
    /// Creates a tracker for the initial assignment. Call before the
    /// initial sub-requests are submitted.
    pub(crate) fn new(
        assignment: &HashMap<NodeId, HashSet<K>>,
        rx: mpsc::UnboundedReceiver<SubResponse<K, Resp>>,
        ctx: SubmitContext<K, Req, Resp, T>,
        builder: RequestBuilder<K, Req>,
        strategy: RetryStrategy,
        duplicates_ok: bool,
    ) -> Self {
        let deadline = Instant::now() + strategy.initial_timeout;
        let mut states = HashMap::new();
        for (node, ids) in assignment {
            for id in ids {
                states.insert(
                    id.clone(),
                    IdState::Awaiting {
                        deadline,
                        tried: vec![*node],
                    },
                );
            }
        }
        Self {
            rx,
            ctx,
            builder,
            strategy,
            duplicates_ok,
            states,
            outstanding: assignment.len(),
        }
    }

    /// Runs the tracker until every sub-request has completed or the
    /// iterator is closed.
    pub(crate) async fn run(mut self) {
        debug!(ids = self.states.len(), "selective retry tracker started");
        while self.outstanding > 0 {
            let deadline = self.earliest_deadline();
            let handle = self.ctx.handle.clone();
            tokio::select! {
                () = handle.closed() => {
                    debug!("iterator closed, selective retry tracker stopping");
                    return;
                }
                received = self.rx.recv() => match received {
                    Some(response) => self.on_result(response),
                    None => return,
                },
                () = sleep_until_deadline(deadline) => self.on_deadlines(),
            }
        }
        debug!("selective retry tracker drained");
    }

    /// Handles one completed sub-request.
    ///
    /// The duplicate check makes no distinction between outcomes: a result
    /// whose every id is already terminal is dropped whether it is the
    /// slow success or the abandoned failure of a superseded sub-request.
    fn on_result(&mut self, response: SubResponse<K, Resp>) {
        self.outstanding = self.outstanding.saturating_sub(1);

        let fresh = response
            .ids
            .iter()
            .filter(|id| self.states.get(*id).is_some_and(|s| !s.is_terminal()))
            .count();

        if fresh == 0 && !self.duplicates_ok {
            debug!(
                node = %response.node,
                ids = response.ids.len(),
                failed = response.outcome.is_err(),
                "dropping response, all covered ids already resolved"
            );
            self.ctx.handle.add_and_get(-1);
            return;
        }

        let failed = response.outcome.is_err();
        for id in &response.ids {
            if let Some(state) = self.states.get_mut(id) {
                if !state.is_terminal() {
                    *state = if failed {
                        IdState::Exhausted
                    } else {
                        IdState::Satisfied
                    };
                }
            }
        }
        self.ctx.handle.publish(response);
    }

    /// Handles every id whose patience has expired.
    fn on_deadlines(&mut self) {
        let now = Instant::now();

        // Snapshot expired ids; states are rewritten below.
        let mut expired: Vec<(K, u32, Vec<NodeId>)> = Vec::new();
        for (id, state) in &self.states {
            match state {
                IdState::Awaiting { deadline, tried } if *deadline <= now => {
                    expired.push((id.clone(), 0, tried.clone()));
                }
                IdState::Retrying {
                    attempt,
                    deadline,
                    tried,
                } if *deadline <= now => {
                    expired.push((id.clone(), *attempt, tried.clone()));
                }
                _ => {}
            }
        }
        if expired.is_empty() {
            return;
        }

        let mut retryable: HashSet<K> = HashSet::new();
        let mut attempts: HashMap<K, u32> = HashMap::new();
        let mut tried_nodes: HashMap<K, Vec<NodeId>> = HashMap::new();
        let mut exhausted: HashMap<NodeId, HashSet<K>> = HashMap::new();

        for (id, attempt, tried) in expired {
            if self.strategy.timeout_for_retry(attempt + 1).is_some() {
                retryable.insert(id.clone());
                attempts.insert(id.clone(), attempt);
                tried_nodes.insert(id, tried);
            } else {
                // Surface per last-contacted node so the failure names a
                // concrete peer.
                let last = tried.last().copied().unwrap_or_default();
                exhausted.entry(last).or_default().insert(id.clone());
                self.states.insert(id, IdState::Exhausted);
            }
        }

        for (node, ids) in exhausted {
            warn!(
                node = %node,
                ids = ids.len(),
                "retry budget exhausted, surfacing failure"
            );
            // The stalled sub-request still owes its own result; this
            // failure is an additional one.
            self.ctx.handle.add_and_get(1);
            self.ctx.handle.publish(SubResponse {
                node,
                ids,
                outcome: Err(Error::RetriesExhausted {
                    attempts: self.strategy.max_retries + 1,
                }),
            });
        }

        if !retryable.is_empty() {
            self.redispatch(retryable, &attempts, &tried_nodes, now);
        }
    }

    /// Re-routes expired ids around every node already contacted and
    /// submits the new sub-requests.
    fn redispatch(
        &mut self,
        ids: HashSet<K>,
        attempts: &HashMap<K, u32>,
        tried_nodes: &HashMap<K, Vec<NodeId>>,
        now: Instant,
    ) {
        let excluded: HashSet<NodeId> = tried_nodes.values().flatten().copied().collect();

        let assignment = self
            .ctx
            .cache
            .read()
            .and_then(|balancer| {
                self.ctx
                    .router
                    .assign_excluding(
                        balancer.as_ref(),
                        &ids,
                        &excluded,
                        self.ctx.router.config().max_reroute_probes,
                        self.ctx.caps,
                    )
                    .map_err(Into::into)
            });

        let assignment = match assignment {
            Ok(assignment) => assignment,
            Err(err) => {
                warn!(error = %err, ids = ids.len(), "selective reroute failed");
                // No replacement nodes: these ids are done.
                for id in &ids {
                    self.states.insert(id.clone(), IdState::Exhausted);
                }
                let mut by_last: HashMap<NodeId, HashSet<K>> = HashMap::new();
                for id in ids {
                    let last = tried_nodes
                        .get(&id)
                        .and_then(|tried| tried.last())
                        .copied()
                        .unwrap_or_default();
                    by_last.entry(last).or_default().insert(id);
                }
                for (node, group) in by_last {
                    self.ctx.handle.add_and_get(1);
                    self.ctx.handle.publish(SubResponse {
                        node,
                        ids: group,
                        outcome: Err(err.clone()),
                    });
                }
                return;
            }
        };

        for (node, subset) in assignment {
            debug!(node = %node, ids = subset.len(), "selective retry re-dispatch");

            // Account for the new sub-request before it can complete.
            self.ctx.handle.add_and_get(1);
            self.outstanding += 1;

            for id in &subset {
                let attempt = attempts.get(id).copied().unwrap_or(0) + 1;
                let patience = self
                    .strategy
                    .timeout_for_retry(attempt)
                    .unwrap_or(self.strategy.initial_timeout);
                let mut tried = tried_nodes.get(id).cloned().unwrap_or_default();
                tried.push(node);
                self.states.insert(
                    id.clone(),
                    IdState::Retrying {
                        attempt,
                        deadline: now + patience,
                        tried,
                    },
                );
            }

            let request = PartitionedRequest::new(node, subset, self.builder.clone());
            submit(self.ctx.clone(), request);
        }
    }

    /// The soonest armed per-id deadline, if any.
    fn earliest_deadline(&self) -> Option<Instant> {
        self.states.values().filter_map(IdState::deadline).min()
    }
}

/// Sleeps until the deadline, or forever when no timer is armed.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
