//! Selective retry tests: per-id timeouts, re-dispatch, duplicates.
//!
//! All tests run under paused tokio time so per-id deadlines fire
//! deterministically.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use scatter_client::{RetryStrategy, RoutingConfigs, SendOptions};
use scatter_core::{Error, NodeId};

use crate::balancers::TableBalancer;
use crate::harness::{dispatcher, replica_table};
use crate::simulated_transport::{NodeBehavior, SimulatedTransport};

fn selective_options(strategy: RetryStrategy) -> SendOptions {
    SendOptions::new()
        .with_routing(RoutingConfigs::default().with_selective_retry())
        .with_retry_strategy(strategy)
}

fn short_strategy() -> RetryStrategy {
    RetryStrategy {
        initial_timeout: Duration::from_millis(100),
        backoff_multiplier: 2,
        max_timeout: Duration::from_secs(1),
        max_retries: 3,
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_ids_redispatch_to_alternate_replica() {
    let transport = Arc::new(SimulatedTransport::new().with_behavior(
        NodeId::new(1),
        NodeBehavior::RespondAfter(Duration::from_secs(10)),
    ));
    let balancer = Arc::new(TableBalancer::new(replica_table(&[
        (1, &[1, 3]),
        (2, &[2, 3]),
    ])));
    let dispatcher = dispatcher(Arc::clone(&transport), balancer);

    let mut iterator = dispatcher
        .send(
            HashSet::from([1, 2]),
            |_node, _ids| "ping".to_string(),
            selective_options(short_strategy()),
        )
        .expect("send succeeds");

    let mut results = Vec::new();
    while let Some(response) = iterator.next().await.expect("no error") {
        results.push(response);
    }

    // N2 answered id 2 directly; id 1 timed out on N1 and re-dispatched
    // to N3. The eventual slow response from N1 was dropped as a
    // duplicate, so exactly two results surface.
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.outcome.is_ok()));

    let by_node: HashSet<NodeId> = results.iter().map(|r| r.node).collect();
    assert_eq!(by_node, HashSet::from([NodeId::new(2), NodeId::new(3)]));

    // No partition id appears in more than one delivered response.
    let mut covered: Vec<u64> = results.iter().flat_map(|r| r.ids.iter().copied()).collect();
    covered.sort_unstable();
    assert_eq!(covered, vec![1, 2]);

    assert_eq!(transport.submission_count(NodeId::new(1)), 1);
    assert_eq!(transport.submission_count(NodeId::new(3)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicates_ok_forwards_slow_response() {
    let transport = Arc::new(SimulatedTransport::new().with_behavior(
        NodeId::new(1),
        NodeBehavior::RespondAfter(Duration::from_secs(10)),
    ));
    let balancer = Arc::new(TableBalancer::new(replica_table(&[
        (1, &[1, 3]),
        (2, &[2, 3]),
    ])));
    let dispatcher = dispatcher(transport, balancer);

    let options = SendOptions::new()
        .with_routing(
            RoutingConfigs::default()
                .with_selective_retry()
                .with_duplicates_ok(),
        )
        .with_retry_strategy(short_strategy());

    let mut iterator = dispatcher
        .send(
            HashSet::from([1, 2]),
            |_node, _ids| "ping".to_string(),
            options,
        )
        .expect("send succeeds");

    let mut results = Vec::new();
    while let Some(response) = iterator.next().await.expect("no error") {
        results.push(response);
    }

    // The slow duplicate from N1 is delivered too.
    assert_eq!(results.len(), 3);
    let from_n1 = results.iter().filter(|r| r.node == NodeId::new(1)).count();
    assert_eq!(from_n1, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_ids_surface_failure() {
    let transport = Arc::new(SimulatedTransport::new().with_behavior(
        NodeId::new(1),
        NodeBehavior::RespondAfter(Duration::from_secs(3600)),
    ));
    // Id 1 has no replica beyond the stalled node.
    let balancer = Arc::new(TableBalancer::new(replica_table(&[
        (1, &[1]),
        (2, &[2, 3]),
    ])));
    let dispatcher = dispatcher(transport, balancer);

    let strategy = RetryStrategy {
        max_retries: 0,
        ..short_strategy()
    };

    let mut iterator = dispatcher
        .send(
            HashSet::from([1, 2]),
            |_node, _ids| "ping".to_string(),
            selective_options(strategy),
        )
        .expect("send succeeds");

    let mut successes = 0;
    let mut failures = Vec::new();
    while let Some(response) = iterator.next().await.expect("no error") {
        match response.outcome {
            Ok(_) => successes += 1,
            Err(err) => failures.push((response.ids, err)),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(failures.len(), 1);
    let (ids, err) = &failures[0];
    assert_eq!(ids, &HashSet::from([1]));
    assert!(matches!(err, Error::RetriesExhausted { attempts: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_selective_reroute_failure_surfaces_routing_error() {
    let transport = Arc::new(SimulatedTransport::new().with_behavior(
        NodeId::new(1),
        NodeBehavior::RespondAfter(Duration::from_secs(3600)),
    ));
    // Retries are allowed but no alternate replica exists for id 1.
    let balancer = Arc::new(TableBalancer::new(replica_table(&[
        (1, &[1]),
        (2, &[2, 3]),
    ])));
    let dispatcher = dispatcher(transport, balancer);

    let mut iterator = dispatcher
        .send(
            HashSet::from([1, 2]),
            |_node, _ids| "ping".to_string(),
            selective_options(short_strategy()),
        )
        .expect("send succeeds");

    let mut failures = Vec::new();
    while let Some(response) = iterator.next().await.expect("no error") {
        if let Err(err) = response.outcome {
            failures.push(err);
        }
    }

    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], Error::NoNodesAvailable { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_single_node_fanout_skips_selective_machinery() {
    let transport = Arc::new(SimulatedTransport::new());
    let balancer = Arc::new(TableBalancer::new(replica_table(&[(1, &[1]), (2, &[1])])));
    let dispatcher = dispatcher(Arc::clone(&transport), balancer);

    // Both ids land on one node, so the selective iterator degenerates to
    // the plain discipline.
    let results = dispatcher
        .send_collect(
            HashSet::from([1, 2]),
            |_node, _ids| "ping".to_string(),
            selective_options(short_strategy()),
        )
        .await
        .expect("collect succeeds");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].ids, HashSet::from([1, 2]));
    assert_eq!(transport.submission_count(NodeId::new(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_failure_after_successful_retry_is_dropped() {
    let transport = Arc::new(SimulatedTransport::new().with_behavior(
        NodeId::new(1),
        NodeBehavior::FailAfter(Duration::from_secs(10)),
    ));
    let balancer = Arc::new(TableBalancer::new(replica_table(&[
        (1, &[1, 3]),
        (2, &[2, 3]),
    ])));
    let dispatcher = dispatcher(Arc::clone(&transport), balancer);

    let mut iterator = dispatcher
        .send(
            HashSet::from([1, 2]),
            |_node, _ids| "ping".to_string(),
            selective_options(short_strategy()),
        )
        .expect("send succeeds");

    let mut results = Vec::new();
    while let Some(response) = iterator.next().await.expect("no error") {
        results.push(response);
    }

    // Id 1 timed out on N1, re-dispatched to N3, and was satisfied there
    // long before N1's abandoned sub-request finally errored. That late
    // failure covers only an already-satisfied id, so it is dropped, not
    // delivered as a second result.
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.outcome.is_ok()));

    let by_node: HashSet<NodeId> = results.iter().map(|r| r.node).collect();
    assert_eq!(by_node, HashSet::from([NodeId::new(2), NodeId::new(3)]));

    let mut covered: Vec<u64> = results.iter().flat_map(|r| r.ids.iter().copied()).collect();
    covered.sort_unstable();
    assert_eq!(covered, vec![1, 2]);

    assert_eq!(transport.submission_count(NodeId::new(1)), 1);
    assert_eq!(transport.submission_count(NodeId::new(3)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_selective_failure_result_is_forwarded() {
    let transport = Arc::new(
        SimulatedTransport::new().with_behavior(NodeId::new(1), NodeBehavior::FailFatal),
    );
    let balancer = Arc::new(TableBalancer::new(replica_table(&[
        (1, &[1, 3]),
        (2, &[2, 3]),
    ])));
    let dispatcher = dispatcher(transport, balancer);

    let mut iterator = dispatcher
        .send(
            HashSet::from([1, 2]),
            |_node, _ids| "ping".to_string(),
            selective_options(short_strategy()),
        )
        .expect("send succeeds");

    let mut outcomes = Vec::new();
    while let Some(response) = iterator.next().await.expect("no error") {
        outcomes.push((response.node, response.outcome));
    }

    // The fatal failure from N1 surfaces as a result; N2's success
    // arrives as the other.
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().any(|(node, o)| *node == NodeId::new(1) && o.is_err()));
    assert!(outcomes.iter().any(|(node, o)| *node == NodeId::new(2) && o.is_ok()));
}
