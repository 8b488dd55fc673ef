//! Replica- and partition-addressed path tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use scatter_core::{Capabilities, Error, NodeId, PartitionId};

use crate::balancers::TableBalancer;
use crate::harness::{dispatcher, replica_table};
use crate::simulated_transport::{NodeBehavior, SimulatedTransport};

fn partitions(ids: &[u64]) -> HashSet<PartitionId> {
    ids.iter().copied().map(PartitionId::new).collect()
}

#[tokio::test]
async fn test_send_to_replicas_contacts_every_replica() {
    let transport = Arc::new(SimulatedTransport::new());
    let balancer = Arc::new(TableBalancer::new(replica_table(&[(1, &[1, 2, 3])])));
    let dispatcher = dispatcher(Arc::clone(&transport), balancer);

    let mut iterator = dispatcher
        .send_to_replicas(&1, "probe".to_string(), 0, Capabilities::none())
        .expect("send succeeds");

    let mut nodes = HashSet::new();
    while let Some(response) = iterator.next().await.expect("no error") {
        assert_eq!(response.ids, HashSet::from([1]));
        assert!(response.outcome.is_ok());
        nodes.insert(response.node);
    }
    assert_eq!(
        nodes,
        HashSet::from([NodeId::new(1), NodeId::new(2), NodeId::new(3)])
    );
}

#[tokio::test]
async fn test_send_to_replicas_retries_failed_replica() {
    let transport = Arc::new(
        SimulatedTransport::new()
            .with_behavior(NodeId::new(1), NodeBehavior::FailThenRespond(1)),
    );
    let balancer = Arc::new(TableBalancer::new(replica_table(&[(1, &[1, 2])])));
    let dispatcher = dispatcher(Arc::clone(&transport), balancer);

    let mut iterator = dispatcher
        .send_to_replicas(&1, "probe".to_string(), 1, Capabilities::none())
        .expect("send succeeds");

    let mut count = 0;
    while let Some(response) = iterator.next().await.expect("no error") {
        assert!(response.outcome.is_ok());
        count += 1;
    }
    // Both replica slots produce a success; N1's failure rerouted.
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_send_to_one_replica_repairs_conflicts() {
    let transport = Arc::new(SimulatedTransport::new());
    // Partition 1 is claimed by both nodes.
    let table = HashMap::from([
        (NodeId::new(1), partitions(&[0, 1])),
        (NodeId::new(2), partitions(&[1, 2])),
    ]);
    let balancer = Arc::new(
        TableBalancer::new(replica_table(&[(1, &[1])])).with_partitions(table),
    );
    let dispatcher = dispatcher(transport, balancer);

    let mut iterator = dispatcher
        .send_to_one_replica(
            &1,
            |_node, parts| format!("parts:{}", parts.len()),
            Capabilities::none(),
        )
        .expect("send succeeds");

    let mut covered: Vec<u64> = Vec::new();
    let mut per_response: Vec<usize> = Vec::new();
    while let Some(response) = iterator.next().await.expect("no error") {
        assert!(response.outcome.is_ok());
        per_response.push(response.ids.len());
        covered.extend(response.ids.iter().map(|p| p.get()));
    }

    // Every partition exactly once, conflict or not.
    covered.sort_unstable();
    assert_eq!(covered, vec![0, 1, 2]);
    assert_eq!(per_response.iter().sum::<usize>(), 3);
}

#[tokio::test]
async fn test_send_to_partitions_targets_owners_only() {
    let transport = Arc::new(SimulatedTransport::new());
    let table = HashMap::from([
        (NodeId::new(1), partitions(&[0, 1])),
        (NodeId::new(2), partitions(&[2, 3])),
    ]);
    let balancer = Arc::new(
        TableBalancer::new(replica_table(&[(1, &[1])])).with_partitions(table),
    );
    let dispatcher = dispatcher(Arc::clone(&transport), balancer);

    let mut iterator = dispatcher
        .send_to_partitions(
            &1,
            &partitions(&[1, 2]),
            |_node, parts| format!("parts:{}", parts.len()),
            Capabilities::none(),
        )
        .expect("send succeeds");

    let mut by_node: HashMap<NodeId, HashSet<PartitionId>> = HashMap::new();
    while let Some(response) = iterator.next().await.expect("no error") {
        by_node.insert(response.node, response.ids);
    }

    assert_eq!(by_node.len(), 2);
    assert_eq!(by_node[&NodeId::new(1)], partitions(&[1]));
    assert_eq!(by_node[&NodeId::new(2)], partitions(&[2]));
}

#[tokio::test]
async fn test_partition_paths_fail_without_owners() {
    let transport = Arc::new(SimulatedTransport::new());
    let balancer = Arc::new(TableBalancer::new(replica_table(&[(1, &[1])])));
    let dispatcher = dispatcher(transport, balancer);

    let result = dispatcher.send_to_one_replica(
        &1,
        |_node, _parts| "probe".to_string(),
        Capabilities::none(),
    );
    assert!(matches!(result, Err(Error::NoNodesAvailable { .. })));

    let result = dispatcher.send_to_replicas(&99, "probe".to_string(), 0, Capabilities::none());
    assert!(matches!(result, Err(Error::NoNodesAvailable { .. })));
}

#[tokio::test]
async fn test_capability_tagged_send_round_trips() {
    let transport = Arc::new(SimulatedTransport::new());
    let table = HashMap::from([(NodeId::new(1), partitions(&[0]))]);
    let balancer = Arc::new(
        TableBalancer::new(replica_table(&[(1, &[1])])).with_partitions(table),
    );
    let dispatcher = dispatcher(transport, balancer);

    // Capability bits are opaque to the core; a tagged send behaves like
    // an untagged one when the balancer ignores them.
    let caps = Capabilities::none().with_capability(scatter_core::Capability::new(0x1));
    let mut iterator = dispatcher
        .send_to_one_replica(&1, |_node, _parts| "probe".to_string(), caps)
        .expect("send succeeds");

    let response = iterator.next().await.expect("no error").expect("result");
    assert!(response.outcome.is_ok());
}
