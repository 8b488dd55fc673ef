//! Simulated transport for dispatch integration tests.
//!
//! Unlike a production transport, this one consults a per-node behavior
//! script: respond, respond after a delay, fail retriably, fail fatally,
//! or fail a fixed number of times before responding. Delays run on tokio
//! time, so tests under `start_paused` advance them deterministically.
//!
//! Every submission is recorded so tests can assert on fan-out shape and
//! retry counts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use scatter_client::{CodecError, Serializer, Transport, TransportError, TransportResult};
use scatter_core::NodeId;

/// Scripted behavior for one node.
#[derive(Debug, Clone, Copy)]
pub enum NodeBehavior {
    /// Respond immediately.
    Respond,
    /// Respond after the given delay.
    RespondAfter(Duration),
    /// Fail with a retriable connection reset.
    FailRetriable,
    /// Fail with a retriable connection reset after the given delay.
    FailAfter(Duration),
    /// Fail with a non-retriable transport shutdown.
    FailFatal,
    /// Fail retriably this many times, then respond.
    FailThenRespond(u32),
}

/// In-memory transport driven by per-node behavior scripts.
///
/// Responses echo the request: node `n` answering payload `p` produces
/// `"node-n:p"`, so tests can verify which node served which ids.
pub struct SimulatedTransport {
    /// Behavior per node; unlisted nodes respond immediately.
    behaviors: Mutex<HashMap<NodeId, NodeBehavior>>,
    /// Every submission, in arrival order.
    submissions: Mutex<Vec<(NodeId, String)>>,
}

impl SimulatedTransport {
    /// Creates a transport where every node responds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Scripts a node's behavior.
    #[must_use]
    pub fn with_behavior(self, node: NodeId, behavior: NodeBehavior) -> Self {
        self.behaviors
            .lock()
            .expect("lock poisoned")
            .insert(node, behavior);
        self
    }

    /// Rescripts a node's behavior mid-test.
    pub fn set_behavior(&self, node: NodeId, behavior: NodeBehavior) {
        self.behaviors
            .lock()
            .expect("lock poisoned")
            .insert(node, behavior);
    }

    /// Every submission so far, in arrival order.
    #[must_use]
    pub fn submissions(&self) -> Vec<(NodeId, String)> {
        self.submissions.lock().expect("lock poisoned").clone()
    }

    /// How many submissions a node has received.
    #[must_use]
    pub fn submission_count(&self, node: NodeId) -> usize {
        self.submissions
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(to, _)| *to == node)
            .count()
    }

    /// Resolves the current behavior for a node, consuming one failure
    /// from a `FailThenRespond` budget.
    fn next_behavior(&self, node: NodeId) -> NodeBehavior {
        let mut behaviors = self.behaviors.lock().expect("lock poisoned");
        match behaviors.get(&node).copied() {
            Some(NodeBehavior::FailThenRespond(remaining)) => {
                if remaining == 0 {
                    NodeBehavior::Respond
                } else {
                    behaviors.insert(node, NodeBehavior::FailThenRespond(remaining - 1));
                    NodeBehavior::FailRetriable
                }
            }
            Some(behavior) => behavior,
            None => NodeBehavior::Respond,
        }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport<String, String> for SimulatedTransport {
    async fn send_request(
        &self,
        node: NodeId,
        request: &String,
        serializer: &dyn Serializer<String, String>,
    ) -> TransportResult<String> {
        let encoded = serializer.encode_request(request)?;
        self.submissions
            .lock()
            .expect("lock poisoned")
            .push((node, request.clone()));

        match self.next_behavior(node) {
            NodeBehavior::Respond => {}
            NodeBehavior::RespondAfter(delay) => tokio::time::sleep(delay).await,
            NodeBehavior::FailRetriable => {
                return Err(TransportError::ConnectionReset(node));
            }
            NodeBehavior::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                return Err(TransportError::ConnectionReset(node));
            }
            NodeBehavior::FailFatal => return Err(TransportError::Shutdown),
            // next_behavior never yields this variant.
            NodeBehavior::FailThenRespond(_) => unreachable!("resolved by next_behavior"),
        }

        let reply = format!("{node}:{}", String::from_utf8_lossy(&encoded));
        let response = serializer.decode_response(Bytes::from(reply.into_bytes()))?;
        Ok(response)
    }
}

/// Serializer for UTF-8 string payloads.
pub struct Utf8Serializer;

impl Serializer<String, String> for Utf8Serializer {
    fn encode_request(&self, request: &String) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(request.as_bytes()))
    }

    fn decode_response(&self, buf: Bytes) -> Result<String, CodecError> {
        String::from_utf8(buf.to_vec()).map_err(|err| CodecError::Decode {
            reason: err.to_string(),
        })
    }
}
