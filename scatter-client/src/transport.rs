//! Transport contract - the collaborator that actually moves bytes.
//!
//! The dispatch core hands the transport a destination node, a built
//! payload, and the serializer; the transport owns connections, framing,
//! and delivery. Every submission completes exactly once, either with a
//! decoded response or a classified failure.

use async_trait::async_trait;
use scatter_core::{NetworkErrorKind, NodeId};
use thiserror::Error;

use crate::codec::{CodecError, Serializer};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to connect to the peer.
    #[error("failed to connect to peer {node}: {source}")]
    ConnectFailed {
        /// The peer node ID.
        node: NodeId,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The connection was reset mid-request.
    #[error("connection to peer {0} reset")]
    ConnectionReset(NodeId),

    /// The peer did not respond within the transport's deadline.
    #[error("request to peer {0} timed out")]
    RequestTimeout(NodeId),

    /// The peer is not known to the transport.
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),

    /// The peer's send queue is full.
    #[error("send queue full for peer {0}")]
    QueueFull(NodeId),

    /// The transport has been shut down.
    #[error("transport is shutdown")]
    Shutdown,

    /// The payload could not be encoded or the response decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl TransportError {
    /// Classifies the failure for the semantic error taxonomy.
    #[must_use]
    pub const fn kind(&self) -> NetworkErrorKind {
        match self {
            Self::ConnectFailed { .. } => NetworkErrorKind::ConnectionRefused,
            Self::ConnectionReset(_) => NetworkErrorKind::ConnectionReset,
            Self::RequestTimeout(_) => NetworkErrorKind::TimedOut,
            Self::UnknownPeer(_) => NetworkErrorKind::UnknownPeer,
            Self::QueueFull(_) => NetworkErrorKind::QueueFull,
            Self::Shutdown => NetworkErrorKind::Shutdown,
            Self::Codec(_) => NetworkErrorKind::Codec,
        }
    }

    /// Whether the failed sub-request may be retried against an alternate
    /// replica.
    ///
    /// Node-scoped failures are retriable: a different replica may serve
    /// the same ids. A shut-down transport or an unencodable payload fails
    /// the same way everywhere, so retrying would only burn the budget.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::ConnectFailed { .. }
            | Self::ConnectionReset(_)
            | Self::RequestTimeout(_)
            | Self::UnknownPeer(_)
            | Self::QueueFull(_) => true,
            Self::Shutdown | Self::Codec(_) => false,
        }
    }
}

/// Contract for submitting one sub-request to one node.
///
/// # Implementation Notes
///
/// `send_request` must complete exactly once per call, and must not block
/// the caller beyond its own awaiting. Implementations must be `Send +
/// Sync` because sub-requests are driven from spawned tasks.
#[async_trait]
pub trait Transport<Req, Resp>: Send + Sync + 'static {
    /// Sends an encoded request to `node` and awaits the decoded response.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] classifying the failure; retriable
    /// kinds may be rerouted to an alternate replica by the caller.
    async fn send_request(
        &self,
        node: NodeId,
        request: &Req,
        serializer: &dyn Serializer<Req, Resp>,
    ) -> TransportResult<Resp>;
}
