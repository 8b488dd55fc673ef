//! Error types for Scatter dispatch operations.
//!
//! All errors must be handled explicitly. Precondition violations surface
//! synchronously from the send call; per-sub-request failures are delivered
//! as iterator results, never thrown.

use std::fmt;

/// The result type for Scatter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Scatter dispatch operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No load balancer has been published yet.
    NotConnected,

    /// The endpoint set could not form a valid load balancer.
    ///
    /// Cached by the balancer cell and returned on every send until the
    /// next successful membership update.
    InvalidCluster {
        /// Why the cluster was rejected.
        message: String,
    },

    /// The router could not place one or more partitioned ids on any node.
    NoNodesAvailable {
        /// Which placement failed.
        detail: String,
    },

    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// A transport operation failed.
    Network(NetworkErrorKind),

    /// An operation timed out.
    Timeout {
        /// What operation timed out.
        operation: &'static str,
        /// How long we waited (in microseconds).
        waited_us: u64,
    },

    /// The response iterator was closed while waiting.
    Cancelled {
        /// What operation was cancelled.
        operation: &'static str,
    },

    /// Every retry attempt for a set of partitioned ids was used up.
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
    },
}

/// Kinds of transport failures, as classified by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Connection refused by the peer.
    ConnectionRefused,
    /// Connection reset by the peer.
    ConnectionReset,
    /// The connection timed out.
    TimedOut,
    /// The peer is not known to the transport.
    UnknownPeer,
    /// The peer's send queue is full.
    QueueFull,
    /// The transport has been shut down.
    Shutdown,
    /// The request or response could not be serialized.
    Codec,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected: no load balancer available"),
            Self::InvalidCluster { message } => write!(f, "invalid cluster: {message}"),
            Self::NoNodesAvailable { detail } => {
                write!(f, "no nodes available: {detail}")
            }
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
            Self::Network(kind) => write!(f, "network error: {kind:?}"),
            Self::Timeout {
                operation,
                waited_us,
            } => {
                write!(f, "timeout: {operation} after {waited_us}us")
            }
            Self::Cancelled { operation } => write!(f, "cancelled: {operation}"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for Error {}
