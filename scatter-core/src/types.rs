//! Strongly-typed identifiers and routing tags for Scatter entities.
//!
//! Explicit types prevent bugs from mixing up ids. All ids are 64-bit to
//! handle large-scale deployments.

use std::fmt;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `NodeId` with `PartitionId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// Cluster topology identification.
define_id!(NodeId, "node", "Unique identifier for a cluster node.");
define_id!(ClusterId, "cluster", "Unique identifier for a sub-cluster within the topology.");

// Physical partition numbering.
define_id!(PartitionId, "partition", "Physical partition number within the keyspace.");

/// Opaque 64-bit capability tag constraining which nodes may serve a request.
///
/// The dispatch core never interprets capability bits; they are forwarded to
/// the load balancer verbatim.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Capability(u64);

impl Capability {
    /// Creates a capability tag from raw bits.
    #[inline]
    #[must_use]
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the raw capability bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cap({:#x})", self.0)
    }
}

impl From<u64> for Capability {
    fn from(bits: u64) -> Self {
        Self::new(bits)
    }
}

/// Optional capability constraints carried with every routing decision.
///
/// The persistent capability survives across retries of the same logical
/// request; the plain capability applies to the current attempt only. Both
/// are opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Capability for the current attempt.
    pub capability: Option<Capability>,
    /// Capability that persists across retries.
    pub persistent: Option<Capability>,
}

impl Capabilities {
    /// No capability constraints.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            capability: None,
            persistent: None,
        }
    }

    /// Constrains the current attempt.
    #[must_use]
    pub const fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    /// Constrains every attempt of the logical request.
    #[must_use]
    pub const fn with_persistent(mut self, persistent: Capability) -> Self {
        self.persistent = Some(persistent);
        self
    }
}

/// Bound alias for user-defined partition keys.
///
/// The core only ever hashes, compares, and logs partitioned ids; placement
/// is the load balancer's business. Implemented automatically for every
/// eligible type.
pub trait PartitionedId: Clone + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> PartitionedId for T where T: Clone + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static {}

/// A cluster member as reported by the membership subsystem.
///
/// Endpoints are the input to load-balancer construction. The address is
/// resolved by the transport at connect time, never by the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// The member's node ID.
    pub node: NodeId,
    /// The member's address (`ip:port` or `hostname:port`).
    pub addr: String,
    /// Whether the membership layer currently considers the node live.
    pub available: bool,
}

impl Endpoint {
    /// Creates a live endpoint.
    #[must_use]
    pub fn new(node: NodeId, addr: impl Into<String>) -> Self {
        Self {
            node,
            addr: addr.into(),
            available: true,
        }
    }

    /// Marks the endpoint unavailable.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}
