//! Scatter Core - Strongly-typed identifiers and shared types for Scatter.
//!
//! This crate provides the types shared across the dispatch core: node and
//! partition identifiers, capability tags, cluster endpoints, the semantic
//! error taxonomy, and system-wide limits.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up `NodeId` with `PartitionId`
//! - **Explicit limits**: Every fan-out and queue has a bounded maximum
//! - **Explicit errors**: Precondition failures are synchronous; transport
//!   failures are iterator results
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod types;

pub use error::{Error, NetworkErrorKind, Result};
pub use limits::Limits;
pub use types::{
    Capabilities, Capability, ClusterId, Endpoint, NodeId, PartitionId, PartitionedId,
};
