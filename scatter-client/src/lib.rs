//! Scatter Client - client-side dispatch core for a partitioned RPC
//! framework.
//!
//! Given a request addressed to a set of partitioned ids, the dispatcher
//! decides which cluster nodes must receive copies, fans sub-requests out
//! concurrently, streams results back through an async iterator, and
//! transparently retries failures against alternate replicas.
//!
//! # Design
//!
//! - **Routing is pluggable**: placement lives behind the balancer contract
//! - **Failures are results**: per-sub-request failures never fail the send
//! - **Accounting is exact**: expected counts grow before the work they
//!   account for is submitted
//! - **Retries are bounded**: whole-sub-request budgets and per-id timing
//!   strategies, never both at once

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod codec;
mod config;
mod dispatcher;
mod iterator;
mod queue;
mod request;
mod retry;
mod selective;
mod transport;

pub use codec::{CodecError, Serializer};
pub use config::{DispatcherConfig, RoutingConfigs, SendOptions};
pub use dispatcher::Dispatcher;
pub use iterator::{BlockingIterator, IteratorHandle, ResponseIterator, SubResponse};
pub use queue::ResponseQueue;
pub use request::{PartitionedRequest, RequestBuilder};
pub use retry::RetryStrategy;
pub use transport::{Transport, TransportError, TransportResult};
