//! Scatter Routing - placement of partitioned ids on cluster nodes.
//!
//! This crate turns sets of partitioned ids into `node -> ids` assignments.
//! It holds the pluggable load-balancer contract, the published balancer
//! cell updated on membership changes, the router's four assignment modes,
//! and the replica-consistency repair pass.
//!
//! # Design
//!
//! - **Balancer owns placement**: the router folds observations, never hashes
//! - **Whole-cell replacement**: the published balancer is immutable; updates
//!   swap the cell
//! - **Explicit probe budgets**: rerouting around failed nodes is bounded

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod balancer;
mod cache;
pub mod consistency;
mod router;

pub use balancer::{InvalidClusterError, LoadBalancer, LoadBalancerFactory};
pub use cache::{endpoint_nodes, BalancerCache};
pub use router::{Router, RouterConfig, RoutingError, ROUTE_PROBES_MAX};
