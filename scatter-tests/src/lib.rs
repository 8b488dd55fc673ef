//! Scatter Tests - integration tests for the dispatch core.
//!
//! This crate exercises the dispatcher end to end with a scripted
//! in-memory transport and deterministic table-driven balancers. Tests are
//! organized by component:
//!
//! - `dispatch_tests`: send surface, fan-out shape, error preconditions
//! - `retry_tests`: whole-sub-request retry against alternate replicas
//! - `selective_tests`: per-id timeouts, re-dispatch, duplicate handling
//! - `partition_tests`: replica- and partition-addressed paths

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod balancers;
pub mod simulated_transport;

#[cfg(test)]
mod partition_tests;
#[cfg(test)]
mod selective_tests;
