//! Dispatch configuration.
//!
//! `SendOptions` collapses the send surface's many parameter sets into one
//! builder; `DispatcherConfig` carries the long-lived knobs.

use scatter_core::{Capabilities, ClusterId, Limits};
use scatter_routing::RouterConfig;

use crate::retry::RetryStrategy;

/// Per-send routing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingConfigs {
    /// Retry only the partition ids still outstanding after a per-id
    /// timeout, instead of whole sub-requests.
    pub selective_retry: bool,
    /// Deliver responses covering already-satisfied ids instead of
    /// dropping them.
    pub duplicates_ok: bool,
}

impl RoutingConfigs {
    /// Enables selective retry.
    #[must_use]
    pub const fn with_selective_retry(mut self) -> Self {
        self.selective_retry = true;
        self
    }

    /// Allows duplicate responses through to the consumer.
    #[must_use]
    pub const fn with_duplicates_ok(mut self) -> Self {
        self.duplicates_ok = true;
        self
    }
}

/// Options for one send operation.
///
/// The default is the plainest form: no replication, no cluster pin, no
/// retries, no capability constraints.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Fan each id out to this many replicas.
    pub replicas: Option<u32>,
    /// Restrict placement to one sub-cluster.
    pub cluster: Option<ClusterId>,
    /// Whole-sub-request retries per sub-request.
    pub max_retry: u32,
    /// Capability constraints forwarded to the balancer.
    pub capabilities: Capabilities,
    /// Routing behavior.
    pub routing: RoutingConfigs,
    /// Timing policy for selective retry.
    pub retry_strategy: Option<RetryStrategy>,
}

impl SendOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fans each id out to `replicas` replicas.
    #[must_use]
    pub const fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    /// Restricts placement to one sub-cluster.
    #[must_use]
    pub const fn with_cluster(mut self, cluster: ClusterId) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Allows up to `max_retry` whole-sub-request retries.
    #[must_use]
    pub const fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Forwards capability constraints to the balancer.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the routing behavior.
    #[must_use]
    pub const fn with_routing(mut self, routing: RoutingConfigs) -> Self {
        self.routing = routing;
        self
    }

    /// Sets the selective-retry timing policy.
    #[must_use]
    pub const fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }
}

/// Long-lived dispatcher configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherConfig {
    /// Router configuration.
    pub router: RouterConfig,
    /// System limits.
    pub limits: Limits,
}

impl DispatcherConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if any limit is invalid or inconsistent.
    pub fn validate(&self) -> scatter_core::Result<()> {
        self.limits.validate()
    }
}
