//! System limits and configuration bounds.
//!
//! Put limits on everything: every fan-out, queue, and retry loop has an
//! explicit maximum. This keeps dispatch behavior predictable under load.

/// System-wide limits for Scatter.
///
/// All limits are explicit and configurable. Default values are chosen
/// to be safe for most deployments while allowing customization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Fan-out limits.
    /// Maximum number of partitioned ids in a single send.
    pub max_ids_per_request: u32,
    /// Maximum number of nodes one send may fan out to.
    pub max_fanout_nodes: u32,
    /// Maximum replica count accepted by the N-replica path.
    pub max_replicas: u32,

    // Retry limits.
    /// Maximum whole-sub-request retries per sub-request.
    pub max_retry_attempts: u32,
    /// Maximum node probes when rerouting around excluded nodes.
    pub max_reroute_probes: u32,

    // Queue limits.
    /// Maximum buffered results per response iterator.
    pub max_queued_responses: u32,

    // Timeout limits (in microseconds).
    /// Default per-`next` timeout.
    pub default_next_timeout_us: u64,
    /// Maximum allowed per-`next` timeout.
    pub max_next_timeout_us: u64,
    /// Minimum initial timeout accepted from a retry strategy.
    pub min_retry_timeout_us: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    ///
    /// These defaults are conservative; production systems should tune them
    /// based on cluster size and workload.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Fan-out: 100k ids, 1024 nodes, 16 replicas.
            max_ids_per_request: 100_000,
            max_fanout_nodes: 1024,
            max_replicas: 16,

            // Retries: 5 whole-sub-request retries, 3 reroute probes.
            max_retry_attempts: 5,
            max_reroute_probes: 3,

            // Queues: 10k buffered results per iterator.
            max_queued_responses: 10_000,

            // Timeouts: 30s default, 5min max, 1ms minimum retry timeout.
            default_next_timeout_us: 30 * 1_000_000,
            max_next_timeout_us: 5 * 60 * 1_000_000,
            min_retry_timeout_us: 1_000,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_ids_per_request == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_ids_per_request",
                reason: "must be positive",
            });
        }

        if self.max_fanout_nodes == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_fanout_nodes",
                reason: "must be positive",
            });
        }

        if self.max_replicas == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_replicas",
                reason: "must be positive",
            });
        }

        if self.max_reroute_probes == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_reroute_probes",
                reason: "must be positive",
            });
        }

        if self.default_next_timeout_us > self.max_next_timeout_us {
            return Err(crate::Error::InvalidArgument {
                name: "default_next_timeout_us",
                reason: "must be <= max_next_timeout_us",
            });
        }

        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
