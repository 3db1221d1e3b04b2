//! System limits and configuration bounds.
//!
//! Every queue, buffer, and fan-out in Docket has an explicit maximum
//! size. The session catalog itself is unbounded (the reaper that trims
//! idle sessions lives outside this workspace), but everything a single
//! transaction can touch is bounded here.

/// System-wide limits for Docket session coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of shard participants in one transaction.
    pub max_participants_per_txn: u32,
    /// Maximum number of requests in a single fan-out batch.
    pub max_requests_per_batch: u32,
    /// Maximum size of a single command body in bytes.
    pub max_command_bytes: u32,
    /// Maximum time an operation may spend waiting for a session
    /// check-out, in microseconds. Zero means no implicit deadline.
    pub max_checkout_wait_us: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    ///
    /// Conservative values suitable for most deployments; production
    /// systems tune these per workload.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // A transaction touching every shard of a large cluster.
            max_participants_per_txn: 1024,
            // Fan-out batches are per-command, one request per shard.
            max_requests_per_batch: 1024,
            // 16MB, matching the maximum document batch size.
            max_command_bytes: 16 * 1024 * 1024,
            // No implicit checkout deadline; callers set their own.
            max_checkout_wait_us: 0,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
