use serde::Deserialize;

/// Resharding engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Cumulative message-text bytes above which a user is promoted onto a
    /// dedicated shard. Strictly greater-than: a total equal to the
    /// threshold does not qualify.
    pub promotion_threshold_bytes: u64,
    /// Capacity of the load-event queue feeding the resharding worker.
    pub promotion_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            promotion_threshold_bytes: 1_000_000, // 1 MB of stored text
            promotion_queue_depth: 1024,
        }
    }
}
