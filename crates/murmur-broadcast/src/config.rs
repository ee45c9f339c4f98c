//! Tuning knobs for the broadcast engine and its workers.

use std::time::Duration;

/// Configuration for delivery and retry behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Period of the retry sweeper.
    pub retry_interval: Duration,
    /// How long one delivery attempt waits for the peer's acknowledgment.
    pub delivery_timeout: Duration,
    /// Capacity of the outbound delivery queue.
    pub queue_capacity: usize,
    /// Bound on remembered message ids (`None` keeps them all).
    pub dedup_capacity: Option<usize>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(2),
            queue_capacity: 10_000,
            dedup_capacity: None,
        }
    }
}

/// Builder for broadcast configuration.
pub struct BroadcastConfigBuilder {
    config: BroadcastConfig,
}

impl BroadcastConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BroadcastConfig::default(),
        }
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = timeout;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity.max(1);
        self
    }

    pub fn dedup_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.dedup_capacity = capacity;
        self
    }

    pub fn build(self) -> BroadcastConfig {
        self.config
    }
}

impl Default for BroadcastConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
