//! Configuration for gossip propagation.

use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct GossipConfig {
    /// Delay before the first resend of an unacknowledged value (in milliseconds).
    pub retry_initial_ms: u64,
    /// Upper bound on the delay between resends (in milliseconds).
    pub retry_max_ms: u64,
    /// Factor applied to the delay after every resend.
    pub retry_multiplier: u32,
    /// How often the retry scheduler looks for due deliveries (in milliseconds).
    pub scan_interval_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            retry_initial_ms: 100,
            retry_max_ms: 1600,
            retry_multiplier: 2,
            scan_interval_ms: 25,
        }
    }
}

impl GossipConfig {
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(1))
    }

    /// Delay to wait after a resend that followed a wait of `current`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let cap = Duration::from_millis(self.retry_max_ms.max(self.retry_initial_ms));
        current
            .saturating_mul(self.retry_multiplier.max(1))
            .min(cap)
    }
}

/// Builder for gossip configuration.
pub struct GossipConfigBuilder {
    config: GossipConfig,
}

impl GossipConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: GossipConfig::default(),
        }
    }

    pub fn retry_initial(mut self, ms: u64) -> Self {
        self.config.retry_initial_ms = ms;
        self
    }

    pub fn retry_max(mut self, ms: u64) -> Self {
        self.config.retry_max_ms = ms;
        self
    }

    pub fn retry_multiplier(mut self, factor: u32) -> Self {
        self.config.retry_multiplier = factor;
        self
    }

    pub fn scan_interval(mut self, ms: u64) -> Self {
        self.config.scan_interval_ms = ms;
        self
    }

    pub fn build(self) -> GossipConfig {
        self.config
    }
}

impl Default for GossipConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
