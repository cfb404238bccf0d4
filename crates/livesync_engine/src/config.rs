//! Configuration for the synchronization engine.

use std::time::Duration;

/// Configuration for one topic coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Reconnection policy for the push stream.
    pub reconnect: ReconnectConfig,
    /// Upper bound on a snapshot fetch.
    pub snapshot_timeout: Duration,
    /// Capacity of the queue feeding the topic's worker task.
    pub command_buffer: usize,
}

impl CoordinatorConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            snapshot_timeout: Duration::from_secs(30),
            command_buffer: 64,
        }
    }

    /// Sets the reconnection policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the snapshot request timeout.
    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    /// Sets the worker queue capacity (minimum 1).
    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity.max(1);
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for push stream reconnection.
///
/// Delays follow `min(base_delay * multiplier^attempt, max_delay)`.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Number of reconnection attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: u32,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl ReconnectConfig {
    /// Creates a configuration with mobile-network defaults.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            jitter: false,
        }
    }

    /// Creates a configuration that never reconnects.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1,
            jitter: false,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter {
            use rand::Rng;
            // Add up to 25% jitter
            let extra = rand::thread_rng().gen_range(0.0..=0.25);
            delay.saturating_add(delay.mul_f64(extra))
        } else {
            delay
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_config_builder() {
        let config = CoordinatorConfig::new()
            .with_snapshot_timeout(Duration::from_secs(5))
            .with_command_buffer(0)
            .with_reconnect(ReconnectConfig::new(3));

        assert_eq!(config.snapshot_timeout, Duration::from_secs(5));
        assert_eq!(config.command_buffer, 1);
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn reconnect_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(200));
        assert_eq!(config.multiplier, 2);
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 8);
        assert!(!config.jitter);
    }

    #[test]
    fn no_retry_has_no_attempts() {
        assert_eq!(ReconnectConfig::no_retry().max_attempts, 0);
    }

    #[test]
    fn delay_grows_then_caps() {
        let config = ReconnectConfig::new(12);
        let delays: Vec<_> = (0..10).map(|a| config.delay_for_attempt(a)).collect();
        let expected_ms = [200, 400, 800, 1600, 3200, 6400, 12800, 25600, 30000, 30000];
        for (delay, ms) in delays.iter().zip(expected_ms) {
            assert_eq!(*delay, Duration::from_millis(ms));
        }
    }

    #[test]
    fn delay_saturates_on_huge_attempts() {
        let config = ReconnectConfig::new(u32::MAX);
        assert_eq!(config.delay_for_attempt(200), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = ReconnectConfig::new(5).with_jitter(true);
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_micros(500_001));
        }
    }

    #[test]
    fn jitter_saturates_at_huge_caps() {
        let config = ReconnectConfig::new(5)
            .with_base_delay(Duration::MAX)
            .with_max_delay(Duration::MAX)
            .with_jitter(true);
        for _ in 0..20 {
            assert_eq!(config.delay_for_attempt(3), Duration::MAX);
        }
    }
}
