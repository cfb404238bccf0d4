//! Reconnection state machine with bounded exponential backoff.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Lifecycle of a push connection as seen by the reconnection controller.
///
/// `Idle -> Connecting -> Connected -> Disconnected -> Backoff -> Connecting -> ... -> GaveUp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// No connection attempted yet.
    Idle,
    /// A subscription request is in flight.
    Connecting,
    /// The push stream is live.
    Connected,
    /// The push stream was lost.
    Disconnected,
    /// Waiting before the next attempt.
    Backoff,
    /// Attempts are exhausted.
    GaveUp,
    /// Reconnection was switched off by a stop.
    Disabled,
}

impl ReconnectState {
    /// Returns true if no further attempt will ever be scheduled.
    pub fn is_final(&self) -> bool {
        matches!(self, ReconnectState::GaveUp | ReconnectState::Disabled)
    }
}

/// Snapshot of the retry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts consumed since the last successful connection.
    pub attempt: u32,
    /// Delay the next attempt would wait, if one is allowed.
    pub next_delay: Option<Duration>,
}

/// Decides how long to wait before each reconnection attempt.
#[derive(Debug, Clone)]
pub struct ReconnectionController {
    config: ReconnectConfig,
    state: ReconnectState,
    attempt: u32,
}

impl ReconnectionController {
    /// Creates a controller in the `Idle` state.
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ReconnectState::Idle,
            attempt: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Attempts consumed since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Configured policy.
    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Current retry counters.
    pub fn retry_state(&self) -> RetryState {
        let next_delay = if self.state.is_final() || self.attempt >= self.config.max_attempts {
            None
        } else {
            Some(self.config.delay_for_attempt(self.attempt))
        };
        RetryState {
            attempt: self.attempt,
            next_delay,
        }
    }

    /// Records that a subscription request is in flight.
    pub fn on_connecting(&mut self) {
        if !self.state.is_final() {
            self.state = ReconnectState::Connecting;
        }
    }

    /// Records a successful (re)subscription and resets the attempt counter.
    pub fn on_connected(&mut self) {
        if self.state.is_final() {
            return;
        }
        self.state = ReconnectState::Connected;
        self.attempt = 0;
    }

    /// Records the loss of the push stream.
    pub fn on_disconnected(&mut self) {
        if !self.state.is_final() {
            self.state = ReconnectState::Disconnected;
        }
    }

    /// Returns the delay before the next attempt and consumes that attempt.
    ///
    /// Returns `None` once attempts are exhausted or the controller is
    /// disabled. `None` is sticky until `on_connected` (or forever, once
    /// disabled).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.state.is_final() {
            return None;
        }
        if self.attempt >= self.config.max_attempts {
            self.state = ReconnectState::GaveUp;
            return None;
        }
        let delay = self.config.delay_for_attempt(self.attempt);
        self.attempt += 1;
        self.state = ReconnectState::Backoff;
        Some(delay)
    }

    /// Permanently switches reconnection off.
    pub fn disable(&mut self) {
        self.state = ReconnectState::Disabled;
    }
}
