//! Reconnection schedules for channels that lost their transport.

use std::time::Duration;

/// Decides whether, and after how long, a disconnected channel is retried.
/// `attempt` starts at 1 for the first retry after a disconnect.
pub trait ReconnectPolicy {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// A disconnect closes the channel for good.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedInterval {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl FixedInterval {
    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl ReconnectPolicy for FixedInterval {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        within(attempt, self.max_attempts).then_some(self.interval)
    }
}

/// `base * 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !within(attempt, self.max_attempts) {
            return None;
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.max))
    }
}

fn within(attempt: u32, max_attempts: Option<u32>) -> bool {
    attempt >= 1 && max_attempts.map_or(true, |max| attempt <= max)
}
