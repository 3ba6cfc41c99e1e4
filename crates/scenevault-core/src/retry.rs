//! Retry policies for failed flushes
//!
//! The cache never gives up on its own: after every failed durable write it
//! asks the injected [`RetryPolicy`] how long to wait before the next attempt.
//! Returning `None` ends the flush and surfaces the error as a
//! [`FlushEvent::GaveUp`](crate::FlushEvent::GaveUp).

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Strategy deciding whether and when a failed flush is retried
pub trait RetryPolicy: Send + Sync + Debug {
    /// Delay before the next attempt after `failures` consecutive failures
    /// (starting at 1). `None` stops retrying.
    fn next_delay(&self, failures: u32) -> Option<Duration>;
}

/// Retry immediately, forever
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateRetry;

impl RetryPolicy for ImmediateRetry {
    fn next_delay(&self, _failures: u32) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

/// Exponential backoff with a delay cap and an optional attempt limit
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: u32,
    /// Failures tolerated before giving up (`None` = never give up)
    pub max_attempts: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, failures: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if failures >= max {
                return None;
            }
        }

        let exponent = failures.saturating_sub(1);
        let factor = self.multiplier.max(1).checked_pow(exponent);
        let delay = factor
            .and_then(|f| self.initial_delay.checked_mul(f))
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

/// Which built-in policy a [`RetrySettings`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// No delay, no limit
    Immediate,
    /// [`ExponentialBackoff`]
    Exponential,
}

/// Serializable retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub strategy: RetryStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
    pub max_attempts: Option<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2,
            max_attempts: Some(10),
        }
    }
}

impl RetrySettings {
    /// Settings for [`ImmediateRetry`]
    pub fn immediate() -> Self {
        Self {
            strategy: RetryStrategy::Immediate,
            ..Self::default()
        }
    }

    /// Build the policy object
    pub fn build(&self) -> Arc<dyn RetryPolicy> {
        match self.strategy {
            RetryStrategy::Immediate => Arc::new(ImmediateRetry),
            RetryStrategy::Exponential => Arc::new(ExponentialBackoff {
                initial_delay: Duration::from_millis(self.initial_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                multiplier: self.multiplier,
                max_attempts: self.max_attempts,
            }),
        }
    }
}
