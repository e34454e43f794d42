//! Retry settings with exponential backoff, cap, and jitter.
//!
//! Shared by processor invocation, validation hooks, and catalog-store
//! compare-and-swap retries. Settings are plain config values; [`backoff`]
//! turns them into a `backon` builder.
//!
//! [`backoff`]: RetrySettings::backoff

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::Deserialize;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first one. 1 disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry (before jitter).
    pub min_delay_ms: u64,
    /// Delay cap (before jitter).
    pub max_delay_ms: u64,
    /// Randomize delays to avoid lockstep retries across workers.
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 100,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetrySettings {
    /// Settings for compare-and-swap conflicts on the catalog store.
    ///
    /// Conflicts clear as soon as the competing writer commits, so delays are
    /// short and attempts are generous.
    pub fn for_store_conflicts() -> Self {
        Self {
            max_attempts: 10,
            min_delay_ms: 10,
            max_delay_ms: 2_000,
            jitter: true,
        }
    }

    /// Settings that never sleep. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    /// Build the backoff policy. `max_times` counts retries, not attempts.
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}
