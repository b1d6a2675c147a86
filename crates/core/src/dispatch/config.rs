//! Configuration for the dispatcher.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dispatcher configuration. Retry keys sit directly under `[dispatcher]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Publish retry policy.
    #[serde(flatten)]
    pub retry: RetryConfig,

    /// How long a broker that exhausted its retries is failed fast.
    #[serde(default = "default_unreachable_recheck")]
    pub unreachable_recheck_secs: u64,

    /// Bound on one publish attempt, including connect and the broker's
    /// confirm.
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,

    /// Bound on the AMQP connection handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Exponential backoff for transient publish failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Publish attempts before the broker is marked down.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_unreachable_recheck() -> u64 {
    30
}

fn default_publish_timeout() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    200
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            unreachable_recheck_secs: default_unreachable_recheck(),
            publish_timeout_ms: default_publish_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the `retry`-th failed attempt (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.min(32) as i32);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

impl DispatcherConfig {
    pub fn unreachable_recheck(&self) -> Duration {
        Duration::from_secs(self.unreachable_recheck_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
