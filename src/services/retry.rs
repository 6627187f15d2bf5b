//! Retry policy with exponential backoff and jitter

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

use crate::config::ClientConfig;

/// Backoff schedule for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Delay before retry number `retry` (0 for the first retry)
    ///
    /// `min(base * 2^retry + random(0..=jitter), max_delay)`
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.min(16)));
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        exponential.saturating_add(jitter).min(self.max_delay)
    }

    /// Delay after a 429, honouring the server hint when present
    pub fn throttled_delay(&self, retry_after: Option<Duration>, retry: u32) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.max_delay),
            None => self.backoff(retry),
        }
    }

    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP-date
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let delta = at.signed_duration_since(Utc::now());
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
