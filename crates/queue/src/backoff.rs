// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry backoff computation.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Shape of the delay curve across attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base` for every attempt.
    Fixed,
    /// `base * n` for attempt n.
    Linear,
    /// `base * 2^(n-1)` for attempt n.
    #[default]
    Exponential,
}

rq_core::simple_display! {
    BackoffStrategy {
        Fixed => "fixed",
        Linear => "linear",
        Exponential => "exponential",
    }
}

/// Backoff policy: strategy plus base and ceiling delays.
///
/// Every computed delay gets uniform jitter in `[0, 0.1 * delay)` and is
/// clamped to `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 1_000,
            max_delay_ms: 5 * 60 * 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(strategy: BackoffStrategy, base_delay_ms: i64, max_delay_ms: i64) -> Self {
        Self { strategy, base_delay_ms, max_delay_ms }
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if self.base_delay_ms < 1 {
            return Err(QueueError::Invalid("base_delay_ms must be >= 1".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(QueueError::Invalid(
                "max_delay_ms must be >= base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Delay before attempt `failed_attempts + 1` becomes eligible.
    ///
    /// `failed_attempts` is the number of attempts made so far (>= 1 on the
    /// retry path).
    pub fn delay_ms(&self, failed_attempts: u32) -> i64 {
        let n = failed_attempts.max(1) as i64;
        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(n),
            BackoffStrategy::Exponential => {
                let shift = (n - 1).min(32) as u32;
                self.base_delay_ms.saturating_mul(1i64 << shift)
            }
        };
        let raw = raw.min(self.max_delay_ms);
        let jitter_bound = raw / 10;
        let jitter = if jitter_bound > 0 {
            rand::thread_rng().gen_range(0..jitter_bound)
        } else {
            0
        };
        raw.saturating_add(jitter).min(self.max_delay_ms)
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
