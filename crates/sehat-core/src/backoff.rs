//! Backoff policy and retry budgets.
//!
//! Both the request gateway (HTTP calls) and the duplex link (reconnects) use
//! the same math, so it lives here as sync-only building blocks:
//!
//! - [`BackoffPolicy`]: `min(max_delay, base_delay * 2^attempt)`, optional jitter
//! - [`RetryBudget`]: per-operation attempt counter bounded by a maximum
//! - [`calculate_backoff_delay`]: the raw formula, saturating on overflow

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default number of retries after the first request attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default number of reconnect cycles before a link gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff parameters.
///
/// `attempt` is zero-based and counts retries, not tries: attempt 0 is the
/// delay before the first retry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in ms.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0. Zero means fully deterministic delays.
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }
}

impl BackoffPolicy {
    /// Deterministic policy without jitter.
    #[must_use]
    pub const fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_factor: 0.0,
        }
    }

    /// Same policy with a jitter factor (clamped to 0.0–1.0).
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt`, in milliseconds.
    #[must_use]
    pub fn next_delay_ms(&self, attempt: u32) -> u64 {
        calculate_backoff_delay(attempt, self.base_delay_ms, self.max_delay_ms)
    }

    /// Delay before retry number `attempt`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.next_delay_ms(attempt))
    }

    /// Delay with jitter applied. `random` must come from a PRNG in `[0.0, 1.0)`.
    ///
    /// With a zero jitter factor this is identical to [`Self::next_delay`].
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32, random: f64) -> Duration {
        Duration::from_millis(calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff: `min(max_delay_ms, base_delay_ms * 2^attempt)`.
///
/// Saturates instead of overflowing for large attempt numbers.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(factor).min(max_delay_ms)
}

/// Backoff with symmetric jitter.
///
/// Maps `random` in `[0, 1)` to a multiplier in `[1 - jitter, 1 + jitter]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let capped = calculate_backoff_delay(attempt, base_delay_ms, max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((capped as f64) * jitter).round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry budget
// ─────────────────────────────────────────────────────────────────────────────

/// Attempt counter for one logical operation.
///
/// Each call to [`RetryBudget::next_delay`] consumes one retry and returns the
/// delay to wait before it. Once `max_attempts` retries are consumed the budget
/// is exhausted. A successful exchange resets it.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryBudget {
    attempt: u32,
    max_attempts: u32,
    policy: BackoffPolicy,
}

impl RetryBudget {
    /// Fresh budget allowing `max_attempts` retries.
    #[must_use]
    pub fn new(max_attempts: u32, policy: BackoffPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            policy,
        }
    }

    /// Retries consumed so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Maximum retries allowed.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The policy computing the delays.
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Whether every retry has been used.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Consume a retry, returning the delay before it, or `None` when exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.next_delay(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Like [`Self::next_delay`] but applies the policy's jitter using `random`.
    pub fn next_jittered_delay(&mut self, random: f64) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.jittered_delay(self.attempt, random);
        self.attempt += 1;
        Some(delay)
    }

    /// Back to zero after a successful exchange.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
