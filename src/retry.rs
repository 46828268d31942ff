//! Retry policy shared by the scanner and the submitter
//!
//! Provides error classification, exponential/fixed backoff, and gas bumping.
//! The scanner uses an exponential backoff on throttling, the submitter a
//! fixed short delay between attempts.

use std::time::Duration;

/// Classifies errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Provider is rate limiting us - back off before retrying
    Throttled,
    /// Replacement/underpriced transaction - re-sign with a higher gas price
    Underpriced,
    /// Nonce already used - re-sign, then refetch the nonce
    NonceTooLow,
    /// Anything else (timeouts, connection errors, unknown) - retry
    Transient,
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Gas price errors
    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
    {
        return ErrorClass::Underpriced;
    }

    // Nonce errors
    if error_lower.contains("nonce too low") || error_lower.contains("already known") {
        return ErrorClass::NonceTooLow;
    }

    // Throttling, as public providers phrase it
    if error_lower.contains("limit")
        || error_lower.contains("throttl")
        || error_lower.contains("429")
        || error_lower.contains("rate")
    {
        return ErrorClass::Throttled;
    }

    ErrorClass::Transient
}

/// Delay schedule between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay every time
    Fixed(Duration),
    /// `unit * min(2^min(n, max_exponent), cap_units)` for the n-th failure
    Exponential {
        unit: Duration,
        max_exponent: u32,
        cap_units: u64,
    },
}

impl Backoff {
    /// Exponential backoff capped at 30 units, as used for throttled log queries
    pub fn throttle(unit: Duration) -> Self {
        Backoff::Exponential {
            unit,
            max_exponent: 5,
            cap_units: 30,
        }
    }

    /// Delay after the `failures`-th failure (1-indexed)
    pub fn delay_for(&self, failures: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                unit,
                max_exponent,
                cap_units,
            } => {
                let units = 2u64.pow(failures.min(*max_exponent)).min(*cap_units);
                unit.saturating_mul(units as u32)
            }
        }
    }
}

/// Bounded retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of failures tolerated before giving up
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Check if we are still within budget after `failures` failures
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    pub fn delay_for(&self, failures: u32) -> Duration {
        self.backoff.delay_for(failures)
    }
}

/// Gas price after a percentage bump, never below `base + 1`
pub fn bump_gas_price(base: u128, bump_percent: u32) -> u128 {
    let bumped = base.saturating_mul(100 + bump_percent as u128) / 100;
    bumped.max(base.saturating_add(1))
}
