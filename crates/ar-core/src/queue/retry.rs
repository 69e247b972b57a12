use std::time::Duration;

use rand::Rng;

use ar_config::RetryConfig;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    /// Unrecognizable failures retry like transient ones, but under the
    /// shorter `unknown_max_attempts` budget, then dead-letter.
    Unknown,
}

/// HTTP status classification: 5xx, 429 and 408 retry; other 4xx are
/// permanent; anything else (1xx/3xx oddities) is unknown.
pub fn classify_http_status(status: u16) -> ErrorClass {
    match status {
        500..=599 => ErrorClass::Transient,
        429 | 408 => ErrorClass::Transient,
        400..=499 => ErrorClass::Permanent,
        200..=299 => ErrorClass::Transient, // not an error; callers never ask
        _ => ErrorClass::Unknown,
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff with jitter: `delay = base · 2^attempt`, capped,
/// then spread by ±`jitter`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: f64,
    pub max_attempts: u32,
    pub unknown_max_attempts: u32,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            base: cfg.base.into(),
            cap: cfg.cap.into(),
            jitter: cfg.jitter,
            max_attempts: cfg.max_attempts,
            unknown_max_attempts: cfg.unknown_max_attempts,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based: the first retry of a
    /// job that has failed once passes `attempt = 0`).
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let exp = attempt.min(32);
        let raw = self
            .base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.cap);
        if self.jitter <= 0.0 {
            return raw;
        }
        let factor = rng.gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        raw.mul_f64(factor)
    }

    /// Attempt budget for the given error class.
    pub fn budget(&self, class: ErrorClass) -> u32 {
        match class {
            ErrorClass::Unknown => self.unknown_max_attempts.min(self.max_attempts),
            _ => self.max_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
