use serde::Deserialize;

use crate::types::HumanDuration;

// ---------------------------------------------------------------------------
// Queue / retry / breaker / cache / cleanup tuning
// ---------------------------------------------------------------------------

/// Publishing queue dimensions: worker pool size and per-tier capacity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub workers: usize,
    pub capacity: TierCapacity,
    /// Job-tracking LRU capacity for operator queries.
    pub tracking: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierCapacity {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            capacity: TierCapacity::default(),
            tracking: 10_000,
        }
    }
}

impl Default for TierCapacity {
    fn default() -> Self {
        Self {
            high: 1024,
            medium: 1024,
            low: 1024,
        }
    }
}

/// Delivery retry backoff policy.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// First-retry delay; doubles per attempt.
    pub base: HumanDuration,
    /// Upper bound on a single delay.
    pub cap: HumanDuration,
    /// Uniform jitter fraction applied to each delay (0.2 = ±20%).
    pub jitter: f64,
    pub max_attempts: u32,
    /// Retry budget for errors of unknown class before they are treated
    /// as permanent.
    pub unknown_max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: std::time::Duration::from_millis(100).into(),
            cap: std::time::Duration::from_secs(5).into(),
            jitter: 0.2,
            max_attempts: 5,
            unknown_max_attempts: 2,
        }
    }
}

/// Per-target circuit breaker thresholds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    pub fail_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: HumanDuration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            success_threshold: 2,
            cooldown: std::time::Duration::from_secs(30).into(),
        }
    }
}

/// Alert cache dimensions.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Shard count; rounded up to a power of two, floored at the number of
    /// hardware threads when zero.
    pub shards: usize,
    /// How long resolved alerts stay eligible for queries before the sweep
    /// removes them.
    pub resolved_retention: HumanDuration,
    /// Sweep cadence for resolved-alert removal.
    pub sweep_interval: HumanDuration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shards: 0,
            resolved_retention: std::time::Duration::from_secs(5 * 60).into(),
            sweep_interval: std::time::Duration::from_secs(60).into(),
        }
    }
}

/// Background sweep cadence for silences.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SilenceCleanupConfig {
    pub interval: HumanDuration,
    /// How long expired silences are retained before hard deletion.
    pub retention: HumanDuration,
}

impl Default for SilenceCleanupConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(3600).into(),
            retention: std::time::Duration::from_secs(24 * 3600).into(),
        }
    }
}

/// Background sweep cadence for inhibition state.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InhibitionCleanupConfig {
    pub interval: HumanDuration,
}

impl Default for InhibitionCleanupConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60).into(),
        }
    }
}

/// Target discovery behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Secret-store namespace to list/watch.
    pub namespace: String,
    /// Label selector applied to the list/watch.
    pub selector: String,
    /// Minimum gap between manual refresh list calls.
    pub refresh_min_interval: HumanDuration,
    /// Watch reconnect backoff floor and cap.
    pub backoff_base: HumanDuration,
    pub backoff_cap: HumanDuration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: "default".to_string(),
            selector: "app=alert-relay".to_string(),
            refresh_min_interval: std::time::Duration::from_secs(60).into(),
            backoff_base: std::time::Duration::from_millis(100).into(),
            backoff_cap: std::time::Duration::from_secs(30).into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
