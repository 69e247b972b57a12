use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use ar_config::BreakerConfig;

// ---------------------------------------------------------------------------
// BreakerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_u8(self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("closed"),
            BreakerState::Open => f.write_str("open"),
            BreakerState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Outcome of asking the breaker for permission to call the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Allow,
    /// Fast-fail; `retry_after` is the remaining cooldown when known.
    Deny { retry_after: Option<Duration> },
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-target closed/open/half-open state machine.
///
/// Transitions: `Closed → Open` at `fail_threshold` consecutive failures;
/// `Open → HalfOpen` once `cooldown` elapses (at most one probe in flight);
/// `HalfOpen → Closed` at `success_threshold` consecutive successes,
/// `HalfOpen → Open` on any failure. Counters reset on every transition.
///
/// A mutex guards transitions; the hot-path `state()` read is served from an
/// atomic snapshot refreshed on every change.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    snapshot: AtomicU8,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            snapshot: AtomicU8::new(BreakerState::Closed.as_u8()),
            config,
        }
    }

    /// Lock-free state read for the hot path and for metrics.
    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.snapshot.load(Ordering::Relaxed))
    }

    /// Ask to perform one delivery at `now`.
    pub fn try_acquire(&self, now: Instant) -> BreakerDecision {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => BreakerDecision::Allow,
            BreakerState::Open => {
                let opened_at = inner.opened_at.expect("open breaker without opened_at");
                let cooldown: Duration = self.config.cooldown.into();
                let elapsed = now.duration_since(opened_at);
                if elapsed >= cooldown {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.probe_in_flight = true;
                    BreakerDecision::Allow
                } else {
                    BreakerDecision::Deny {
                        retry_after: Some(cooldown - elapsed),
                    }
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    BreakerDecision::Deny { retry_after: None }
                } else {
                    inner.probe_in_flight = true;
                    BreakerDecision::Allow
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, BreakerState::Closed);
                }
            }
            BreakerState::Open => {
                // Late success from a call admitted before the trip; the
                // cooldown still governs.
            }
        }
    }

    pub fn record_failure(&self, now: Instant) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.fail_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(now);
                }
            }
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                self.transition(&mut inner, BreakerState::Open);
                inner.opened_at = Some(now);
            }
            BreakerState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        inner.state = to;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        if to != BreakerState::Open {
            inner.opened_at = None;
        }
        self.snapshot.store(to.as_u8(), Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// BreakerRegistry
// ---------------------------------------------------------------------------

/// Lazily-created breaker per target name, all sharing one tuning.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        {
            let map = self.breakers.read().expect("breaker registry lock poisoned");
            if let Some(b) = map.get(target) {
                return Arc::clone(b);
            }
        }
        let mut map = self.breakers.write().expect("breaker registry lock poisoned");
        Arc::clone(
            map.entry(target.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config))),
        )
    }

    /// `(target, state)` pairs for metrics rendering.
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let map = self.breakers.read().expect("breaker registry lock poisoned");
        map.iter().map(|(k, b)| (k.clone(), b.state())).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
