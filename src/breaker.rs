use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Cool-down before an `open` breaker allows a probe through again.
/// Hard-coded for now; worth exposing as config if real deployments need
/// to tune it.
const COOL_DOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

/// Per-node three-state circuit breaker. `closed` allows
/// probes; after `failure_threshold` consecutive failures it opens and
/// suppresses probes until the cool-down elapses, then allows exactly one
/// probe in `half_open` before deciding closed/open again.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Whether a probe should be dispatched right now. May legitimately
    /// transition `open -> half_open` as a side effect,
    /// but never mutates otherwise.
    pub fn should_allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed() >= COOL_DOWN)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    debug!(node = %self.name, "circuit breaker half-open after cool-down");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != BreakerState::Closed {
            info!(node = %self.name, "circuit breaker closed after success");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                info!(node = %self.name, "circuit breaker re-opened after half-open probe failure");
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    info!(node = %self.name, failures = inner.failure_count, "circuit breaker opened");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }
}

/// Map from node name to its breaker. Uses a read-write lock on the map
/// plus per-breaker internal locking, with double-checked locking on first
/// insert so concurrent first-probes of the same node don't race to
/// allocate two breakers.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    failure_threshold: u32,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            failure_threshold,
        }
    }

    pub fn get_or_insert(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().unwrap_or_else(|e| e.into_inner()).get(name) {
            return Arc::clone(b);
        }
        let mut map = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(b) = map.get(name) {
            return Arc::clone(b);
        }
        let breaker = Arc::new(CircuitBreaker::new(name, self.failure_threshold));
        map.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_allows_until_threshold_then_opens() {
        let b = CircuitBreaker::new("node-a", 3);
        assert!(b.should_allow());
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.should_allow());
    }

    #[test]
    fn success_resets_failure_count() {
        let b = CircuitBreaker::new("node-b", 3);
        b.record_failure();
        b.record_failure();
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn registry_returns_same_breaker_for_same_name() {
        let reg = BreakerRegistry::new(3);
        let a = reg.get_or_insert("node-a");
        let b = reg.get_or_insert("node-a");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
