//! Circuit breaker protecting calls to a single container-engine host.
//!
//! Three states: closed (calls pass through), open (calls fail fast until
//! `reset_timeout` elapses), half-open (one probe call is allowed through;
//! success closes the breaker, failure re-opens it and restarts the clock).
//!
//! State is mirrored into a [`SharedStore`] namespace (spec.md §3: "state
//! persisted in the shared store under a namespace derived from the key")
//! on every transition, so an external viewer of the store sees the same
//! state this instance acts on. Timing itself stays on `Instant` — the
//! in-process clock is what actually gates `reset_timeout`; the persisted
//! blob exists for visibility/durability, not as the source of truth for
//! a live breaker instance.

use crate::store::SharedStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// The blob persisted to the shared store under the breaker's namespace.
/// `opened_at_millis_ago` is relative (captured at serialization time)
/// since `Instant` itself can't be serialized; it is informational only,
/// `Inner::opened_at` remains the authoritative clock for this instance.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    state: BreakerState,
    fail_count: u32,
    opened_at_millis_ago: Option<u64>,
}

struct Inner {
    state: BreakerState,
    fail_count: u32,
    opened_at: Option<Instant>,
}

/// What the caller should do before attempting the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermit {
    /// Proceed with the call.
    Allowed,
    /// Breaker is open and `reset_timeout` hasn't elapsed yet; fail fast.
    Denied,
}

pub struct CircuitBreaker {
    fail_max: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
    store: Arc<dyn SharedStore>,
    namespace: String,
}

impl CircuitBreaker {
    pub fn new(fail_max: u32, reset_timeout: Duration, store: Arc<dyn SharedStore>, namespace: String) -> Self {
        let breaker = Self {
            fail_max,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                fail_count: 0,
                opened_at: None,
            }),
            store,
            namespace,
        };
        breaker.persist(&breaker.inner.lock());
        breaker
    }

    fn persist(&self, inner: &Inner) {
        let blob = PersistedState {
            state: inner.state,
            fail_count: inner.fail_count,
            opened_at_millis_ago: inner.opened_at.map(|t| t.elapsed().as_millis() as u64),
        };
        if let Ok(encoded) = serde_json::to_string(&blob) {
            self.store.set_breaker_state(&self.namespace, encoded);
        }
    }

    /// Checks whether a call may proceed, transitioning open -> half-open
    /// once `reset_timeout` has elapsed since the breaker tripped.
    pub fn permit(&self) -> CallPermit {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => CallPermit::Allowed,
            BreakerState::HalfOpen => CallPermit::Denied,
            BreakerState::Open => {
                let opened_at = inner.opened_at.expect("open breaker has opened_at set");
                if opened_at.elapsed() >= self.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    self.persist(&inner);
                    CallPermit::Allowed
                } else {
                    CallPermit::Denied
                }
            }
        }
    }

    /// Records a successful call. Closes the breaker and resets the
    /// failure count, whether it was closed already or half-open probing.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.fail_count = 0;
        inner.opened_at = None;
        self.persist(&inner);
    }

    /// Records a failed call. Trips the breaker open once `fail_count`
    /// reaches `fail_max`; a failed half-open probe re-opens immediately.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed | BreakerState::Open => {
                inner.fail_count += 1;
                if inner.fail_count >= self.fail_max {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
        self.persist(&inner);
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.permit_without_transition(), BreakerState::Closed)
    }

    fn permit_without_transition(&self) -> BreakerState {
        self.inner.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySharedStore;
    use std::thread::sleep;

    fn breaker(fail_max: u32, reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(fail_max, reset_timeout, InMemorySharedStore::shared(), "h1:2375".to_string())
    }

    #[test]
    fn starts_closed() {
        let b = breaker(3, Duration::from_millis(50));
        assert_eq!(b.permit(), CallPermit::Allowed);
        assert!(b.is_closed());
    }

    #[test]
    fn opens_after_fail_max() {
        let b = breaker(2, Duration::from_secs(60));
        b.record_failure();
        assert!(b.is_closed());
        b.record_failure();
        assert!(!b.is_closed());
        assert_eq!(b.permit(), CallPermit::Denied);
    }

    #[test]
    fn half_opens_after_reset_timeout_then_closes_on_success() {
        let b = breaker(1, Duration::from_millis(20));
        b.record_failure();
        assert_eq!(b.permit(), CallPermit::Denied);
        sleep(Duration::from_millis(30));
        assert_eq!(b.permit(), CallPermit::Allowed);
        b.record_success();
        assert!(b.is_closed());
    }

    #[test]
    fn failed_probe_reopens_breaker() {
        let b = breaker(1, Duration::from_millis(20));
        b.record_failure();
        sleep(Duration::from_millis(30));
        assert_eq!(b.permit(), CallPermit::Allowed);
        b.record_failure();
        assert!(!b.is_closed());
    }

    #[test]
    fn success_resets_fail_count() {
        let b = breaker(3, Duration::from_secs(60));
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        assert!(b.is_closed());
    }

    #[test]
    fn state_transitions_are_mirrored_to_the_shared_store() {
        let store = InMemorySharedStore::shared();
        let b = CircuitBreaker::new(1, Duration::from_secs(60), store.clone(), "h1:2375".to_string());
        assert!(store.get_breaker_state("h1:2375").unwrap().contains("closed"));
        b.record_failure();
        assert!(store.get_breaker_state("h1:2375").unwrap().contains("open"));
    }
}
