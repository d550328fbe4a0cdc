//! Lazily-created, per-host circuit breakers.
//!
//! Mirrors the original agent pool's `DashMap<String, Arc<AgentConnection>>`
//! registry: breakers are created on first reference to a `host:port` key
//! and shared from then on, rather than provisioned up front for every
//! host in every farm.

use crate::breaker::CircuitBreaker;
use crate::store::SharedStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct BreakerRegistry {
    fail_max: u32,
    reset_timeout: Duration,
    store: Arc<dyn SharedStore>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(fail_max: u32, reset_timeout: Duration, store: Arc<dyn SharedStore>) -> Self {
        Self {
            fail_max,
            reset_timeout,
            store,
            breakers: DashMap::new(),
        }
    }

    pub fn key(host: &str, port: u16) -> String {
        format!("{host}:{port}")
    }

    /// Returns the breaker for `host:port`, creating it (and its
    /// shared-store namespace) on first use.
    pub fn get(&self, host: &str, port: u16) -> Arc<CircuitBreaker> {
        let key = Self::key(host, port);
        self.breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.fail_max, self.reset_timeout, self.store.clone(), key)))
            .clone()
    }

    pub fn is_closed(&self, host: &str, port: u16) -> bool {
        self.get(host, port).is_closed()
    }

    /// Number of distinct `host:port` breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
