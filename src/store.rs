//! Shared key-value store seam.
//!
//! The blacklist and breaker state conceptually live in a shared,
//! process-external store. This module defines the trait the rest of the
//! crate depends on and ships one in-process implementation backed by
//! `dashmap`, the concurrency primitive used throughout the original agent
//! pool's connection map. A production deployment swaps in a Redis-backed
//! store without touching `BreakerRegistry` or `BlacklistView`.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// Persistence seam for circuit-breaker state and the blacklist set.
///
/// Implementations must be safe to share across an arbitrary number of
/// concurrent callers — every exposed operation may be invoked concurrently
/// from multiple workers.
pub trait SharedStore: Send + Sync {
    /// Fetch the persisted breaker state blob for `namespace`, if any.
    fn get_breaker_state(&self, namespace: &str) -> Option<String>;

    /// Persist the breaker state blob for `namespace`.
    fn set_breaker_state(&self, namespace: &str, value: String);

    /// Current blacklist membership.
    fn blacklist_members(&self) -> Vec<String>;

    fn blacklist_add(&self, address: &str);

    fn blacklist_remove(&self, address: &str);

    fn blacklist_contains(&self, address: &str) -> bool;
}

/// Default in-process `SharedStore`. Not durable across restarts; intended
/// for single-process deployments and tests.
#[derive(Default)]
pub struct InMemorySharedStore {
    breaker_state: DashMap<String, String>,
    blacklist: DashSet<String>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SharedStore for InMemorySharedStore {
    fn get_breaker_state(&self, namespace: &str) -> Option<String> {
        self.breaker_state.get(namespace).map(|v| v.clone())
    }

    fn set_breaker_state(&self, namespace: &str, value: String) {
        self.breaker_state.insert(namespace.to_string(), value);
    }

    fn blacklist_members(&self) -> Vec<String> {
        self.blacklist.iter().map(|e| e.clone()).collect()
    }

    fn blacklist_add(&self, address: &str) {
        self.blacklist.insert(address.to_string());
    }

    fn blacklist_remove(&self, address: &str) {
        self.blacklist.remove(address);
    }

    fn blacklist_contains(&self, address: &str) -> bool {
        self.blacklist.contains(address)
    }
}
