//! Blacklist view over the shared store.
//!
//! Read fresh at the start of each selection; the Host Pool holds no
//! cached snapshot. Mutation is driven by the admin HTTP surface.

use crate::store::SharedStore;
use std::sync::Arc;

/// The shared-store key under which blacklisted `host:port` entries live.
pub const BLACKLIST_KEY: &str = "docker-executor::blacklisted-hosts";

pub struct BlacklistView {
    store: Arc<dyn SharedStore>,
}

impl BlacklistView {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Vec<String> {
        self.store.blacklist_members()
    }

    pub fn add(&self, address: &str) {
        self.store.blacklist_add(address);
    }

    pub fn remove(&self, address: &str) {
        self.store.blacklist_remove(address);
    }

    pub fn contains(&self, address: &str) -> bool {
        self.store.blacklist_contains(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySharedStore;

    #[test]
    fn add_is_visible_to_subsequent_list() {
        let view = BlacklistView::new(InMemorySharedStore::shared());
        assert!(view.list().is_empty());
        view.add("h1:2375");
        assert_eq!(view.list(), vec!["h1:2375".to_string()]);
        view.remove("h1:2375");
        assert!(view.list().is_empty());
    }
}
