//! Host farms and selection.
//!
//! Loaded once from configured farms at startup; `clients_by_address`
//! gives O(1) direct lookup for already-bound executions, while
//! `farms` preserves declaration order for pattern-first selection.

use crate::breaker_registry::BreakerRegistry;
use crate::engine::EngineClient;
use crate::error::{DispatchError, Result};
use rand::seq::IteratorRandom;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// One configured host, with its dedicated engine client.
pub struct HostClient {
    pub host: String,
    pub port: u16,
    pub client: Arc<dyn EngineClient>,
}

impl HostClient {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An ordered farm: optional task-id routing pattern, its hosts, and its
/// concurrency cap.
pub struct Farm {
    pub pattern: Option<Regex>,
    pub hosts: Vec<Arc<HostClient>>,
    pub max_running: u32,
}

impl Farm {
    fn matches(&self, task_id: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(task_id),
            None => true,
        }
    }
}

pub struct HostPool {
    farms: Vec<Farm>,
    clients_by_address: HashMap<String, Arc<HostClient>>,
}

impl HostPool {
    pub fn new(farms: Vec<Farm>) -> Self {
        let mut clients_by_address = HashMap::new();
        for farm in &farms {
            for client in &farm.hosts {
                clients_by_address.insert(client.address(), client.clone());
            }
        }
        Self {
            farms,
            clients_by_address,
        }
    }

    /// Direct lookup for an already-bound execution. No breaker or
    /// blacklist check — the prior binding is trusted as-is.
    pub fn get_explicit(&self, host: &str, port: u16) -> Option<Arc<HostClient>> {
        self.clients_by_address.get(&format!("{host}:{port}")).cloned()
    }

    /// All host clients in the pool, across every farm, for fleet-wide
    /// operations (`remove_done`, cross-host listing).
    pub fn all_hosts(&self) -> Vec<Arc<HostClient>> {
        self.clients_by_address.values().cloned().collect()
    }

    pub fn farm_count(&self) -> usize {
        self.farms.len()
    }

    pub fn host_count(&self) -> usize {
        self.clients_by_address.len()
    }

    /// Finds the first farm whose pattern matches `task_id`.
    pub fn farm_for(&self, task_id: &str) -> Option<&Farm> {
        self.farms.iter().find(|f| f.matches(task_id))
    }

    /// Finds the farm whose configured pattern string equals `pattern`
    /// exactly. Distinct from `farm_for`: this restricts by the farm's
    /// identity (its declared pattern), not by routing a task id through it.
    pub fn farm_by_pattern(&self, pattern: &str) -> Option<&Farm> {
        self.farms
            .iter()
            .find(|f| f.pattern.as_ref().map(Regex::as_str) == Some(pattern))
    }

    /// Selects an eligible host for `task_id`, consulting `blacklist` and
    /// `breakers` in declaration order of farms.
    ///
    /// For each farm whose pattern matches: refreshes breakers for
    /// non-blacklisted hosts with a liveness probe (letting cooled
    /// breakers transition out of open before the eligibility check),
    /// then picks uniformly at random among hosts that are neither
    /// blacklisted nor breaker-open. Falls through to the next matching
    /// farm if none are eligible.
    pub async fn select(
        &self,
        task_id: &str,
        blacklist: &[String],
        breakers: &BreakerRegistry,
    ) -> Result<Arc<HostClient>> {
        for farm in &self.farms {
            if !farm.matches(task_id) {
                continue;
            }

            for host in &farm.hosts {
                if blacklist.iter().any(|b| b == &host.address()) {
                    continue;
                }
                let breaker = breakers.get(&host.host, host.port);
                if breaker.permit() != crate::breaker::CallPermit::Allowed {
                    continue;
                }
                match host.client.ping().await {
                    Ok(()) => breaker.record_success(),
                    Err(e) => {
                        tracing::debug!(host = %host.address(), error = %e, "refresh probe failed");
                        breaker.record_failure();
                    }
                }
            }

            let eligible: Vec<&Arc<HostClient>> = farm
                .hosts
                .iter()
                .filter(|h| !blacklist.iter().any(|b| b == &h.address()))
                .filter(|h| breakers.is_closed(&h.host, h.port))
                .collect();

            if let Some(chosen) = eligible.into_iter().choose(&mut rand::rng()) {
                return Ok(chosen.clone());
            }
        }

        Err(DispatchError::NoHostAvailable(task_id.to_string()))
    }

    /// Counts containers whose name starts with `name_prefix` and whose
    /// engine status is `running`, across the farm matching `task_id`.
    /// Hosts that are blacklisted or fail to list are treated as
    /// contributing zero; `true` is returned if no farm matches.
    pub async fn validate_max_running(
        &self,
        task_id: &str,
        name_prefix: &str,
        blacklist: &[String],
    ) -> bool {
        let Some(farm) = self.farm_for(task_id) else {
            return true;
        };

        let mut total_running = 0u32;
        for host in &farm.hosts {
            if blacklist.iter().any(|b| b == &host.address()) {
                continue;
            }
            match host.client.list_containers(name_prefix).await {
                Ok(containers) => {
                    total_running += containers.iter().filter(|c| c.status == "running").count() as u32;
                }
                Err(e) => {
                    tracing::warn!(host = %host.address(), error = %e, "failed to list containers for capacity check");
                }
            }
        }

        total_running == 0 || total_running <= farm.max_running
    }
}
