//! Container-workload dispatch subsystem.
//!
//! Selects a container host for a job, guards every outbound call against
//! host failure with per-host circuit breakers, enforces farm-level
//! concurrency caps, persists execution/host binding across the job
//! lifecycle, and exposes container-lifecycle operations in a
//! host-failure-tolerant way.

pub mod admin;
pub mod binding;
pub mod blacklist;
pub mod breaker;
pub mod breaker_registry;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod pool;
pub mod result;
pub mod store;

pub use binding::Binding;
pub use config::DispatchConfig;
pub use error::{DispatchError, EngineError, Result};
pub use executor::Executor;

use breaker_registry::BreakerRegistry;
use engine::EngineClient;
use pool::{Farm, HostPool, HostClient};
use std::sync::Arc;

/// Builds a fully-wired [`Executor`] from configuration and an engine-client
/// factory, the same way `AppState::initialize` assembles the agent pool
/// from `ClusterConfig` in the teacher service.
pub fn build_executor(
    config: &DispatchConfig,
    store: Arc<dyn store::SharedStore>,
    connect: impl Fn(&str, u16) -> anyhow::Result<Arc<dyn EngineClient>>,
) -> anyhow::Result<Executor> {
    let mut farms = Vec::with_capacity(config.farms.len());
    for farm_config in &config.farms {
        let pattern = if farm_config.pattern.is_empty() {
            None
        } else {
            Some(regex::Regex::new(&farm_config.pattern)?)
        };

        let hosts = farm_config
            .hosts
            .iter()
            .map(|address| {
                let (host, port) = address
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("invalid host address: {address}"))?;
                let port: u16 = port.parse()?;
                Ok(Arc::new(HostClient {
                    host: host.to_string(),
                    port,
                    client: connect(host, port)?,
                }))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        farms.push(Farm {
            pattern,
            hosts,
            max_running: farm_config.max_running,
        });
    }

    let pool = HostPool::new(farms);
    let breakers = BreakerRegistry::new(
        config.breaker.max_fails,
        std::time::Duration::from_secs(config.breaker.reset_timeout_secs),
        store.clone(),
    );
    let blacklist = blacklist::BlacklistView::new(store);

    Ok(Executor::new(pool, breakers, blacklist, config.job_prefix.clone()))
}
