//! Top-level façade: owns the breaker registry, composes the host pool
//! and blacklist view, and exposes every job-facing operation a caller
//! drives an execution through.

use crate::binding::Binding;
use crate::blacklist::BlacklistView;
use crate::breaker_registry::BreakerRegistry;
use crate::engine::client::RunSpec;
use crate::error::{DispatchError, EngineError, Result};
use crate::pool::HostPool;
use crate::result::{map_engine_status, parse_iso8601, ExecutionResult, ExecutionStatus};
use std::sync::Arc;
use tokio::sync::watch;

/// A removed defunct container, returned by [`Executor::remove_done`].
#[derive(Debug, Clone)]
pub struct RemovedContainer {
    pub host: String,
    pub name: String,
    pub id: String,
    pub image: String,
}

/// One entry in the listing API's `available`/`unavailable` buckets.
#[derive(Debug, Clone)]
pub struct HostStatus {
    pub host: String,
    pub port: u16,
    pub available: bool,
    pub blacklisted: bool,
    pub circuit_closed: bool,
    pub error: Option<String>,
}

/// One running container found during a fleet listing.
#[derive(Debug, Clone)]
pub struct RunningContainer {
    pub host: String,
    pub port: u16,
    pub container_id: String,
}

#[derive(Debug, Default)]
pub struct RunningContainers {
    pub available: Vec<HostStatus>,
    pub unavailable: Vec<HostStatus>,
    pub running: Vec<RunningContainer>,
}

pub struct Executor {
    pool: HostPool,
    breakers: Arc<BreakerRegistry>,
    blacklist: BlacklistView,
    job_prefix: String,
}

impl Executor {
    pub fn new(pool: HostPool, breakers: BreakerRegistry, blacklist: BlacklistView, job_prefix: String) -> Self {
        Self {
            pool,
            breakers: Arc::new(breakers),
            blacklist,
            job_prefix,
        }
    }

    /// Shares the breaker registry this executor dispatches through, so a
    /// caller (e.g. the admin HTTP surface) can report live circuit state
    /// without keeping a second, disconnected registry of its own.
    pub fn breaker_registry(&self) -> Arc<BreakerRegistry> {
        self.breakers.clone()
    }

    /// Blacklist view backing this executor's selection, shared rather than
    /// duplicated so admin mutations take effect immediately.
    pub fn blacklist(&self) -> &BlacklistView {
        &self.blacklist
    }

    pub fn farm_count(&self) -> usize {
        self.pool.farm_count()
    }

    /// `(total, healthy)` host counts across every configured farm, where
    /// healthy means neither blacklisted nor breaker-open. Used by the
    /// admin surface's readiness check.
    pub fn readiness_counts(&self) -> (usize, usize) {
        let blacklist = self.blacklist.list();
        let total = self.pool.host_count();
        let healthy = self
            .pool
            .all_hosts()
            .iter()
            .filter(|h| !blacklist.iter().any(|b| b == &h.address()))
            .filter(|h| self.breakers.is_closed(&h.host, h.port))
            .count();
        (total, healthy)
    }

    fn blacklist_or(&self, blacklist: Option<Vec<String>>) -> Vec<String> {
        blacklist.unwrap_or_else(|| self.blacklist.list())
    }

    /// Checks an already-bound host's breaker before dispatching against
    /// it. Selection-time breaker filtering (§4.2) doesn't apply to a
    /// bound-host dispatch — the binding bypasses selection entirely — so
    /// every such dispatch must consult the breaker itself and fail fast
    /// with `CircuitOpen` while it's tripped (spec.md §4.1, §7).
    fn check_bound_breaker(&self, host: &str, port: u16, breaker: &crate::breaker::CircuitBreaker) -> Result<()> {
        if breaker.permit() == crate::breaker::CallPermit::Denied {
            return Err(DispatchError::CircuitOpen {
                host: host.to_string(),
                port,
            });
        }
        Ok(())
    }

    /// Translates an `EngineError` raised against `host:port` into the
    /// uniform failure policy: connection-class failures trip the
    /// breaker and clear the binding's host/port; everything else
    /// propagates as-is.
    fn handle_engine_error(&self, host: &str, port: u16, binding: &mut Binding, err: EngineError) -> DispatchError {
        let breaker = self.breakers.get(host, port);
        if err.is_connection_class() {
            breaker.record_failure();
            binding.clear_host();
            DispatchError::HostUnavailable {
                host: host.to_string(),
                port,
                cause: err.to_string(),
            }
        } else {
            breaker.record_success();
            DispatchError::Engine(err)
        }
    }

    /// Selects a host (respecting the blacklist and breaker state), pulls
    /// `image:tag`, and binds `host`/`port` on success.
    pub async fn update_image(
        &self,
        task_id: &str,
        binding: &mut Binding,
        image: &str,
        tag: &str,
        blacklist: Option<Vec<String>>,
    ) -> Result<()> {
        let blacklist = self.blacklist_or(blacklist);
        let host = self.pool.select(task_id, &blacklist, &self.breakers).await?;
        let breaker = self.breakers.get(&host.host, host.port);

        let full_image = format!("{image}:{tag}");
        match host.client.pull_image(&full_image).await {
            Ok(()) => {
                breaker.record_success();
                binding.bind_host(host.host.clone(), host.port);
                Ok(())
            }
            Err(e) => Err(self.handle_engine_error(&host.host, host.port, binding, e)),
        }
    }

    /// Starts a detached container for this execution. Uses the existing
    /// binding's host if present (bypassing blacklist/breaker — an
    /// explicit lookup, per the prior binding); otherwise selects a fresh
    /// host, which is an abnormal path and is logged as a warning.
    pub async fn run(
        &self,
        task_id: &str,
        execution_id: &str,
        binding: &mut Binding,
        image: &str,
        tag: &str,
        command: Vec<String>,
        env: Vec<(String, String)>,
        blacklist: Option<Vec<String>>,
    ) -> Result<()> {
        let mut used_bound_host = false;
        let host = match binding.host_port() {
            Some((h, p)) => {
                used_bound_host = true;
                self.pool
                    .get_explicit(h, p)
                    .ok_or_else(|| DispatchError::NoHostAvailable(task_id.to_string()))?
            }
            None => {
                tracing::warn!(task_id, "run() called without a bound host, selecting one now");
                let blacklist = self.blacklist_or(blacklist);
                let host = self.pool.select(task_id, &blacklist, &self.breakers).await?;
                binding.bind_host(host.host.clone(), host.port);
                host
            }
        };

        let breaker = self.breakers.get(&host.host, host.port);
        if used_bound_host {
            self.check_bound_breaker(&host.host, host.port, &breaker)?;
        }
        let spec = RunSpec {
            image: format!("{image}:{tag}"),
            name: format!("{}-{}", self.job_prefix, execution_id),
            command,
            env,
        };

        match host.client.create_and_start(&spec).await {
            Ok(container_id) => {
                breaker.record_success();
                binding.bind_container(container_id);
                Ok(())
            }
            Err(e) => Err(self.handle_engine_error(&host.host, host.port, binding, e)),
        }
    }

    /// No-op (with a warning) if no container is bound; otherwise stops
    /// the bound container on its host. A container_id surviving a prior
    /// host clear (see [`Binding::OrphanedContainer`]) is not a no-op: it
    /// fails with `NoHostAvailable`, forcing the scheduler to re-select
    /// and retry from image-pull rather than silently skipping the stop.
    pub async fn stop_job(&self, binding: &mut Binding) -> Result<()> {
        let Some(container_id) = binding.container_id().map(str::to_string) else {
            tracing::warn!("stop_job called with no bound container, ignoring");
            return Ok(());
        };
        let (host, port) = binding
            .host_port()
            .map(|(h, p)| (h.to_string(), p))
            .ok_or_else(|| DispatchError::NoHostAvailable(container_id.clone()))?;

        let host_client = self
            .pool
            .get_explicit(&host, port)
            .ok_or_else(|| DispatchError::NoHostAvailable(container_id.clone()))?;
        let breaker = self.breakers.get(&host, port);
        self.check_bound_breaker(&host, port, &breaker)?;

        match host_client.client.stop(&container_id, Some(10)).await {
            Ok(()) => {
                breaker.record_success();
                Ok(())
            }
            Err(e) => Err(self.handle_engine_error(&host, port, binding, e)),
        }
    }

    /// Fetches the bound container's state and maps it to an
    /// [`ExecutionResult`]. On a terminal status, attaches stdout as
    /// `log` and folds stderr into `error` (appended if `error` was
    /// already populated, otherwise used in its place).
    pub async fn get_result(&self, binding: &mut Binding) -> Result<ExecutionResult> {
        let (host, port) = binding
            .host_port()
            .map(|(h, p)| (h.to_string(), p))
            .ok_or_else(|| DispatchError::NoHostAvailable("get_result on unbound execution".to_string()))?;
        let container_id = binding
            .container_id()
            .ok_or_else(|| DispatchError::NoHostAvailable("get_result with no bound container".to_string()))?
            .to_string();

        let host_client = self
            .pool
            .get_explicit(&host, port)
            .ok_or_else(|| DispatchError::NoHostAvailable(container_id.clone()))?;
        let breaker = self.breakers.get(&host, port);
        self.check_bound_breaker(&host, port, &breaker)?;

        let info = match host_client.client.inspect(&container_id).await {
            Ok(info) => {
                breaker.record_success();
                info
            }
            Err(e) => return Err(self.handle_engine_error(&host, port, binding, e)),
        };

        let status = map_engine_status(&info.status);
        let started_at = info
            .started_at
            .as_deref()
            .and_then(|s| parse_iso8601(s).ok())
            .unwrap_or_else(chrono::Utc::now);

        let mut result = ExecutionResult {
            status,
            exit_code: info.exit_code.unwrap_or(0),
            error: info.error.clone().unwrap_or_default(),
            started_at,
            finished_at: None,
            log: None,
        };

        if matches!(status, ExecutionStatus::Done | ExecutionStatus::Failed) {
            result.finished_at = info.finished_at.as_deref().and_then(|s| parse_iso8601(s).ok());

            let stdout = host_client
                .client
                .fetch_logs(&container_id, true, false)
                .await
                .unwrap_or_default();
            result.log = Some(stdout.into());

            let stderr = host_client
                .client
                .fetch_logs(&container_id, false, true)
                .await
                .unwrap_or_default();
            let stderr_text = String::from_utf8_lossy(&stderr).into_owned();
            if !stderr_text.is_empty() {
                if result.error.is_empty() {
                    result.error = stderr_text;
                } else {
                    result.error = format!("{}\n\nstderr:\n{}", result.error, stderr_text);
                }
            }
        }

        Ok(result)
    }

    /// Full stdout+stderr of the bound container, decoded as UTF-8.
    pub async fn get_current_logs(&self, binding: &mut Binding) -> Result<String> {
        let (host, port) = binding
            .host_port()
            .map(|(h, p)| (h.to_string(), p))
            .ok_or_else(|| DispatchError::NoHostAvailable("get_current_logs on unbound execution".to_string()))?;
        let container_id = binding
            .container_id()
            .ok_or_else(|| DispatchError::NoHostAvailable("get_current_logs with no bound container".to_string()))?
            .to_string();

        let host_client = self
            .pool
            .get_explicit(&host, port)
            .ok_or_else(|| DispatchError::NoHostAvailable(container_id.clone()))?;
        let breaker = self.breakers.get(&host, port);
        self.check_bound_breaker(&host, port, &breaker)?;

        match host_client.client.fetch_logs(&container_id, true, true).await {
            Ok(bytes) => {
                breaker.record_success();
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) => Err(self.handle_engine_error(&host, port, binding, e)),
        }
    }

    /// A finite stream of UTF-8 log chunks, terminating when the
    /// container ends or the underlying engine stream closes.
    pub async fn get_streaming_logs(
        &self,
        binding: &mut Binding,
    ) -> Result<std::pin::Pin<Box<dyn tokio_stream::Stream<Item = Result<String>> + Send>>> {
        let (host, port) = binding
            .host_port()
            .map(|(h, p)| (h.to_string(), p))
            .ok_or_else(|| DispatchError::NoHostAvailable("get_streaming_logs on unbound execution".to_string()))?;
        let container_id = binding
            .container_id()
            .ok_or_else(|| DispatchError::NoHostAvailable("get_streaming_logs with no bound container".to_string()))?
            .to_string();

        let host_client = self
            .pool
            .get_explicit(&host, port)
            .ok_or_else(|| DispatchError::NoHostAvailable(container_id.clone()))?;
        let breaker = self.breakers.get(&host, port);
        self.check_bound_breaker(&host, port, &breaker)?;

        use tokio_stream::StreamExt;
        match host_client.client.stream_logs(&container_id).await {
            Ok(stream) => {
                breaker.record_success();
                let mapped = stream.map(|chunk| {
                    chunk
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                        .map_err(DispatchError::from)
                });
                Ok(Box::pin(mapped))
            }
            Err(e) => Err(self.handle_engine_error(&host, port, binding, e)),
        }
    }

    /// Renames the bound container to `defunct-{original-name}`,
    /// breaking the link between the logical execution and its name
    /// prefix so the reap loop knows it's terminal.
    pub async fn mark_as_done(&self, execution_id: &str, binding: &mut Binding) -> Result<()> {
        let (host, port) = binding
            .host_port()
            .map(|(h, p)| (h.to_string(), p))
            .ok_or_else(|| DispatchError::NoHostAvailable("mark_as_done on unbound execution".to_string()))?;
        let container_id = binding
            .container_id()
            .ok_or_else(|| DispatchError::NoHostAvailable("mark_as_done with no bound container".to_string()))?
            .to_string();

        let host_client = self
            .pool
            .get_explicit(&host, port)
            .ok_or_else(|| DispatchError::NoHostAvailable(container_id.clone()))?;
        let breaker = self.breakers.get(&host, port);
        self.check_bound_breaker(&host, port, &breaker)?;

        let new_name = format!("defunct-{}-{}", self.job_prefix, execution_id);
        match host_client.client.rename(&container_id, &new_name).await {
            Ok(()) => {
                breaker.record_success();
                Ok(())
            }
            Err(e) => Err(self.handle_engine_error(&host, port, binding, e)),
        }
    }

    /// Across every host in the pool, removes containers whose name
    /// starts with `defunct-{job_prefix}` and returns what was removed.
    pub async fn remove_done(&self) -> Vec<RemovedContainer> {
        let prefix = format!("defunct-{}", self.job_prefix);
        let mut removed = Vec::new();

        for host in self.pool.all_hosts() {
            let containers = match host.client.list_containers(&prefix).await {
                Ok(containers) => containers,
                Err(e) => {
                    tracing::warn!(host = %host.address(), error = %e, "failed to list defunct containers");
                    continue;
                }
            };

            for container in containers {
                if let Err(e) = host.client.remove(&container.id).await {
                    tracing::warn!(host = %host.address(), container_id = %container.id, error = %e, "failed to remove defunct container");
                    continue;
                }
                removed.push(RemovedContainer {
                    host: host.address(),
                    name: container.name,
                    id: container.id,
                    image: container.image,
                });
            }
        }

        tracing::info!(count = removed.len(), "removed defunct containers");
        removed
    }

    /// Per host (optionally restricted to the farm whose pattern equals
    /// `pattern`): blacklisted hosts are recorded unavailable without a
    /// call; otherwise running containers with the job prefix are listed.
    pub async fn get_running_containers(&self, pattern: Option<&str>, blacklist: Option<Vec<String>>) -> RunningContainers {
        let blacklist = self.blacklist_or(blacklist);

        let hosts: Vec<_> = match pattern {
            Some(p) => self
                .pool
                .farm_by_pattern(p)
                .map(|f| f.hosts.clone())
                .unwrap_or_default(),
            None => self.pool.all_hosts(),
        };

        let mut result = RunningContainers::default();

        for host in hosts {
            let address = host.address();
            let blacklisted = blacklist.iter().any(|b| b == &address);
            let breaker = self.breakers.get(&host.host, host.port);

            if blacklisted {
                result.unavailable.push(HostStatus {
                    host: host.host.clone(),
                    port: host.port,
                    available: false,
                    blacklisted: true,
                    circuit_closed: breaker.is_closed(),
                    error: Some("server is blacklisted".to_string()),
                });
                continue;
            }

            match host.client.list_containers(&self.job_prefix).await {
                Ok(containers) => {
                    breaker.record_success();
                    result.available.push(HostStatus {
                        host: host.host.clone(),
                        port: host.port,
                        available: true,
                        blacklisted: false,
                        circuit_closed: breaker.is_closed(),
                        error: None,
                    });
                    for c in containers.into_iter().filter(|c| c.status == "running") {
                        result.running.push(RunningContainer {
                            host: host.host.clone(),
                            port: host.port,
                            container_id: c.id,
                        });
                    }
                }
                Err(e) => {
                    breaker.record_failure();
                    result.unavailable.push(HostStatus {
                        host: host.host.clone(),
                        port: host.port,
                        available: false,
                        blacklisted: false,
                        circuit_closed: breaker.is_closed(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        result
    }

    /// Delegates capacity checking to the host pool.
    pub async fn validate_max_running(&self, task_id: &str, blacklist: Option<Vec<String>>) -> bool {
        let blacklist = self.blacklist_or(blacklist);
        self.pool.validate_max_running(task_id, &self.job_prefix, &blacklist).await
    }

    /// Background task reaping defunct containers every `interval`,
    /// stopping when `shutdown` fires.
    pub async fn run_reap_loop(self: Arc<Self>, interval: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.remove_done().await;
                }
                _ = shutdown.changed() => {
                    tracing::info!("reap loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngineClient;
    use crate::engine::client::ContainerInfo;
    use crate::engine::EngineClient;
    use crate::pool::{Farm, HostClient, HostPool};
    use crate::store::InMemorySharedStore;
    use std::time::Duration;

    fn host(host: &str, port: u16, engine: Arc<FakeEngineClient>) -> Arc<HostClient> {
        Arc::new(HostClient {
            host: host.to_string(),
            port,
            client: engine,
        })
    }

    fn single_host_executor(engine: Arc<FakeEngineClient>) -> Executor {
        let pool = HostPool::new(vec![Farm {
            pattern: None,
            hosts: vec![host("h1", 2375, engine)],
            max_running: 10,
        }]);
        let breakers = BreakerRegistry::new(2, Duration::from_millis(30), InMemorySharedStore::shared());
        let blacklist = BlacklistView::new(InMemorySharedStore::shared());
        Executor::new(pool, breakers, blacklist, "fastlane-job".to_string())
    }

    // S1 — happy path: update_image binds a host, run starts a container,
    // get_result maps a terminal engine state to a done ExecutionResult.
    #[tokio::test]
    async fn s1_happy_path() {
        let engine = Arc::new(FakeEngineClient::new());
        let executor = single_host_executor(engine.clone());
        let mut binding = Binding::Unbound;

        executor
            .update_image("t", &mut binding, "img", "v1", None)
            .await
            .unwrap();
        assert_eq!(binding.host_port(), Some(("h1", 2375)));

        executor
            .run("t", "e1", &mut binding, "img", "v1", vec!["echo".into()], vec![], None)
            .await
            .unwrap();
        let container_id = binding.container_id().unwrap().to_string();

        engine
            .set_logs(&container_id, b"out".to_vec(), b"err".to_vec())
            .await;
        engine
            .add_container(ContainerInfo {
                id: container_id.clone(),
                name: "fastlane-job-e1".to_string(),
                image: "img:v1".to_string(),
                status: "exited".to_string(),
                exit_code: Some(0),
                error: None,
                started_at: Some("2024-01-01T00:00:00Z".to_string()),
                finished_at: Some("2024-01-01T00:00:01Z".to_string()),
            })
            .await;

        let result = executor.get_result(&mut binding).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Done);
        assert_eq!(result.exit_code, 0);
        assert!(result.finished_at.is_some());
        assert_eq!(result.log.as_deref(), Some(&b"out"[..]));
        assert_eq!(result.error, "err");
    }

    // get_result seeds `error` from the engine's own State.Error before
    // appending stderr, matching the source's `result.error = state["Error"]`
    // followed by a conditional `+=`/assign of the stderr text.
    #[tokio::test]
    async fn get_result_seeds_error_from_engine_state_then_appends_stderr() {
        let engine = Arc::new(FakeEngineClient::new());
        let executor = single_host_executor(engine.clone());
        let mut binding = Binding::Unbound;

        executor
            .update_image("t", &mut binding, "img", "v1", None)
            .await
            .unwrap();
        executor
            .run("t", "e1", &mut binding, "img", "v1", vec![], vec![], None)
            .await
            .unwrap();
        let container_id = binding.container_id().unwrap().to_string();

        engine.set_logs(&container_id, b"".to_vec(), b"boom".to_vec()).await;
        engine
            .add_container(ContainerInfo {
                id: container_id.clone(),
                name: "fastlane-job-e1".to_string(),
                image: "img:v1".to_string(),
                status: "dead".to_string(),
                exit_code: Some(137),
                error: Some("OOMKilled".to_string()),
                started_at: Some("2024-01-01T00:00:00Z".to_string()),
                finished_at: Some("2024-01-01T00:00:01Z".to_string()),
            })
            .await;

        let result = executor.get_result(&mut binding).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error, "OOMKilled\n\nstderr:\nboom");
    }

    // Invariant 9 — get_result is idempotent for terminal containers.
    #[tokio::test]
    async fn get_result_is_idempotent_for_terminal_containers() {
        let engine = Arc::new(FakeEngineClient::new());
        let executor = single_host_executor(engine.clone());
        let mut binding = Binding::Unbound;

        executor
            .update_image("t", &mut binding, "img", "v1", None)
            .await
            .unwrap();
        executor
            .run("t", "e1", &mut binding, "img", "v1", vec![], vec![], None)
            .await
            .unwrap();
        let container_id = binding.container_id().unwrap().to_string();

        engine.set_logs(&container_id, b"out".to_vec(), b"".to_vec()).await;
        engine
            .add_container(ContainerInfo {
                id: container_id.clone(),
                name: "fastlane-job-e1".to_string(),
                image: "img:v1".to_string(),
                status: "exited".to_string(),
                exit_code: Some(0),
                error: None,
                started_at: Some("2024-01-01T00:00:00Z".to_string()),
                finished_at: Some("2024-01-01T00:00:01Z".to_string()),
            })
            .await;

        let first = executor.get_result(&mut binding).await.unwrap();
        let second = executor.get_result(&mut binding).await.unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.exit_code, second.exit_code);
        assert_eq!(first.finished_at, second.finished_at);
        assert_eq!(first.log.as_deref(), second.log.as_deref());
    }

    // S4 — breaker trips: the refresh probe and the dispatched call both
    // count as failures against the only host's breaker (fail_max=2), so
    // it opens during the first failing call; the very next call then
    // finds no eligible host at all instead of retrying the dead one.
    #[tokio::test]
    async fn s4_breaker_trips_and_excludes_host() {
        let engine = Arc::new(FakeEngineClient::new());
        engine.set_unreachable(true);
        let executor = single_host_executor(engine.clone());

        let mut binding = Binding::Unbound;
        let err = executor
            .update_image("t", &mut binding, "img", "v1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::HostUnavailable { .. }));

        let mut binding = Binding::Unbound;
        let err = executor
            .update_image("t", &mut binding, "img", "v1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoHostAvailable(_)));

        // After reset_timeout elapses the breaker half-opens and the host
        // becomes eligible again; once the engine recovers, the call
        // succeeds and the breaker closes.
        tokio::time::sleep(Duration::from_millis(40)).await;
        engine.set_unreachable(false);
        let mut binding = Binding::Unbound;
        executor
            .update_image("t", &mut binding, "img", "v1", None)
            .await
            .unwrap();
    }

    // S5 — a connection failure mid-run clears the binding's host/port.
    #[tokio::test]
    async fn s5_connection_failure_clears_binding() {
        let engine = Arc::new(FakeEngineClient::new());
        let executor = single_host_executor(engine.clone());

        let mut binding = Binding::Unbound;
        executor
            .update_image("t", &mut binding, "img", "v1", None)
            .await
            .unwrap();
        assert!(binding.host_port().is_some());

        engine.set_unreachable(true);
        let err = executor
            .run("t", "e1", &mut binding, "img", "v1", vec![], vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::HostUnavailable { .. }));
        assert_eq!(binding.host_port(), None);
    }

    // spec.md §3: clearing host/port on a connection failure must NOT clear
    // container_id — a container created before the failure is still
    // logically tied to the execution, even though it's now unreachable
    // until the scheduler retries from image-pull.
    #[tokio::test]
    async fn connection_failure_after_run_preserves_container_id() {
        let engine = Arc::new(FakeEngineClient::new());
        let executor = single_host_executor(engine.clone());

        let mut binding = Binding::Unbound;
        executor
            .update_image("t", &mut binding, "img", "v1", None)
            .await
            .unwrap();
        executor
            .run("t", "e1", &mut binding, "img", "v1", vec![], vec![], None)
            .await
            .unwrap();
        let container_id = binding.container_id().unwrap().to_string();

        engine.set_unreachable(true);
        let err = executor.stop_job(&mut binding).await.unwrap_err();
        assert!(matches!(err, DispatchError::HostUnavailable { .. }));

        assert_eq!(binding.host_port(), None);
        assert_eq!(binding.container_id(), Some(container_id.as_str()));

        // A further operation against the orphaned container_id is not a
        // silent no-op: it fails, forcing the caller back through
        // update_image/run rather than reusing a host that's gone.
        let err = executor.stop_job(&mut binding).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoHostAvailable(_)));
    }

    // spec.md §4.1/§7: a bound-host dispatch bypasses selection (and thus
    // selection's breaker filter), so it must consult the breaker itself.
    // Here execution B's binding is untouched by execution A's failures,
    // but both share h1:2375's breaker — once that breaker trips, B's
    // bound-host operations must short-circuit with CircuitOpen rather
    // than dispatching through an open breaker.
    #[tokio::test]
    async fn bound_host_dispatch_short_circuits_on_open_breaker() {
        let engine = Arc::new(FakeEngineClient::new());
        let executor = single_host_executor(engine.clone());

        let mut binding_b = Binding::Unbound;
        executor
            .update_image("t", &mut binding_b, "img", "v1", None)
            .await
            .unwrap();
        executor
            .run("t", "e2", &mut binding_b, "img", "v1", vec![], vec![], None)
            .await
            .unwrap();
        assert!(binding_b.host_port().is_some());
        assert!(binding_b.container_id().is_some());

        // Trip h1:2375's shared breaker independently of binding_b, as if
        // execution A's concurrent connection failures had done it.
        let (host, port) = binding_b.host_port().unwrap();
        let breaker = executor.breaker_registry().get(host, port);
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_closed());

        let err = executor.get_result(&mut binding_b).await.unwrap_err();
        assert!(matches!(err, DispatchError::CircuitOpen { .. }));
        // CircuitOpen is a short-circuit, not a connection failure: the
        // binding is untouched, unlike HostUnavailable's clear_host.
        assert!(binding_b.host_port().is_some());
        assert!(binding_b.container_id().is_some());

        let err = executor.stop_job(&mut binding_b).await.unwrap_err();
        assert!(matches!(err, DispatchError::CircuitOpen { .. }));
    }

    // S6 — remove_done reaps only defunct containers, across every host,
    // leaving live containers untouched.
    #[tokio::test]
    async fn s6_remove_done_reaps_only_defunct_containers() {
        let engine_a = Arc::new(FakeEngineClient::new());
        let engine_b = Arc::new(FakeEngineClient::new());

        for (engine, suffix) in [(&engine_a, "a"), (&engine_b, "b")] {
            engine
                .add_container(ContainerInfo {
                    id: format!("defunct-{suffix}"),
                    name: format!("defunct-fastlane-job-{suffix}"),
                    image: "img:v1".to_string(),
                    status: "exited".to_string(),
                    exit_code: Some(0),
                    error: None,
                    started_at: None,
                    finished_at: None,
                })
                .await;
            engine
                .add_container(ContainerInfo {
                    id: format!("live-{suffix}"),
                    name: format!("fastlane-job-{suffix}"),
                    image: "img:v1".to_string(),
                    status: "running".to_string(),
                    exit_code: None,
                    error: None,
                    started_at: None,
                    finished_at: None,
                })
                .await;
        }

        let pool = HostPool::new(vec![Farm {
            pattern: None,
            hosts: vec![
                host("h1", 2375, engine_a.clone()),
                host("h2", 2375, engine_b.clone()),
            ],
            max_running: 10,
        }]);
        let breakers = BreakerRegistry::new(2, Duration::from_secs(60), InMemorySharedStore::shared());
        let blacklist = BlacklistView::new(InMemorySharedStore::shared());
        let executor = Executor::new(pool, breakers, blacklist, "fastlane-job".to_string());

        let removed = executor.remove_done().await;
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|c| c.name.starts_with("defunct-fastlane-job")));

        assert!(engine_a.inspect("live-a").await.is_ok());
        assert!(engine_b.inspect("live-b").await.is_ok());
        assert!(engine_a.inspect("defunct-a").await.is_err());
        assert!(engine_b.inspect("defunct-b").await.is_err());
    }

    // stop_job is a no-op when no container is bound yet.
    #[tokio::test]
    async fn stop_job_on_unbound_execution_is_a_noop() {
        let engine = Arc::new(FakeEngineClient::new());
        let executor = single_host_executor(engine);
        let mut binding = Binding::Unbound;
        executor.stop_job(&mut binding).await.unwrap();
    }

    #[tokio::test]
    async fn readiness_counts_reflect_blacklist_and_breaker_state() {
        let engine = Arc::new(FakeEngineClient::new());
        let executor = single_host_executor(engine);
        assert_eq!(executor.readiness_counts(), (1, 1));

        executor.blacklist().add("h1:2375");
        assert_eq!(executor.readiness_counts(), (1, 0));
    }

    // mark_as_done renames the bound container with the defunct prefix.
    #[tokio::test]
    async fn mark_as_done_renames_container() {
        let engine = Arc::new(FakeEngineClient::new());
        let executor = single_host_executor(engine.clone());
        let mut binding = Binding::Unbound;
        executor
            .update_image("t", &mut binding, "img", "v1", None)
            .await
            .unwrap();
        executor
            .run("t", "e1", &mut binding, "img", "v1", vec![], vec![], None)
            .await
            .unwrap();
        let container_id = binding.container_id().unwrap().to_string();

        executor.mark_as_done("e1", &mut binding).await.unwrap();

        let info = engine.inspect(&container_id).await.unwrap();
        assert_eq!(info.name, "defunct-fastlane-job-e1");
    }

    // get_running_containers restricts by pattern equality against the
    // farm's own declared pattern, not by routing `pattern` through the
    // farms as if it were a task id — the gpu farm's hosts must show up
    // (and the cpu farm's must not) when asked for farm "^gpu-" itself.
    #[tokio::test]
    async fn get_running_containers_restricts_by_exact_farm_pattern() {
        let gpu_engine = Arc::new(FakeEngineClient::new());
        let cpu_engine = Arc::new(FakeEngineClient::new());
        let pool = HostPool::new(vec![
            Farm {
                pattern: Some(regex::Regex::new("^gpu-").unwrap()),
                hosts: vec![host("hgpu", 2375, gpu_engine.clone())],
                max_running: 4,
            },
            Farm {
                pattern: None,
                hosts: vec![host("hcpu", 2375, cpu_engine.clone())],
                max_running: 8,
            },
        ]);
        let breakers = BreakerRegistry::new(2, Duration::from_millis(30), InMemorySharedStore::shared());
        let blacklist = BlacklistView::new(InMemorySharedStore::shared());
        let executor = Executor::new(pool, breakers, blacklist, "fastlane-job".to_string());

        let result = executor.get_running_containers(Some("^gpu-"), None).await;
        assert_eq!(result.available.len(), 1);
        assert_eq!(result.available[0].host, "hgpu");
    }
}
