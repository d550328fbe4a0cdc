//! In-memory test double for [`EngineClient`], modeled on the original
//! `FakeDocker`: a mutex-protected store with builder methods for
//! pre-populating containers, plus knobs for forcing connection failures
//! so breaker/reap-loop behavior can be exercised deterministically.

use super::client::{ContainerInfo, EngineClient, RunSpec};
use crate::error::EngineError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    containers: HashMap<String, ContainerInfo>,
    stdout_logs: HashMap<String, Vec<u8>>,
    stderr_logs: HashMap<String, Vec<u8>>,
    next_id: u64,
}

/// A fake container engine for deterministic tests.
pub struct FakeEngineClient {
    inner: Mutex<Inner>,
    /// When set, every call fails with this connection error instead of
    /// touching the in-memory store — simulates a dead daemon.
    unreachable: std::sync::atomic::AtomicBool,
}

impl Default for FakeEngineClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngineClient {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            unreachable: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Seed a container directly into the fake store.
    pub async fn add_container(&self, container: ContainerInfo) {
        self.inner
            .lock()
            .await
            .containers
            .insert(container.id.clone(), container);
    }

    /// Seed the stdout/stderr returned for a container id.
    pub async fn set_logs(&self, container_id: &str, stdout: Vec<u8>, stderr: Vec<u8>) {
        let mut inner = self.inner.lock().await;
        inner.stdout_logs.insert(container_id.to_string(), stdout);
        inner.stderr_logs.insert(container_id.to_string(), stderr);
    }

    /// Force every subsequent call to fail as a connection error, to
    /// exercise breaker-tripping and binding-clearing behavior.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable
            .store(unreachable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), EngineError> {
        if self.unreachable.load(std::sync::atomic::Ordering::SeqCst) {
            Err(EngineError::Connection("fake engine marked unreachable".into()))
        } else {
            Ok(())
        }
    }
}

impl EngineClient for FakeEngineClient {
    fn pull_image<'a>(
        &'a self,
        _image: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move { self.check_reachable() })
    }

    fn create_and_start<'a>(
        &'a self,
        spec: &'a RunSpec,
    ) -> Pin<Box<dyn Future<Output = Result<String, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_reachable()?;
            let mut inner = self.inner.lock().await;
            inner.next_id += 1;
            let id = format!("fake-{}", inner.next_id);
            inner.containers.insert(
                id.clone(),
                ContainerInfo {
                    id: id.clone(),
                    name: spec.name.clone(),
                    image: spec.image.clone(),
                    status: "running".to_string(),
                    exit_code: None,
                    error: None,
                    started_at: Some("2024-01-01T00:00:00Z".to_string()),
                    finished_at: None,
                },
            );
            Ok(id)
        })
    }

    fn inspect<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ContainerInfo, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_reachable()?;
            self.inner
                .lock()
                .await
                .containers
                .get(container_id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(container_id.to_string()))
        })
    }

    fn list_containers<'a>(
        &'a self,
        name_prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ContainerInfo>, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_reachable()?;
            Ok(self
                .inner
                .lock()
                .await
                .containers
                .values()
                .filter(|c| name_prefix.is_empty() || c.name.starts_with(name_prefix))
                .cloned()
                .collect())
        })
    }

    fn fetch_logs<'a>(
        &'a self,
        container_id: &'a str,
        stdout: bool,
        stderr: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_reachable()?;
            let inner = self.inner.lock().await;
            let mut buf = Vec::new();
            if stdout {
                buf.extend(inner.stdout_logs.get(container_id).cloned().unwrap_or_default());
            }
            if stderr {
                buf.extend(inner.stderr_logs.get(container_id).cloned().unwrap_or_default());
            }
            Ok(buf)
        })
    }

    fn stream_logs<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Pin<
        Box<
            dyn Future<
                    Output = Result<
                        Pin<Box<dyn tokio_stream::Stream<Item = Result<Vec<u8>, EngineError>> + Send>>,
                        EngineError,
                    >,
                > + Send
                + 'a,
        >,
    > {
        Box::pin(async move {
            self.check_reachable()?;
            let inner = self.inner.lock().await;
            let mut lines = inner.stdout_logs.get(container_id).cloned().unwrap_or_default();
            lines.extend(inner.stderr_logs.get(container_id).cloned().unwrap_or_default());
            let stream = tokio_stream::once(Ok(lines));
            Ok(Box::pin(stream) as Pin<Box<dyn tokio_stream::Stream<Item = _> + Send>>)
        })
    }

    fn stop<'a>(
        &'a self,
        container_id: &'a str,
        _timeout_secs: Option<u32>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_reachable()?;
            if let Some(c) = self.inner.lock().await.containers.get_mut(container_id) {
                c.status = "exited".to_string();
                c.exit_code = Some(0);
                c.finished_at = Some("2024-01-01T00:01:00Z".to_string());
            }
            Ok(())
        })
    }

    fn rename<'a>(
        &'a self,
        container_id: &'a str,
        new_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_reachable()?;
            if let Some(c) = self.inner.lock().await.containers.get_mut(container_id) {
                c.name = new_name.to_string();
            }
            Ok(())
        })
    }

    fn remove<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_reachable()?;
            self.inner.lock().await.containers.remove(container_id);
            Ok(())
        })
    }

    fn ping<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move { self.check_reachable() })
    }
}
