//! Engine trait — the container lifecycle operations the executor needs.
//!
//! Object-safe via `Pin<Box<dyn Future>>` returns, same shape as the
//! original `DockerOps` trait, scoped down to the operations this
//! subsystem actually performs: pull an image, run a container, inspect
//! it for its result, stream its logs, stop and remove it, and list the
//! containers live on a host.

use crate::error::EngineError;
use std::future::Future;
use std::pin::Pin;

/// A normalized snapshot of one container, independent of the engine's
/// native representation.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Raw engine status string: `created`, `running`, `exited`, `dead`, ...
    pub status: String,
    pub exit_code: Option<i64>,
    /// The engine's own `State.Error`, empty unless the engine itself
    /// failed to run the container (separate from the container's stderr).
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Parameters for starting a new container for an execution.
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
}

pub trait EngineClient: Send + Sync {
    fn pull_image<'a>(
        &'a self,
        image: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

    fn create_and_start<'a>(
        &'a self,
        spec: &'a RunSpec,
    ) -> Pin<Box<dyn Future<Output = Result<String, EngineError>> + Send + 'a>>;

    fn inspect<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ContainerInfo, EngineError>> + Send + 'a>>;

    fn list_containers<'a>(
        &'a self,
        name_prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ContainerInfo>, EngineError>> + Send + 'a>>;

    fn fetch_logs<'a>(
        &'a self,
        container_id: &'a str,
        stdout: bool,
        stderr: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, EngineError>> + Send + 'a>>;

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
    >;

    fn stop<'a>(
        &'a self,
        container_id: &'a str,
        timeout_secs: Option<u32>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

    fn rename<'a>(
        &'a self,
        container_id: &'a str,
        new_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

    fn remove<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

    /// Cheap liveness probe used before selecting a host (`docker info`).
    fn ping<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;
}
