//! Real container-engine client, backed by `bollard` against a Docker
//! daemon reachable over TCP (one instance per host in the pool).

use super::client::{ContainerInfo, EngineClient, RunSpec};
use crate::error::EngineError;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::future::Future;
use std::pin::Pin;

pub struct BollardEngineClient {
    client: Docker,
}

impl BollardEngineClient {
    /// Connects to the Docker daemon exposed on `host:port` over plain TCP.
    pub fn connect(host: &str, port: u16) -> Result<Self, EngineError> {
        let addr = format!("tcp://{host}:{port}");
        let client = Docker::connect_with_http(&addr, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

fn container_info_from(summary: bollard::models::ContainerSummary) -> ContainerInfo {
    ContainerInfo {
        id: summary.id.unwrap_or_default(),
        name: summary
            .names
            .and_then(|names| names.into_iter().next())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image: summary.image.unwrap_or_default(),
        status: summary.state.unwrap_or_default(),
        exit_code: None,
        error: None,
        started_at: None,
        finished_at: None,
    }
}

fn container_info_from_inspect(resp: bollard::models::ContainerInspectResponse) -> ContainerInfo {
    let state = resp.state.unwrap_or_default();
    ContainerInfo {
        id: resp.id.unwrap_or_default(),
        name: resp
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image: resp.config.and_then(|c| c.image).unwrap_or_default(),
        status: state.status.map(|s| s.to_string()).unwrap_or_default(),
        exit_code: state.exit_code,
        error: state.error.filter(|e| !e.is_empty()),
        started_at: state.started_at,
        finished_at: state.finished_at,
    }
}

impl EngineClient for BollardEngineClient {
    fn pull_image<'a>(
        &'a self,
        image: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::query_parameters::CreateImageOptions;

            let (from_image, tag) = match image.rsplit_once(':') {
                Some((repo, tag)) => (repo.to_string(), tag.to_string()),
                None => (image.to_string(), "latest".to_string()),
            };

            let options = Some(CreateImageOptions {
                from_image: Some(from_image),
                tag: Some(tag),
                ..Default::default()
            });

            let mut stream = self.client.create_image(options, None, None);
            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => tracing::debug!(status = ?info.status, image, "image pull progress"),
                    Err(e) => return Err(EngineError::from(e)),
                }
            }
            Ok(())
        })
    }

    fn create_and_start<'a>(
        &'a self,
        spec: &'a RunSpec,
    ) -> Pin<Box<dyn Future<Output = Result<String, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::query_parameters::CreateContainerOptions;

            let env: Vec<String> = spec
                .env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();

            let config = bollard::models::ContainerCreateBody {
                image: Some(spec.image.clone()),
                cmd: if spec.command.is_empty() {
                    None
                } else {
                    Some(spec.command.clone())
                },
                env: Some(env),
                ..Default::default()
            };

            let options = Some(CreateContainerOptions {
                name: Some(spec.name.clone()),
                ..Default::default()
            });

            let created = self
                .client
                .create_container(options, config)
                .await
                .map_err(EngineError::from)?;

            self.client
                .start_container(&created.id, None)
                .await
                .map_err(EngineError::from)?;

            Ok(created.id)
        })
    }

    fn inspect<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ContainerInfo, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .client
                .inspect_container(container_id, None)
                .await
                .map_err(EngineError::from)?;
            Ok(container_info_from_inspect(resp))
        })
    }

    fn list_containers<'a>(
        &'a self,
        name_prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ContainerInfo>, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::query_parameters::ListContainersOptions;

            let options = Some(ListContainersOptions {
                all: true,
                ..Default::default()
            });
            let containers = self
                .client
                .list_containers(options)
                .await
                .map_err(EngineError::from)?;

            Ok(containers
                .into_iter()
                .map(container_info_from)
                .filter(|c| name_prefix.is_empty() || c.name.starts_with(name_prefix))
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
            use bollard::container::LogOutput;
            use bollard::query_parameters::LogsOptions;

            let options = LogsOptions {
                follow: false,
                stdout,
                stderr,
                timestamps: false,
                tail: "all".to_string(),
                ..Default::default()
            };

            let mut stream = self.client.logs(container_id, Some(options));
            let mut buf = Vec::new();
            while let Some(chunk) = stream.next().await {
                match chunk.map_err(EngineError::from)? {
                    LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                        buf.extend_from_slice(&message)
                    }
                    _ => {}
                }
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
            use bollard::container::LogOutput;
            use bollard::query_parameters::LogsOptions;

            let options = LogsOptions {
                follow: true,
                stdout: true,
                stderr: true,
                timestamps: true,
                tail: "all".to_string(),
                ..Default::default()
            };

            let mut raw = self.client.logs(container_id, Some(options));

            // Terminates on stream end or the first connection failure; a
            // yielded `Err` is the last item the consumer sees.
            let mapped = async_stream::stream! {
                while let Some(item) = raw.next().await {
                    match item {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                            yield Ok(message.to_vec());
                        }
                        Ok(_) => {}
                        Err(e) => {
                            yield Err(EngineError::from(e));
                            break;
                        }
                    }
                }
            };

            Ok(Box::pin(mapped) as Pin<Box<dyn tokio_stream::Stream<Item = _> + Send>>)
        })
    }

    fn stop<'a>(
        &'a self,
        container_id: &'a str,
        timeout_secs: Option<u32>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::query_parameters::StopContainerOptions;

            let options = timeout_secs.map(|t| StopContainerOptions {
                t: Some(t as i32),
                ..Default::default()
            });

            self.client
                .stop_container(container_id, options)
                .await
                .map_err(EngineError::from)
        })
    }

    fn rename<'a>(
        &'a self,
        container_id: &'a str,
        new_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::query_parameters::RenameContainerOptions;

            let options = RenameContainerOptions {
                name: new_name.to_string(),
            };
            self.client
                .rename_container(container_id, options)
                .await
                .map_err(EngineError::from)
        })
    }

    fn remove<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::query_parameters::RemoveContainerOptions;

            let options = Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            });
            self.client
                .remove_container(container_id, options)
                .await
                .map_err(EngineError::from)
        })
    }

    fn ping<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move { self.client.ping().await.map(|_| ()).map_err(EngineError::from) })
    }
}
