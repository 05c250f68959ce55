//! Container engine seam.
//!
//! This module provides the `ContainerEngine` trait and a Docker-based
//! implementation using the `bollard` crate. Everything above this layer
//! (registry, sync, exec, rebuild) talks to an `Arc<dyn ContainerEngine>`,
//! so tests swap in [`crate::mock::MockEngine`] without a daemon.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;

use devbox_core::{Error, PullProgress, Result, SandboxState};

/// Combined stdout/stderr of an exec, chunk by chunk.
pub type OutputStream = BoxStream<'static, Result<Bytes>>;

/// Label stamped on every container this system creates.
pub const MANAGED_BY_LABEL: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "devbox";

// =============================================================================
// Engine Types
// =============================================================================

/// Everything needed to create one sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Fixed working root inside the container.
    pub working_dir: String,
    /// Published as `port/tcp`, host port equal to container port.
    pub port: u16,
    /// Host interface the port is published on.
    pub bind_host: String,
    pub labels: HashMap<String, String>,
}

/// Engine-side view of one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    /// Name without the engine's leading `/`.
    pub name: String,
    pub state: SandboxState,
    /// Container port -> host port, from the live network settings.
    pub runtime_ports: BTreeMap<u16, u16>,
    /// Container port -> host port, from the configured bindings.
    pub bound_ports: BTreeMap<u16, u16>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ContainerInfo {
    /// First published host port, preferring the runtime map.
    pub fn host_port(&self) -> Option<u16> {
        self.runtime_ports
            .values()
            .next()
            .or_else(|| self.bound_ports.values().next())
            .copied()
    }
}

// =============================================================================
// Container Engine Trait
// =============================================================================

/// Operations the sandbox layer consumes from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check the engine is reachable.
    async fn ping(&self) -> Result<()>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image, reporting progress on `progress`. Resolves once.
    async fn pull_image(
        &self,
        image: &str,
        progress: mpsc::UnboundedSender<PullProgress>,
    ) -> Result<()>;

    /// Create (but do not start) a container. Returns the engine id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    async fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Fails with `NotFound` for unknown ids.
    async fn inspect(&self, id: &str) -> Result<ContainerInfo>;

    /// All containers, in any state, whose name starts with `name_prefix`.
    async fn list(&self, name_prefix: &str) -> Result<Vec<ContainerInfo>>;

    /// Run `bash -c command` in `working_dir` and stream its output.
    async fn start_exec(&self, id: &str, command: &str, working_dir: &str)
        -> Result<OutputStream>;

    /// Launch `bash -c command` without attaching. Returns once launched.
    async fn spawn_detached(&self, id: &str, command: &str, working_dir: &str) -> Result<()>;

    /// Unpack a tar archive at `path` inside the container.
    async fn upload_archive(&self, id: &str, path: &str, archive: Bytes) -> Result<()>;

    /// Last `tail` lines of combined stdout/stderr.
    async fn logs(&self, id: &str, tail: usize) -> Result<String>;
}

// =============================================================================
// Docker Engine Implementation
// =============================================================================

/// Docker-backed engine using the `bollard` crate.
pub struct DockerEngine {
    docker: bollard::Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon (socket or `DOCKER_HOST`).
    pub fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::engine_unavailable(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self { docker })
    }

    /// Create from an existing bollard Docker client.
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self { docker }
    }
}

fn map_docker_error(context: &str, err: bollard::errors::Error) -> Error {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => Error::not_found(format!("{}: {}", context, message)),
        other => Error::engine(format!("{}: {}", context, other)),
    }
}

/// Split `repo[:tag]` into repository and tag. Digests are kept whole.
pub fn split_image_ref(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }
    match image.rsplit_once(':') {
        // A colon followed by a slash belongs to a registry host:port.
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

fn port_map_to_pairs(
    ports: Option<&HashMap<String, Option<Vec<bollard::models::PortBinding>>>>,
) -> BTreeMap<u16, u16> {
    let mut pairs = BTreeMap::new();
    let Some(ports) = ports else {
        return pairs;
    };
    for (key, bindings) in ports {
        let Some(container_port) = key
            .split('/')
            .next()
            .and_then(|p| p.parse::<u16>().ok())
        else {
            continue;
        };
        let host_port = bindings
            .as_ref()
            .and_then(|b| b.first())
            .and_then(|b| b.host_port.as_ref())
            .and_then(|p| p.parse::<u16>().ok());
        if let Some(host_port) = host_port {
            pairs.insert(container_port, host_port);
        }
    }
    pairs
}

fn container_info(response: bollard::models::ContainerInspectResponse) -> ContainerInfo {
    let status = response
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .map(|s| format!("{:?}", s).to_lowercase())
        .unwrap_or_default();

    ContainerInfo {
        id: response.id.unwrap_or_default(),
        name: response
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        state: SandboxState::from_engine_status(&status),
        runtime_ports: port_map_to_pairs(
            response
                .network_settings
                .as_ref()
                .and_then(|n| n.ports.as_ref()),
        ),
        bound_ports: port_map_to_pairs(
            response
                .host_config
                .as_ref()
                .and_then(|h| h.port_bindings.as_ref()),
        ),
        created_at: response
            .created
            .as_deref()
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map(|c| c.with_timezone(&Utc)),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| Error::engine_unavailable(format!("Docker daemon not reachable: {}", e)))?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(map_docker_error("Failed to inspect image", e)),
        }
    }

    async fn pull_image(
        &self,
        image: &str,
        progress: mpsc::UnboundedSender<PullProgress>,
    ) -> Result<()> {
        use bollard::image::CreateImageOptions;

        let (repo, tag) = split_image_ref(image);
        let options = CreateImageOptions {
            from_image: repo,
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(status) = info.status {
                        let _ = progress.send(PullProgress {
                            image: image.to_string(),
                            status,
                            progress: info.progress,
                        });
                    }
                }
                Err(e) => {
                    return Err(Error::image_unavailable(format!(
                        "Failed to pull image {}: {}",
                        image, e
                    )));
                }
            }
        }

        tracing::info!(image = %image, "Image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::{HostConfig, PortBinding};

        let port_key = format!("{}/tcp", spec.port);
        let port_bindings = HashMap::from([(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some(spec.bind_host.clone()),
                host_port: Some(spec.port.to_string()),
            }]),
        )]);

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            working_dir: Some(spec.working_dir.clone()),
            tty: Some(true),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
            host_config: Some(host_config),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| map_docker_error("Failed to create sandbox container", e))?;

        tracing::info!(
            sandbox_id = %response.id,
            name = %spec.name,
            image = %spec.image,
            port = spec.port,
            "Sandbox container created"
        );
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(|e| map_docker_error("Failed to start sandbox container", e))
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        use bollard::container::StopContainerOptions;

        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_docker_error("Failed to stop sandbox container", e)),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        use bollard::container::RemoveContainerOptions;

        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_docker_error("Failed to remove sandbox container", e))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let response = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| map_docker_error(&format!("Failed to inspect sandbox {}", id), e))?;
        Ok(container_info(response))
    }

    async fn list(&self, name_prefix: &str) -> Result<Vec<ContainerInfo>> {
        use bollard::container::ListContainersOptions;

        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name_prefix.to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_docker_error("Failed to list containers", e))?;

        // The engine's name filter is a substring match; keep true prefixes only.
        let wanted = format!("/{}", name_prefix);
        let mut containers = Vec::new();
        for summary in summaries {
            let matches = summary
                .names
                .as_ref()
                .is_some_and(|names| names.iter().any(|n| n.starts_with(&wanted)));
            let Some(id) = summary.id.filter(|_| matches) else {
                continue;
            };
            match self.inspect(&id).await {
                Ok(info) => containers.push(info),
                // Removed between list and inspect.
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(containers)
    }

    async fn start_exec(
        &self,
        id: &str,
        command: &str,
        working_dir: &str,
    ) -> Result<OutputStream> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec_options = CreateExecOptions {
            cmd: Some(vec!["bash".to_string(), "-c".to_string(), command.to_string()]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(working_dir.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| map_docker_error("Failed to create exec in sandbox", e))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_docker_error("Failed to start exec in sandbox", e))?;

        match start_result {
            StartExecResults::Attached { output, .. } => {
                let sandbox = id.to_string();
                Ok(output
                    .map(move |chunk| {
                        chunk.map(|log| log.into_bytes()).map_err(|e| {
                            Error::engine(format!("Exec stream in sandbox {} failed: {}", sandbox, e))
                        })
                    })
                    .boxed())
            }
            StartExecResults::Detached => Ok(futures::stream::empty().boxed()),
        }
    }

    async fn spawn_detached(&self, id: &str, command: &str, working_dir: &str) -> Result<()> {
        use bollard::exec::{CreateExecOptions, StartExecOptions};

        let exec_options = CreateExecOptions {
            cmd: Some(vec!["bash".to_string(), "-c".to_string(), command.to_string()]),
            working_dir: Some(working_dir.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| map_docker_error("Failed to create detached exec", e))?;

        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_docker_error("Failed to launch detached exec", e))?;

        tracing::debug!(sandbox_id = %id, command = %command, "Detached process launched");
        Ok(())
    }

    async fn upload_archive(&self, id: &str, path: &str, archive: Bytes) -> Result<()> {
        use bollard::container::UploadToContainerOptions;

        let options = UploadToContainerOptions {
            path: path.to_string(),
            no_overwrite_dir_non_dir: "false".to_string(),
        };

        self.docker
            .upload_to_container(id, Some(options), archive)
            .await
            .map_err(|e| {
                Error::transfer_failed(format!("Archive upload to sandbox {} failed: {}", id, e))
            })
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        use bollard::container::LogsOptions;

        let mut stream = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            }),
        );

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_docker_error("Failed to fetch sandbox logs", e))?;
            text.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(text)
    }
}

// =============================================================================
// Tests
// =============================================================================
