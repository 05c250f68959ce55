//! Sandbox registry and lifecycle controller.
//!
//! Creation resolves the base image, allocates a port, creates and starts the
//! container and its workspace mirror, then seeds and rebuilds the workspace
//! in a background task. Start and stop are idempotent. Removal tears down
//! the container, its workspace mirror and its port reservation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use devbox_core::config::SandboxSettings;
use devbox_core::template::{hydrate_project_template, template_vars, ProjectTemplate};
use devbox_core::{Error, PullProgress, Result, Sandbox, SandboxId, SandboxState};

use crate::engine::{ContainerEngine, ContainerInfo, ContainerSpec, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::image::ImageResolver;
use crate::mirror::WorkspaceMirror;
use crate::ports::PortAllocator;
use crate::rebuild::RebuildPipeline;

/// Lowercase a project name and replace anything outside `[a-z0-9_.-]`.
pub fn sanitize_project_name(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
            _ => '-',
        })
        .collect();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

/// Owns sandbox lifecycle against one container engine.
pub struct SandboxRegistry {
    engine: Arc<dyn ContainerEngine>,
    settings: SandboxSettings,
    images: ImageResolver,
    ports: PortAllocator,
    mirror: WorkspaceMirror,
    rebuild: Arc<RebuildPipeline>,
    name_lock: Mutex<()>,
    bootstraps: DashMap<SandboxId, JoinHandle<()>>,
}

impl SandboxRegistry {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        settings: SandboxSettings,
        mirror: WorkspaceMirror,
        rebuild: Arc<RebuildPipeline>,
    ) -> Self {
        Self {
            images: ImageResolver::new(engine.clone()),
            engine,
            settings,
            ports: PortAllocator::new(),
            mirror,
            rebuild,
            name_lock: Mutex::new(()),
            bootstraps: DashMap::new(),
        }
    }

    pub fn subscribe_pull_progress(&self) -> broadcast::Receiver<PullProgress> {
        self.images.subscribe()
    }

    fn to_sandbox(&self, info: &ContainerInfo) -> Sandbox {
        Sandbox {
            id: SandboxId::new(info.id.clone()),
            name: info.name.clone(),
            state: info.state,
            port: info.host_port().unwrap_or(self.settings.default_port),
            working_root: self.settings.working_root.clone(),
            created_at: info.created_at,
        }
    }

    /// Create and start a sandbox for `project_name`.
    ///
    /// Returns once the sandbox is running. Workspace seeding, the first sync
    /// and the first rebuild continue in the background; see [`Self::wait_ready`].
    pub async fn create(&self, project_name: &str) -> Result<Sandbox> {
        self.engine.ping().await?;

        let image = self
            .images
            .ensure(&self.settings.image, &self.settings.fallback_image)
            .await?;

        let slug = sanitize_project_name(project_name);
        let (id, name, port) = {
            let _names = self.name_lock.lock().await;
            let name = format!(
                "{}{}-{}",
                self.settings.name_prefix,
                slug,
                Utc::now().timestamp_millis()
            );
            self.remove_stale(&name).await;

            let port = self.ports.allocate()?;
            let spec = ContainerSpec {
                name: name.clone(),
                image: image.clone(),
                working_dir: self.settings.working_root.clone(),
                port,
                bind_host: self.settings.bind_host.clone(),
                labels: HashMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    MANAGED_BY_VALUE.to_string(),
                )]),
            };
            match self.engine.create_container(&spec).await {
                Ok(id) => (SandboxId::new(id), name, port),
                Err(e) => {
                    self.ports.release(port);
                    return Err(e);
                }
            }
        };

        let started = async {
            self.engine.start(id.as_str()).await?;
            let info = self.engine.inspect(id.as_str()).await?;
            self.mirror.ensure(&id).await?;
            Ok::<_, Error>(info)
        }
        .await;

        let info = match started {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(sandbox_id = %id, name = %name, error = %e, "Sandbox start failed, cleaning up");
                self.cleanup_failed(&id, port).await;
                return Err(e);
            }
        };

        let sandbox = Sandbox {
            port,
            state: SandboxState::Running,
            ..self.to_sandbox(&info)
        };
        tracing::info!(
            sandbox_id = %id,
            name = %name,
            image = %image,
            port,
            "Sandbox running"
        );

        self.spawn_bootstrap(id, slug, port);
        Ok(sandbox)
    }

    fn spawn_bootstrap(&self, id: SandboxId, project: String, port: u16) {
        let mirror = self.mirror.clone();
        let rebuild = self.rebuild.clone();
        let template_path = self.settings.template_path.clone();
        let task_id = id.clone();

        let handle = tokio::spawn(async move {
            let result: Result<()> = async {
                let template = match template_path {
                    Some(path) => {
                        let yaml = tokio::fs::read_to_string(&path).await?;
                        hydrate_project_template(&yaml, &template_vars(&project, port))?
                    }
                    None => ProjectTemplate::builtin(&project, port)?,
                };
                mirror.seed(&task_id, &template).await?;
                rebuild.rebuild(&task_id, port).await
            }
            .await;

            match result {
                Ok(()) => tracing::info!(sandbox_id = %task_id, port, "Sandbox workspace ready"),
                Err(e) => {
                    tracing::error!(sandbox_id = %task_id, error = %e, "Sandbox bootstrap failed")
                }
            }
        });

        self.bootstraps.insert(id, handle);
    }

    /// Wait for the background bootstrap of `id`, if one is pending.
    pub async fn wait_ready(&self, id: &SandboxId) -> Result<()> {
        if let Some((_, handle)) = self.bootstraps.remove(id) {
            handle
                .await
                .map_err(|e| Error::internal(format!("bootstrap task for {} failed: {}", id, e)))?;
        }
        Ok(())
    }

    async fn remove_stale(&self, name: &str) {
        let stale = match self.engine.list(name).await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "Stale sandbox lookup failed");
                return;
            }
        };

        for info in stale.into_iter().filter(|c| c.name == name) {
            tracing::warn!(sandbox_id = %info.id, name = %name, "Removing stale sandbox with colliding name");
            if let Err(e) = self.engine.stop(&info.id, self.settings.stop_grace()).await {
                tracing::warn!(sandbox_id = %info.id, error = %e, "Stale sandbox stop failed");
            }
            if let Err(e) = self.engine.remove(&info.id, true).await {
                tracing::warn!(sandbox_id = %info.id, error = %e, "Stale sandbox removal failed");
            }
        }
    }

    async fn cleanup_failed(&self, id: &SandboxId, port: u16) {
        if let Err(e) = self.engine.remove(id.as_str(), true).await {
            tracing::error!(sandbox_id = %id, error = %e, "Cleanup: container removal failed");
        }
        if let Err(e) = self.mirror.delete(id).await {
            tracing::error!(sandbox_id = %id, error = %e, "Cleanup: mirror deletion failed");
        }
        self.ports.release(port);
    }

    /// Start a sandbox. Already running is a no-op.
    pub async fn start(&self, id: &SandboxId) -> Result<()> {
        let info = self.engine.inspect(id.as_str()).await?;
        match info.state {
            SandboxState::Running => {
                tracing::debug!(sandbox_id = %id, "Sandbox already running");
                return Ok(());
            }
            SandboxState::Removing | SandboxState::Removed => {
                return Err(Error::engine(format!(
                    "cannot start sandbox {} in state {}",
                    id, info.state
                )));
            }
            SandboxState::Creating | SandboxState::Stopped => {}
        }

        if let Some(port) = info.host_port() {
            self.ports.reserve(port);
        }
        self.engine.start(id.as_str()).await?;
        tracing::info!(sandbox_id = %id, "Sandbox started");
        Ok(())
    }

    /// Stop a sandbox with the configured grace period. Not running is a no-op.
    pub async fn stop(&self, id: &SandboxId) -> Result<()> {
        let info = self.engine.inspect(id.as_str()).await?;
        if !info.state.is_running() {
            tracing::debug!(sandbox_id = %id, state = %info.state, "Sandbox not running");
            return Ok(());
        }

        self.engine
            .stop(id.as_str(), self.settings.stop_grace())
            .await?;
        tracing::info!(sandbox_id = %id, "Sandbox stopped");
        Ok(())
    }

    /// Remove a sandbox, its workspace mirror and its port reservation.
    pub async fn remove(&self, id: &SandboxId) -> Result<()> {
        if let Some((_, handle)) = self.bootstraps.remove(id) {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(sandbox_id = %id, error = %e, "Bootstrap task failed");
                }
            }
        }

        let info = match self.engine.inspect(id.as_str()).await {
            Ok(info) => info,
            Err(e @ Error::NotFound(_)) => {
                self.mirror.delete(id).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if info.state.is_running() {
            if let Err(e) = self
                .engine
                .stop(id.as_str(), self.settings.stop_grace())
                .await
            {
                tracing::warn!(sandbox_id = %id, error = %e, "Stop before removal failed");
            }
        }

        if let Err(first) = self.engine.remove(id.as_str(), false).await {
            tracing::warn!(sandbox_id = %id, error = %first, "Removal failed, retrying with force");
            self.engine.remove(id.as_str(), true).await.map_err(|e| {
                Error::engine(format!("failed to remove sandbox {}: {}", id, e))
            })?;
        }

        self.mirror.delete(id).await?;
        if let Some(port) = info.host_port() {
            self.ports.release(port);
        }
        tracing::info!(sandbox_id = %id, name = %info.name, "Sandbox removed");
        Ok(())
    }

    /// Every sandbox carrying the configured name prefix, in any state.
    ///
    /// Port reservations are reconciled against what the engine reports, so
    /// ports of sandboxes removed elsewhere return to the pool. Held under the
    /// name lock so a creation between allocation and container creation is
    /// never reconciled away.
    pub async fn list(&self) -> Result<Vec<Sandbox>> {
        let _names = self.name_lock.lock().await;
        let containers = self.engine.list(&self.settings.name_prefix).await?;

        let live: HashSet<u16> = containers.iter().filter_map(|c| c.host_port()).collect();
        self.ports.reconcile(&live);

        Ok(containers.iter().map(|info| self.to_sandbox(info)).collect())
    }

    pub async fn logs(&self, id: &SandboxId, tail: usize) -> Result<String> {
        self.engine.logs(id.as_str(), tail).await
    }

    /// Bound host port, or the configured default when none can be resolved.
    pub async fn port(&self, id: &SandboxId) -> u16 {
        match self.engine.inspect(id.as_str()).await {
            Ok(info) => info.host_port().unwrap_or_else(|| {
                tracing::warn!(sandbox_id = %id, "No port binding found, using default");
                self.settings.default_port
            }),
            Err(e) => {
                tracing::warn!(sandbox_id = %id, error = %e, "Port lookup failed, using default");
                self.settings.default_port
            }
        }
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_project_name() {
        assert_eq!(sanitize_project_name("Calc"), "calc");
        assert_eq!(sanitize_project_name("My App!"), "my-app-");
        assert_eq!(sanitize_project_name("todo_v2.1"), "todo_v2.1");
        assert_eq!(sanitize_project_name("   "), "project");
        assert_eq!(sanitize_project_name("ünï"), "-n-");
    }
}
