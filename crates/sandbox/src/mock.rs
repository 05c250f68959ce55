//! In-memory container engine for testing without Docker.
//!
//! `MockEngine` keeps images, containers and each container's filesystem in
//! memory. Uploaded archives are unpacked with the archive codec, and a small
//! set of shell commands is emulated:
//!
//! - `cat <path>` prints a file from the last uploaded archives
//! - `echo <text>` prints its argument
//! - `sleep <secs>` produces no output until the delay elapses
//! - `rm -rf [--] <path>` removes a file or directory
//!
//! Any other command succeeds with empty output. Every command is recorded so
//! tests can assert on ordering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;

use devbox_core::{Error, PullProgress, Result, SandboxState};

use crate::archive::{read_entries, ArchiveEntry};
use crate::engine::{ContainerEngine, ContainerInfo, ContainerSpec, OutputStream};

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    name: String,
    image: String,
    working_dir: String,
    port: u16,
    state: SandboxState,
    files: BTreeMap<String, Vec<u8>>,
    uploads: usize,
    logs: Vec<String>,
    created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MockState {
    available: bool,
    images: HashSet<String>,
    pull_failures: HashSet<String>,
    pulls: Vec<String>,
    containers: HashMap<String, MockContainer>,
    commands: Vec<(String, String)>,
    detached: Vec<(String, String)>,
    failing_commands: Vec<String>,
    fail_next_start: bool,
    fail_next_remove: bool,
    fail_next_upload: bool,
}

/// In-memory [`ContainerEngine`] test double.
#[derive(Debug)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// A reachable engine with no local images.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                available: true,
                ..Default::default()
            }),
        }
    }

    /// Mark an image as already present locally.
    pub fn with_image(self, image: &str) -> Self {
        self.lock().images.insert(image.to_string());
        self
    }

    /// Make every pull of `image` fail.
    pub fn with_pull_failure(self, image: &str) -> Self {
        self.lock().pull_failures.insert(image.to_string());
        self
    }

    /// Make the engine unreachable.
    pub fn unavailable(self) -> Self {
        self.lock().available = false;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Fail the next `start` call with an engine error.
    pub fn fail_next_start(&self) {
        self.lock().fail_next_start = true;
    }

    /// Fail the next `remove` call, whatever its `force` flag.
    pub fn fail_next_remove(&self) {
        self.lock().fail_next_remove = true;
    }

    /// Fail the next archive upload with `TransferFailed`.
    pub fn fail_next_upload(&self) {
        self.lock().fail_next_upload = true;
    }

    /// Fail every attached exec whose command contains `pattern`.
    pub fn fail_commands_matching(&self, pattern: &str) {
        self.lock().failing_commands.push(pattern.to_string());
    }

    /// Images pulled so far, in order, including failed attempts.
    pub fn pulls(&self) -> Vec<String> {
        self.lock().pulls.clone()
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.lock().images.contains(image)
    }

    /// Attached commands run in container `id`, in order.
    pub fn commands(&self, id: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(c, _)| c == id)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    /// Detached launches in container `id`, in order.
    pub fn detached(&self, id: &str) -> Vec<String> {
        self.lock()
            .detached
            .iter()
            .filter(|(c, _)| c == id)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    /// A file as last uploaded into container `id`, relative to its working dir.
    pub fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .containers
            .get(id)
            .and_then(|c| c.files.get(path).cloned())
    }

    /// Archive uploads accepted by container `id`.
    pub fn uploads(&self, id: &str) -> usize {
        self.lock().containers.get(id).map_or(0, |c| c.uploads)
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// The image a container was created from.
    pub fn image_of(&self, id: &str) -> Option<String> {
        self.lock().containers.get(id).map(|c| c.image.clone())
    }

    /// Append a line to a container's log.
    pub fn push_log(&self, id: &str, line: &str) {
        if let Some(container) = self.lock().containers.get_mut(id) {
            container.logs.push(line.to_string());
        }
    }

    fn ensure_available(state: &MockState) -> Result<()> {
        if state.available {
            Ok(())
        } else {
            Err(Error::engine_unavailable("mock engine unavailable"))
        }
    }

    fn missing(id: &str) -> Error {
        Error::not_found(format!("No such container: {}", id))
    }
}

fn unquote(arg: &str) -> String {
    let arg = arg.trim();
    if arg.len() >= 2 && arg.starts_with('\'') && arg.ends_with('\'') {
        arg[1..arg.len() - 1].replace("'\\''", "'")
    } else {
        arg.to_string()
    }
}

fn relative_to(working_dir: &str, path: &str) -> String {
    let path = unquote(path);
    let trimmed = path
        .strip_prefix(working_dir)
        .map(|p| p.trim_start_matches('/'))
        .unwrap_or(&path);
    trimmed.trim_start_matches("./").to_string()
}

fn emulate(container: &mut MockContainer, command: &str) -> OutputStream {
    let command = command.trim();

    if let Some(secs) = command.strip_prefix("sleep ") {
        let secs = secs.trim().parse::<u64>().unwrap_or(0);
        return futures::stream::once(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(Bytes::new())
        })
        .boxed();
    }

    let output = if let Some(path) = command.strip_prefix("cat ") {
        let rel = relative_to(&container.working_dir, path);
        match container.files.get(&rel) {
            Some(content) => content.clone(),
            None => format!("cat: {}: No such file or directory\n", rel).into_bytes(),
        }
    } else if let Some(text) = command.strip_prefix("echo ") {
        format!("{}\n", unquote(text)).into_bytes()
    } else if let Some(args) = command.strip_prefix("rm -rf ") {
        let target = args.trim().trim_start_matches("-- ");
        let rel = relative_to(&container.working_dir, target);
        let nested = format!("{}/", rel);
        container
            .files
            .retain(|path, _| path != &rel && !path.starts_with(&nested));
        Vec::new()
    } else {
        Vec::new()
    };

    futures::stream::iter(vec![Ok(Bytes::from(output))]).boxed()
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> Result<()> {
        Self::ensure_available(&self.lock())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let state = self.lock();
        Self::ensure_available(&state)?;
        Ok(state.images.contains(image))
    }

    async fn pull_image(
        &self,
        image: &str,
        progress: mpsc::UnboundedSender<PullProgress>,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::ensure_available(&state)?;
        state.pulls.push(image.to_string());

        let _ = progress.send(PullProgress {
            image: image.to_string(),
            status: format!("Pulling from {}", image),
            progress: None,
        });

        if state.pull_failures.contains(image) {
            return Err(Error::image_unavailable(format!(
                "manifest for {} not found",
                image
            )));
        }

        let _ = progress.send(PullProgress {
            image: image.to_string(),
            status: "Download complete".to_string(),
            progress: Some("[==================================================>]".to_string()),
        });
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.lock();
        Self::ensure_available(&state)?;

        if !state.images.contains(&spec.image) {
            return Err(Error::not_found(format!("No such image: {}", spec.image)));
        }
        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(Error::engine(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        state.containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                working_dir: spec.working_dir.clone(),
                port: spec.port,
                state: SandboxState::Creating,
                files: BTreeMap::new(),
                uploads: 0,
                logs: Vec::new(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_start) {
            return Err(Error::engine(format!("failed to start container {}", id)));
        }

        let port = match state.containers.get(id) {
            Some(c) if c.state == SandboxState::Removing => {
                return Err(Error::engine(format!("container {} is being removed", id)));
            }
            Some(c) => c.port,
            None => return Err(Self::missing(id)),
        };
        let port_taken = state
            .containers
            .values()
            .any(|c| c.id != id && c.state.is_running() && c.port == port);
        if port_taken {
            return Err(Error::engine(format!(
                "Bind for 0.0.0.0:{} failed: port is already allocated",
                port
            )));
        }

        let container = state.containers.get_mut(id).ok_or_else(|| Self::missing(id))?;
        if !container.state.is_running() {
            container.state = SandboxState::Running;
            container.logs.push(format!("container {} started", container.name));
        }
        Ok(())
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
        let mut state = self.lock();
        let container = state.containers.get_mut(id).ok_or_else(|| Self::missing(id))?;
        if container.state.is_running() {
            container.state = SandboxState::Stopped;
            container.logs.push(format!("container {} stopped", container.name));
        }
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_remove) {
            return Err(Error::engine(format!(
                "removal of container {} is already in progress",
                id
            )));
        }

        let running = match state.containers.get(id) {
            Some(c) => c.state.is_running(),
            None => return Err(Self::missing(id)),
        };
        if running && !force {
            return Err(Error::engine(format!(
                "cannot remove running container {}: stop it first",
                id
            )));
        }
        state.containers.remove(id);
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let state = self.lock();
        let c = state.containers.get(id).ok_or_else(|| Self::missing(id))?;
        Ok(info_of(c))
    }

    async fn list(&self, name_prefix: &str) -> Result<Vec<ContainerInfo>> {
        let state = self.lock();
        Self::ensure_available(&state)?;
        let mut containers: Vec<ContainerInfo> = state
            .containers
            .values()
            .filter(|c| c.name.starts_with(name_prefix))
            .map(info_of)
            .collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    async fn start_exec(
        &self,
        id: &str,
        command: &str,
        _working_dir: &str,
    ) -> Result<OutputStream> {
        let mut state = self.lock();
        state.commands.push((id.to_string(), command.to_string()));

        if state.failing_commands.iter().any(|p| command.contains(p)) {
            return Err(Error::engine(format!(
                "exec '{}' in container {} failed",
                command, id
            )));
        }

        let container = state.containers.get_mut(id).ok_or_else(|| Self::missing(id))?;
        if !container.state.is_running() {
            return Err(Error::engine(format!("container {} is not running", id)));
        }
        Ok(emulate(container, command))
    }

    async fn spawn_detached(&self, id: &str, command: &str, _working_dir: &str) -> Result<()> {
        let mut state = self.lock();
        let container = state.containers.get_mut(id).ok_or_else(|| Self::missing(id))?;
        if !container.state.is_running() {
            return Err(Error::engine(format!("container {} is not running", id)));
        }
        container.logs.push(format!("launched: {}", command));
        state.detached.push((id.to_string(), command.to_string()));
        Ok(())
    }

    async fn upload_archive(&self, id: &str, path: &str, archive: Bytes) -> Result<()> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_upload) {
            return Err(Error::transfer_failed(format!(
                "archive upload to {} interrupted",
                id
            )));
        }

        let container = state.containers.get_mut(id).ok_or_else(|| Self::missing(id))?;
        let base = relative_to(&container.working_dir, path);
        let entries = read_entries(&archive)
            .map_err(|e| Error::transfer_failed(format!("invalid archive: {}", e)))?;

        for entry in entries {
            let full = if base.is_empty() {
                entry.path().to_string()
            } else {
                format!("{}/{}", base, entry.path())
            };
            let nested = format!("{}/", full);
            match entry {
                ArchiveEntry::Directory { .. } => {
                    // A directory replaces a file of the same name.
                    container.files.remove(&full);
                }
                ArchiveEntry::File { content, .. } => {
                    // A file replaces a directory of the same name.
                    container.files.retain(|p, _| !p.starts_with(&nested));
                    container.files.insert(full, content);
                }
            }
        }
        container.uploads += 1;
        Ok(())
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let state = self.lock();
        let c = state.containers.get(id).ok_or_else(|| Self::missing(id))?;
        let skip = c.logs.len().saturating_sub(tail);
        Ok(c.logs[skip..].join("\n"))
    }
}

fn info_of(c: &MockContainer) -> ContainerInfo {
    let binding = BTreeMap::from([(c.port, c.port)]);
    ContainerInfo {
        id: c.id.clone(),
        name: c.name.clone(),
        state: c.state,
        runtime_ports: if c.state.is_running() {
            binding.clone()
        } else {
            BTreeMap::new()
        },
        bound_ports: binding,
        created_at: Some(c.created_at),
    }
}
