//! Request/response facade over the sandbox engine.
//!
//! One method per operation exposed to UI shells. Every call is counted in
//! `sandbox_operations_total` and, when an emitter is set, audited as an
//! [`EventEnvelope`].

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::broadcast;

use devbox_core::config::SandboxSettings;
use devbox_core::events::{
    EventEnvelope, EventSeverity, EventType, ExecPayload, FsPayload, LifecyclePayload,
    RebuildPayload, SyncPayload,
};
use devbox_core::traits::EventEmitter;
use devbox_core::{Error, PullProgress, Result, Sandbox, SandboxId};
use devbox_telemetry::track_sandbox_op;

use crate::engine::ContainerEngine;
use crate::exec::{shell_quote, ExecChannel};
use crate::mirror::WorkspaceMirror;
use crate::rebuild::{RebuildCommands, RebuildPipeline};
use crate::registry::SandboxRegistry;
use crate::sync::SyncProtocol;

const ACTOR: &str = "sandbox-service";

/// Entry point for every sandbox operation.
pub struct SandboxService {
    registry: SandboxRegistry,
    mirror: WorkspaceMirror,
    sync: Arc<SyncProtocol>,
    exec: Arc<ExecChannel>,
    rebuild: Arc<RebuildPipeline>,
    event_emitter: Option<Arc<dyn EventEmitter>>,
}

impl SandboxService {
    /// Wire every component to one engine handle.
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: SandboxSettings) -> Self {
        let mirror = WorkspaceMirror::new(settings.workdirs_base.clone());
        let sync = Arc::new(SyncProtocol::new(engine.clone(), mirror.clone(), &settings));
        let exec = Arc::new(ExecChannel::new(engine.clone(), &settings));
        let rebuild = Arc::new(RebuildPipeline::new(
            sync.clone(),
            exec.clone(),
            RebuildCommands::from_settings(&settings),
        ));
        let registry =
            SandboxRegistry::new(engine, settings, mirror.clone(), rebuild.clone());

        Self {
            registry,
            mirror,
            sync,
            exec,
            rebuild,
            event_emitter: None,
        }
    }

    /// Set an event emitter for auditing sandbox operations.
    pub fn with_event_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.event_emitter = Some(emitter);
        self
    }

    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    async fn emit<P: Serialize>(
        &self,
        event_type: EventType,
        sandbox: Option<&SandboxId>,
        ok: bool,
        payload: P,
    ) {
        let Some(ref emitter) = self.event_emitter else {
            return;
        };
        let mut event = EventEnvelope::new(
            event_type,
            serde_json::to_value(payload).unwrap_or_default(),
        )
        .with_actor(ACTOR);
        if let Some(id) = sandbox {
            event = event.with_sandbox(id.as_str());
        }
        if !ok {
            event = event.with_severity(EventSeverity::Error);
        }
        emitter.emit(event).await;
    }

    fn lifecycle(name: Option<String>, port: Option<u16>) -> LifecyclePayload {
        LifecyclePayload {
            name,
            port,
            image: None,
        }
    }

    /// `createProject(name) → {id, port}`
    pub async fn create_project(&self, name: &str) -> Result<Sandbox> {
        let result = self.registry.create(name).await;
        record("create_project", &result);

        match &result {
            Ok(sandbox) => {
                self.emit(
                    EventType::SandboxCreated,
                    Some(&sandbox.id),
                    true,
                    Self::lifecycle(Some(sandbox.name.clone()), Some(sandbox.port)),
                )
                .await
            }
            Err(e) => {
                self.emit(
                    EventType::SystemError,
                    None,
                    false,
                    serde_json::json!({ "operation": "create_project", "project": name, "error": e.to_string() }),
                )
                .await
            }
        }
        result
    }

    pub async fn start_sandbox(&self, id: &SandboxId) -> Result<()> {
        let result = self.registry.start(id).await;
        record("start_sandbox", &result);
        self.emit(EventType::SandboxStarted, Some(id), result.is_ok(), Self::lifecycle(None, None))
            .await;
        result
    }

    pub async fn stop_sandbox(&self, id: &SandboxId) -> Result<()> {
        let result = self.registry.stop(id).await;
        record("stop_sandbox", &result);
        self.emit(EventType::SandboxStopped, Some(id), result.is_ok(), Self::lifecycle(None, None))
            .await;
        result
    }

    pub async fn remove_sandbox(&self, id: &SandboxId) -> Result<()> {
        let result = self.registry.remove(id).await;
        record("remove_sandbox", &result);
        self.emit(EventType::SandboxRemoved, Some(id), result.is_ok(), Self::lifecycle(None, None))
            .await;
        result
    }

    pub async fn list_sandboxes(&self) -> Result<Vec<Sandbox>> {
        let result = self.registry.list().await;
        record("list_sandboxes", &result);
        result
    }

    /// Write to the mirror, then push the mirror into the sandbox.
    ///
    /// Fails with `MirrorMissing` for a sandbox whose mirror is gone (removed
    /// or never created); the mirror is not recreated.
    pub async fn write_file(&self, id: &SandboxId, path: &str, content: &[u8]) -> Result<()> {
        let result: Result<u64> = async {
            self.mirror.write(id, path, content).await?;
            self.sync.push(id).await
        }
        .await;
        record("write_file", &result);

        self.emit(
            EventType::FsWrite,
            Some(id),
            result.is_ok(),
            FsPayload {
                path: path.to_string(),
                operation: "write".to_string(),
                size_bytes: Some(content.len() as u64),
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            },
        )
        .await;
        if let Ok(bytes) = &result {
            self.emit(
                EventType::SyncCompleted,
                Some(id),
                true,
                SyncPayload {
                    archive_bytes: *bytes,
                },
            )
            .await;
        }
        result.map(|_| ())
    }

    /// Remove from the mirror and from the sandbox, then push.
    pub async fn delete_file(&self, id: &SandboxId, path: &str) -> Result<()> {
        let result: Result<u64> = async {
            if !self.mirror.exists(id).await {
                return Err(Error::mirror_missing(id.as_str()));
            }
            self.mirror.remove_file(id, path).await?;
            let rel = devbox_core::fs_policy::validate_workspace_path(&self.mirror.root(id)?, path)?;
            let target = devbox_core::fs_policy::to_slash_path(&rel);
            self.exec
                .run_short(id, &format!("rm -rf -- {}", shell_quote(&target)))
                .await?;
            self.sync.push(id).await
        }
        .await;
        record("delete_file", &result);

        self.emit(
            EventType::FsDelete,
            Some(id),
            result.is_ok(),
            FsPayload {
                path: path.to_string(),
                operation: "delete".to_string(),
                size_bytes: None,
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            },
        )
        .await;
        result.map(|_| ())
    }

    /// `runCommand(id, command) → {output}`, long timeout profile.
    pub async fn run_command(&self, id: &SandboxId, command: &str) -> Result<String> {
        let started = Instant::now();
        let result = self.exec.run_long(id, command).await;
        record("run_command", &result);

        self.emit(
            EventType::ExecFinished,
            Some(id),
            result.is_ok(),
            ExecPayload {
                command: command.to_string(),
                output_bytes: result.as_ref().ok().map(|o| o.len() as u64),
                duration_ms: Some(started.elapsed().as_millis() as u64),
                error: result.as_ref().err().map(|e| e.to_string()),
            },
        )
        .await;
        result
    }

    pub async fn list_files(&self, id: &SandboxId) -> Result<Vec<String>> {
        let result = self.mirror.read_all(id).await;
        record("list_files", &result);
        result
    }

    /// File content from the mirror, as lossy UTF-8.
    pub async fn read_file(&self, id: &SandboxId, path: &str) -> Result<String> {
        let result = self
            .mirror
            .read(id, path)
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        record("read_file", &result);
        result
    }

    pub async fn get_logs(&self, id: &SandboxId, tail: usize) -> Result<String> {
        let result = self.registry.logs(id, tail).await;
        record("get_logs", &result);
        result
    }

    pub async fn get_port(&self, id: &SandboxId) -> u16 {
        let port = self.registry.port(id).await;
        track_sandbox_op("get_port", "ok");
        port
    }

    /// Rebuild on `port`, or on the sandbox's bound port when `None`.
    pub async fn rebuild(&self, id: &SandboxId, port: Option<u16>) -> Result<()> {
        let port = match port {
            Some(port) => port,
            None => self.registry.port(id).await,
        };
        let result = self.rebuild.rebuild(id, port).await;
        record("rebuild", &result);

        self.emit(
            EventType::RebuildFinished,
            Some(id),
            result.is_ok(),
            RebuildPayload {
                port,
                error: result.as_ref().err().map(|e| e.to_string()),
            },
        )
        .await;
        result
    }

    /// Block until the background workspace bootstrap of `id` has finished.
    pub async fn wait_ready(&self, id: &SandboxId) -> Result<()> {
        self.registry.wait_ready(id).await
    }

    pub fn subscribe_pull_progress(&self) -> broadcast::Receiver<PullProgress> {
        self.registry.subscribe_pull_progress()
    }
}

fn record<T>(op: &str, result: &Result<T>) {
    match result {
        Ok(_) => track_sandbox_op(op, "ok"),
        Err(e) => track_sandbox_op(op, e.code()),
    }
}
