//! Rebuild pipeline: stop dev server, sync, install, relaunch.

use std::sync::Arc;

use dashmap::DashMap;

use devbox_core::config::SandboxSettings;
use devbox_core::{Error, RebuildStep, Result, SandboxId};

use crate::exec::ExecChannel;
use crate::sync::SyncProtocol;

/// Commands issued by the pipeline. `{port}` in `dev_server` is substituted.
#[derive(Debug, Clone)]
pub struct RebuildCommands {
    pub kill_dev_server: String,
    pub install: String,
    pub dev_server: String,
}

impl RebuildCommands {
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            kill_dev_server: settings.kill_dev_server_command.clone(),
            install: settings.install_command.clone(),
            dev_server: settings.dev_server_command.clone(),
        }
    }

    pub fn dev_server_for(&self, port: u16) -> String {
        self.dev_server.replace("{port}", &port.to_string())
    }
}

/// Sequences sync and exec for one sandbox. Not reentrant per sandbox.
pub struct RebuildPipeline {
    sync: Arc<SyncProtocol>,
    exec: Arc<ExecChannel>,
    commands: RebuildCommands,
    in_flight: DashMap<SandboxId, ()>,
}

struct InFlight<'a> {
    map: &'a DashMap<SandboxId, ()>,
    id: SandboxId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl RebuildPipeline {
    pub fn new(sync: Arc<SyncProtocol>, exec: Arc<ExecChannel>, commands: RebuildCommands) -> Self {
        Self {
            sync,
            exec,
            commands,
            in_flight: DashMap::new(),
        }
    }

    pub fn is_running(&self, id: &SandboxId) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Run every step in order. The first failing step aborts the rebuild.
    pub async fn rebuild(&self, id: &SandboxId, port: u16) -> Result<()> {
        if self.in_flight.insert(id.clone(), ()).is_some() {
            return Err(Error::RebuildInProgress(id.to_string()));
        }
        let _guard = InFlight {
            map: &self.in_flight,
            id: id.clone(),
        };

        tracing::info!(sandbox_id = %id, port, "Rebuild started");

        if let Err(e) = self.exec.run_short(id, &self.commands.kill_dev_server).await {
            tracing::warn!(
                sandbox_id = %id,
                step = %RebuildStep::StopDevServer,
                error = %e,
                "Ignoring dev server stop failure"
            );
        }

        self.sync
            .push(id)
            .await
            .map_err(|e| failed(id, RebuildStep::Sync, e))?;

        let install_output = self
            .exec
            .run_long(id, &self.commands.install)
            .await
            .map_err(|e| failed(id, RebuildStep::Install, e))?;
        tracing::debug!(sandbox_id = %id, output = %install_output.trim_end(), "Install finished");

        self.exec
            .spawn_detached(id, &self.commands.dev_server_for(port))
            .await
            .map_err(|e| failed(id, RebuildStep::LaunchDevServer, e))?;

        tracing::info!(sandbox_id = %id, port, "Rebuild finished");
        Ok(())
    }
}

fn failed(id: &SandboxId, step: RebuildStep, source: Error) -> Error {
    tracing::error!(sandbox_id = %id, step = %step, error = %source, "Rebuild step failed");
    Error::RebuildFailed {
        sandbox: id.to_string(),
        step,
        source: Box::new(source),
    }
}
