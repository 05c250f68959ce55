//! Command execution inside a sandbox.
//!
//! Commands run through `bash -c` in the sandbox's working root. Output is
//! accumulated until the stream ends or the timeout elapses. A timed-out
//! request fails with `ExecutionTimeout`; the process inside the sandbox is
//! left running.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use devbox_core::config::SandboxSettings;
use devbox_core::{Error, Result, SandboxId};

use crate::engine::ContainerEngine;

/// Quote `value` as a single shell word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Runs commands in sandboxes with the short and long timeout profiles.
#[derive(Clone)]
pub struct ExecChannel {
    engine: Arc<dyn ContainerEngine>,
    working_root: String,
    short_timeout: Duration,
    long_timeout: Duration,
}

impl ExecChannel {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: &SandboxSettings) -> Self {
        Self {
            engine,
            working_root: settings.working_root.clone(),
            short_timeout: settings.short_timeout(),
            long_timeout: settings.long_timeout(),
        }
    }

    /// Run `command` and return its combined output as lossy UTF-8.
    pub async fn run(&self, id: &SandboxId, command: &str, timeout: Duration) -> Result<String> {
        let started = std::time::Instant::now();

        let collect = async {
            let mut stream = self
                .engine
                .start_exec(id.as_str(), command, &self.working_root)
                .await?;

            let mut output = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| {
                    Error::engine(format!(
                        "command '{}' in sandbox {} failed mid-stream: {}",
                        command, id, e
                    ))
                })?;
                output.extend_from_slice(&chunk);
            }
            Ok::<_, Error>(output)
        };

        match tokio::time::timeout(timeout, collect).await {
            Ok(Ok(output)) => {
                tracing::debug!(
                    sandbox_id = %id,
                    command = %command,
                    bytes = output.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Command finished"
                );
                Ok(String::from_utf8_lossy(&output).into_owned())
            }
            Ok(Err(e)) => {
                tracing::warn!(sandbox_id = %id, command = %command, error = %e, "Command failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(sandbox_id = %id, command = %command, ?timeout, "Command timed out");
                Err(Error::ExecutionTimeout {
                    sandbox: id.to_string(),
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Read-style commands.
    pub async fn run_short(&self, id: &SandboxId, command: &str) -> Result<String> {
        self.run(id, command, self.short_timeout).await
    }

    /// Installs and other long commands.
    pub async fn run_long(&self, id: &SandboxId, command: &str) -> Result<String> {
        self.run(id, command, self.long_timeout).await
    }

    /// Start a background process and return once the engine has launched it.
    pub async fn spawn_detached(&self, id: &SandboxId, command: &str) -> Result<()> {
        self.engine
            .spawn_detached(id.as_str(), command, &self.working_root)
            .await?;
        tracing::info!(sandbox_id = %id, command = %command, "Background process started");
        Ok(())
    }
}
