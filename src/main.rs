#![deny(unused)]
//! Devbox - sandboxed dev environments for generated web projects.
//!
//! Runs each project in its own container, keeps a host-side mirror of its
//! workspace, and exposes lifecycle, file and command operations over HTTP.

use std::sync::Arc;

use devbox_core::config::AppConfig;
use devbox_gateway::{GatewayConfig, GatewayServer};
use devbox_sandbox::{ContainerEngine, DockerEngine, SandboxService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    devbox_telemetry::configure_tracing(&config.logging)?;
    tracing::info!("Starting Devbox v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = devbox_telemetry::setup_metrics_recorder()?;

    // =========================================================================
    // Container engine
    // =========================================================================
    let engine = DockerEngine::new()?;
    if let Err(e) = engine.ping().await {
        tracing::error!(error = %e, "Docker daemon not reachable");
        return Err(e.into());
    }
    tracing::info!(
        image = %config.sandbox.image,
        fallback = %config.sandbox.fallback_image,
        workdirs = %config.sandbox.workdirs_base.display(),
        "Container engine ready"
    );

    let service = Arc::new(SandboxService::new(
        Arc::new(engine),
        config.sandbox.clone(),
    ));

    // =========================================================================
    // Start the server
    // =========================================================================
    GatewayServer::new(GatewayConfig::from(&config.server), service)
        .with_metrics(metrics_handle)
        .run()
        .await?;

    Ok(())
}
