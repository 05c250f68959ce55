//! End-to-end tests: configuration → sandbox service → HTTP gateway, served on
//! a real socket and driven with an HTTP client. The container engine is the
//! in-process MockEngine, so no Docker daemon is needed.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};

use devbox_core::config::AppConfig;
use devbox_core::SandboxId;
use devbox_gateway::{GatewayConfig, GatewayServer};
use devbox_sandbox::{MockEngine, SandboxService};

struct System {
    _workdirs: tempfile::TempDir,
    service: Arc<SandboxService>,
    addr: SocketAddr,
    client: reqwest::Client,
}

async fn spawn_system(engine: MockEngine) -> anyhow::Result<System> {
    let workdirs = tempfile::tempdir()?;
    let config = AppConfig::default();
    let settings = config.sandbox.clone().with_workdirs_base(workdirs.path());

    let service = Arc::new(SandboxService::new(Arc::new(engine), settings));
    let server = GatewayServer::new(
        GatewayConfig {
            port: 0,
            ..GatewayConfig::from(&config.server)
        },
        service.clone(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, server.build_router()).await.unwrap();
    });

    Ok(System {
        _workdirs: workdirs,
        service,
        addr,
        client: reqwest::Client::new(),
    })
}

impl System {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn create(&self, name: &str) -> anyhow::Result<String> {
        let body: Value = self
            .client
            .post(self.url("/v1/projects"))
            .json(&json!({ "name": name }))
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(body["success"], true);

        let id = body["id"].as_str().unwrap_or_default().to_string();
        self.service.wait_ready(&SandboxId::new(id.clone())).await?;
        Ok(id)
    }
}

#[test]
fn test_shipped_config_matches_defaults() {
    let loaded = AppConfig::load_from("config").unwrap();
    let defaults = AppConfig::default();

    assert_eq!(loaded.server.port, defaults.server.port);
    assert_eq!(loaded.sandbox.image, defaults.sandbox.image);
    assert_eq!(loaded.sandbox.fallback_image, defaults.sandbox.fallback_image);
    assert_eq!(loaded.sandbox.name_prefix, defaults.sandbox.name_prefix);
    assert_eq!(loaded.sandbox.default_port, defaults.sandbox.default_port);
    assert_eq!(loaded.sandbox.dev_server_command, defaults.sandbox.dev_server_command);
    assert_eq!(loaded.sandbox.long_timeout_secs, 30);
}

#[tokio::test]
async fn test_system_health_check() -> anyhow::Result<()> {
    let system = spawn_system(MockEngine::new().with_image("node:18")).await?;

    let resp = system.client.get(system.url("/health")).send().await?;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "ok");

    Ok(())
}

#[tokio::test]
async fn test_system_edit_loop() -> anyhow::Result<()> {
    let system = spawn_system(MockEngine::new().with_image("node:18")).await?;
    let id = system.create("Todo App").await?;

    // The seeded template is already in the mirror.
    let files: Value = system
        .client
        .get(system.url(&format!("/v1/sandboxes/{}/files", id)))
        .send()
        .await?
        .json()
        .await?;
    assert!(files["files"]
        .as_array()
        .map(|f| f.contains(&json!("package.json")))
        .unwrap_or(false));

    for version in ["v1", "v2"] {
        let resp = system
            .client
            .post(system.url(&format!("/v1/sandboxes/{}/files", id)))
            .json(&json!({ "path": "src/App.jsx", "content": version }))
            .send()
            .await?;
        assert_eq!(resp.status(), 200);

        let body: Value = system
            .client
            .post(system.url(&format!("/v1/sandboxes/{}/exec", id)))
            .json(&json!({ "command": "cat src/App.jsx" }))
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(body["output"], version);
    }

    let resp = system
        .client
        .post(system.url(&format!("/v1/sandboxes/{}/rebuild", id)))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);

    let resp = system
        .client
        .delete(system.url(&format!("/v1/sandboxes/{}", id)))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);

    Ok(())
}

#[tokio::test]
async fn test_system_engine_unavailable() -> anyhow::Result<()> {
    let system = spawn_system(MockEngine::new().unavailable()).await?;

    let resp = system
        .client
        .post(system.url("/v1/projects"))
        .json(&json!({ "name": "calc" }))
        .send()
        .await?;
    assert_eq!(resp.status(), 503);

    let body: Value = resp.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "ENGINE_UNAVAILABLE");

    Ok(())
}
