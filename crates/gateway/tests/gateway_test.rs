//! Gateway HTTP tests against a MockEngine-backed sandbox service.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use devbox_core::config::SandboxSettings;
use devbox_core::SandboxId;
use devbox_gateway::{GatewayConfig, GatewayServer};
use devbox_sandbox::{MockEngine, SandboxService};

struct TestApp {
    _workdirs: tempfile::TempDir,
    service: Arc<SandboxService>,
    router: Router,
}

fn test_app() -> TestApp {
    let workdirs = tempfile::tempdir().unwrap();
    let settings = SandboxSettings::default().with_workdirs_base(workdirs.path());
    let engine = Arc::new(MockEngine::new().with_image("node:18"));
    let service = Arc::new(SandboxService::new(engine, settings));

    let server = GatewayServer::new(GatewayConfig::default(), service.clone());
    TestApp {
        _workdirs: workdirs,
        service,
        router: server.build_router(),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_project(app: &TestApp, name: &str) -> String {
    let (status, json) = send(&app.router, post_json("/v1/projects", json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let id = json["id"].as_str().unwrap().to_string();
    app.service.wait_ready(&SandboxId::new(id.clone())).await.unwrap();
    id
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();
    let (status, json) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_create_then_list() {
    let app = test_app();
    let id = create_project(&app, "calc").await;

    let (status, json) = send(&app.router, get("/v1/sandboxes")).await;
    assert_eq!(status, StatusCode::OK);

    let sandboxes = json["sandboxes"].as_array().unwrap();
    assert_eq!(sandboxes.len(), 1);
    assert_eq!(sandboxes[0]["id"], id.as_str());
    assert_eq!(sandboxes[0]["state"], "running");
}

#[tokio::test]
async fn test_write_read_and_exec() {
    let app = test_app();
    let id = create_project(&app, "calc").await;

    let (status, json) = send(
        &app.router,
        post_json(
            &format!("/v1/sandboxes/{}/files", id),
            json!({ "path": "src/App.txt", "content": "v1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "success": true }));

    let (status, json) = send(
        &app.router,
        get(&format!("/v1/sandboxes/{}/files/content?path=src/App.txt", id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["content"], "v1");

    let (status, json) = send(
        &app.router,
        post_json(
            &format!("/v1/sandboxes/{}/exec", id),
            json!({ "command": "cat src/App.txt" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["output"], "v1");

    let (_, json) = send(&app.router, get(&format!("/v1/sandboxes/{}/files", id))).await;
    let files: Vec<&str> = json["files"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f.as_str())
        .collect();
    assert!(files.contains(&"src/App.txt"));
}

#[tokio::test]
async fn test_traversal_is_bad_request() {
    let app = test_app();
    let id = create_project(&app, "calc").await;

    let (status, json) = send(
        &app.router,
        post_json(
            &format!("/v1/sandboxes/{}/files", id),
            json!({ "path": "../escape.txt", "content": "x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "PATH_INVALID");
}

#[tokio::test]
async fn test_unknown_sandbox_is_not_found() {
    let app = test_app();

    let (status, json) = send(
        &app.router,
        get("/v1/sandboxes/nope/files/content?path=App.txt"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);

    let (status, _) = send(
        &app.router,
        Request::builder()
            .method("DELETE")
            .uri("/v1/sandboxes/nope")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_port_and_logs() {
    let app = test_app();
    let id = create_project(&app, "calc").await;

    let (status, json) = send(&app.router, get(&format!("/v1/sandboxes/{}/port", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["port"].as_u64().unwrap() >= 1024);

    let (status, json) = send(&app.router, get(&format!("/v1/sandboxes/{}/logs?tail=10", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["text"].as_str().unwrap().contains("launched:"));
}

#[tokio::test]
async fn test_stop_start_remove() {
    let app = test_app();
    let id = create_project(&app, "calc").await;

    for action in ["stop", "stop", "start"] {
        let (status, _) = send(
            &app.router,
            post_json(&format!("/v1/sandboxes/{}/{}", id, action), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{} failed", action);
    }

    let (status, _) = send(
        &app.router,
        Request::builder()
            .method("DELETE")
            .uri(format!("/v1/sandboxes/{}", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send(&app.router, get("/v1/sandboxes")).await;
    assert!(json["sandboxes"].as_array().unwrap().is_empty());
}
