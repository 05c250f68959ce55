//! Axum-based HTTP server for the gateway.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, MatchedPath, Path, Query, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use devbox_core::config::ServerConfig;
use devbox_core::{Result, Sandbox, SandboxId};
use devbox_sandbox::SandboxService;
use devbox_telemetry::track_request;

use crate::response::{ApiError, ApiResponse};

const DEFAULT_LOG_TAIL: usize = 50;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Enable CORS.
    pub enable_cors: bool,
    /// Enable request tracing.
    pub enable_tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for GatewayConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            enable_cors: server.enable_cors,
            enable_tracing: true,
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub service: Arc<SandboxService>,
}

/// Gateway server.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(config: GatewayConfig, service: Arc<SandboxService>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { service }),
            metrics_handle: None,
        }
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/v1/projects", post(create_project_handler))
            .route("/v1/sandboxes", get(list_sandboxes_handler))
            .route(
                "/v1/sandboxes/:id",
                axum::routing::delete(remove_sandbox_handler),
            )
            .route("/v1/sandboxes/:id/start", post(start_sandbox_handler))
            .route("/v1/sandboxes/:id/stop", post(stop_sandbox_handler))
            .route(
                "/v1/sandboxes/:id/files",
                get(list_files_handler)
                    .post(write_file_handler)
                    .delete(delete_file_handler),
            )
            .route("/v1/sandboxes/:id/files/content", get(read_file_handler))
            .route("/v1/sandboxes/:id/exec", post(exec_handler))
            .route("/v1/sandboxes/:id/logs", get(logs_handler))
            .route("/v1/sandboxes/:id/port", get(port_handler))
            .route("/v1/sandboxes/:id/rebuild", post(rebuild_handler))
            .route_layer(middleware::from_fn(track_metrics))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Run the server.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| devbox_core::Error::gateway(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .await
            .map_err(|e| devbox_core::Error::gateway(format!("Server error: {}", e)))?;

        Ok(())
    }
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;
    track_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateProjectResponse {
    pub id: SandboxId,
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct SandboxesResponse {
    pub sandboxes: Vec<Sandbox>,
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub output: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct PortResponse {
    pub port: u16,
}

#[derive(Debug, Default, Deserialize)]
pub struct RebuildRequest {
    pub port: Option<u16>,
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn create_project_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateProjectRequest>,
) -> ApiResult<CreateProjectResponse> {
    tracing::info!(project = %payload.name, "Creating project");
    let sandbox = state.service.create_project(&payload.name).await?;
    Ok(Json(ApiResponse::ok(CreateProjectResponse {
        id: sandbox.id,
        name: sandbox.name,
        port: sandbox.port,
    })))
}

async fn list_sandboxes_handler(State(state): State<Arc<AppState>>) -> ApiResult<SandboxesResponse> {
    let sandboxes = state.service.list_sandboxes().await?;
    Ok(Json(ApiResponse::ok(SandboxesResponse { sandboxes })))
}

async fn start_sandbox_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.service.start_sandbox(&SandboxId::new(id)).await?;
    Ok(Json(ApiResponse::done()))
}

async fn stop_sandbox_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.service.stop_sandbox(&SandboxId::new(id)).await?;
    Ok(Json(ApiResponse::done()))
}

async fn remove_sandbox_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.service.remove_sandbox(&SandboxId::new(id)).await?;
    Ok(Json(ApiResponse::done()))
}

async fn list_files_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<FilesResponse> {
    let files = state.service.list_files(&SandboxId::new(id)).await?;
    Ok(Json(ApiResponse::ok(FilesResponse { files })))
}

async fn write_file_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<WriteFileRequest>,
) -> ApiResult<()> {
    state
        .service
        .write_file(&SandboxId::new(id), &payload.path, payload.content.as_bytes())
        .await?;
    Ok(Json(ApiResponse::done()))
}

async fn delete_file_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<()> {
    state
        .service
        .delete_file(&SandboxId::new(id), &query.path)
        .await?;
    Ok(Json(ApiResponse::done()))
}

async fn read_file_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<ContentResponse> {
    let content = state
        .service
        .read_file(&SandboxId::new(id), &query.path)
        .await?;
    Ok(Json(ApiResponse::ok(ContentResponse { content })))
}

async fn exec_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ExecRequest>,
) -> ApiResult<ExecResponse> {
    let output = state
        .service
        .run_command(&SandboxId::new(id), &payload.command)
        .await?;
    Ok(Json(ApiResponse::ok(ExecResponse { output })))
}

async fn logs_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<LogsResponse> {
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL);
    let text = state.service.get_logs(&SandboxId::new(id), tail).await?;
    Ok(Json(ApiResponse::ok(LogsResponse { text })))
}

async fn port_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<PortResponse> {
    let port = state.service.get_port(&SandboxId::new(id)).await;
    Ok(Json(ApiResponse::ok(PortResponse { port })))
}

async fn rebuild_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Option<Json<RebuildRequest>>,
) -> ApiResult<()> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    state
        .service
        .rebuild(&SandboxId::new(id), request.port)
        .await?;
    Ok(Json(ApiResponse::done()))
}
