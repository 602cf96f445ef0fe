use crate::error::ApiError;
use crate::middleware::{auth_middleware, AuthConfig};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    middleware as axum_mw,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;
use vertex_core::{CancelToken, VertexError, VertexResult};
use vertex_orchestrator::{
    CancelOutcome, MetricsSnapshot, Orchestrator, ResizeReport, SubmitRequest, TaskStatus,
};
use vertex_registry::{AlgorithmCategory, AlgorithmDescriptor};

/// `[server]` configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer keys accepted on the task endpoints; empty means open.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_keys: Vec::new(),
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub orchestrator: Orchestrator,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub vertices: usize,
}

/// The HTTP gateway in front of an [`Orchestrator`].
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router. `/health` is always open; every other route goes
    /// through the API key check when keys are configured.
    pub fn build(orchestrator: Orchestrator, auth: AuthConfig) -> Router {
        let state = Arc::new(AppState { orchestrator });

        let api = Router::new()
            .route("/tasks", post(submit_handler))
            .route("/tasks/{id}", get(status_handler).delete(cancel_handler))
            .route("/metrics", get(metrics_handler))
            .route("/algorithms", get(algorithms_handler))
            .route("/pool", post(resize_handler))
            .with_state(state.clone())
            .layer(axum_mw::from_fn_with_state(Arc::new(auth), auth_middleware));

        Router::new()
            .route("/health", get(health_handler))
            .with_state(state)
            .merge(api)
    }

    /// Bind and serve until `shutdown` fires.
    pub async fn serve(
        orchestrator: Orchestrator,
        config: &ServerConfig,
        shutdown: CancelToken,
    ) -> VertexResult<()> {
        let app = Self::build(orchestrator, AuthConfig::new(config.api_keys.clone()));
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, auth = !config.api_keys.is_empty(), "Gateway listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        info!("Gateway stopped");
        Ok(())
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let budget = state.orchestrator.monitor().map(|m| m.budget_status());
    Json(serde_json::json!({
        "status": "ok",
        "service": "vertex",
        "budget_tier": budget.as_ref().map(|b| b.tier),
        "stale_sample": budget.as_ref().map(|b| b.stale),
    }))
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = body.map_err(|e| VertexError::Validation(e.body_text()))?;
    let task_id = state.orchestrator.submit(request)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id })))
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskStatus>, ApiError> {
    Ok(Json(state.orchestrator.status(id)?))
}

async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelOutcome>, ApiError> {
    Ok(Json(state.orchestrator.cancel(id)?))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.orchestrator.metrics())
}

/// Query string of `GET /algorithms`.
#[derive(Debug, Deserialize)]
pub struct AlgorithmFilter {
    pub category: Option<AlgorithmCategory>,
}

async fn algorithms_handler(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<AlgorithmFilter>, QueryRejection>,
) -> Result<Json<Vec<AlgorithmDescriptor>>, ApiError> {
    let Query(filter) = filter.map_err(|e| VertexError::Validation(e.body_text()))?;
    let registry = state.orchestrator.registry();
    let descriptors = match filter.category {
        Some(category) => registry.descriptors_by_category(category),
        None => registry.descriptors(),
    };
    Ok(Json(descriptors))
}

async fn resize_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ResizeRequest>, JsonRejection>,
) -> Result<Json<ResizeReport>, ApiError> {
    let Json(request) = body.map_err(|e| VertexError::Validation(e.body_text()))?;
    Ok(Json(state.orchestrator.resize_pool(request.vertices)?))
}
