//! Conductor server library logic.

pub mod api_workflow;
pub mod api_ws;
pub mod config;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use conductor_client::ServiceClient;
use conductor_engine::{Engine, PipelineEndpoints, RunSupervisor, StatusRegistry, WorkflowTable};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Executes workflow runs.
    pub engine: Engine,
    /// Run id → status connection map; shared with the engine.
    pub registry: StatusRegistry,
    /// In-flight run tasks.
    pub supervisor: RunSupervisor,
    /// Workflow definitions by name.
    pub workflows: Arc<WorkflowTable>,
    /// Collaborator base URLs keyed `<collaborator>_service`, reported by `/health`.
    pub dependencies: BTreeMap<String, String>,
    /// Cancel a run when its status stream closes.
    pub cancel_on_disconnect: bool,
}

impl AppState {
    /// Builds the state from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns the builder error when the collaborator HTTP client cannot be
    /// initialized.
    pub fn from_config(config: &config::Config) -> Result<Self, reqwest::Error> {
        let services = config.service_map();
        let endpoints = PipelineEndpoints::from_base_urls(&services);

        let registry = StatusRegistry::new();
        let engine = Engine::new(
            ServiceClient::new(config.retry.policy())?,
            registry.clone(),
            config.engine.engine_config(),
        );

        Ok(Self {
            engine,
            registry,
            supervisor: RunSupervisor::new(),
            workflows: Arc::new(WorkflowTable::standard(&endpoints)),
            dependencies: services
                .into_iter()
                .map(|(c, (url, _))| (format!("{}_service", c), url))
                .collect(),
            cancel_on_disconnect: config.engine.cancel_on_disconnect,
        })
    }
}

/// Maximum trigger body size (10 MiB). Bounds the raw audio a caller can submit.
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service_name": "orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "dependencies": state.dependencies,
        "active_runs": state.supervisor.active_count(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let trigger_routes = Router::new()
        .route(
            "/api/v1/process_audio",
            post(api_workflow::process_audio_handler),
        )
        .route(
            "/api/v1/process_text",
            post(api_workflow::process_text_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES));

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/workflows",
            get(api_workflow::list_workflows_handler),
        )
        .route("/ws/{run_id}", get(api_ws::ws_handler))
        .merge(trigger_routes)
        .layer(axum::middleware::from_fn(middleware::request_log_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
