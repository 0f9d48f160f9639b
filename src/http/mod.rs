//! C7 — the axum HTTP front-end fronting the scheduler and controller registry.

mod error;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::CrossNodeConfig;
use crate::controller::{ControllerRegistry, CrossNodeController, KubeClient};
use crate::controller::cross_node::DeployConfig;
use crate::controller::status_file::StatusHandler;
use crate::core::Request as SchedulerRequest;
use crate::scheduler::Scheduler;

pub use error::ApiError;

/// Shared state every handler closes over. Cheap to clone: everything inside
/// is already an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub registry: Arc<ControllerRegistry>,
    pub kube: Arc<dyn KubeClient>,
    pub status_handler: Arc<StatusHandler>,
    pub cross_node_config: CrossNodeConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/servers", post(create_server))
        .route("/v1/servers/{name}", get(get_server).delete(delete_server))
        .route("/v1/requests", post(submit_request))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_server(
    State(state): State<AppState>,
    Json(config): Json<DeployConfig>,
) -> Result<Json<ServerStatusResponse>, ApiError> {
    let server_name = config.server_name.clone();
    let controller = Arc::new(CrossNodeController::new(
        state.kube.clone(),
        state.status_handler.clone(),
        state.cross_node_config.clone(),
    ));
    controller.deploy(config).await?;
    state.registry.insert(server_name.clone(), controller.clone());
    spawn_background_loops(controller, state.cross_node_config.clone());

    let (status, message) = state.registry.get(&server_name)?.status();
    Ok(Json(ServerStatusResponse {
        server_name,
        status: format!("{status:?}"),
        message,
    }))
}

pub fn spawn_background_loops(controller: Arc<CrossNodeController>, cross_node_config: CrossNodeConfig) {
    let discovery_interval = std::time::Duration::from_secs(cross_node_config.discovery_interval_secs);
    let monitor_interval = std::time::Duration::from_secs(cross_node_config.monitor_interval_secs);

    let discovery_controller = controller.clone();
    tokio::task::spawn(async move {
        loop {
            if let Err(err) = discovery_controller.run_discovery_tick().await {
                tracing::warn!(error = %err, "discovery tick failed");
            }
            tokio::time::sleep(discovery_interval).await;
        }
    });
    tokio::task::spawn(async move {
        loop {
            if let Err(err) = controller.run_monitor_tick().await {
                tracing::warn!(error = %err, "monitor tick failed");
            }
            tokio::time::sleep(monitor_interval).await;
        }
    });
}

#[derive(Debug, Serialize)]
struct ServerStatusResponse {
    server_name: String,
    status: String,
    message: String,
}

async fn get_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServerStatusResponse>, ApiError> {
    let controller = state.registry.get(&name)?;
    let (status, message) = controller.status();
    Ok(Json(ServerStatusResponse {
        server_name: name,
        status: format!("{status:?}"),
        message,
    }))
}

async fn delete_server(State(state): State<AppState>, Path(name): Path<String>) -> Result<(), ApiError> {
    let controller = state.registry.get(&name)?;
    controller.unload().await?;
    state.registry.remove(&name);
    Ok(())
}

async fn submit_request(
    State(state): State<AppState>,
    Json(request): Json<SchedulerRequest>,
) -> axum::http::StatusCode {
    state.scheduler.submit(request);
    axum::http::StatusCode::ACCEPTED
}
