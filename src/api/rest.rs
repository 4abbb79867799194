use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use std::sync::Arc;

use crate::domain::fleet::FleetError;
use crate::domain::governor::Governor;
use crate::domain::intent::{IntentRecord, Trigger};
use crate::domain::types::*;

/// Shared application state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub governor: Arc<Governor>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/fleet", get(fleet))
        .route("/api/v1/nodes", get(nodes))
        .route("/api/v1/nodes/{name}", get(node).post(register))
        .route("/api/v1/nodes/{name}/intent", put(put_intent))
        .route("/api/v1/nodes/{name}/events", post(report_event))
        .route("/api/v1/check", post(check))
        .route("/api/v1/reconcile", post(reconcile))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<DaemonHealth> {
    Json(state.governor.health().await)
}

async fn fleet(State(state): State<AppState>) -> Json<FleetStatus> {
    Json(state.governor.fleet_status().await)
}

async fn nodes(State(state): State<AppState>) -> Json<Vec<NodeView>> {
    Json(state.governor.nodes().await)
}

async fn node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    state
        .governor
        .node(&name)
        .await
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown node '{name}'")))
}

async fn register(State(state): State<AppState>, Path(name): Path<String>) -> Json<NodeView> {
    Json(state.governor.register(&name).await)
}

/// Agents write their intent record as-is; decoding happens on reconcile.
async fn put_intent(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(intent): Json<IntentRecord>,
) -> Json<NodeView> {
    Json(state.governor.put_intent(&name, intent).await)
}

async fn report_event(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(trigger): Json<Trigger>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    state
        .governor
        .report(&name, trigger)
        .await
        .map(Json)
        .map_err(|e| match e {
            FleetError::UnknownNode(_) => (StatusCode::NOT_FOUND, e.to_string()),
            FleetError::InvalidIntent { .. } => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        })
}

/// A denial is a normal 200 response with `permit: false`; only evaluation
/// faults are errors.
async fn check(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, (StatusCode, String)> {
    state
        .governor
        .check(&req)
        .map(Json)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
}

async fn reconcile(State(state): State<AppState>) -> Json<ReconcileResult> {
    Json(state.governor.reconcile().await)
}
