/**
 * HTTP API - Ingestion, read and subscribe surface of the hub
 *
 * ROUTES:
 * - POST /api/agent/data           agent submission (200 accepted / 422 malformed)
 * - GET  /api/snapshots[/{id}]     latest state, all sources or one
 * - GET  /api/connections|containers|ports|stats|anomalies   fleet views, `?source_id=` filter
 * - GET  /api/topology             host/container graph built from the latest state
 * - GET  /ws                       WebSocket: full state on connect, then change events
 * - GET  /health, /system/health   liveness and hub counters
 *
 * Reads go straight to the state store and subscriptions straight to the
 * broadcaster; only the submission route enters the coordinator.
 */

use crate::anomalies::AnomalyLog;
use crate::broadcast::Broadcaster;
use crate::coordinator::{Accepted, Coordinator};
use crate::health::{HealthInputs, HealthTracker, HubHealth};
use crate::models::{Connection, Container, LatestState};
use crate::persistence::StoreInfo;
use crate::store::StateStore;
use crate::topology::{build_topology, Topology};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<StateStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub anomalies: Arc<AnomalyLog>,
    pub health: HealthTracker,
    pub store_info: StoreInfo,
    /// Bound on a single WebSocket write.
    pub ws_send_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SourceFilter {
    source_id: Option<String>,
}

#[derive(Serialize)]
struct AcceptedResponse {
    message: &'static str,
    #[serde(flatten)]
    ack: Accepted,
}

#[derive(Serialize)]
struct SourcedConnection<'a> {
    source_id: &'a str,
    #[serde(flatten)]
    connection: &'a Connection,
}

#[derive(Serialize)]
struct SourcedContainer<'a> {
    source_id: &'a str,
    #[serde(flatten)]
    container: &'a Container,
}

#[derive(Serialize)]
struct SourcedPort<'a> {
    port: u16,
    source_id: &'a str,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct FleetStats {
    pub sources: usize,
    pub total_connections: usize,
    pub total_containers: usize,
    pub total_ports: usize,
    pub bytes_in_per_sec: f64,
    pub bytes_out_per_sec: f64,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/agent/data", post(submit_snapshot))
        .route("/api/snapshots", get(list_snapshots))
        .route("/api/snapshots/{source_id}", get(get_snapshot))
        .route("/api/connections", get(get_connections))
        .route("/api/containers", get(get_containers))
        .route("/api/ports", get(get_ports))
        .route("/api/stats", get(get_stats))
        .route("/api/anomalies", get(get_anomalies))
        .route("/api/topology", get(get_topology))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}

// POST /api/agent/data
async fn submit_snapshot(State(app): State<AppState>, body: Bytes) -> Response {
    match app.coordinator.submit(&body).await {
        Ok(ack) => {
            Json(AcceptedResponse { message: "Data received and processed successfully", ack }).into_response()
        }
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "malformed snapshot", "reason": e.reason() })),
        )
            .into_response(),
    }
}

// GET /api/snapshots
async fn list_snapshots(State(app): State<AppState>) -> Json<Vec<Arc<LatestState>>> {
    Json(app.store.get_all())
}

// GET /api/snapshots/{source_id}
async fn get_snapshot(
    State(app): State<AppState>,
    Path(source_id): Path<String>,
) -> Result<Json<Arc<LatestState>>, StatusCode> {
    app.store.get_snapshot(&source_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

fn selected(store: &StateStore, filter: &SourceFilter) -> Vec<Arc<LatestState>> {
    match &filter.source_id {
        Some(id) => store.get_snapshot(id).into_iter().collect(),
        None => store.get_all(),
    }
}

// GET /api/connections
async fn get_connections(
    State(app): State<AppState>,
    Query(filter): Query<SourceFilter>,
) -> Json<serde_json::Value> {
    let states = selected(&app.store, &filter);
    let connections: Vec<SourcedConnection> = states
        .iter()
        .flat_map(|s| {
            s.snapshot
                .connections
                .iter()
                .map(move |connection| SourcedConnection { source_id: s.source_id(), connection })
        })
        .collect();
    Json(json!({ "connections": connections }))
}

// GET /api/containers
async fn get_containers(
    State(app): State<AppState>,
    Query(filter): Query<SourceFilter>,
) -> Json<serde_json::Value> {
    let states = selected(&app.store, &filter);
    let containers: Vec<SourcedContainer> = states
        .iter()
        .flat_map(|s| {
            s.snapshot
                .containers
                .iter()
                .map(move |container| SourcedContainer { source_id: s.source_id(), container })
        })
        .collect();
    Json(json!({ "containers": containers }))
}

// GET /api/ports
async fn get_ports(State(app): State<AppState>, Query(filter): Query<SourceFilter>) -> Json<serde_json::Value> {
    let states = selected(&app.store, &filter);
    let ports: Vec<SourcedPort> = states
        .iter()
        .flat_map(|s| {
            s.snapshot
                .open_ports
                .iter()
                .map(move |port| SourcedPort { port: *port, source_id: s.source_id() })
        })
        .collect();
    Json(json!({ "ports": ports }))
}

// GET /api/stats
async fn get_stats(State(app): State<AppState>, Query(filter): Query<SourceFilter>) -> Json<FleetStats> {
    Json(fleet_stats(&selected(&app.store, &filter)))
}

pub fn fleet_stats(states: &[Arc<LatestState>]) -> FleetStats {
    let round2 = |v: f64| (v * 100.0).round() / 100.0;
    FleetStats {
        sources: states.len(),
        total_connections: states.iter().map(|s| s.snapshot.connections.len()).sum(),
        total_containers: states.iter().map(|s| s.snapshot.containers.len()).sum(),
        total_ports: states.iter().map(|s| s.snapshot.open_ports.len()).sum(),
        bytes_in_per_sec: round2(states.iter().map(|s| s.rates.bytes_in_per_sec).sum()),
        bytes_out_per_sec: round2(states.iter().map(|s| s.rates.bytes_out_per_sec).sum()),
    }
}

// GET /api/anomalies
async fn get_anomalies(State(app): State<AppState>, Query(filter): Query<SourceFilter>) -> Json<serde_json::Value> {
    Json(json!({ "anomalies": app.anomalies.list(filter.source_id.as_deref()) }))
}

// GET /api/topology
async fn get_topology(State(app): State<AppState>) -> Json<Topology> {
    Json(build_topology(&app.store.get_all()))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<HubHealth> {
    Json(app.health.get_health(HealthInputs {
        sources_tracked: app.store.len(),
        subscribers: app.broadcaster.len(),
        subscribers_evicted: app.broadcaster.evicted_total(),
        store: app.store_info.clone(),
    }))
}

// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(mut socket: WebSocket, app: AppState) {
    let mut subscription = app.broadcaster.register();
    let handle = subscription.handle;

    let initial = json!({ "type": "state", "sources": app.store.get_all() }).to_string();
    let sent = tokio::time::timeout(app.ws_send_timeout, socket.send(Message::Text(initial.into()))).await;
    if matches!(sent, Ok(Ok(()))) {
        loop {
            tokio::select! {
                inbound = socket.recv() => match inbound {
                    // clients only keep the socket open; their messages carry nothing
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%handle, "websocket receive error: {e}");
                        break;
                    }
                },
                outbound = subscription.events.recv() => match outbound {
                    Some(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        match tokio::time::timeout(app.ws_send_timeout, socket.send(Message::Text(text.into()))).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) => break,
                            Err(_) => {
                                debug!(%handle, "websocket write timed out");
                                break;
                            }
                        }
                    }
                    // evicted by the broadcaster
                    None => break,
                },
            }
        }
    }

    app.broadcaster.unregister(handle);
    info!(%handle, "websocket closed");
}
