/**
 * NETWATCH HUB - Entry point of the telemetry hub
 *
 * ROLE: builds the hub components once at startup (state store, broadcaster,
 * persistence backend, anomaly log, coordinator), wires the optional MQTT
 * ingestion and serves the HTTP/WebSocket API.
 */

mod anomalies;
mod broadcast;
mod config;
mod coordinator;
mod error;
mod health;
mod http;
mod models;
mod mqtt;
mod persistence;
mod rates;
mod store;
mod topology;
mod validator;

use crate::anomalies::AnomalyLog;
use crate::broadcast::Broadcaster;
use crate::config::{load_config, HubConfig};
use crate::coordinator::Coordinator;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::persistence::{BoundedPersister, JsonLinesStore, NullStore, SnapshotStore};
use crate::store::StateStore;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("netwatch_hub=info")),
        )
        .init();

    let cfg: HubConfig = load_config().await;

    let persistence = BoundedPersister::new(
        open_persistence(&cfg),
        cfg.persistence.timeout(),
        cfg.persistence.max_in_flight,
    );
    let store_info = persistence.info();
    info!(backend = %store_info.name, "{}", store_info.description);

    let store = Arc::new(StateStore::new());
    let broadcaster = Arc::new(Broadcaster::new(cfg.subscribers.buffer));
    let anomalies = Arc::new(AnomalyLog::new(cfg.anomalies.capacity));
    let health = HealthTracker::new();
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        broadcaster.clone(),
        persistence,
        anomalies.clone(),
        health.clone(),
    ));

    if let Some(mqtt_conf) = cfg.mqtt.clone() {
        mqtt::spawn_mqtt_listener(mqtt_conf, coordinator.clone(), health.clone());
    }

    let app = http::build_router(AppState {
        coordinator,
        store,
        broadcaster,
        anomalies,
        health,
        store_info,
        ws_send_timeout: cfg.subscribers.send_timeout(),
    });

    let listener = TcpListener::bind(cfg.listen.as_str())
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen))?;
    info!("listening on http://{}", cfg.listen);
    axum::serve(listener, app).await.context("http server stopped")?;
    Ok(())
}

/// Falls back to no persistence when the configured file cannot be opened.
fn open_persistence(cfg: &HubConfig) -> Arc<dyn SnapshotStore> {
    match &cfg.persistence.path {
        Some(path) => match JsonLinesStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(%path, "cannot open snapshot store, persistence disabled: {e}");
                Arc::new(NullStore)
            }
        },
        None => Arc::new(NullStore),
    }
}
