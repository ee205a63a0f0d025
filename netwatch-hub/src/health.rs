use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::persistence::StoreInfo;

#[derive(Debug, Serialize, Deserialize)]
pub struct HubHealth {
    pub uptime_seconds: u64,
    pub sources_tracked: u64,
    pub subscribers: u64,
    pub snapshots_accepted: u64,
    pub snapshots_rejected: u64,
    pub counter_resets: u64,
    pub clock_anomalies: u64,
    pub subscribers_evicted: u64,
    pub persistence_backend: String,
    pub persistence_failures: u64,
    pub last_persistence_error: Option<String>,
    pub mqtt_status: String,
    pub mqtt_reconnects: u64,
    pub memory_usage_mb: f32,
}

/// Gauges sampled from the other components when health is requested.
pub struct HealthInputs {
    pub sources_tracked: usize,
    pub subscribers: usize,
    pub subscribers_evicted: u64,
    pub store: StoreInfo,
}

/// Counters bumped from the ingestion path. Cheap to clone, all shared.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    accepted: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
    counter_resets: Arc<AtomicU64>,
    clock_anomalies: Arc<AtomicU64>,
    persistence_failures: Arc<AtomicU64>,
    last_persistence_error: Arc<Mutex<Option<String>>>,
    mqtt_reconnects: Arc<AtomicU64>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            accepted: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
            counter_resets: Arc::new(AtomicU64::new(0)),
            clock_anomalies: Arc::new(AtomicU64::new(0)),
            persistence_failures: Arc::new(AtomicU64::new(0)),
            last_persistence_error: Arc::new(Mutex::new(None)),
            mqtt_reconnects: Arc::new(AtomicU64::new(0)),
            mqtt_status: Arc::new(Mutex::new("disabled".to_string())),
        }
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_counter_reset(&self) {
        self.counter_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clock_anomaly(&self) {
        self.clock_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self, reason: &str) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_persistence_error.lock() = Some(reason.to_string());
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, inputs: HealthInputs) -> HubHealth {
        HubHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            sources_tracked: inputs.sources_tracked as u64,
            subscribers: inputs.subscribers as u64,
            snapshots_accepted: self.accepted.load(Ordering::Relaxed),
            snapshots_rejected: self.rejected.load(Ordering::Relaxed),
            counter_resets: self.counter_resets.load(Ordering::Relaxed),
            clock_anomalies: self.clock_anomalies.load(Ordering::Relaxed),
            subscribers_evicted: inputs.subscribers_evicted,
            persistence_backend: inputs.store.name,
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            last_persistence_error: self.last_persistence_error.lock().clone(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) {
                        return kb as f32 / 1024.0;
                    }
                }
            }
        }
    }
    0.0
}
