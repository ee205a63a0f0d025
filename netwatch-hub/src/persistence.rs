/**
 * PERSISTENCE - Boundary towards the durable store
 *
 * ROLE:
 * The hub does not own history. After every accepted snapshot it hands the
 * new latest state to a `SnapshotStore` and moves on; a failure is logged and
 * reported, never retried here and never rolled back in memory.
 *
 * HOW IT WORKS:
 * - `SnapshotStore` = common interface any durable backend implements
 * - `JsonLinesStore` = append-only JSON lines file, one record per snapshot
 * - `NullStore` = persistence switched off
 * - `BoundedPersister` runs the (blocking) store call off the async runtime,
 *   bounded by a timeout, outside every in-memory lock, and caps how many
 *   writes may be in flight at once
 */

use crate::error::PersistError;
use crate::models::LatestState;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Interface implemented by every durable backend.
pub trait SnapshotStore: Send + Sync {
    /// Stores one accepted state. Called once per accepted snapshot.
    fn persist(&self, state: &LatestState) -> Result<(), PersistError>;

    /// Description exposed on the health endpoint.
    fn info(&self) -> StoreInfo;

    /// `false` when persistence is switched off.
    fn enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    pub name: String,
    pub description: String,
}

/// Result of the persistence step, returned to the submitter alongside acceptance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistOutcome {
    Persisted,
    Disabled,
    Failed { reason: String },
}

pub struct NullStore;

impl SnapshotStore for NullStore {
    fn persist(&self, _state: &LatestState) -> Result<(), PersistError> {
        Ok(())
    }

    fn info(&self) -> StoreInfo {
        StoreInfo { name: "none".into(), description: "persistence disabled".into() }
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Appends each record as one JSON line.
pub struct JsonLinesStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesStore {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, PersistError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "json-lines store opened");
        Ok(Self { path, file: Mutex::new(file) })
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SnapshotStore for JsonLinesStore {
    fn persist(&self, state: &LatestState) -> Result<(), PersistError> {
        let mut line = serde_json::to_vec(state)?;
        line.push(b'\n');
        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn info(&self) -> StoreInfo {
        StoreInfo {
            name: "jsonl".into(),
            description: format!("append-only JSON lines at {}", self.path.display()),
        }
    }
}

/// Wraps a store so every write runs on the blocking pool, gives up after
/// `timeout` and never occupies more than `max_in_flight` blocking threads.
///
/// A timed-out write keeps running in the background and keeps its slot until
/// it returns; once every slot is taken new writes fail fast with `Saturated`.
pub struct BoundedPersister {
    store: Arc<dyn SnapshotStore>,
    timeout: Duration,
    slots: Arc<Semaphore>,
    max_in_flight: usize,
}

impl BoundedPersister {
    pub fn new(store: Arc<dyn SnapshotStore>, timeout: Duration, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self { store, timeout, slots: Arc::new(Semaphore::new(max_in_flight)), max_in_flight }
    }

    pub fn enabled(&self) -> bool {
        self.store.enabled()
    }

    pub fn info(&self) -> StoreInfo {
        self.store.info()
    }

    pub async fn persist(&self, state: Arc<LatestState>) -> Result<(), PersistError> {
        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            return Err(PersistError::Saturated(self.max_in_flight));
        };
        let store = self.store.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            store.persist(&state)
        });
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(PersistError::Aborted(join_err.to_string())),
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                debug!(timeout_ms, "persistence timed out");
                Err(PersistError::Timeout(timeout_ms))
            }
        }
    }
}
