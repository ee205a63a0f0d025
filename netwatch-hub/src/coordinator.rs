/**
 * INGESTION COORDINATOR - Write path of the hub
 *
 * ROLE: sequences one agent submission through
 *   validate -> compute rates -> store -> persist (bounded) -> broadcast -> ack
 * and short-circuits to a rejection when validation fails, before any state
 * is touched.
 *
 * CONCURRENCY:
 * - rate computation and the store update for one source run under that
 *   source's lock, so the last writer by lock order owns both the baseline and
 *   the stored record; distinct sources never wait on each other here
 * - the receipt time is taken inside that lock
 * - persistence and fan-out happen after every lock is released; fan-out
 *   never waits on a subscriber
 */

use crate::anomalies::{Anomaly, AnomalyLog};
use crate::broadcast::Broadcaster;
use crate::error::HubError;
use crate::health::HealthTracker;
use crate::models::{DerivedRates, LatestState};
use crate::persistence::{BoundedPersister, PersistOutcome};
use crate::rates::{RateAnomaly, RateCalculator};
use crate::store::StateStore;
use crate::validator;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};

/// Acknowledgement returned to the submitting agent.
#[derive(Debug, Clone, Serialize)]
pub struct Accepted {
    pub source_id: String,
    pub rates: DerivedRates,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    pub persistence: PersistOutcome,
    pub sequence: u64,
}

pub struct Coordinator {
    rates: RateCalculator,
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
    persistence: BoundedPersister,
    anomalies: Arc<AnomalyLog>,
    health: HealthTracker,
    source_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<StateStore>,
        broadcaster: Arc<Broadcaster>,
        persistence: BoundedPersister,
        anomalies: Arc<AnomalyLog>,
        health: HealthTracker,
    ) -> Self {
        Self {
            rates: RateCalculator::new(),
            store,
            broadcaster,
            persistence,
            anomalies,
            health,
            source_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Ingestion entry point, stamped with the hub clock.
    pub async fn submit(&self, raw: &[u8]) -> Result<Accepted, HubError> {
        self.submit_with_clock(raw, OffsetDateTime::now_utc).await
    }

    /// Same as `submit` with an explicit receipt time.
    #[cfg(test)]
    pub async fn submit_at(&self, raw: &[u8], received_at: OffsetDateTime) -> Result<Accepted, HubError> {
        self.submit_with_clock(raw, move || received_at).await
    }

    async fn submit_with_clock<F>(&self, raw: &[u8], clock: F) -> Result<Accepted, HubError>
    where
        F: FnOnce() -> OffsetDateTime,
    {
        let snapshot = match validator::validate(raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.health.record_rejected();
                warn!(reason = e.reason(), "snapshot rejected");
                return Err(e);
            }
        };
        let source_id = snapshot.source_id.clone();
        let connections = snapshot.connections.len();

        let state = {
            let lock = self.source_lock(&source_id);
            let _guard = lock.lock();
            let received_at = clock();
            let outcome = self.rates.compute(&source_id, &snapshot.counters, received_at);
            if let Some(anomaly) = outcome.anomaly {
                match anomaly {
                    RateAnomaly::CounterReset => self.health.record_counter_reset(),
                    RateAnomaly::ClockAnomaly { .. } => self.health.record_clock_anomaly(),
                }
                self.anomalies.record(Anomaly::from_rate(&source_id, anomaly, received_at));
            }
            self.store.upsert(&source_id, snapshot, outcome.rates, received_at)
        };

        let persistence = self.persist(&state).await;
        let report = self.broadcaster.broadcast(&source_id, state.received_at);
        self.health.record_accepted();

        info!(
            %source_id,
            connections,
            bytes_in_per_sec = state.rates.bytes_in_per_sec,
            bytes_out_per_sec = state.rates.bytes_out_per_sec,
            notified = report.delivered,
            "snapshot accepted"
        );

        Ok(Accepted {
            source_id,
            rates: state.rates,
            received_at: state.received_at,
            persistence,
            sequence: report.sequence,
        })
    }

    async fn persist(&self, state: &Arc<LatestState>) -> PersistOutcome {
        if !self.persistence.enabled() {
            return PersistOutcome::Disabled;
        }
        match self.persistence.persist(state.clone()).await {
            Ok(()) => PersistOutcome::Persisted,
            Err(e) => {
                let reason = e.to_string();
                error!(source_id = state.source_id(), %reason, "persistence failed");
                self.health.record_persistence_failure(&reason);
                PersistOutcome::Failed { reason }
            }
        }
    }

    fn source_lock(&self, source_id: &str) -> Arc<Mutex<()>> {
        self.source_locks
            .lock()
            .entry(source_id.to_string())
            .or_default()
            .clone()
    }

    #[cfg(test)]
    pub fn tracked_sources(&self) -> usize {
        self.rates.tracked_sources()
    }
}
