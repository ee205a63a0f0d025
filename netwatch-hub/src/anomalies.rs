/**
 * ANOMALY LOG - Recent irregularities seen on the ingestion path
 *
 * ROLE: keeps the last `capacity` anomalies (counter resets, clock anomalies)
 * for the dashboard. Oldest entries fall off the front; nothing is persisted.
 */

use crate::rates::RateAnomaly;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    pub source_id: String,
    pub details: Option<serde_json::Value>,
}

impl Anomaly {
    pub fn from_rate(source_id: &str, anomaly: RateAnomaly, at: OffsetDateTime) -> Self {
        match anomaly {
            RateAnomaly::CounterReset => Anomaly {
                timestamp: at,
                severity: Severity::Medium,
                kind: "Counter Reset",
                message: format!("{source_id} reported counters below its previous reading"),
                source_id: source_id.to_string(),
                details: None,
            },
            RateAnomaly::ClockAnomaly { elapsed_secs } => Anomaly {
                timestamp: at,
                severity: Severity::Low,
                kind: "Clock Anomaly",
                message: format!("{source_id} reported again without time moving forward"),
                source_id: source_id.to_string(),
                details: Some(json!({ "elapsed_secs": elapsed_secs })),
            },
        }
    }
}

pub struct AnomalyLog {
    entries: Mutex<VecDeque<Anomaly>>,
    capacity: usize,
}

impl AnomalyLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    pub fn record(&self, anomaly: Anomaly) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(anomaly);
    }

    /// Newest first, optionally limited to one source.
    pub fn list(&self, source_id: Option<&str>) -> Vec<Anomaly> {
        self.entries
            .lock()
            .iter()
            .rev()
            .filter(|a| source_id.is_none_or(|id| a.source_id == id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2025-01-01 0:00 UTC);

    #[test]
    fn test_log_is_bounded_and_newest_first() {
        let log = AnomalyLog::new(3);
        for i in 0..5 {
            log.record(Anomaly::from_rate(&format!("host-{i}"), RateAnomaly::CounterReset, T0));
        }
        let ids: Vec<String> = log.list(None).into_iter().map(|a| a.source_id).collect();
        assert_eq!(ids, vec!["host-4", "host-3", "host-2"]);
    }

    #[test]
    fn test_filter_by_source() {
        let log = AnomalyLog::new(10);
        log.record(Anomaly::from_rate("a", RateAnomaly::CounterReset, T0));
        log.record(Anomaly::from_rate("b", RateAnomaly::ClockAnomaly { elapsed_secs: 0.0 }, T0));
        let only_b = log.list(Some("b"));
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].kind, "Clock Anomaly");
        assert!(log.list(Some("c")).is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let anomaly = Anomaly::from_rate("web-01", RateAnomaly::ClockAnomaly { elapsed_secs: -2.0 }, T0);
        let value = serde_json::to_value(&anomaly).unwrap();
        assert_eq!(value["type"], "Clock Anomaly");
        assert_eq!(value["severity"], "LOW");
        assert_eq!(value["source_id"], "web-01");
        assert_eq!(value["timestamp"], "2025-01-01T00:00:00Z");
        assert_eq!(value["details"]["elapsed_secs"], -2.0);
    }
}
