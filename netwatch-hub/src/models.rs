use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;

/// Transport states an agent may report for a connection (psutil naming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    None,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 12] = [
        ConnectionState::Established,
        ConnectionState::SynSent,
        ConnectionState::SynRecv,
        ConnectionState::FinWait1,
        ConnectionState::FinWait2,
        ConnectionState::TimeWait,
        ConnectionState::Close,
        ConnectionState::CloseWait,
        ConnectionState::LastAck,
        ConnectionState::Listen,
        ConnectionState::Closing,
        ConnectionState::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynRecv => "SYN_RECV",
            ConnectionState::FinWait1 => "FIN_WAIT1",
            ConnectionState::FinWait2 => "FIN_WAIT2",
            ConnectionState::TimeWait => "TIME_WAIT",
            ConnectionState::Close => "CLOSE",
            ConnectionState::CloseWait => "CLOSE_WAIT",
            ConnectionState::LastAck => "LAST_ACK",
            ConnectionState::Listen => "LISTEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::None => "NONE",
        }
    }

    /// Case-insensitive lookup, tolerant of surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|s| s.as_str() == wanted)
    }
}

/// One connection as reported by an agent. Duplicates are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub state: ConnectionState,
    pub process_name: Option<String>,
    pub container: Option<String>,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub ip_address: String,
    pub ports: Vec<String>,
    pub networks: BTreeSet<String>,
    pub status: String,
    pub labels: BTreeMap<String, String>,
}

/// Cumulative interface counters, non-decreasing while the agent stays up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

/// A validated telemetry report from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub source_id: String,
    /// Agent clock, informational only.
    pub captured_at: String,
    pub connections: Vec<Connection>,
    pub open_ports: BTreeSet<u16>,
    pub containers: Vec<Container>,
    pub dns_queries: Vec<String>,
    pub counters: Counters,
}

/// Per-second throughput derived from two consecutive counter readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedRates {
    pub bytes_in_per_sec: f64,
    pub bytes_out_per_sec: f64,
    pub packets_in_per_sec: f64,
    pub packets_out_per_sec: f64,
}

/// Latest accepted snapshot for a source plus what the hub derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestState {
    pub snapshot: Snapshot,
    pub rates: DerivedRates,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl LatestState {
    pub fn source_id(&self) -> &str {
        &self.snapshot.source_id
    }
}

/// Change notification pushed to subscribers. Deliberately small: anyone
/// needing the full record reads it from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    Snapshot {
        source_id: String,
        sequence: u64,
        #[serde(with = "time::serde::rfc3339")]
        received_at: OffsetDateTime,
    },
}

#[cfg(test)]
impl HubEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            HubEvent::Snapshot { sequence, .. } => *sequence,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            HubEvent::Snapshot { source_id, .. } => source_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_parse() {
        assert_eq!(ConnectionState::parse("established"), Some(ConnectionState::Established));
        assert_eq!(ConnectionState::parse(" TIME_WAIT "), Some(ConnectionState::TimeWait));
        assert_eq!(ConnectionState::parse("fin_wait1"), Some(ConnectionState::FinWait1));
        assert_eq!(ConnectionState::parse("BOGUS"), None);
    }

    #[test]
    fn test_connection_state_serde_matches_as_str() {
        for state in ConnectionState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn test_event_wire_shape() {
        let event = HubEvent::Snapshot {
            source_id: "web-01".into(),
            sequence: 7,
            received_at: time::macros::datetime!(2025-01-01 12:00 UTC),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["source_id"], "web-01");
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["received_at"], "2025-01-01T12:00:00Z");
    }
}
