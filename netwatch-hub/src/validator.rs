/**
 * SNAPSHOT VALIDATOR - Gatekeeper between agent payloads and hub state
 *
 * ROLE: turns a raw agent report (JSON) into a typed `Snapshot`, or rejects it
 * with `MalformedSnapshot`. Nothing here touches shared state.
 *
 * ACCEPTS: the agent wire format (`hostname`, `timestamp`, `network_stats`
 * with `BytesSent`/`BytesReceived`). Empty connection or container lists are
 * valid reports, not errors.
 */

use crate::error::HubError;
use crate::models::{Connection, ConnectionState, Container, Counters, Snapshot};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(alias = "source_id")]
    hostname: String,
    timestamp: String,
    connections: Vec<RawConnection>,
    open_ports: Vec<i64>,
    containers: Vec<RawContainer>,
    #[serde(default)]
    dns_queries: Vec<String>,
    network_stats: RawCounters,
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    src_ip: String,
    src_port: i64,
    dst_ip: String,
    dst_port: i64,
    state: String,
    #[serde(default)]
    process_name: Option<String>,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    bytes_sent: u64,
    #[serde(default)]
    bytes_recv: u64,
}

#[derive(Debug, Deserialize)]
struct RawContainer {
    id: String,
    name: String,
    image: String,
    ip_address: String,
    ports: Vec<String>,
    networks: Vec<String>,
    status: String,
    labels: BTreeMap<String, String>,
}

// Agents emit the psutil/Go-style names; accept the snake_case ones as well.
#[derive(Debug, Deserialize)]
struct RawCounters {
    #[serde(rename = "BytesSent", alias = "bytes_sent")]
    bytes_sent: u64,
    #[serde(rename = "BytesReceived", alias = "bytes_recv")]
    bytes_recv: u64,
    packets_sent: u64,
    packets_recv: u64,
}

/// Validates raw bytes as received on the ingestion endpoint.
pub fn validate(raw: &[u8]) -> Result<Snapshot, HubError> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| HubError::malformed(format!("invalid JSON: {e}")))?;
    validate_value(value)
}

/// Validates an already-parsed JSON document.
pub fn validate_value(value: serde_json::Value) -> Result<Snapshot, HubError> {
    if !value.is_object() {
        return Err(HubError::malformed("payload must be a JSON object"));
    }
    let raw: RawSnapshot =
        serde_json::from_value(value).map_err(|e| HubError::malformed(e.to_string()))?;

    let source_id = raw.hostname.trim().to_string();
    if source_id.is_empty() {
        return Err(HubError::malformed("hostname must not be empty"));
    }

    let connections = raw
        .connections
        .into_iter()
        .enumerate()
        .map(|(i, c)| normalize_connection(i, c))
        .collect::<Result<Vec<_>, _>>()?;

    let open_ports = raw
        .open_ports
        .into_iter()
        .map(|p| check_port("open_ports", p))
        .collect::<Result<BTreeSet<_>, _>>()?;

    let containers = raw
        .containers
        .into_iter()
        .map(|c| Container {
            id: c.id,
            name: c.name,
            image: c.image,
            ip_address: c.ip_address,
            ports: c.ports,
            networks: c.networks.into_iter().collect(),
            status: c.status,
            labels: c.labels,
        })
        .collect();

    Ok(Snapshot {
        source_id,
        captured_at: raw.timestamp,
        connections,
        open_ports,
        containers,
        dns_queries: raw.dns_queries,
        counters: Counters {
            bytes_sent: raw.network_stats.bytes_sent,
            bytes_recv: raw.network_stats.bytes_recv,
            packets_sent: raw.network_stats.packets_sent,
            packets_recv: raw.network_stats.packets_recv,
        },
    })
}

fn normalize_connection(index: usize, raw: RawConnection) -> Result<Connection, HubError> {
    let state = ConnectionState::parse(&raw.state).ok_or_else(|| {
        HubError::malformed(format!("connections[{index}].state: unknown state {:?}", raw.state))
    })?;
    Ok(Connection {
        src_port: check_port(&format!("connections[{index}].src_port"), raw.src_port)?,
        dst_port: check_port(&format!("connections[{index}].dst_port"), raw.dst_port)?,
        src_ip: raw.src_ip,
        dst_ip: raw.dst_ip,
        state,
        process_name: known(raw.process_name),
        container: known(raw.container),
        bytes_sent: raw.bytes_sent,
        bytes_recv: raw.bytes_recv,
    })
}

/// Agents send "N/A" when they could not resolve a value.
fn known(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "N/A")
}

fn check_port(field: &str, port: i64) -> Result<u16, HubError> {
    u16::try_from(port)
        .map_err(|_| HubError::malformed(format!("{field}: port {port} outside 0-65535")))
}
