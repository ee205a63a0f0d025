/**
 * TOPOLOGY - Service graph derived from the latest state
 *
 * NODES: one per reporting host, one per container it runs.
 * EDGES: reported connections between two known nodes, bytes summed per
 * (source, target) pair. Endpoints are matched by container IP, then by the
 * connection's container name; the local side falls back to the reporting
 * host. Traffic to unknown addresses is left out.
 */

use crate::models::LatestState;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyNode {
    pub id: String,
    pub label: String,
    pub ip: String,
    pub status: String,
    pub classification: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyEdge {
    pub source: String,
    pub target: String,
    pub bytes: u64,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct Topology {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

fn container_node_id(source_id: &str, name: &str) -> String {
    format!("{source_id}/{name}")
}

/// Coarse role guessed from the image name.
fn classify(image: &str) -> &'static str {
    let image = image.to_ascii_lowercase();
    const DATABASES: [&str; 6] = ["postgres", "mysql", "mariadb", "mongo", "redis", "cassandra"];
    const PROXIES: [&str; 4] = ["nginx", "traefik", "haproxy", "envoy"];
    if DATABASES.iter().any(|db| image.contains(db)) {
        "Database"
    } else if PROXIES.iter().any(|p| image.contains(p)) {
        "Proxy"
    } else {
        "App"
    }
}

pub fn build_topology(states: &[Arc<LatestState>]) -> Topology {
    let mut topology = Topology::default();
    // first writer wins; `states` arrives sorted by source id
    let mut by_ip: HashMap<&str, String> = HashMap::new();

    for state in states {
        let source_id = state.source_id();
        topology.nodes.push(TopologyNode {
            id: source_id.to_string(),
            label: source_id.to_string(),
            ip: String::new(),
            status: "reporting".into(),
            classification: "Host",
        });
        for container in &state.snapshot.containers {
            let id = container_node_id(source_id, &container.name);
            if !container.ip_address.is_empty() {
                by_ip.entry(container.ip_address.as_str()).or_insert_with(|| id.clone());
            }
            topology.nodes.push(TopologyNode {
                id,
                label: container.name.clone(),
                ip: container.ip_address.clone(),
                status: container.status.clone(),
                classification: classify(&container.image),
            });
        }
    }

    let mut edges: BTreeMap<(String, String), u64> = BTreeMap::new();
    for state in states {
        let source_id = state.source_id();
        for conn in &state.snapshot.connections {
            let Some(target) = by_ip.get(conn.dst_ip.as_str()) else { continue };
            let source = by_ip
                .get(conn.src_ip.as_str())
                .cloned()
                .or_else(|| {
                    conn.container
                        .as_deref()
                        .filter(|name| state.snapshot.containers.iter().any(|c| c.name == *name))
                        .map(|name| container_node_id(source_id, name))
                })
                .unwrap_or_else(|| source_id.to_string());
            if &source == target {
                continue;
            }
            *edges.entry((source, target.clone())).or_default() += conn.bytes_sent + conn.bytes_recv;
        }
    }
    topology.edges = edges
        .into_iter()
        .map(|((source, target), bytes)| TopologyEdge { source, target, bytes })
        .collect();
    topology
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Connection, ConnectionState, Container, Counters, DerivedRates, Snapshot};

    fn container(name: &str, image: &str, ip: &str) -> Container {
        Container {
            id: format!("id-{name}"),
            name: name.into(),
            image: image.into(),
            ip_address: ip.into(),
            ports: Vec::new(),
            networks: ["app_net".to_string()].into_iter().collect(),
            status: "running".into(),
            labels: Default::default(),
        }
    }

    fn conn(src: &str, dst: &str, bytes: u64, container: Option<&str>) -> Connection {
        Connection {
            src_ip: src.into(),
            src_port: 40000,
            dst_ip: dst.into(),
            dst_port: 5432,
            state: ConnectionState::Established,
            process_name: None,
            container: container.map(Into::into),
            bytes_sent: bytes,
            bytes_recv: 0,
        }
    }

    fn state(source_id: &str, containers: Vec<Container>, connections: Vec<Connection>) -> Arc<LatestState> {
        Arc::new(LatestState {
            snapshot: Snapshot {
                source_id: source_id.into(),
                captured_at: String::new(),
                connections,
                open_ports: Default::default(),
                containers,
                dns_queries: Vec::new(),
                counters: Counters::default(),
            },
            rates: DerivedRates::default(),
            received_at: time::OffsetDateTime::UNIX_EPOCH,
        })
    }

    #[test]
    fn test_empty_fleet() {
        assert_eq!(build_topology(&[]), Topology::default());
    }

    #[test]
    fn test_nodes_and_aggregated_edges() {
        let states = vec![state(
            "node-1",
            vec![container("backend", "python:3.10", "172.18.0.2"), container("db", "postgres:16", "172.18.0.3")],
            vec![
                conn("172.18.0.2", "172.18.0.3", 1000, None),
                conn("172.18.0.2", "172.18.0.3", 500, None),
                conn("172.18.0.4", "8.8.8.8", 99, None),
                conn("10.0.0.5", "172.18.0.2", 10, None),
            ],
        )];
        let topology = build_topology(&states);

        let classes: Vec<(&str, &str)> =
            topology.nodes.iter().map(|n| (n.id.as_str(), n.classification)).collect();
        assert_eq!(
            classes,
            vec![("node-1", "Host"), ("node-1/backend", "App"), ("node-1/db", "Database")]
        );
        assert_eq!(
            topology.edges,
            vec![
                TopologyEdge { source: "node-1".into(), target: "node-1/backend".into(), bytes: 10 },
                TopologyEdge { source: "node-1/backend".into(), target: "node-1/db".into(), bytes: 1500 },
            ]
        );
    }

    #[test]
    fn test_cross_host_edge_and_container_name_fallback() {
        let states = vec![
            state("a", vec![container("web", "nginx", "172.18.0.2")], vec![conn("10.0.0.1", "172.19.0.9", 7, Some("web"))]),
            state("b", vec![container("cache", "redis:7", "172.19.0.9")], Vec::new()),
        ];
        let topology = build_topology(&states);
        assert_eq!(topology.nodes.len(), 4);
        assert_eq!(
            topology.edges,
            vec![TopologyEdge { source: "a/web".into(), target: "b/cache".into(), bytes: 7 }]
        );
    }
}
