use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HubConfig {
    pub listen: String,
    pub persistence: PersistenceConf,
    pub subscribers: SubscriberConf,
    pub anomalies: AnomalyConf,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceConf {
    /// JSON-lines file; `None` switches persistence off.
    pub path: Option<String>,
    pub timeout_ms: u64,
    /// Blocking writes allowed at once, timed-out ones included.
    pub max_in_flight: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SubscriberConf {
    /// Bound on one WebSocket write before the client is dropped.
    pub send_timeout_ms: u64,
    /// Events a subscriber may lag behind before it is evicted.
    pub buffer: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnomalyConf {
    pub capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
}

fn default_mqtt_topic() -> String {
    "netwatch/agents/snapshot@v1".into()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".into(),
            persistence: PersistenceConf::default(),
            subscribers: SubscriberConf::default(),
            anomalies: AnomalyConf::default(),
            mqtt: None,
        }
    }
}

impl Default for PersistenceConf {
    fn default() -> Self {
        Self { path: Some("./data/snapshots.jsonl".into()), timeout_ms: 2000, max_in_flight: 4 }
    }
}

impl Default for AnomalyConf {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

impl Default for SubscriberConf {
    fn default() -> Self {
        Self { send_timeout_ms: 250, buffer: 32 }
    }
}

impl PersistenceConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SubscriberConf {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Parses a YAML document, falling back to defaults on empty or invalid input.
pub fn parse_config(txt: &str) -> HubConfig {
    if txt.trim().is_empty() {
        return HubConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!("invalid hub config, using defaults: {e}");
        HubConfig::default()
    })
}

/// Reads `$NETWATCH_HUB_CONFIG` (default `hub.yaml`); `NETWATCH_LISTEN` wins
/// over the file for the listen address.
pub async fn load_config() -> HubConfig {
    let path = std::env::var("NETWATCH_HUB_CONFIG").unwrap_or_else(|_| "hub.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        info!(%path, "loaded hub config");
        parse_config(&txt)
    } else {
        info!(%path, "no config file, using defaults");
        HubConfig::default()
    };
    if let Ok(listen) = std::env::var("NETWATCH_LISTEN") {
        cfg.listen = listen;
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.listen, "0.0.0.0:8000");
        assert_eq!(cfg.persistence.timeout(), Duration::from_secs(2));
        assert_eq!(cfg.subscribers.send_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.persistence.max_in_flight, 4);
        assert_eq!(cfg.anomalies.capacity, 200);
        assert!(cfg.mqtt.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = parse_config(
            "listen: 127.0.0.1:9000\nsubscribers:\n  buffer: 4\nmqtt:\n  host: broker\n  port: 1883\n",
        );
        assert_eq!(cfg.listen, "127.0.0.1:9000");
        assert_eq!(cfg.subscribers.buffer, 4);
        assert_eq!(cfg.subscribers.send_timeout_ms, 250);
        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.topic, "netwatch/agents/snapshot@v1");
    }

    #[test]
    fn test_persistence_can_be_disabled() {
        let cfg = parse_config("persistence:\n  path: null\n");
        assert!(cfg.persistence.path.is_none());
        assert_eq!(cfg.persistence.timeout_ms, 2000);
    }

    #[test]
    fn test_invalid_yaml_falls_back() {
        let cfg = parse_config("listen: [unclosed");
        assert_eq!(cfg.listen, "0.0.0.0:8000");
        assert_eq!(parse_config("   ").listen, "0.0.0.0:8000");
    }
}
