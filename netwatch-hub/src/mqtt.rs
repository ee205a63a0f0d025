use crate::config::MqttConf;
use crate::coordinator::Coordinator;
use crate::health::HealthTracker;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Feeds snapshots published on the broker into the same path as HTTP submissions.
pub fn spawn_mqtt_listener(conf: MqttConf, coordinator: Arc<Coordinator>, health: HealthTracker) {
    task::spawn(async move {
        let mut opts = MqttOptions::new("netwatch-hub", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        health.mark_mqtt_connecting();
        info!(host = %conf.host, port = conf.port, topic = %conf.topic, "starting MQTT ingestion");

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    // the session is not persistent, subscribe again after every (re)connect
                    if let Err(e) = client.subscribe(conf.topic.as_str(), QoS::AtLeastOnce).await {
                        error!("MQTT subscribe failed: {e:?}");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    dispatch_publish(&coordinator, &conf.topic, p.topic, p.payload.to_vec());
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT error: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Runs the submission on its own task so the event loop keeps polling.
/// Publishes on other topics are dropped without spawning.
pub fn dispatch_publish(
    coordinator: &Arc<Coordinator>,
    ingestion_topic: &str,
    topic: String,
    payload: Vec<u8>,
) -> Option<JoinHandle<()>> {
    if topic != ingestion_topic {
        return None;
    }
    let coordinator = coordinator.clone();
    Some(task::spawn(async move {
        match coordinator.submit(&payload).await {
            Ok(ack) => debug!(source_id = %ack.source_id, "MQTT snapshot accepted"),
            Err(e) => warn!(%topic, "MQTT snapshot rejected: {e}"),
        }
    }))
}
