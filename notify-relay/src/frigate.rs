//! Subscribe to Frigate events over MQTT and feed them to the dispatch pipeline.
use std::sync::Arc;
use std::time;

use health::{ComponentStatus, HealthHandle};
use notify_common::event::DetectionEvent;
use notify_common::pipeline::{DispatchPipeline, Dispatched};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::error::RelayError;

/// Frigate event payloads routinely exceed rumqttc's 10KiB default.
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// The subset of a Frigate `frigate/events` message we act on.
#[derive(Deserialize, Debug, Default)]
pub struct FrigateMessage {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub before: Option<FrigateObject>,
    pub after: Option<FrigateObject>,
}

#[derive(Deserialize, Debug, Default)]
pub struct FrigateObject {
    pub id: Option<String>,
    pub camera: Option<String>,
    pub snapshot: Option<FrigateSnapshot>,
    pub entered_zones: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
pub struct FrigateSnapshot {
    pub frame_time: Option<f64>,
}

fn has_zones(object: &Option<FrigateObject>) -> bool {
    object
        .as_ref()
        .and_then(|object| object.entered_zones.as_ref())
        .is_some_and(|zones| !zones.is_empty())
}

impl From<FrigateMessage> for DetectionEvent {
    fn from(message: FrigateMessage) -> Self {
        let has_zone_entry = has_zones(&message.after);
        let had_zone_entry = has_zones(&message.before);
        let is_new_track = message.kind.as_deref() == Some("new");
        let after = message.after.unwrap_or_default();

        DetectionEvent {
            id: after.id,
            key: after.camera,
            timestamp: after.snapshot.and_then(|snapshot| snapshot.frame_time),
            has_zone_entry,
            had_zone_entry,
            is_new_track,
        }
    }
}

pub fn decode_event(payload: &[u8]) -> Result<DetectionEvent, serde_json::Error> {
    serde_json::from_slice::<FrigateMessage>(payload).map(DetectionEvent::from)
}

/// Poll `eventloop` until the broker acknowledges the connection, giving up
/// after `attempts` failed attempts with a fixed `delay` in between.
pub async fn connect(
    eventloop: &mut EventLoop,
    broker: &str,
    attempts: u32,
    delay: time::Duration,
) -> Result<(), RelayError> {
    let attempts = attempts.max(1);
    let mut failures = 0;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker at {}", broker);
                return Ok(());
            }
            Ok(event) => debug!("MQTT event before ConnAck: {:?}", event),
            Err(e) => {
                failures += 1;
                if failures >= attempts {
                    error!(
                        "failed to connect to MQTT broker after {} attempts: {}",
                        attempts, e
                    );
                    return Err(RelayError::MqttConnect {
                        broker: broker.to_owned(),
                        attempts,
                    });
                }

                error!(
                    "failed to connect to MQTT broker: {}, retrying in {:?}",
                    e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

pub struct FrigateSubscriber {
    pipeline: Arc<DispatchPipeline>,
    options: MqttOptions,
    broker: String,
    topic: String,
    connect_attempts: u32,
    retry_delay: time::Duration,
    liveness: HealthHandle,
}

impl FrigateSubscriber {
    pub fn new(config: &MqttConfig, pipeline: Arc<DispatchPipeline>, liveness: HealthHandle) -> Self {
        let mut options = MqttOptions::new(
            &config.client_id,
            &config.broker_address,
            config.broker_port,
        );
        options
            .set_keep_alive(config.keep_alive.0)
            .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }

        Self {
            pipeline,
            options,
            broker: config.broker(),
            topic: config.topic.clone(),
            connect_attempts: config.connect_attempts,
            retry_delay: config.connect_retry_delay.0,
            liveness,
        }
    }

    /// Connect, subscribe, and process messages one at a time until the
    /// initial connection fails for good. Later disconnects are retried forever.
    pub async fn run(self) -> Result<(), RelayError> {
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), 10);

        if let Err(e) = connect(
            &mut eventloop,
            &self.broker,
            self.connect_attempts,
            self.retry_delay,
        )
        .await
        {
            self.liveness.report_status(ComponentStatus::Unhealthy);
            return Err(e);
        }
        self.subscribe(&client).await?;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.liveness.report_healthy();
                    self.handle_message(&publish.payload).await;
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("reconnected to MQTT broker at {}", self.broker);
                    self.liveness.report_healthy();
                    self.subscribe(&client).await?;
                }
                Ok(_) => self.liveness.report_healthy(),
                Err(e) => {
                    warn!(
                        "lost connection to MQTT broker: {}, reconnecting in {:?}",
                        e, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn subscribe(&self, client: &AsyncClient) -> Result<(), RelayError> {
        client
            .subscribe(self.topic.as_str(), QoS::AtMostOnce)
            .await
            .map_err(|error| RelayError::MqttSubscribe {
                topic: self.topic.clone(),
                error,
            })?;
        info!("subscribed to {}", self.topic);
        Ok(())
    }

    /// Decode and dispatch one message. Failures are logged, never raised: MQTT
    /// has no way to report them back to Frigate.
    pub async fn handle_message(&self, payload: &[u8]) {
        let event = match decode_event(payload) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!("notify_malformed_messages_total").increment(1);
                error!("failed to parse Frigate event message: {}", e);
                return;
            }
        };

        match self.pipeline.dispatch_event(&event).await {
            Ok(Dispatched::Delivered) => {
                info!("notified for event {:?} on {:?}", event.id, event.key)
            }
            Ok(Dispatched::Dropped(_)) => {}
            Err(e) => error!("failed to notify for event {:?}: {}", event.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use health::HealthRegistry;
    use httpmock::prelude::*;
    use notify_common::gate::EventGate;
    use notify_common::notifier::Notifier;
    use notify_common::retry::RetryPolicy;
    use notify_common::snapshot::SnapshotClient;
    use notify_common::token::TokenPool;

    use super::*;

    const NEW_ZONED_EVENT: &str = r#"{
        "type": "new",
        "before": {"id": "123", "camera": "front", "entered_zones": []},
        "after": {
            "id": "123",
            "camera": "front",
            "label": "person",
            "snapshot": {"frame_time": 100.0, "box": [0, 0, 10, 10]},
            "entered_zones": ["zone1"]
        }
    }"#;

    fn subscriber(server: &MockServer) -> FrigateSubscriber {
        let timeout = time::Duration::from_secs(5);
        let pipeline = DispatchPipeline::new(
            EventGate::default(),
            TokenPool::new(["A", "B"]).unwrap(),
            Notifier::new(&server.url("/api/notify"), timeout, RetryPolicy::immediate(0)),
            SnapshotClient::new(&server.base_url(), timeout).unwrap(),
        );
        let options = MqttOptions::new("test", "127.0.0.1", 1);

        FrigateSubscriber {
            pipeline: Arc::new(pipeline),
            options,
            broker: "127.0.0.1:1".to_owned(),
            topic: "frigate/events".to_owned(),
            connect_attempts: 1,
            retry_delay: time::Duration::ZERO,
            liveness: HealthRegistry::new("liveness")
                .register("mqtt_subscriber", ::time::Duration::seconds(30)),
        }
    }

    #[test]
    fn test_decode_new_zoned_event() {
        let event = decode_event(NEW_ZONED_EVENT.as_bytes()).unwrap();

        assert_eq!(
            event,
            DetectionEvent {
                id: Some("123".to_owned()),
                key: Some("front".to_owned()),
                timestamp: Some(100.0),
                has_zone_entry: true,
                had_zone_entry: false,
                is_new_track: true,
            }
        );
    }

    #[test]
    fn test_decode_update_with_prior_zone() {
        let payload = r#"{
            "type": "update",
            "before": {"entered_zones": ["zone1"]},
            "after": {"id": "123", "camera": "front", "snapshot": {"frame_time": 105.2}, "entered_zones": ["zone1"]}
        }"#;

        let event = decode_event(payload.as_bytes()).unwrap();

        assert!(event.has_zone_entry);
        assert!(event.had_zone_entry);
        assert!(!event.is_new_track);
        assert_eq!(event.timestamp, Some(105.2));
    }

    #[test]
    fn test_decode_tolerates_missing_and_null_fields() {
        let event = decode_event(br#"{"type": "end", "after": {"snapshot": null, "entered_zones": null}}"#)
            .unwrap();
        assert_eq!(event, DetectionEvent::default());

        let event = decode_event(b"{}").unwrap();
        assert_eq!(event, DetectionEvent::default());
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        assert!(decode_event(b"not json").is_err());
        assert!(decode_event(br#"{"after": {"entered_zones": "zone1"}}"#).is_err());
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_configured_attempts() {
        let (_client, mut eventloop) = AsyncClient::new(MqttOptions::new("test", "127.0.0.1", 1), 10);

        let error = connect(&mut eventloop, "127.0.0.1:1", 2, time::Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RelayError::MqttConnect { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_run_reports_unhealthy_when_broker_is_unreachable() {
        let server = MockServer::start();
        let registry = HealthRegistry::new("liveness");
        let mut subscriber = subscriber(&server);
        subscriber.liveness = registry.register("mqtt_subscriber", ::time::Duration::seconds(30));

        assert!(subscriber.run().await.is_err());
        assert_eq!(
            registry.get_status().components.get("mqtt_subscriber"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[tokio::test]
    async fn test_message_is_dispatched_once_per_interval() {
        let server = MockServer::start();
        let snapshot = server.mock(|when, then| {
            when.method(GET).path("/api/events/123/snapshot.jpg");
            then.status(200).body("JPEGDATA");
        });
        let provider = server.mock(|when, then| {
            when.method(POST)
                .path("/api/notify")
                .header("authorization", "Bearer A")
                .body_contains("front");
            then.status(200);
        });

        let subscriber = subscriber(&server);

        subscriber.handle_message(NEW_ZONED_EVENT.as_bytes()).await;
        subscriber
            .handle_message(NEW_ZONED_EVENT.replace("100.0", "100.5").as_bytes())
            .await;

        assert_eq!(snapshot.hits(), 1);
        assert_eq!(provider.hits(), 1);
        assert_eq!(subscriber.pipeline.current_token().await, "B");
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let server = MockServer::start();
        let provider = server.mock(|when, then| {
            when.method(POST).path("/api/notify");
            then.status(200);
        });

        let subscriber = subscriber(&server);
        subscriber.handle_message(b"{\"type\": ").await;

        assert_eq!(provider.hits(), 0);
    }
}
