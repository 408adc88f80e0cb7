//! Message bus client.
//!
//! The bridge publishes through the [`BusClient`] trait and receives inbound
//! messages as [`BusMessage`]s on an mpsc channel. [`MqttBus`] implements it
//! over `rumqttc`; [`MemoryBus`] records publishes for tests and the
//! simulator.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::BridgeResult;

/// Delivery options of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub retain: bool,
    pub qos: u8,
}

impl PublishOptions {
    pub fn retained() -> Self {
        Self {
            retain: true,
            qos: 0,
        }
    }
}

/// Inbound bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn json(topic: impl Into<String>, payload: &Value) -> Self {
        Self::new(topic, payload.to_string())
    }
}

/// Publish/subscribe client.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> BridgeResult<()>;

    async fn subscribe(&self, pattern: &str) -> BridgeResult<()>;
}

/// Shared bus handle.
pub type SharedBus = Arc<dyn BusClient>;

/// A message published through [`MemoryBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub options: PublishOptions,
}

impl Published {
    /// Payload parsed as JSON, `Null` when it is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// In-memory bus that records every publish.
#[derive(Default)]
pub struct MemoryBus {
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<String>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published
            .lock()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    pub fn last(&self, topic: &str) -> Option<Published> {
        self.published
            .lock()
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .cloned()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> BridgeResult<()> {
        self.published.lock().push(Published {
            topic: topic.to_string(),
            payload,
            options,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BridgeResult<()> {
        self.subscriptions.lock().push(pattern.to_string());
        Ok(())
    }
}

#[cfg(feature = "mqtt")]
pub use mqtt::MqttBus;

#[cfg(feature = "mqtt")]
mod mqtt {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use meshbridge_core::MqttSettings;
    use parking_lot::Mutex;
    use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
    use tokio::sync::mpsc;
    use tracing::{debug, info, warn};

    use super::{BusClient, BusMessage, PublishOptions};
    use crate::error::{BridgeError, BridgeResult};

    const RECONNECT_DELAY: Duration = Duration::from_secs(5);

    fn qos(level: u8) -> QoS {
        match level {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    /// MQTT client over `rumqttc`.
    ///
    /// The event loop runs in a background task that forwards incoming
    /// publishes and restores subscriptions after every reconnect.
    pub struct MqttBus {
        client: AsyncClient,
        subscriptions: Arc<Mutex<Vec<String>>>,
    }

    impl MqttBus {
        /// Connect to the broker. `will_topic` receives a retained `offline`
        /// if the connection drops without a clean shutdown.
        pub fn connect(
            settings: &MqttSettings,
            will_topic: &str,
        ) -> (Self, mpsc::Receiver<BusMessage>) {
            let client_id = settings
                .client_id
                .clone()
                .unwrap_or_else(|| format!("meshbridge_{}", uuid::Uuid::new_v4().simple()));

            let mut options = MqttOptions::new(client_id, &settings.server, settings.port);
            options.set_keep_alive(Duration::from_secs(settings.keepalive_secs.max(5)));
            options.set_clean_session(true);
            options.set_last_will(LastWill::new(will_topic, "offline", QoS::AtLeastOnce, true));
            if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
                options.set_credentials(user, password);
            }

            let (client, mut event_loop) = AsyncClient::new(options, 100);
            let (tx, rx) = mpsc::channel(1000);
            let subscriptions: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

            let resubscribe_client = client.clone();
            let resubscribe = subscriptions.clone();
            let server = format!("{}:{}", settings.server, settings.port);
            tokio::spawn(async move {
                loop {
                    match event_loop.poll().await {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let message = BusMessage {
                                topic: publish.topic,
                                payload: publish.payload.to_vec(),
                            };
                            if tx.send(message).await.is_err() {
                                debug!(
                                    category = "mqtt",
                                    "Bus receiver dropped, stopping event loop"
                                );
                                break;
                            }
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!(category = "mqtt", "Connected to MQTT broker {}", server);
                            for pattern in resubscribe.lock().iter() {
                                let subscribed = resubscribe_client
                                    .try_subscribe(pattern.as_str(), QoS::AtLeastOnce);
                                if let Err(e) = subscribed {
                                    warn!(
                                        category = "mqtt",
                                        "Failed to resubscribe to {}: {}",
                                        pattern,
                                        e
                                    );
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(
                                category = "mqtt",
                                "MQTT connection error: {}, retrying in {}s",
                                e,
                                RECONNECT_DELAY.as_secs()
                            );
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            });

            (
                Self {
                    client,
                    subscriptions,
                },
                rx,
            )
        }

        /// Send a disconnect to the broker.
        pub async fn disconnect(&self) -> BridgeResult<()> {
            self.client
                .disconnect()
                .await
                .map_err(|e| BridgeError::Bus(e.to_string()))
        }
    }

    #[async_trait]
    impl BusClient for MqttBus {
        async fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            options: PublishOptions,
        ) -> BridgeResult<()> {
            self.client
                .publish(topic, qos(options.qos), options.retain, payload)
                .await
                .map_err(|e| BridgeError::Bus(format!("Publish to {} failed: {}", topic, e)))
        }

        async fn subscribe(&self, pattern: &str) -> BridgeResult<()> {
            self.subscriptions.lock().push(pattern.to_string());
            self.client
                .subscribe(pattern, QoS::AtLeastOnce)
                .await
                .map_err(|e| BridgeError::Bus(format!("Subscribe to {} failed: {}", pattern, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_bus_records_in_order() {
        let bus = MemoryBus::new();
        bus.publish("a", b"1".to_vec(), PublishOptions::default())
            .await
            .unwrap();
        bus.publish("a", br#"{"state":"ON"}"#.to_vec(), PublishOptions::retained())
            .await
            .unwrap();

        assert_eq!(bus.published_to("a").len(), 2);
        let last = bus.last("a").unwrap();
        assert!(last.options.retain);
        assert_eq!(last.json()["state"], "ON");
        assert!(bus.last("b").is_none());
    }
}
