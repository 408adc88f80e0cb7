//! Shared handles passed to every engine of the bridge.

use std::sync::Arc;

use meshbridge_core::{BridgeEvent, BridgeSettings, EventBus};
use serde_json::Value;
use tracing::warn;

use crate::bus::{PublishOptions, SharedBus};
use crate::catalog::{ModelDefinition, SharedCatalog};
use crate::entity::EntityRegistry;
use crate::error::BridgeResult;
use crate::queue::RadioQueue;
use crate::radio::{DeviceInfo, Ieee, SharedRadio};
use crate::runtime::DeviceRuntimeRegistry;
use crate::state::StateCache;
use crate::topic::Topics;

/// Everything an engine needs. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    pub settings: Arc<BridgeSettings>,
    pub topics: Topics,
    pub entities: EntityRegistry,
    pub runtime: DeviceRuntimeRegistry,
    pub states: StateCache,
    pub catalog: SharedCatalog,
    pub radio: SharedRadio,
    pub queue: RadioQueue,
    pub bus: SharedBus,
    pub events: EventBus,
}

impl Context {
    /// Build the context and spawn the radio queue. Must be called inside a
    /// tokio runtime.
    pub fn new(
        settings: BridgeSettings,
        radio: SharedRadio,
        bus: SharedBus,
        catalog: SharedCatalog,
    ) -> BridgeResult<Self> {
        let entities = EntityRegistry::from_settings(&settings)?;
        let states = match &settings.advanced.state_file {
            Some(path) => StateCache::open(path)?,
            None => StateCache::new(),
        };
        Ok(Self {
            topics: Topics::new(settings.mqtt.base_topic.clone()),
            queue: RadioQueue::new(settings.queue.operation_timeout()),
            settings: Arc::new(settings),
            entities,
            runtime: DeviceRuntimeRegistry::new(),
            states,
            catalog,
            radio,
            bus,
            events: EventBus::with_name("meshbridge"),
        })
    }

    /// Cached device description and its model definition.
    pub async fn describe(
        &self,
        ieee: &Ieee,
    ) -> (Option<DeviceInfo>, Option<Arc<ModelDefinition>>) {
        let info = self.radio.device(ieee).await;
        let definition = info
            .as_ref()
            .and_then(|i| i.model_id.as_deref())
            .and_then(|model| self.catalog.find(model));
        (info, definition)
    }

    pub async fn publish_json(
        &self,
        topic: &str,
        payload: &Value,
        options: PublishOptions,
    ) -> BridgeResult<()> {
        self.bus
            .publish(topic, payload.to_string().into_bytes(), options)
            .await
    }

    /// Publish and log failures instead of returning them.
    pub async fn publish_or_log(&self, topic: &str, payload: &Value, options: PublishOptions) {
        if let Err(e) = self.publish_json(topic, payload, options).await {
            warn!(category = "bus", topic, "Publish failed: {}", e);
        }
    }

    /// Remove a retained message by publishing an empty retained payload.
    pub async fn clear_retained(&self, topic: &str) {
        if let Err(e) = self.bus.publish(topic, Vec::new(), PublishOptions::retained()).await {
            warn!(category = "bus", topic, "Failed to clear retained message: {}", e);
        }
    }

    pub fn emit(&self, event: BridgeEvent) {
        self.events.publish(event);
    }
}
