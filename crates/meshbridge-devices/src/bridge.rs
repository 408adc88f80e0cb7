//! The bridge: dispatch loop wiring radio events and bus messages into the
//! engines.
//!
//! ```text
//!  RadioEvent ──┐                       ┌─▶ Translator ──────┐
//!               ├─▶ Bridge::run (one at ├─▶ Configurator ────┼─▶ RadioQueue ─▶ RadioDriver
//!  BusMessage ──┘   a time)             ├─▶ BindingEngine ───┤
//!                                       └─▶ AvailabilityMonitor
//! ```
//!
//! The loop itself never waits for a radio operation: translated messages
//! are enqueued inline and their completions, bridge requests and
//! configuration runs are spawned.

use std::future::Future;

use meshbridge_core::{AvailabilityState, BridgeEvent, BridgeSettings, EventBus};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::availability::AvailabilityMonitor;
use crate::bind::{BindAction, BindRequest, BindingEngine};
use crate::bus::{BusMessage, PublishOptions, SharedBus};
use crate::catalog::SharedCatalog;
use crate::configure::{ConfigureOutcome, Configurator, Trigger};
use crate::context::Context;
use crate::entity::{Entity, EntityKey};
use crate::error::{BridgeError, BridgeResult};
use crate::radio::{Ieee, RadioEvent, SharedRadio};
use crate::runtime::ConfigurationStatus;
use crate::topic::{ParsedTopic, RequestKind};
use crate::translate::Translator;

/// Payload of `bridge/request/device/rename`.
#[derive(Debug, Deserialize)]
struct RenameRequest {
    from: String,
    to: String,
}

/// Device Operation Orchestrator.
#[derive(Clone)]
pub struct Bridge {
    ctx: Context,
    translator: Translator,
    configurator: Configurator,
    binder: BindingEngine,
    availability: AvailabilityMonitor,
}

impl Bridge {
    /// Build the bridge. Must be called inside a tokio runtime, the radio
    /// queue is spawned here.
    pub fn new(
        settings: BridgeSettings,
        radio: SharedRadio,
        bus: SharedBus,
        catalog: SharedCatalog,
    ) -> BridgeResult<Self> {
        let ctx = Context::new(settings, radio, bus, catalog)?;
        Ok(Self {
            translator: Translator::new(ctx.clone()),
            configurator: Configurator::new(ctx.clone()),
            binder: BindingEngine::new(ctx.clone()),
            availability: AvailabilityMonitor::new(ctx.clone()),
            ctx,
        })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn configurator(&self) -> &Configurator {
        &self.configurator
    }

    pub fn binder(&self) -> &BindingEngine {
        &self.binder
    }

    pub fn availability(&self) -> &AvailabilityMonitor {
        &self.availability
    }

    /// Subscribe, announce the bridge, start monitoring known devices and
    /// kick off startup configuration.
    pub async fn start(&self) -> BridgeResult<()> {
        self.ctx.bus.subscribe(&self.ctx.topics.subscription()).await?;
        self.ctx
            .bus
            .publish(
                &self.ctx.topics.bridge_state(),
                b"online".to_vec(),
                PublishOptions::retained(),
            )
            .await?;

        let devices = self.ctx.radio.devices().await;
        info!(
            category = "bridge",
            devices = devices.len(),
            base_topic = self.ctx.topics.base(),
            "Bridge started"
        );
        for info in devices {
            self.ctx.entities.ensure_device(&info.ieee);
            self.availability.track(&info);
            self.spawn_configure(info.ieee.clone(), Trigger::Startup);
        }
        Ok(())
    }

    /// Process radio events and bus messages until `shutdown` resolves or
    /// both channels close.
    pub async fn run(
        &self,
        mut radio_rx: mpsc::Receiver<RadioEvent>,
        mut bus_rx: mpsc::Receiver<BusMessage>,
        shutdown: impl Future<Output = ()>,
    ) -> BridgeResult<()> {
        tokio::pin!(shutdown);
        let mut radio_open = true;
        let mut bus_open = true;

        while radio_open || bus_open {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(category = "bridge", "Shutdown requested");
                    break;
                }
                event = radio_rx.recv(), if radio_open => match event {
                    Some(event) => self.handle_radio_event(event).await,
                    None => {
                        warn!(category = "bridge", "Radio event channel closed");
                        radio_open = false;
                    }
                },
                message = bus_rx.recv(), if bus_open => match message {
                    Some(message) => self.handle_bus_message(message).await,
                    None => {
                        warn!(category = "bridge", "Bus channel closed");
                        bus_open = false;
                    }
                },
            }
        }
        Ok(())
    }

    /// Stop the radio queue, announce the bridge offline and persist state.
    pub async fn stop(&self) -> BridgeResult<()> {
        self.ctx.queue.stop();
        if let Err(e) = self
            .ctx
            .bus
            .publish(
                &self.ctx.topics.bridge_state(),
                b"offline".to_vec(),
                PublishOptions::retained(),
            )
            .await
        {
            warn!(category = "bridge", "Failed to publish offline state: {}", e);
        }
        self.ctx.states.save()?;
        info!(category = "bridge", "Bridge stopped");
        Ok(())
    }

    pub async fn handle_radio_event(&self, event: RadioEvent) {
        trace!(category = "bridge", ?event, "Radio event");
        let now = chrono::Utc::now().timestamp();
        match event {
            RadioEvent::DeviceJoined { ieee } => {
                let device = self.ctx.entities.ensure_device(&ieee);
                info!(
                    category = "bridge",
                    ieee = %ieee,
                    "Device '{}' joined",
                    device.friendly_name
                );
                if let Some(info) = self.ctx.radio.device(&ieee).await {
                    self.availability.track(&info);
                }
                self.availability.seen(&ieee).await;
                self.ctx.emit(BridgeEvent::DeviceJoined {
                    ieee: ieee.to_string(),
                    timestamp: now,
                });
            }
            RadioEvent::DeviceAnnounced { ieee } => {
                let device = self.ctx.entities.ensure_device(&ieee);
                let epoch = self.ctx.runtime.rejoin(&ieee);
                info!(
                    category = "bridge",
                    ieee = %ieee,
                    epoch,
                    "Device '{}' announced, configuration reset",
                    device.friendly_name
                );
                self.availability.seen(&ieee).await;
                self.ctx.emit(BridgeEvent::DeviceAnnounced {
                    ieee: ieee.to_string(),
                    timestamp: now,
                });
            }
            RadioEvent::DeviceLeft { ieee } => {
                self.availability.forget(&ieee);
                let removed = self.ctx.entities.remove_device(&ieee);
                self.ctx.states.remove(&EntityKey::Device(ieee.clone()));
                if let Some(device) = &removed {
                    self.ctx
                        .clear_retained(&self.ctx.topics.availability(&device.friendly_name))
                        .await;
                }
                info!(
                    category = "bridge",
                    ieee = %ieee,
                    "Device '{}' left the network",
                    removed.map(|d| d.friendly_name).unwrap_or_else(|| ieee.to_string())
                );
                self.ctx.emit(BridgeEvent::DeviceLeft {
                    ieee: ieee.to_string(),
                    timestamp: now,
                });
            }
            RadioEvent::DeviceInterview { ieee, completed } => {
                if !completed {
                    warn!(category = "bridge", ieee = %ieee, "Interview failed");
                    return;
                }
                self.ctx.entities.ensure_device(&ieee);
                if let Some(info) = self.ctx.radio.device(&ieee).await {
                    self.availability.track(&info);
                }
                info!(category = "bridge", ieee = %ieee, "Interview completed");
                self.spawn_configure(ieee, Trigger::Interview);
            }
            RadioEvent::MessageReceived {
                ieee,
                endpoint,
                cluster,
                attributes,
            } => {
                self.ctx.entities.ensure_device(&ieee);
                self.availability.seen(&ieee).await;
                self.translator
                    .handle_report(&ieee, endpoint, &cluster, &attributes)
                    .await;
                if self.ctx.runtime.configuration(&ieee) == ConfigurationStatus::Unset {
                    self.spawn_configure(ieee, Trigger::FirstMessage);
                }
            }
        }
    }

    pub async fn handle_bus_message(&self, message: BusMessage) {
        match self.ctx.topics.parse(&message.topic) {
            ParsedTopic::Device(device_topic) => {
                match self
                    .translator
                    .submit(&message.topic, &device_topic, &message.payload)
                    .await
                {
                    Ok(Some(pending)) => {
                        tokio::spawn(pending.complete());
                    }
                    Ok(None) => {}
                    Err(e) => warn!(category = "translate", topic = %message.topic, "{}", e),
                }
            }
            ParsedTopic::Request(kind) => {
                let bridge = self.clone();
                tokio::spawn(async move {
                    bridge.respond(kind, &message.payload).await;
                });
            }
            ParsedTopic::Ignored => {
                trace!(category = "bridge", topic = %message.topic, "Ignoring message");
            }
        }
    }

    fn spawn_configure(&self, ieee: Ieee, trigger: Trigger) {
        if !self.configurator.is_eligible(&ieee, trigger) {
            return;
        }
        let configurator = self.configurator.clone();
        tokio::spawn(async move {
            if let Err(e) = configurator.configure(&ieee, trigger).await {
                debug!(
                    category = "configure",
                    ieee = %ieee,
                    ?trigger,
                    "Configure trigger failed: {}",
                    e
                );
            }
        });
    }

    /// Handle a bridge request and publish exactly one response.
    pub async fn respond(&self, kind: RequestKind, payload: &[u8]) {
        let request: Value = serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).trim().to_string()));
        let transaction = request.get("transaction").cloned();

        let (data, error) = match self.handle_request(kind, &request).await {
            Ok((data, error)) => (data, error),
            Err(e) => (json!({}), Some(e.to_string())),
        };

        let mut response = Map::new();
        response.insert("data".to_string(), data);
        response.insert(
            "status".to_string(),
            json!(if error.is_some() { "error" } else { "ok" }),
        );
        if let Some(error) = &error {
            warn!(category = "bridge", request = %kind, "Request failed: {}", error);
            response.insert("error".to_string(), json!(error));
        }
        if let Some(transaction) = transaction {
            response.insert("transaction".to_string(), transaction);
        }
        self.ctx
            .publish_or_log(
                &self.ctx.topics.response(kind),
                &Value::Object(response),
                PublishOptions::default(),
            )
            .await;
    }

    /// Returns the response data and, for requests that ran but failed as a
    /// whole, the error message.
    async fn handle_request(
        &self,
        kind: RequestKind,
        request: &Value,
    ) -> BridgeResult<(Value, Option<String>)> {
        match kind {
            RequestKind::Bind | RequestKind::Unbind => {
                let action = if kind == RequestKind::Bind {
                    BindAction::Bind
                } else {
                    BindAction::Unbind
                };
                let bind_request: BindRequest = serde_json::from_value(request.clone())
                    .map_err(|e| BridgeError::InvalidRequest(e.to_string()))?;
                let result = self.binder.execute(action, &bind_request).await?;
                let error = result.all_failed().then(|| format!("Failed to {}", action));
                let data = serde_json::to_value(&result).map_err(meshbridge_core::Error::from)?;
                Ok((data, error))
            }
            RequestKind::Configure => {
                let id = match request {
                    Value::String(id) => id.clone(),
                    other => other
                        .get("id")
                        .and_then(|id| match id {
                            Value::String(s) => Some(s.clone()),
                            Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        })
                        .ok_or_else(|| BridgeError::InvalidRequest("missing 'id'".to_string()))?,
                };
                let Some(Entity::Device(device)) = self.ctx.entities.resolve(&id) else {
                    return Err(BridgeError::UnknownEntity(id));
                };
                let outcome = self.configurator.configure(&device.ieee, Trigger::Operator).await?;
                let data = json!({ "id": id });
                let error = match outcome {
                    ConfigureOutcome::Configured => None,
                    ConfigureOutcome::Failed { error, .. }
                    | ConfigureOutcome::Exhausted { error, .. } => {
                        Some(format!("Failed to configure '{}' ({})", id, error))
                    }
                    ConfigureOutcome::AlreadyConfiguring => {
                        Some(BridgeError::ConfigurationInProgress(id.clone()).to_string())
                    }
                    ConfigureOutcome::Skipped(reason) => {
                        Some(format!("Cannot configure '{}': {}", id, reason))
                    }
                    ConfigureOutcome::Stale => {
                        Some(format!("Device '{}' rejoined while configuring", id))
                    }
                };
                Ok((data, error))
            }
            RequestKind::Rename => {
                let rename: RenameRequest = serde_json::from_value(request.clone())
                    .map_err(|e| BridgeError::InvalidRequest(e.to_string()))?;
                let key = self.ctx.entities.rename(&rename.from, &rename.to)?;
                if let EntityKey::Device(ieee) = &key {
                    // Clear the retained availability of the old alias and
                    // carry the known state over to the new one.
                    self.ctx
                        .clear_retained(&self.ctx.topics.availability(&rename.from))
                        .await;
                    let state = self.ctx.runtime.availability_state(ieee);
                    if state != AvailabilityState::Unknown {
                        self.ctx
                            .publish_or_log(
                                &self.ctx.topics.availability(&rename.to),
                                &json!({ "state": state }),
                                PublishOptions::retained(),
                            )
                            .await;
                    }
                    self.ctx.emit(BridgeEvent::DeviceRenamed {
                        ieee: ieee.to_string(),
                        from: rename.from.clone(),
                        to: rename.to.clone(),
                        timestamp: chrono::Utc::now().timestamp(),
                    });
                }
                Ok((json!({ "from": rename.from, "to": rename.to }), None))
            }
        }
    }
}
