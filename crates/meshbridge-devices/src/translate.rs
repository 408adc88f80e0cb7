//! Command translation pipeline.
//!
//! A `/set` or `/get` message goes through these steps:
//!
//! 1. Parse the payload into a key/value map.
//! 2. Resolve the addressed entity and endpoint.
//! 3. Rewrite the message for brightness restore.
//! 4. Order the keys.
//! 5. Run each key through the converter of the entity's model.
//!
//! The resulting operations are enqueued on the radio queue before
//! [`Translator::submit`] returns, so arrival order is kept per device. The
//! returned [`PendingPublish`] awaits their completion and publishes the
//! resulting state; the dispatch loop spawns it instead of waiting.

use std::iter;
use std::sync::Arc;

use meshbridge_core::{BridgeEvent, EntityOptions};
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bus::PublishOptions;
use crate::catalog::{resolve_endpoint, ModelDefinition};
use crate::context::Context;
use crate::converters::{parse_state, ConvertMeta, Converter, Operation, RadioAction};
use crate::entity::{Entity, EntityKey, GroupEntity};
use crate::error::{BridgeError, BridgeResult, Side};
use crate::radio::{
    Cluster, EndpointAddr, EndpointId, GroupId, Ieee, RadioError, RadioResult, RadioTarget,
    SharedRadio,
};
use crate::topic::{DeviceTopic, TopicKind};

/// Keys whose value only lands while the light is on.
const LEVEL_AND_COLOR_KEYS: &[&str] = &["brightness", "brightness_percent", "color", "color_temp"];

const BRIGHTNESS_KEYS: &[&str] = &["brightness", "brightness_percent"];

/// Meta key applied to every operation of a message.
const TRANSITION_KEY: &str = "transition";

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Seconds to tenths of a second; negative or non-numeric values are ignored.
fn tenths(seconds: f64) -> Option<u16> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 10.0).round().min(f64::from(u16::MAX)) as u16)
}

/// Parse a bus payload.
///
/// `/set` accepts a JSON object or a bare `ON`/`OFF`/`TOGGLE`. The
/// single-property forms (`/set/<property>`, `/get/<property>`) accept any
/// value, unquoted text included.
pub fn parse_payload(
    topic: &str,
    device_topic: &DeviceTopic,
    payload: &[u8],
) -> BridgeResult<Map<String, Value>> {
    let malformed = |reason: &str| BridgeError::MalformedMessage {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };
    let text = std::str::from_utf8(payload).map_err(|_| malformed("payload is not UTF-8"))?;
    let parsed = serde_json::from_str::<Value>(text).ok();

    if let Some(property) = &device_topic.property {
        let value = parsed.unwrap_or_else(|| Value::String(text.trim().to_string()));
        let mut message = Map::new();
        message.insert(property.clone(), value);
        return Ok(message);
    }

    match parsed {
        Some(Value::Object(message)) => Ok(message),
        Some(Value::String(s)) if device_topic.kind == TopicKind::Set => bare_state(&s)
            .ok_or_else(|| malformed("expected a JSON object or ON/OFF/TOGGLE")),
        None if device_topic.kind == TopicKind::Set => bare_state(text.trim())
            .ok_or_else(|| malformed("expected a JSON object or ON/OFF/TOGGLE")),
        _ => Err(malformed("expected a JSON object")),
    }
}

fn bare_state(text: &str) -> Option<Map<String, Value>> {
    let state = parse_state(&Value::String(text.to_string()))?;
    let mut message = Map::new();
    message.insert("state".to_string(), json!(state));
    Some(message)
}

/// Evaluation order of message keys.
///
/// Message order, except `state` goes last when the resulting state is OFF
/// and level or colour keys are present, and first otherwise. Hardware that
/// ignores level and colour while off must receive them before the OFF and
/// after the ON.
pub fn ordered_keys(message: &Map<String, Value>, state: &Map<String, Value>) -> Vec<String> {
    let keys: Vec<String> = message
        .keys()
        .filter(|k| k.as_str() != TRANSITION_KEY)
        .cloned()
        .collect();
    let Some(requested) = message.get("state") else {
        return keys;
    };

    let final_off = match parse_state(requested) {
        Some("OFF") => true,
        Some("TOGGLE") => state.get("state").and_then(parse_state) == Some("ON"),
        _ => false,
    };
    let has_level_or_color = keys.iter().any(|k| LEVEL_AND_COLOR_KEYS.contains(&k.as_str()));
    let rest = keys.into_iter().filter(|k| k != "state");
    let state_key = iter::once("state".to_string());
    if final_off && has_level_or_color {
        rest.chain(state_key).collect()
    } else {
        state_key.chain(rest).collect()
    }
}

/// An enqueued operation and where it went.
struct Submitted {
    operation: Operation,
    target: RadioTarget,
    done: oneshot::Receiver<RadioResult<Map<String, Value>>>,
}

/// Operations of one message, awaiting completion.
pub struct PendingPublish {
    ctx: Context,
    entity: Entity,
    definitions: Vec<Arc<ModelDefinition>>,
    /// Epoch of every affected device at dispatch time
    epochs: Vec<(Ieee, u64)>,
    /// Unicast endpoint used for reads of a group
    group_read_target: Option<RadioTarget>,
    submitted: Vec<Submitted>,
}

impl PendingPublish {
    /// Number of enqueued operations.
    pub fn len(&self) -> usize {
        self.submitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submitted.is_empty()
    }

    /// Await every operation, then publish the resulting state.
    ///
    /// The publish waits for all operations of the message, not only the one
    /// that switches the device on or off, so one state message covers the
    /// whole request.
    ///
    /// Optimistic entities publish the state the successful operations
    /// announced. Non-optimistic entities read the attributes back and
    /// publish what the device reports. Read operations (`/get`) always
    /// publish their converted result.
    pub async fn complete(self) {
        let optimistic = self.entity.options().optimistic;
        let alias = self.entity.friendly_name().to_string();
        let mut update = Map::new();
        let mut read_backs: Vec<(RadioTarget, Cluster, Vec<String>)> = Vec::new();

        for submitted in self.submitted {
            let Submitted { operation, target, done } = submitted;
            let result = done.await.unwrap_or(Err(RadioError::QueueClosed));
            let attributes = match result {
                Ok(attributes) => attributes,
                Err(e) => {
                    warn!(
                        category = "translate",
                        entity = %alias,
                        cluster = %operation.cluster,
                        "Radio operation failed: {}",
                        e
                    );
                    continue;
                }
            };

            if let RadioAction::Read { .. } = operation.action {
                let state = self.ctx.states.get(&self.entity.key());
                update.extend(convert_attributes(
                    &self.definitions,
                    &operation.cluster,
                    &attributes,
                    &state,
                ));
                continue;
            }
            if optimistic {
                update.extend(operation.state);
            } else if !operation.read_back.is_empty() {
                let read_target = self.group_read_target.clone().unwrap_or(target);
                let entry = (read_target, operation.cluster, operation.read_back);
                if !read_backs.contains(&entry) {
                    read_backs.push(entry);
                }
            }
        }

        for (target, cluster, attributes) in read_backs {
            let radio = self.ctx.radio.clone();
            let call_target = target.clone();
            let call_cluster = cluster.clone();
            let label = format!("read {} {} {:?}", target, cluster, attributes);
            let result = self
                .ctx
                .queue
                .run(label, async move {
                    radio.read(&call_target, &call_cluster, &attributes).await
                })
                .await;
            match result {
                Ok(values) => {
                    let state = self.ctx.states.get(&self.entity.key());
                    update.extend(convert_attributes(&self.definitions, &cluster, &values, &state));
                }
                Err(e) => warn!(
                    category = "translate",
                    entity = %alias,
                    cluster = %cluster,
                    "Read back failed: {}",
                    e
                ),
            }
        }

        if update.is_empty() {
            debug!(category = "translate", entity = %alias, "Nothing to publish");
            return;
        }

        let stale = self
            .epochs
            .iter()
            .filter(|(ieee, epoch)| !self.ctx.runtime.is_current(ieee, *epoch))
            .map(|(ieee, _)| ieee.clone())
            .collect::<Vec<_>>();
        match &self.entity {
            Entity::Device(device) => {
                if !stale.is_empty() {
                    debug!(
                        category = "translate",
                        ieee = %device.ieee,
                        "Device state is gone, dropping publish"
                    );
                    return;
                }
                publish_state(&self.ctx, &self.entity, &update).await;
            }
            Entity::Group(group) => {
                publish_state(&self.ctx, &self.entity, &update).await;

                let mut members: Vec<&Ieee> = Vec::new();
                for member in &group.members {
                    if !stale.contains(&member.ieee) && !members.contains(&&member.ieee) {
                        members.push(&member.ieee);
                    }
                }
                let mut other_groups: Vec<GroupEntity> = Vec::new();
                for ieee in members {
                    if let Some(device) = self.ctx.entities.device(ieee) {
                        publish_state(&self.ctx, &Entity::Device(device), &update).await;
                    }
                    for containing in self.ctx.entities.groups_containing(ieee) {
                        if containing.id != group.id
                            && !other_groups.iter().any(|g| g.id == containing.id)
                        {
                            other_groups.push(containing);
                        }
                    }
                }
                for other in other_groups {
                    publish_state(&self.ctx, &Entity::Group(other), &update).await;
                }
            }
        }
    }
}

/// Convert attributes through the first definitions' from-converters for the
/// cluster.
fn convert_attributes(
    definitions: &[Arc<ModelDefinition>],
    cluster: &Cluster,
    attributes: &Map<String, Value>,
    state: &Map<String, Value>,
) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(converters) = definitions
        .iter()
        .map(|d| d.from_converters_for(cluster))
        .find(|c| !c.is_empty())
    else {
        return out;
    };
    for converter in converters {
        out.extend(converter.convert(attributes, state));
    }
    out
}

/// Merge `update` into the entity's state and publish the result.
async fn publish_state(
    ctx: &Context,
    entity: &Entity,
    update: &Map<String, Value>,
) -> Map<String, Value> {
    let merged = ctx.states.merge(&entity.key(), update);
    let alias = entity.friendly_name();
    let options = entity.options();
    let payload = Value::Object(merged.clone());
    ctx.publish_or_log(
        &ctx.topics.state(alias),
        &payload,
        PublishOptions {
            retain: options.retain,
            qos: options.qos,
        },
    )
    .await;
    ctx.emit(BridgeEvent::StatePublished {
        alias: alias.to_string(),
        state: payload,
        timestamp: chrono::Utc::now().timestamp(),
    });
    merged
}

async fn execute(
    radio: SharedRadio,
    target: RadioTarget,
    cluster: Cluster,
    action: RadioAction,
) -> RadioResult<Map<String, Value>> {
    match action {
        RadioAction::Command { name, payload } => radio
            .command(&target, &cluster, &name, &payload)
            .await
            .map(|_| Map::new()),
        RadioAction::Write { attributes } => radio
            .write(&target, &cluster, &attributes)
            .await
            .map(|_| Map::new()),
        RadioAction::Read { attributes } => radio.read(&target, &cluster, &attributes).await,
    }
}

/// Where the operations of a message go.
enum Destination {
    Device { ieee: Ieee, endpoint: EndpointId },
    Group { id: GroupId, read_target: Option<RadioTarget> },
}

impl Destination {
    fn target(&self, operation: &Operation) -> RadioTarget {
        match self {
            Self::Device { ieee, endpoint } => RadioTarget::Endpoint(EndpointAddr::new(
                ieee.clone(),
                operation.endpoint.unwrap_or(*endpoint),
            )),
            Self::Group { id, read_target } => match (&operation.action, read_target) {
                (RadioAction::Read { .. }, Some(member)) => member.clone(),
                _ => RadioTarget::Group(*id),
            },
        }
    }
}

/// Translates bus messages into radio operations and reports into state.
#[derive(Clone)]
pub struct Translator {
    ctx: Context,
}

impl Translator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Parse, translate and enqueue a message. Returns `None` when no
    /// operation resulted.
    pub async fn submit(
        &self,
        topic: &str,
        device_topic: &DeviceTopic,
        payload: &[u8],
    ) -> BridgeResult<Option<PendingPublish>> {
        let mut message = parse_payload(topic, device_topic, payload)?;
        let (entity, label) = self
            .ctx
            .entities
            .resolve_path(&device_topic.path)
            .ok_or_else(|| BridgeError::UnknownEntity(device_topic.path.clone()))?;
        let alias = entity.friendly_name().to_string();

        let (destination, definitions, epochs) = match &entity {
            Entity::Device(device) => {
                let (info, definition) = self.ctx.describe(&device.ieee).await;
                let endpoint =
                    resolve_endpoint(definition.as_deref(), info.as_ref(), label.as_deref())
                        .ok_or_else(|| BridgeError::UnknownEndpoint {
                            side: Side::Target,
                            alias: alias.clone(),
                            endpoint: label.clone().unwrap_or_default(),
                        })?;
                let epoch = self.ctx.runtime.epoch(&device.ieee);
                (
                    Destination::Device {
                        ieee: device.ieee.clone(),
                        endpoint,
                    },
                    definition.into_iter().collect::<Vec<_>>(),
                    vec![(device.ieee.clone(), epoch)],
                )
            }
            Entity::Group(group) => {
                if let Some(label) = &label {
                    return Err(BridgeError::UnknownEndpoint {
                        side: Side::Target,
                        alias,
                        endpoint: label.clone(),
                    });
                }
                let mut definitions: Vec<Arc<ModelDefinition>> = Vec::new();
                let mut epochs = Vec::new();
                for member in &group.members {
                    if epochs.iter().any(|(ieee, _)| ieee == &member.ieee) {
                        continue;
                    }
                    epochs.push((member.ieee.clone(), self.ctx.runtime.epoch(&member.ieee)));
                    if let (_, Some(definition)) = self.ctx.describe(&member.ieee).await {
                        if !definitions.iter().any(|d| Arc::ptr_eq(d, &definition)) {
                            definitions.push(definition);
                        }
                    }
                }
                let read_target = group.members.first().cloned().map(RadioTarget::Endpoint);
                (Destination::Group { id: group.id, read_target }, definitions, epochs)
            }
        };

        let options = entity.options().clone();
        let key = entity.key();
        let state = self.ctx.states.get(&key);

        let operations = match device_topic.kind {
            TopicKind::Set => {
                let message_transition =
                    message.get(TRANSITION_KEY).and_then(numeric).and_then(tenths);
                let mut transition = message_transition
                    .or_else(|| options.transition.and_then(tenths))
                    .or_else(|| self.ctx.settings.advanced.transition.and_then(tenths));
                self.apply_brightness_restore(
                    &key,
                    &mut message,
                    &state,
                    &mut transition,
                    message_transition,
                );
                self.convert_set(
                    &alias,
                    &definitions,
                    &message,
                    &state,
                    transition,
                    label.as_deref(),
                    &options,
                )
            }
            TopicKind::Get => self.convert_get(
                &alias,
                &definitions,
                &message,
                &state,
                label.as_deref(),
                &options,
            ),
        };

        if operations.is_empty() {
            debug!(category = "translate", entity = %alias, "Message produced no radio operation");
            return Ok(None);
        }

        let mut submitted = Vec::with_capacity(operations.len());
        for operation in operations {
            let target = destination.target(&operation);
            let label = format!("{} {} {:?}", target, operation.cluster, operation.action);
            let future = execute(
                self.ctx.radio.clone(),
                target.clone(),
                operation.cluster.clone(),
                operation.action.clone(),
            );
            let done = self.ctx.queue.enqueue(label, future);
            submitted.push(Submitted { operation, target, done });
        }
        debug!(
            category = "translate",
            entity = %alias,
            operations = submitted.len(),
            "Enqueued message"
        );

        let group_read_target = match destination {
            Destination::Group { read_target, .. } => read_target,
            Destination::Device { .. } => None,
        };
        Ok(Some(PendingPublish {
            ctx: self.ctx.clone(),
            entity,
            definitions,
            epochs,
            group_read_target,
            submitted,
        }))
    }

    /// Submit a message and wait for its publish.
    pub async fn handle(
        &self,
        topic: &str,
        device_topic: &DeviceTopic,
        payload: &[u8],
    ) -> BridgeResult<()> {
        if let Some(pending) = self.submit(topic, device_topic, payload).await? {
            pending.complete().await;
        }
        Ok(())
    }

    /// Rewrite a `/set` message for brightness restore.
    ///
    /// `brightness: 0` turns into an explicit OFF and remembers the last
    /// known brightness; so does an OFF with a transition. An ON without a
    /// level brings the remembered brightness back, with the message's own
    /// transition or none at all.
    fn apply_brightness_restore(
        &self,
        key: &EntityKey,
        message: &mut Map<String, Value>,
        state: &Map<String, Value>,
        transition: &mut Option<u16>,
        message_transition: Option<u16>,
    ) {
        let zero_key = BRIGHTNESS_KEYS
            .iter()
            .find(|k| message.get(**k).and_then(numeric) == Some(0.0));
        if let Some(zero_key) = zero_key {
            message.remove(*zero_key);
            message.insert("state".to_string(), json!("OFF"));
            self.remember_brightness(key, state);
            return;
        }

        if BRIGHTNESS_KEYS.iter().any(|k| message.contains_key(*k)) {
            self.ctx.runtime.update_light(key, |light| light.restore_brightness = None);
            return;
        }

        match message.get("state").and_then(parse_state) {
            Some("OFF") if transition.is_some_and(|t| t > 0) => {
                self.remember_brightness(key, state)
            }
            Some("ON") => {
                let restore = self
                    .ctx
                    .runtime
                    .update_light(key, |light| light.restore_brightness.take());
                if let Some(level) = restore {
                    debug!(category = "translate", entity = %key, level, "Restoring brightness");
                    // The restored level is the ON step and must lead.
                    let rest = std::mem::take(message);
                    message.insert("brightness".to_string(), json!(level));
                    message.extend(rest.into_iter().filter(|(k, _)| k != "state"));
                    *transition = Some(message_transition.unwrap_or(0));
                }
            }
            _ => {}
        }
    }

    fn remember_brightness(&self, key: &EntityKey, state: &Map<String, Value>) {
        let level = state
            .get("brightness")
            .and_then(Value::as_u64)
            .filter(|level| *level > 0)
            .map(|level| level.min(254) as u8);
        if let Some(level) = level {
            self.ctx
                .runtime
                .update_light(key, |light| light.restore_brightness = Some(level));
        }
    }

    fn converter_for(
        definitions: &[Arc<ModelDefinition>],
        key: &str,
    ) -> Option<Arc<dyn Converter>> {
        definitions.iter().find_map(|d| d.converter_for(key))
    }

    fn push_unique(operations: &mut Vec<Operation>, operation: Operation) {
        match operations.iter_mut().find(|existing| existing.same_call(&operation)) {
            Some(existing) => existing.state.extend(operation.state),
            None => operations.push(operation),
        }
    }

    fn convert_set(
        &self,
        alias: &str,
        definitions: &[Arc<ModelDefinition>],
        message: &Map<String, Value>,
        state: &Map<String, Value>,
        transition: Option<u16>,
        endpoint_name: Option<&str>,
        options: &EntityOptions,
    ) -> Vec<Operation> {
        let meta = ConvertMeta {
            message,
            state,
            transition,
            endpoint_name,
            options,
        };
        let mut operations = Vec::new();
        for key in ordered_keys(message, state) {
            let Some(value) = message.get(&key) else {
                continue;
            };
            let Some(converter) = Self::converter_for(definitions, &key) else {
                let err = BridgeError::NoConverter {
                    entity: alias.to_string(),
                    key,
                };
                warn!(category = "translate", "{}", err);
                continue;
            };
            match converter.convert_set(&key, value, &meta) {
                Ok(Some(operation)) => Self::push_unique(&mut operations, operation),
                Ok(None) => {}
                Err(e) => warn!(category = "translate", entity = %alias, "{}", e),
            }
        }
        operations
    }

    fn convert_get(
        &self,
        alias: &str,
        definitions: &[Arc<ModelDefinition>],
        message: &Map<String, Value>,
        state: &Map<String, Value>,
        endpoint_name: Option<&str>,
        options: &EntityOptions,
    ) -> Vec<Operation> {
        let meta = ConvertMeta {
            message,
            state,
            transition: None,
            endpoint_name,
            options,
        };
        let mut operations = Vec::new();
        for key in message.keys() {
            let Some(converter) = Self::converter_for(definitions, key) else {
                warn!(
                    category = "translate",
                    "{}",
                    BridgeError::NoConverter {
                        entity: alias.to_string(),
                        key: key.clone(),
                    }
                );
                continue;
            };
            match converter.convert_get(key, &meta) {
                Ok(Some(operation)) => Self::push_unique(&mut operations, operation),
                Ok(None) => {}
                Err(e) => warn!(category = "translate", entity = %alias, "{}", e),
            }
        }
        operations
    }

    /// Turn an attribute report into state and publish it.
    ///
    /// A level report received while a restore point is held replaces the
    /// restore point. Returns the published state.
    pub async fn handle_report(
        &self,
        ieee: &Ieee,
        endpoint: EndpointId,
        cluster: &Cluster,
        attributes: &Map<String, Value>,
    ) -> Option<Map<String, Value>> {
        let device = self.ctx.entities.ensure_device(ieee);
        let (_, definition) = self.ctx.describe(ieee).await;
        let Some(definition) = definition else {
            debug!(
                category = "translate",
                ieee = %ieee,
                cluster = %cluster,
                "No model definition for report"
            );
            return None;
        };

        let entity = Entity::Device(device);
        let key = entity.key();
        let state = self.ctx.states.get(&key);
        let update = convert_attributes(&[definition], cluster, attributes, &state);
        if update.is_empty() {
            debug!(
                category = "translate",
                ieee = %ieee,
                endpoint,
                cluster = %cluster,
                "Report produced no state"
            );
            return None;
        }

        if let Some(level) = update.get("brightness").and_then(Value::as_u64).filter(|l| *l > 0) {
            self.ctx.runtime.update_light(&key, |light| {
                if light.restore_brightness.is_some() {
                    light.restore_brightness = Some(level.min(254) as u8);
                }
            });
        }

        let merged = publish_state(&self.ctx, &entity, &update).await;
        info!(
            category = "translate",
            ieee = %ieee,
            "Published state of '{}'",
            entity.friendly_name()
        );
        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(kind: TopicKind, property: Option<&str>) -> DeviceTopic {
        DeviceTopic {
            path: "lamp".to_string(),
            kind,
            property: property.map(str::to_string),
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_payload_forms() {
        let set = topic(TopicKind::Set, None);
        let message =
            parse_payload("z/lamp/set", &set, br#"{"state":"ON","brightness":10}"#).unwrap();
        assert_eq!(message.len(), 2);

        let message = parse_payload("z/lamp/set", &set, b"off").unwrap();
        assert_eq!(message["state"], json!("OFF"));

        let err = parse_payload("z/lamp/set", &set, b"dim a bit").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage { .. }));
        assert!(parse_payload("z/lamp/set", &set, b"42").is_err());

        let single = topic(TopicKind::Set, Some("brightness"));
        let message = parse_payload("z/lamp/set/brightness", &single, b"128").unwrap();
        assert_eq!(message["brightness"], json!(128));

        let get = topic(TopicKind::Get, None);
        assert!(parse_payload("z/lamp/get", &get, b"ON").is_err());
    }

    #[test]
    fn test_state_ordering() {
        let empty = Map::new();
        let off = object(json!({ "brightness": 20, "state": "OFF", "color_temp": 300 }));
        assert_eq!(ordered_keys(&off, &empty), vec!["brightness", "color_temp", "state"]);

        let on = object(json!({ "brightness": 20, "state": "ON" }));
        assert_eq!(ordered_keys(&on, &empty), vec!["state", "brightness"]);

        let toggle = object(json!({ "color_temp": 250, "state": "TOGGLE", "transition": 1 }));
        let was_on = object(json!({ "state": "ON" }));
        assert_eq!(ordered_keys(&toggle, &was_on), vec!["color_temp", "state"]);
        assert_eq!(ordered_keys(&toggle, &empty), vec!["state", "color_temp"]);
    }

    #[test]
    fn test_tenths() {
        assert_eq!(tenths(0.5), Some(5));
        assert_eq!(tenths(2.0), Some(20));
        assert_eq!(tenths(-1.0), None);
        assert_eq!(numeric(&json!("1.5")).and_then(tenths), Some(15));
    }
}
