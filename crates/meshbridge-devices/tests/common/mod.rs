//! Shared fixtures: a simulated network with two colour bulbs, a remote and
//! a group, wired into a bridge with an in-memory bus.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use meshbridge_core::{BridgeSettings, DeviceSettings, EntityOptions, GroupSettings};
use meshbridge_devices::reporting::{COLOR_CAP_TEMPERATURE, COLOR_CAP_XY};
use meshbridge_devices::{
    generic_light, Bridge, BridgeResult, CallKind, Cluster, Context, DeviceInfo, EndpointInfo,
    MemoryBus, ModelDefinition, ParsedTopic, PowerSource, RadioCall, SimulatedRadio,
    StaticCatalog,
};
use serde_json::Value;

pub const BULB: &str = "0x00158d0000000001";
pub const REMOTE: &str = "0x00158d0000000002";
pub const SPOT: &str = "0x00158d0000000003";

pub const LIGHT_MODEL: &str = "LCT015";
pub const REMOTE_MODEL: &str = "RWL021";

pub fn light(ieee: &str) -> DeviceInfo {
    DeviceInfo::new(ieee, LIGHT_MODEL).with_endpoint(
        EndpointInfo::new(11)
            .with_inputs([
                Cluster::Basic,
                Cluster::Groups,
                Cluster::Scenes,
                Cluster::OnOff,
                Cluster::LevelCtrl,
                Cluster::ColorCtrl,
            ])
            .with_color_capabilities(COLOR_CAP_XY | COLOR_CAP_TEMPERATURE),
    )
}

pub fn remote() -> DeviceInfo {
    DeviceInfo::new(REMOTE, REMOTE_MODEL)
        .with_power_source(PowerSource::Battery)
        .with_endpoint(
            EndpointInfo::new(1)
                .with_inputs([Cluster::Basic])
                .with_outputs([
                    Cluster::Basic,
                    Cluster::Scenes,
                    Cluster::OnOff,
                    Cluster::LevelCtrl,
                ]),
        )
}

pub fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_model(generic_light(LIGHT_MODEL, "Philips"))
        .with_model(ModelDefinition::new(REMOTE_MODEL, "Philips").with_description("Dimmer switch"))
}

fn device(ieee: &str, friendly_name: &str) -> DeviceSettings {
    DeviceSettings {
        ieee: ieee.to_string(),
        friendly_name: friendly_name.to_string(),
        options: EntityOptions::default(),
    }
}

pub fn settings() -> BridgeSettings {
    BridgeSettings {
        devices: vec![
            device(BULB, "living/bulb"),
            device(REMOTE, "remote"),
            device(SPOT, "spot"),
        ],
        groups: vec![GroupSettings {
            id: 1,
            friendly_name: "living".to_string(),
            members: vec![format!("{}/11", BULB), format!("{}/11", SPOT)],
            options: EntityOptions::default(),
        }],
        ..Default::default()
    }
}

pub struct Harness {
    pub bridge: Bridge,
    pub radio: Arc<SimulatedRadio>,
    pub bus: Arc<MemoryBus>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: BridgeSettings) -> Self {
        let radio = Arc::new(
            SimulatedRadio::new()
                .with_device(light(BULB))
                .with_device(light(SPOT))
                .with_device(remote()),
        );
        let bus = Arc::new(MemoryBus::new());
        let bridge = Bridge::new(settings, radio.clone(), bus.clone(), Arc::new(catalog()))
            .expect("bridge builds");
        Self { bridge, radio, bus }
    }

    pub fn ctx(&self) -> &Context {
        self.bridge.context()
    }

    /// Send a `/set` message and wait for its publish.
    pub async fn set(&self, alias: &str, payload: Value) {
        self.send(&format!("zigbee2mqtt/{}/set", alias), payload.to_string().as_bytes())
            .await
            .expect("message handled");
    }

    pub async fn send(&self, topic: &str, payload: &[u8]) -> BridgeResult<()> {
        let ParsedTopic::Device(device_topic) = self.ctx().topics.parse(topic) else {
            panic!("not a device topic: {}", topic);
        };
        self.bridge.translator().handle(topic, &device_topic, payload).await
    }

    /// Last state published for an alias.
    pub fn state(&self, alias: &str) -> Value {
        self.bus
            .last(&format!("zigbee2mqtt/{}", alias))
            .map(|p| p.json())
            .unwrap_or(Value::Null)
    }

    /// `(command, payload)` of every command sent so far.
    pub fn commands(&self) -> Vec<(String, Value)> {
        self.radio
            .calls_of(CallKind::Command)
            .into_iter()
            .filter_map(|call| match call {
                RadioCall::Command { command, payload, .. } => Some((command, payload)),
                _ => None,
            })
            .collect()
    }
}

/// Poll `condition` until it holds, panicking after a while.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}
