//! Device Operation Orchestrator
//!
//! This crate bridges a lossy mesh radio network and an MQTT bus. It turns
//! bus messages into correctly sequenced radio operations, tracks per-device
//! lifecycle state and turns radio events back into bus messages.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `mqtt` | ✅ | MQTT bus client over `rumqttc` |
//!
//! ## Architecture
//!
//! - **RadioQueue**: single-concurrency FIFO every radio call goes through
//! - **Translator**: `/set` and `/get` messages to radio operations, reports to state
//! - **Configurator**: post-join configuration state machine
//! - **BindingEngine**: bind/unbind requests and attribute reporting
//! - **AvailabilityMonitor**: liveness timers, probes and availability topics
//! - **Bridge**: dispatch loop routing radio events and bus messages
//!
//! The radio stack, the model catalog and the bus client are collaborators
//! behind the [`RadioDriver`], [`Catalog`] and [`BusClient`] traits.

pub mod availability;
pub mod bind;
pub mod bridge;
pub mod bus;
pub mod catalog;
pub mod configure;
pub mod context;
pub mod converters;
pub mod entity;
pub mod error;
pub mod queue;
pub mod radio;
pub mod reporting;
pub mod runtime;
pub mod sim;
pub mod state;
pub mod topic;
pub mod translate;

pub use availability::AvailabilityMonitor;
pub use bind::{BindAction, BindRequest, BindResult, BindingEngine, DEFAULT_BIND_GROUP_ALIAS};
pub use bridge::Bridge;
pub use bus::{BusClient, BusMessage, MemoryBus, PublishOptions, Published, SharedBus};
#[cfg(feature = "mqtt")]
pub use bus::MqttBus;
pub use catalog::{generic_light, Catalog, ModelDefinition, SharedCatalog, StaticCatalog};
pub use configure::{
    ConfigureOutcome, ConfigureRoutine, Configurator, DeviceHandle, StandardLightConfigure, Trigger,
    MAX_CONFIGURE_ATTEMPTS,
};
pub use context::Context;
pub use converters::{Converter, ConvertMeta, FromConverter, Operation, RadioAction};
pub use entity::{DeviceEntity, Entity, EntityKey, EntityRegistry, GroupEntity};
pub use error::{BridgeError, BridgeResult, Side};
pub use queue::RadioQueue;
pub use radio::{
    Cluster, DeviceInfo, EndpointAddr, EndpointId, EndpointInfo, GroupId, Ieee, PowerSource,
    RadioDriver, RadioError, RadioEvent, RadioResult, RadioTarget, ReportingConfig, SharedRadio,
};
pub use runtime::{Classification, ConfigurationStatus, DeviceRuntimeRegistry};
pub use sim::{CallKind, RadioCall, SimulatedRadio};
pub use state::StateCache;
pub use topic::{DeviceTopic, ParsedTopic, RequestKind, TopicKind, Topics};
pub use translate::{PendingPublish, Translator};
