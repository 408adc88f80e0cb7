//! Core types for meshbridge.
//!
//! This crate holds what every other crate shares: settings, the in-process
//! event bus and the common error type.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;

pub use config::{
    AdvancedSettings, AvailabilitySettings, BridgeSettings, DeviceSettings, EntityOptions,
    GroupSettings, MqttSettings, QueueSettings, COORDINATOR_ALIAS, DEFAULT_BASE_TOPIC,
};
pub use error::{Error, Result};
pub use event::{AvailabilityState, BridgeEvent, EventMetadata};
pub use eventbus::{
    EventBus, EventBusReceiver, FilteredReceiver, SharedEventBus, DEFAULT_CHANNEL_CAPACITY,
};
