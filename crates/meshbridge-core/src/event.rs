//! Event types flowing through the bridge event bus.
//!
//! These events describe what the orchestrator did, not what the radio
//! reported. In-process observers (tests, the CLI status line) subscribe to
//! them instead of parsing MQTT traffic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Liveness state of a device as seen by the availability monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityState {
    /// Not yet determined since the bridge started
    Unknown,
    /// Device answered a probe or sent a message within its timeout
    Online,
    /// Device missed its timeout
    Offline,
}

impl fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Bridge event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    // ========== Device lifecycle ==========
    /// A device joined the network for the first time
    DeviceJoined { ieee: String, timestamp: i64 },

    /// A known device re-announced itself (rejoin)
    DeviceAnnounced { ieee: String, timestamp: i64 },

    /// A device left the network and its runtime state was discarded
    DeviceLeft { ieee: String, timestamp: i64 },

    /// A device was renamed
    DeviceRenamed {
        ieee: String,
        from: String,
        to: String,
        timestamp: i64,
    },

    // ========== Orchestration ==========
    /// Availability of a device changed
    AvailabilityChanged {
        ieee: String,
        alias: String,
        state: AvailabilityState,
        timestamp: i64,
    },

    /// Configuration status of a device changed
    ConfigurationChanged {
        ieee: String,
        status: String,
        attempts: u32,
        timestamp: i64,
    },

    /// An entity state was published on the bus
    StatePublished {
        alias: String,
        state: serde_json::Value,
        timestamp: i64,
    },
}

impl BridgeEvent {
    /// Get the event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DeviceJoined { .. } => "DeviceJoined",
            Self::DeviceAnnounced { .. } => "DeviceAnnounced",
            Self::DeviceLeft { .. } => "DeviceLeft",
            Self::DeviceRenamed { .. } => "DeviceRenamed",
            Self::AvailabilityChanged { .. } => "AvailabilityChanged",
            Self::ConfigurationChanged { .. } => "ConfigurationChanged",
            Self::StatePublished { .. } => "StatePublished",
        }
    }

    /// Check if this is a device lifecycle event.
    pub fn is_lifecycle_event(&self) -> bool {
        matches!(
            self,
            Self::DeviceJoined { .. }
                | Self::DeviceAnnounced { .. }
                | Self::DeviceLeft { .. }
                | Self::DeviceRenamed { .. }
        )
    }

    /// Check if this is an availability event.
    pub fn is_availability_event(&self) -> bool {
        matches!(self, Self::AvailabilityChanged { .. })
    }

    /// Check if this is a configuration event.
    pub fn is_configuration_event(&self) -> bool {
        matches!(self, Self::ConfigurationChanged { .. })
    }

    /// IEEE address of the device this event concerns, if any.
    pub fn ieee(&self) -> Option<&str> {
        match self {
            Self::DeviceJoined { ieee, .. }
            | Self::DeviceAnnounced { ieee, .. }
            | Self::DeviceLeft { ieee, .. }
            | Self::DeviceRenamed { ieee, .. }
            | Self::AvailabilityChanged { ieee, .. }
            | Self::ConfigurationChanged { ieee, .. } => Some(ieee),
            Self::StatePublished { .. } => None,
        }
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub event_id: String,
    /// Optional correlation ID (e.g. the bridge request transaction)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Event source (component that published)
    pub source: String,
    /// Event timestamp
    pub timestamp: i64,
}

impl EventMetadata {
    /// Create new event metadata.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Create with a specific correlation ID.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = BridgeEvent::AvailabilityChanged {
            ieee: "0x0001".to_string(),
            alias: "bulb".to_string(),
            state: AvailabilityState::Offline,
            timestamp: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "AvailabilityChanged");
        assert_eq!(json["state"], "offline");
        assert_eq!(event.ieee(), Some("0x0001"));
    }

    #[test]
    fn test_event_categories() {
        let joined = BridgeEvent::DeviceJoined {
            ieee: "0x0001".to_string(),
            timestamp: 0,
        };
        assert!(joined.is_lifecycle_event());
        assert!(!joined.is_availability_event());

        let published = BridgeEvent::StatePublished {
            alias: "bulb".to_string(),
            state: serde_json::json!({"state": "ON"}),
            timestamp: 0,
        };
        assert!(published.ieee().is_none());
        assert_eq!(published.type_name(), "StatePublished");
    }
}
