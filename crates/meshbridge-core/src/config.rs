//! Bridge settings.
//!
//! Settings are read from a TOML file and then overridden by environment
//! variables:
//!
//! ```toml
//! [mqtt]
//! base_topic = "zigbee2mqtt"
//! server = "localhost"
//!
//! [availability]
//! active_timeout_secs = 600
//!
//! [[devices]]
//! ieee = "0x00158d0001a2b3c4"
//! friendly_name = "living_room/bulb"
//! options = { transition = 0.5 }
//!
//! [[groups]]
//! id = 1
//! friendly_name = "living_room"
//! members = ["0x00158d0001a2b3c4/1"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config_err;
use crate::error::{Error, Result};

/// Default MQTT base topic.
pub const DEFAULT_BASE_TOPIC: &str = "zigbee2mqtt";

/// Alias under which the coordinator is addressable in bind requests.
pub const COORDINATOR_ALIAS: &str = "Coordinator";

/// Environment variable names.
pub mod env_vars {
    pub const MQTT_SERVER: &str = "MESHBRIDGE_MQTT_SERVER";
    pub const MQTT_PORT: &str = "MESHBRIDGE_MQTT_PORT";
    pub const MQTT_USER: &str = "MESHBRIDGE_MQTT_USER";
    pub const MQTT_PASSWORD: &str = "MESHBRIDGE_MQTT_PASSWORD";
    pub const BASE_TOPIC: &str = "MESHBRIDGE_BASE_TOPIC";
    pub const LOG_JSON: &str = "MESHBRIDGE_LOG_JSON";
}

/// Top-level bridge settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// MQTT connection
    #[serde(default)]
    pub mqtt: MqttSettings,
    /// Liveness monitoring
    #[serde(default)]
    pub availability: AvailabilitySettings,
    /// Radio operation queue
    #[serde(default)]
    pub queue: QueueSettings,
    /// Rarely changed knobs
    #[serde(default)]
    pub advanced: AdvancedSettings,
    /// Per-device aliases and options
    #[serde(default)]
    pub devices: Vec<DeviceSettings>,
    /// Groups and their member endpoints
    #[serde(default)]
    pub groups: Vec<GroupSettings>,
}

/// MQTT connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    /// Prefix of every topic the bridge publishes or subscribes to
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    /// Broker host
    #[serde(default = "default_server")]
    pub server: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client ID (generated when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Username for authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password for authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

fn default_base_topic() -> String {
    DEFAULT_BASE_TOPIC.to_string()
}
fn default_server() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_keepalive() -> u64 {
    60
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            base_topic: default_base_topic(),
            server: default_server(),
            port: default_port(),
            client_id: None,
            user: None,
            password: None,
            keepalive_secs: default_keepalive(),
        }
    }
}

/// Availability monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySettings {
    /// Master switch
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Timeout for mains-powered devices, probed on expiry
    #[serde(default = "default_active_timeout")]
    pub active_timeout_secs: u64,
    /// Timeout for battery-powered devices, never probed
    #[serde(default = "default_passive_timeout")]
    pub passive_timeout_secs: u64,
    /// Slack added to every timeout before the timer fires
    #[serde(default = "default_margin")]
    pub margin_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_active_timeout() -> u64 {
    600
}
fn default_passive_timeout() -> u64 {
    90_000
}
fn default_margin() -> u64 {
    1
}

impl Default for AvailabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            active_timeout_secs: default_active_timeout(),
            passive_timeout_secs: default_passive_timeout(),
            margin_secs: default_margin(),
        }
    }
}

impl AvailabilitySettings {
    pub fn active_timeout(&self) -> Duration {
        Duration::from_secs(self.active_timeout_secs)
    }

    pub fn passive_timeout(&self) -> Duration {
        Duration::from_secs(self.passive_timeout_secs)
    }

    pub fn margin(&self) -> Duration {
        Duration::from_secs(self.margin_secs)
    }
}

/// Radio operation queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Upper bound on a single radio operation
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

fn default_operation_timeout() -> u64 {
    10_000
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

impl QueueSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Advanced settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvancedSettings {
    /// Default transition in seconds for entities without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<f64>,
    /// Where last-known entity state is persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

/// Options shared by devices and groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityOptions {
    /// Publish assumed state without waiting for radio confirmation
    #[serde(default = "default_true")]
    pub optimistic: bool,
    /// Retain published state messages
    #[serde(default)]
    pub retain: bool,
    /// QoS of published state messages
    #[serde(default)]
    pub qos: u8,
    /// Default transition in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<f64>,
    /// Whether the availability monitor tracks this entity
    #[serde(default = "default_true")]
    pub availability: bool,
    /// Entity-specific availability timeout, wins over the global ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_timeout_secs: Option<u64>,
    /// Never run the model configure routine
    #[serde(default)]
    pub disable_configure: bool,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            optimistic: true,
            retain: false,
            qos: 0,
            transition: None,
            availability: true,
            availability_timeout_secs: None,
            disable_configure: false,
        }
    }
}

/// Device entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Stable network identity
    pub ieee: String,
    /// Alias used in topics
    pub friendly_name: String,
    #[serde(default)]
    pub options: EntityOptions,
}

/// Group entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSettings {
    pub id: u16,
    pub friendly_name: String,
    /// Members as `ieee/endpoint`
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub options: EntityOptions,
}

impl GroupSettings {
    /// Parse members into `(ieee, endpoint)` pairs.
    pub fn parsed_members(&self) -> Result<Vec<(String, u8)>> {
        self.members
            .iter()
            .map(|member| {
                let (ieee, endpoint) = member.split_once('/').ok_or_else(|| {
                    config_err!(
                        "Group '{}' member '{}' is not ieee/endpoint",
                        self.friendly_name,
                        member
                    )
                })?;
                let endpoint = endpoint.parse::<u8>().map_err(|_| {
                    config_err!(
                        "Group '{}' member '{}' has an invalid endpoint",
                        self.friendly_name,
                        member
                    )
                })?;
                Ok((ieee.to_string(), endpoint))
            })
            .collect()
    }
}

impl BridgeSettings {
    /// Load settings from a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        info!(category = "config", "Loading config from: {}", path.display());
        let mut settings = Self::from_toml_str(&content, &path.display().to_string())?;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the given file when it exists, falling back to
    /// defaults plus environment variables.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        info!(category = "config", "Loading config from environment variables");
        let mut settings = Self::default();
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text without validation.
    pub fn from_toml_str(content: &str, location: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Parse {
            location: location.to_string(),
            message: e.to_string(),
        })
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(server) = std::env::var(env_vars::MQTT_SERVER) {
            self.mqtt.server = server;
        }
        if let Some(port) = std::env::var(env_vars::MQTT_PORT)
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.mqtt.port = port;
        }
        if let Ok(user) = std::env::var(env_vars::MQTT_USER) {
            self.mqtt.user = Some(user);
        }
        if let Ok(password) = std::env::var(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = Some(password);
        }
        if let Ok(base_topic) = std::env::var(env_vars::BASE_TOPIC) {
            self.mqtt.base_topic = base_topic;
        }
    }

    /// Check invariants the orchestrator relies on.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.base_topic.is_empty() || has_wildcard(&self.mqtt.base_topic) {
            return Err(config_err!(
                "Invalid base topic '{}'",
                self.mqtt.base_topic
            ));
        }
        if self.queue.operation_timeout_ms == 0 {
            return Err(config_err!("queue.operation_timeout_ms must be positive"));
        }

        let mut aliases = HashSet::new();
        let names = self
            .devices
            .iter()
            .map(|d| d.friendly_name.as_str())
            .chain(self.groups.iter().map(|g| g.friendly_name.as_str()));
        for name in names {
            validate_friendly_name(name)?;
            if !aliases.insert(name) {
                return Err(config_err!("Duplicate friendly name '{}'", name));
            }
        }

        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id) {
                return Err(config_err!("Duplicate group id {}", group.id));
            }
            group.parsed_members()?;
        }
        Ok(())
    }
}

fn has_wildcard(topic: &str) -> bool {
    topic.contains('#') || topic.contains('+')
}

/// Reject aliases that would be ambiguous inside a topic.
pub fn validate_friendly_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(config_err!("Friendly name cannot be empty"));
    }
    if has_wildcard(name) || name.starts_with('/') || name.ends_with('/') {
        return Err(config_err!("Friendly name '{}' contains invalid characters", name));
    }
    if name.parse::<u16>().is_ok() {
        return Err(config_err!("Friendly name '{}' cannot be only a number", name));
    }
    let last = name.rsplit('/').next().unwrap_or(name);
    if matches!(last, "set" | "get") {
        return Err(config_err!("Friendly name '{}' cannot end with /{}", name, last));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[mqtt]
base_topic = "zigbee"
server = "broker.local"

[availability]
active_timeout_secs = 120

[[devices]]
ieee = "0x0001"
friendly_name = "hall/bulb"
options = { transition = 0.5, optimistic = false }

[[devices]]
ieee = "0x0002"
friendly_name = "remote"

[[groups]]
id = 7
friendly_name = "hall"
members = ["0x0001/1"]
"#;

    #[test]
    fn test_parse_sample() {
        let settings = BridgeSettings::from_toml_str(SAMPLE, "sample").unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.mqtt.base_topic, "zigbee");
        assert_eq!(settings.mqtt.port, 1883);
        assert_eq!(settings.availability.active_timeout(), Duration::from_secs(120));
        assert_eq!(settings.availability.passive_timeout_secs, 90_000);
        assert_eq!(settings.devices.len(), 2);
        assert_eq!(settings.devices[0].options.transition, Some(0.5));
        assert!(!settings.devices[0].options.optimistic);
        assert!(settings.devices[1].options.optimistic);
        assert_eq!(
            settings.groups[0].parsed_members().unwrap(),
            vec![("0x0001".to_string(), 1)]
        );
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut settings = BridgeSettings::from_toml_str(SAMPLE, "sample").unwrap();
        settings.groups[0].friendly_name = "remote".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate friendly name"));
    }

    #[test]
    fn test_invalid_friendly_names() {
        assert!(validate_friendly_name("lamp").is_ok());
        assert!(validate_friendly_name("room/lamp").is_ok());
        assert!(validate_friendly_name("12").is_err());
        assert!(validate_friendly_name("lamp/#").is_err());
        assert!(validate_friendly_name("lamp/set").is_err());
        assert!(validate_friendly_name("").is_err());
    }

    #[test]
    fn test_bad_group_member() {
        let mut settings = BridgeSettings::from_toml_str(SAMPLE, "sample").unwrap();
        settings.groups[0].members = vec!["0x0001".to_string()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = BridgeSettings::load(&path).unwrap();
        assert_eq!(settings.devices[1].friendly_name, "remote");

        let missing = dir.path().join("missing.toml");
        let defaults = BridgeSettings::load_or_default(&missing).unwrap();
        assert!(defaults.devices.is_empty());
    }
}
