//! Radio driver contract.
//!
//! The radio stack (frame transport, interviews, network management) lives
//! outside this crate. The orchestrator only sees the [`RadioDriver`] trait
//! for outbound calls and a channel of [`RadioEvent`]s for inbound traffic.
//!
//! ```text
//! Bridge ──enqueue──▶ RadioQueue ──one at a time──▶ RadioDriver
//!    ▲                                                  │
//!    └──────────── mpsc<RadioEvent> ◀───────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Endpoint number within a device.
pub type EndpointId = u8;

/// Group address.
pub type GroupId = u16;

/// Group that remotes bind to when no explicit target is wanted.
pub const DEFAULT_BIND_GROUP: GroupId = 901;

/// Maximum report interval that switches reporting off.
pub const REPORTING_DISABLED: u16 = 0xFFFF;

/// Stable network identity of a device (EUI-64 as `0x` prefixed hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ieee(String);

impl Ieee {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ieee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ieee {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

/// Protocol cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cluster {
    Basic,
    PowerCfg,
    Identify,
    Groups,
    Scenes,
    OnOff,
    LevelCtrl,
    ColorCtrl,
    WindowCovering,
    Thermostat,
    Illuminance,
    Temperature,
    Humidity,
    Other(String),
}

impl Cluster {
    /// Wire name of the cluster.
    pub fn name(&self) -> &str {
        match self {
            Self::Basic => "genBasic",
            Self::PowerCfg => "genPowerCfg",
            Self::Identify => "genIdentify",
            Self::Groups => "genGroups",
            Self::Scenes => "genScenes",
            Self::OnOff => "genOnOff",
            Self::LevelCtrl => "genLevelCtrl",
            Self::ColorCtrl => "lightingColorCtrl",
            Self::WindowCovering => "closuresWindowCovering",
            Self::Thermostat => "hvacThermostat",
            Self::Illuminance => "msIlluminanceMeasurement",
            Self::Temperature => "msTemperatureMeasurement",
            Self::Humidity => "msRelativeHumidity",
            Self::Other(name) => name,
        }
    }

    /// Look a cluster up by wire name; unknown names become [`Cluster::Other`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "genBasic" => Self::Basic,
            "genPowerCfg" => Self::PowerCfg,
            "genIdentify" => Self::Identify,
            "genGroups" => Self::Groups,
            "genScenes" => Self::Scenes,
            "genOnOff" => Self::OnOff,
            "genLevelCtrl" => Self::LevelCtrl,
            "lightingColorCtrl" => Self::ColorCtrl,
            "closuresWindowCovering" => Self::WindowCovering,
            "hvacThermostat" => Self::Thermostat,
            "msIlluminanceMeasurement" => Self::Illuminance,
            "msTemperatureMeasurement" => Self::Temperature,
            "msRelativeHumidity" => Self::Humidity,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for Cluster {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl Serialize for Cluster {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Cluster {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// One endpoint of one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddr {
    pub ieee: Ieee,
    pub endpoint: EndpointId,
}

impl EndpointAddr {
    pub fn new(ieee: Ieee, endpoint: EndpointId) -> Self {
        Self { ieee, endpoint }
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ieee, self.endpoint)
    }
}

/// Destination of a radio call: a unicast endpoint or a group multicast.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RadioTarget {
    Endpoint(EndpointAddr),
    Group(GroupId),
}

impl RadioTarget {
    /// Device behind a unicast target.
    pub fn ieee(&self) -> Option<&Ieee> {
        match self {
            Self::Endpoint(addr) => Some(&addr.ieee),
            Self::Group(_) => None,
        }
    }
}

impl fmt::Display for RadioTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint(addr) => write!(f, "{}", addr),
            Self::Group(id) => write!(f, "group {}", id),
        }
    }
}

/// One attribute reporting entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingConfig {
    pub attribute: String,
    /// Seconds
    pub min_interval: u16,
    /// Seconds, [`REPORTING_DISABLED`] turns reporting off
    pub max_interval: u16,
    pub reportable_change: u32,
}

impl ReportingConfig {
    pub fn new(
        attribute: impl Into<String>,
        min_interval: u16,
        max_interval: u16,
        reportable_change: u32,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            min_interval,
            max_interval,
            reportable_change,
        }
    }

    /// Same attribute with reporting switched off.
    pub fn disabled(&self) -> Self {
        Self {
            max_interval: REPORTING_DISABLED,
            ..self.clone()
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.max_interval == REPORTING_DISABLED
    }
}

/// Reporting entry already active on a device endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredReporting {
    pub cluster: Cluster,
    #[serde(flatten)]
    pub config: ReportingConfig,
}

/// Binding table entry of a source endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub cluster: Cluster,
    pub target: RadioTarget,
}

/// How a device is powered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSource {
    Mains,
    Battery,
    Unknown,
}

/// Cached description of a device endpoint, maintained by the driver.
#[derive(Debug, Clone, Default)]
pub struct EndpointInfo {
    pub id: EndpointId,
    pub input_clusters: Vec<Cluster>,
    pub output_clusters: Vec<Cluster>,
    pub bindings: Vec<Binding>,
    pub configured_reportings: Vec<ConfiguredReporting>,
    /// Cached `colorCapabilities` attribute of the color cluster
    pub color_capabilities: Option<u16>,
}

impl EndpointInfo {
    pub fn new(id: EndpointId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_inputs(mut self, clusters: impl IntoIterator<Item = Cluster>) -> Self {
        self.input_clusters.extend(clusters);
        self
    }

    pub fn with_outputs(mut self, clusters: impl IntoIterator<Item = Cluster>) -> Self {
        self.output_clusters.extend(clusters);
        self
    }

    pub fn with_color_capabilities(mut self, capabilities: u16) -> Self {
        self.color_capabilities = Some(capabilities);
        self
    }

    pub fn supports_input(&self, cluster: &Cluster) -> bool {
        self.input_clusters.contains(cluster)
    }

    pub fn supports_output(&self, cluster: &Cluster) -> bool {
        self.output_clusters.contains(cluster)
    }

    /// Active reporting entry for an attribute, if any.
    pub fn reporting(&self, cluster: &Cluster, attribute: &str) -> Option<&ReportingConfig> {
        self.configured_reportings
            .iter()
            .find(|r| &r.cluster == cluster && r.config.attribute == attribute)
            .map(|r| &r.config)
    }

    pub fn is_bound(&self, cluster: &Cluster, target: &RadioTarget) -> bool {
        self.bindings
            .iter()
            .any(|b| &b.cluster == cluster && &b.target == target)
    }
}

/// Cached description of a device, maintained by the driver.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub ieee: Ieee,
    pub network_address: u16,
    pub model_id: Option<String>,
    pub power_source: PowerSource,
    pub interview_completed: bool,
    pub endpoints: Vec<EndpointInfo>,
}

impl DeviceInfo {
    pub fn new(ieee: impl Into<Ieee>, model_id: impl Into<String>) -> Self {
        Self {
            ieee: ieee.into(),
            network_address: 0,
            model_id: Some(model_id.into()),
            power_source: PowerSource::Mains,
            interview_completed: true,
            endpoints: Vec::new(),
        }
    }

    pub fn with_power_source(mut self, power_source: PowerSource) -> Self {
        self.power_source = power_source;
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointInfo) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_interview_completed(mut self, completed: bool) -> Self {
        self.interview_completed = completed;
        self
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<&EndpointInfo> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn endpoint_mut(&mut self, id: EndpointId) -> Option<&mut EndpointInfo> {
        self.endpoints.iter_mut().find(|e| e.id == id)
    }

    pub fn is_mains_powered(&self) -> bool {
        self.power_source == PowerSource::Mains
    }
}

/// Error type for radio operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    /// The device did not answer in time
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),

    /// Transport-level failure (MAC no ack, route error, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The driver does not know the device
    #[error("Device not found: {0}")]
    UnknownDevice(String),

    /// The device rejected the request
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The operation panicked inside the queue
    #[error("Operation aborted: {0}")]
    Aborted(String),

    /// The queue shut down before the operation ran
    #[error("Radio queue is closed")]
    QueueClosed,
}

/// Result type for radio operations.
pub type RadioResult<T> = Result<T, RadioError>;

/// Inbound radio event.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// A new device joined the network
    DeviceJoined { ieee: Ieee },
    /// A device re-announced itself (rejoin, power cycle)
    DeviceAnnounced { ieee: Ieee },
    /// A device left the network
    DeviceLeft { ieee: Ieee },
    /// The driver finished (or failed) interviewing a device
    DeviceInterview { ieee: Ieee, completed: bool },
    /// Attribute report or command from a device endpoint
    MessageReceived {
        ieee: Ieee,
        endpoint: EndpointId,
        cluster: Cluster,
        attributes: Map<String, Value>,
    },
}

impl RadioEvent {
    /// Device the event originates from.
    pub fn ieee(&self) -> &Ieee {
        match self {
            Self::DeviceJoined { ieee }
            | Self::DeviceAnnounced { ieee }
            | Self::DeviceLeft { ieee }
            | Self::DeviceInterview { ieee, .. }
            | Self::MessageReceived { ieee, .. } => ieee,
        }
    }
}

/// Radio driver interface.
///
/// Every method that touches the air is only ever called from inside a
/// [`RadioQueue`](crate::queue::RadioQueue) operation. `device`, `devices`
/// and `coordinator` read the driver's local cache and may be called freely.
#[async_trait]
pub trait RadioDriver: Send + Sync {
    /// Coordinator endpoint used as bind target for reporting.
    fn coordinator(&self) -> EndpointAddr;

    /// Cached device description.
    async fn device(&self, ieee: &Ieee) -> Option<DeviceInfo>;

    /// All joined devices (coordinator excluded).
    async fn devices(&self) -> Vec<DeviceInfo>;

    async fn bind(
        &self,
        source: &EndpointAddr,
        cluster: &Cluster,
        target: &RadioTarget,
    ) -> RadioResult<()>;

    async fn unbind(
        &self,
        source: &EndpointAddr,
        cluster: &Cluster,
        target: &RadioTarget,
    ) -> RadioResult<()>;

    async fn configure_reporting(
        &self,
        endpoint: &EndpointAddr,
        cluster: &Cluster,
        items: &[ReportingConfig],
    ) -> RadioResult<()>;

    async fn read(
        &self,
        target: &RadioTarget,
        cluster: &Cluster,
        attributes: &[String],
    ) -> RadioResult<Map<String, Value>>;

    async fn write(
        &self,
        target: &RadioTarget,
        cluster: &Cluster,
        attributes: &Map<String, Value>,
    ) -> RadioResult<()>;

    async fn command(
        &self,
        target: &RadioTarget,
        cluster: &Cluster,
        command: &str,
        payload: &Value,
    ) -> RadioResult<()>;

    /// Liveness probe.
    async fn ping(&self, ieee: &Ieee) -> RadioResult<()>;
}

/// Shared driver handle.
pub type SharedRadio = Arc<dyn RadioDriver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_names_round_trip_known_and_custom() {
        assert_eq!(Cluster::from_name("genOnOff"), Cluster::OnOff);
        assert_eq!(Cluster::ColorCtrl.to_string(), "lightingColorCtrl");
        let custom = Cluster::from_name("manuSpecificTuya");
        assert_eq!(custom, Cluster::Other("manuSpecificTuya".to_string()));
        assert_eq!(serde_json::to_value(&custom).unwrap(), "manuSpecificTuya");
    }

    #[test]
    fn test_ieee_is_normalized() {
        assert_eq!(Ieee::new("0x00158D00AB"), Ieee::from("0x00158d00ab"));
    }

    #[test]
    fn test_reporting_disable() {
        let config = ReportingConfig::new("onOff", 0, 3600, 0);
        let disabled = config.disabled();
        assert!(disabled.is_disabled());
        assert_eq!(disabled.min_interval, 0);
        assert!(!config.is_disabled());
    }
}
