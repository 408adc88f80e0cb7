//! In-memory radio.
//!
//! [`SimulatedRadio`] keeps device descriptions, binding tables, reporting
//! configuration and attribute values in memory. Every call is recorded and
//! failures can be injected per call kind, cluster and device. Used by the
//! integration tests and by `meshbridge run`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tracing::trace;

use crate::radio::{
    Binding, Cluster, ConfiguredReporting, DeviceInfo, EndpointAddr, EndpointId, Ieee, RadioDriver,
    RadioError, RadioResult, RadioTarget, ReportingConfig,
};

/// Kind of a recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Bind,
    Unbind,
    ConfigureReporting,
    Read,
    Write,
    Command,
    Ping,
}

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioCall {
    Bind {
        source: EndpointAddr,
        cluster: Cluster,
        target: RadioTarget,
    },
    Unbind {
        source: EndpointAddr,
        cluster: Cluster,
        target: RadioTarget,
    },
    ConfigureReporting {
        endpoint: EndpointAddr,
        cluster: Cluster,
        items: Vec<ReportingConfig>,
    },
    Read {
        target: RadioTarget,
        cluster: Cluster,
        attributes: Vec<String>,
    },
    Write {
        target: RadioTarget,
        cluster: Cluster,
        attributes: Map<String, Value>,
    },
    Command {
        target: RadioTarget,
        cluster: Cluster,
        command: String,
        payload: Value,
    },
    Ping {
        ieee: Ieee,
    },
}

impl RadioCall {
    pub fn kind(&self) -> CallKind {
        match self {
            Self::Bind { .. } => CallKind::Bind,
            Self::Unbind { .. } => CallKind::Unbind,
            Self::ConfigureReporting { .. } => CallKind::ConfigureReporting,
            Self::Read { .. } => CallKind::Read,
            Self::Write { .. } => CallKind::Write,
            Self::Command { .. } => CallKind::Command,
            Self::Ping { .. } => CallKind::Ping,
        }
    }

    pub fn cluster(&self) -> Option<&Cluster> {
        match self {
            Self::Bind { cluster, .. }
            | Self::Unbind { cluster, .. }
            | Self::ConfigureReporting { cluster, .. }
            | Self::Read { cluster, .. }
            | Self::Write { cluster, .. }
            | Self::Command { cluster, .. } => Some(cluster),
            Self::Ping { .. } => None,
        }
    }

    fn ieee(&self) -> Option<&Ieee> {
        match self {
            Self::Bind { source, .. } | Self::Unbind { source, .. } => Some(&source.ieee),
            Self::ConfigureReporting { endpoint, .. } => Some(&endpoint.ieee),
            Self::Read { target, .. }
            | Self::Write { target, .. }
            | Self::Command { target, .. } => target.ieee(),
            Self::Ping { ieee } => Some(ieee),
        }
    }
}

/// Injected failure.
#[derive(Debug, Clone)]
struct FailureRule {
    kind: CallKind,
    cluster: Option<Cluster>,
    ieee: Option<Ieee>,
    /// `None` fails forever
    remaining: Option<usize>,
}

impl FailureRule {
    fn matches(&self, call: &RadioCall) -> bool {
        self.kind == call.kind()
            && self.cluster.as_ref().is_none_or(|c| call.cluster() == Some(c))
            && self.ieee.as_ref().is_none_or(|i| call.ieee() == Some(i))
            && self.remaining != Some(0)
    }
}

type AttributeKey = (Ieee, EndpointId, Cluster);

/// In-memory [`RadioDriver`].
pub struct SimulatedRadio {
    coordinator: EndpointAddr,
    devices: RwLock<HashMap<Ieee, DeviceInfo>>,
    attributes: Mutex<HashMap<AttributeKey, Map<String, Value>>>,
    calls: Mutex<Vec<RadioCall>>,
    failures: Mutex<Vec<FailureRule>>,
    latency: Duration,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            coordinator: EndpointAddr::new(Ieee::new("0x00124b0000000000"), 1),
            devices: RwLock::new(HashMap::new()),
            attributes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Air time added to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_device(self, device: DeviceInfo) -> Self {
        self.add_device(device);
        self
    }

    pub fn add_device(&self, device: DeviceInfo) {
        self.devices.write().insert(device.ieee.clone(), device);
    }

    pub fn remove_device(&self, ieee: &Ieee) -> Option<DeviceInfo> {
        self.devices.write().remove(ieee)
    }

    /// Apply `f` to the stored description of a device.
    pub fn update_device(&self, ieee: &Ieee, f: impl FnOnce(&mut DeviceInfo)) {
        if let Some(device) = self.devices.write().get_mut(ieee) {
            f(device);
        }
    }

    pub fn set_attribute(
        &self,
        ieee: &Ieee,
        endpoint: EndpointId,
        cluster: Cluster,
        name: &str,
        value: Value,
    ) {
        self.attributes
            .lock()
            .entry((ieee.clone(), endpoint, cluster))
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn attribute(
        &self,
        ieee: &Ieee,
        endpoint: EndpointId,
        cluster: Cluster,
        name: &str,
    ) -> Option<Value> {
        self.attributes
            .lock()
            .get(&(ieee.clone(), endpoint, cluster))
            .and_then(|attrs| attrs.get(name).cloned())
    }

    /// Fail every matching call.
    pub fn fail(&self, kind: CallKind, cluster: Option<Cluster>) {
        self.push_failure(kind, cluster, None, None);
    }

    /// Fail the next `times` matching calls.
    pub fn fail_times(&self, kind: CallKind, cluster: Option<Cluster>, times: usize) {
        self.push_failure(kind, cluster, None, Some(times));
    }

    /// Fail every matching call addressed to one device.
    pub fn fail_device(&self, kind: CallKind, ieee: &Ieee) {
        self.push_failure(kind, None, Some(ieee.clone()), None);
    }

    fn push_failure(
        &self,
        kind: CallKind,
        cluster: Option<Cluster>,
        ieee: Option<Ieee>,
        remaining: Option<usize>,
    ) {
        self.failures.lock().push(FailureRule {
            kind,
            cluster,
            ieee,
            remaining,
        });
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<RadioCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Record the call, wait the configured latency and decide whether it
    /// fails.
    async fn enter(&self, call: RadioCall) -> RadioResult<()> {
        trace!(category = "sim", ?call, "Simulated radio call");
        let failure = {
            let mut failures = self.failures.lock();
            let rule = failures.iter_mut().find(|r| r.matches(&call));
            match rule {
                Some(rule) => {
                    if let Some(remaining) = rule.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    true
                }
                None => false,
            }
        };
        let ieee = call.ieee().cloned();
        self.calls.lock().push(call);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if failure {
            return Err(RadioError::Transport("injected failure".to_string()));
        }
        if let Some(ieee) = ieee {
            if !self.devices.read().contains_key(&ieee) && ieee != self.coordinator.ieee {
                return Err(RadioError::UnknownDevice(ieee.to_string()));
            }
        }
        Ok(())
    }

    fn apply_command(
        &self,
        addr: &EndpointAddr,
        cluster: &Cluster,
        command: &str,
        payload: &Value,
    ) {
        let set = |name: &str, value: Value| {
            self.set_attribute(&addr.ieee, addr.endpoint, cluster.clone(), name, value)
        };
        match (cluster, command) {
            (Cluster::OnOff, "on") => set("onOff", json!(1)),
            (Cluster::OnOff, "off") => set("onOff", json!(0)),
            (Cluster::OnOff, "toggle") => {
                let current = self
                    .attribute(&addr.ieee, addr.endpoint, Cluster::OnOff, "onOff")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                set("onOff", json!(if current == 0 { 1 } else { 0 }));
            }
            (Cluster::LevelCtrl, "moveToLevelWithOnOff") | (Cluster::LevelCtrl, "moveToLevel") => {
                if let Some(level) = payload.get("level").and_then(Value::as_u64) {
                    if level > 0 {
                        set("currentLevel", json!(level));
                    }
                    if command == "moveToLevelWithOnOff" {
                        self.set_attribute(
                            &addr.ieee,
                            addr.endpoint,
                            Cluster::OnOff,
                            "onOff",
                            json!(if level > 0 { 1 } else { 0 }),
                        );
                    }
                }
            }
            (Cluster::ColorCtrl, "moveToColorTemp") => {
                if let Some(v) = payload.get("colortemp") {
                    set("colorTemperature", v.clone());
                }
            }
            (Cluster::ColorCtrl, "moveToColor") => {
                if let Some(v) = payload.get("colorx") {
                    set("currentX", v.clone());
                }
                if let Some(v) = payload.get("colory") {
                    set("currentY", v.clone());
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl RadioDriver for SimulatedRadio {
    fn coordinator(&self) -> EndpointAddr {
        self.coordinator.clone()
    }

    async fn device(&self, ieee: &Ieee) -> Option<DeviceInfo> {
        self.devices.read().get(ieee).cloned()
    }

    async fn devices(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<_> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.ieee.cmp(&b.ieee));
        devices
    }

    async fn bind(
        &self,
        source: &EndpointAddr,
        cluster: &Cluster,
        target: &RadioTarget,
    ) -> RadioResult<()> {
        self.enter(RadioCall::Bind {
            source: source.clone(),
            cluster: cluster.clone(),
            target: target.clone(),
        })
        .await?;
        self.update_device(&source.ieee, |device| {
            if let Some(endpoint) = device.endpoint_mut(source.endpoint) {
                if !endpoint.is_bound(cluster, target) {
                    endpoint.bindings.push(Binding {
                        cluster: cluster.clone(),
                        target: target.clone(),
                    });
                }
            }
        });
        Ok(())
    }

    async fn unbind(
        &self,
        source: &EndpointAddr,
        cluster: &Cluster,
        target: &RadioTarget,
    ) -> RadioResult<()> {
        self.enter(RadioCall::Unbind {
            source: source.clone(),
            cluster: cluster.clone(),
            target: target.clone(),
        })
        .await?;
        self.update_device(&source.ieee, |device| {
            if let Some(endpoint) = device.endpoint_mut(source.endpoint) {
                endpoint
                    .bindings
                    .retain(|b| !(&b.cluster == cluster && &b.target == target));
            }
        });
        Ok(())
    }

    async fn configure_reporting(
        &self,
        endpoint: &EndpointAddr,
        cluster: &Cluster,
        items: &[ReportingConfig],
    ) -> RadioResult<()> {
        self.enter(RadioCall::ConfigureReporting {
            endpoint: endpoint.clone(),
            cluster: cluster.clone(),
            items: items.to_vec(),
        })
        .await?;
        self.update_device(&endpoint.ieee, |device| {
            if let Some(ep) = device.endpoint_mut(endpoint.endpoint) {
                for item in items {
                    ep.configured_reportings.retain(|r| {
                        !(&r.cluster == cluster && r.config.attribute == item.attribute)
                    });
                    ep.configured_reportings.push(ConfiguredReporting {
                        cluster: cluster.clone(),
                        config: item.clone(),
                    });
                }
            }
        });
        Ok(())
    }

    async fn read(
        &self,
        target: &RadioTarget,
        cluster: &Cluster,
        attributes: &[String],
    ) -> RadioResult<Map<String, Value>> {
        self.enter(RadioCall::Read {
            target: target.clone(),
            cluster: cluster.clone(),
            attributes: attributes.to_vec(),
        })
        .await?;
        let RadioTarget::Endpoint(addr) = target else {
            return Err(RadioError::Unsupported("read from a group".to_string()));
        };

        let mut result = Map::new();
        for name in attributes {
            let value = if cluster == &Cluster::ColorCtrl && name == "colorCapabilities" {
                self.devices
                    .read()
                    .get(&addr.ieee)
                    .and_then(|d| d.endpoint(addr.endpoint))
                    .and_then(|e| e.color_capabilities)
                    .map(|caps| json!(caps))
            } else {
                self.attribute(&addr.ieee, addr.endpoint, cluster.clone(), name)
            };
            if let Some(value) = value {
                result.insert(name.clone(), value);
            }
        }
        Ok(result)
    }

    async fn write(
        &self,
        target: &RadioTarget,
        cluster: &Cluster,
        attributes: &Map<String, Value>,
    ) -> RadioResult<()> {
        self.enter(RadioCall::Write {
            target: target.clone(),
            cluster: cluster.clone(),
            attributes: attributes.clone(),
        })
        .await?;
        if let RadioTarget::Endpoint(addr) = target {
            for (name, value) in attributes {
                self.set_attribute(&addr.ieee, addr.endpoint, cluster.clone(), name, value.clone());
            }
        }
        Ok(())
    }

    async fn command(
        &self,
        target: &RadioTarget,
        cluster: &Cluster,
        command: &str,
        payload: &Value,
    ) -> RadioResult<()> {
        self.enter(RadioCall::Command {
            target: target.clone(),
            cluster: cluster.clone(),
            command: command.to_string(),
            payload: payload.clone(),
        })
        .await?;
        if let RadioTarget::Endpoint(addr) = target {
            self.apply_command(addr, cluster, command, payload);
        }
        Ok(())
    }

    async fn ping(&self, ieee: &Ieee) -> RadioResult<()> {
        self.enter(RadioCall::Ping { ieee: ieee.clone() }).await
    }
}
