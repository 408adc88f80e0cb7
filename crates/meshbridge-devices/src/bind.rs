//! Binding engine.
//!
//! Resolves `bind`/`unbind` requests into one radio call per eligible
//! cluster and aggregates the outcome. A cluster that fails never stops the
//! remaining clusters. After a successful bind the target endpoints get the
//! reporting template of the cluster; after an unbind the same attributes
//! are switched off, unless another source still binds to the target.

use std::fmt;

use meshbridge_core::COORDINATOR_ALIAS;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::resolve_endpoint;
use crate::configure::DeviceHandle;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{BridgeError, BridgeResult, Side};
use crate::radio::{
    Cluster, DeviceInfo, EndpointAddr, GroupId, RadioTarget, DEFAULT_BIND_GROUP,
};
use crate::reporting::{canonical_bind_clusters, has_reporting};

/// Alias that stands for [`DEFAULT_BIND_GROUP`] in bind requests.
pub const DEFAULT_BIND_GROUP_ALIAS: &str = "default_bind_group";

/// Bind or unbind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindAction {
    Bind,
    Unbind,
}

impl BindAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Unbind => "unbind",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            Self::Bind => "bound",
            Self::Unbind => "unbound",
        }
    }
}

impl fmt::Display for BindAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `bridge/request/device/{bind,unbind}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindRequest {
    /// `alias[/endpoint]` of the source device
    pub from: String,
    /// `alias[/endpoint]`, group alias, group id, coordinator or default group
    pub to: Value,
    /// Restrict to these clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clusters: Option<Vec<String>>,
    /// Leave reporting untouched on unbind
    #[serde(default)]
    pub skip_disable_reporting: bool,
}

impl BindRequest {
    pub fn new(from: impl Into<String>, to: impl Into<Value>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            clusters: None,
            skip_disable_reporting: false,
        }
    }

    pub fn with_clusters(mut self, clusters: &[&str]) -> Self {
        self.clusters = Some(clusters.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_skip_disable_reporting(mut self, skip: bool) -> Self {
        self.skip_disable_reporting = skip;
        self
    }
}

/// Per-cluster outcome of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindResult {
    pub from: String,
    pub to: String,
    /// Clusters that succeeded, in attempt order
    pub clusters: Vec<String>,
    /// Clusters that failed, in attempt order
    pub failed: Vec<String>,
}

impl BindResult {
    pub fn all_failed(&self) -> bool {
        self.clusters.is_empty() && !self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Source {
    alias: String,
    addr: EndpointAddr,
    info: DeviceInfo,
}

#[derive(Debug, Clone)]
enum Target {
    Endpoint { alias: String, addr: EndpointAddr, info: DeviceInfo },
    Group { alias: String, id: GroupId, members: Vec<EndpointAddr> },
    Coordinator(EndpointAddr),
}

impl Target {
    fn radio_target(&self) -> RadioTarget {
        match self {
            Self::Endpoint { addr, .. } | Self::Coordinator(addr) => {
                RadioTarget::Endpoint(addr.clone())
            }
            Self::Group { id, .. } => RadioTarget::Group(*id),
        }
    }

    fn alias(&self) -> String {
        match self {
            Self::Endpoint { alias, .. } | Self::Group { alias, .. } => alias.clone(),
            Self::Coordinator(_) => COORDINATOR_ALIAS.to_string(),
        }
    }
}

/// Executes bind and unbind requests.
#[derive(Clone)]
pub struct BindingEngine {
    ctx: Context,
}

impl BindingEngine {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn execute(
        &self,
        action: BindAction,
        request: &BindRequest,
    ) -> BridgeResult<BindResult> {
        let source = self.resolve_source(&request.from).await?;
        let target = self.resolve_target(&request.to).await?;

        let candidates: Vec<Cluster> = match &request.clusters {
            Some(names) => names.iter().map(|n| Cluster::from_name(n)).collect(),
            None => canonical_bind_clusters(),
        };
        let source_ep = source.info.endpoint(source.addr.endpoint);
        let mut eligible = Vec::new();
        for cluster in candidates {
            let outputs = source_ep.is_some_and(|ep| ep.supports_output(&cluster));
            if outputs
                && self.target_accepts(&target, &cluster).await
                && !eligible.contains(&cluster)
            {
                eligible.push(cluster);
            }
        }
        if eligible.is_empty() {
            return Err(BridgeError::NothingToBind(action.as_str()));
        }

        let radio_target = target.radio_target();
        let mut result = BindResult {
            from: source.alias.clone(),
            to: target.alias(),
            ..Default::default()
        };
        let mut succeeded = Vec::new();
        for cluster in eligible {
            let radio = self.ctx.radio.clone();
            let addr = source.addr.clone();
            let call_target = radio_target.clone();
            let call_cluster = cluster.clone();
            let label = format!("{} {} {} -> {}", action, addr, cluster, radio_target);
            let outcome = self
                .ctx
                .queue
                .run(label, async move {
                    match action {
                        BindAction::Bind => radio.bind(&addr, &call_cluster, &call_target).await,
                        BindAction::Unbind => {
                            radio.unbind(&addr, &call_cluster, &call_target).await
                        }
                    }
                })
                .await;

            match outcome {
                Ok(()) => {
                    info!(
                        category = "bind",
                        cluster = %cluster,
                        "Successfully {} cluster from '{}' to '{}'",
                        action.past_tense(),
                        result.from,
                        result.to
                    );
                    result.clusters.push(cluster.name().to_string());
                    succeeded.push(cluster);
                }
                Err(e) => {
                    warn!(
                        category = "bind",
                        cluster = %cluster,
                        "Failed to {} cluster from '{}' to '{}': {}",
                        action,
                        result.from,
                        result.to,
                        e
                    );
                    result.failed.push(cluster.name().to_string());
                }
            }
        }

        let reporting: Vec<Cluster> = succeeded.into_iter().filter(has_reporting).collect();
        match action {
            BindAction::Bind => self.setup_reporting(&target, &reporting).await,
            BindAction::Unbind if !request.skip_disable_reporting => {
                self.disable_reporting(&source.addr, &target, &reporting).await
            }
            BindAction::Unbind => {}
        }
        Ok(result)
    }

    async fn resolve_source(&self, from: &str) -> BridgeResult<Source> {
        let (entity, label) = self
            .ctx
            .entities
            .resolve_path(from)
            .ok_or_else(|| BridgeError::UnknownBindEntity {
                side: Side::Source,
                alias: from.to_string(),
            })?;
        let Entity::Device(device) = entity else {
            return Err(BridgeError::InvalidRequest(format!(
                "Source '{}' is a group, only devices can be bound",
                from
            )));
        };
        let (info, definition) = self.ctx.describe(&device.ieee).await;
        let info = info.ok_or_else(|| BridgeError::UnknownBindEntity {
            side: Side::Source,
            alias: device.friendly_name.clone(),
        })?;
        let endpoint = resolve_endpoint(definition.as_deref(), Some(&info), label.as_deref())
            .ok_or_else(|| BridgeError::UnknownEndpoint {
                side: Side::Source,
                alias: device.friendly_name.clone(),
                endpoint: label.clone().unwrap_or_default(),
            })?;
        Ok(Source {
            alias: device.friendly_name,
            addr: EndpointAddr::new(info.ieee.clone(), endpoint),
            info,
        })
    }

    async fn resolve_target(&self, to: &Value) -> BridgeResult<Target> {
        let raw = match to {
            Value::Number(n) => {
                let id = n
                    .as_u64()
                    .and_then(|id| GroupId::try_from(id).ok())
                    .ok_or_else(|| BridgeError::InvalidRequest(format!("Invalid group id {}", n)))?;
                return Ok(self.group_target(id));
            }
            Value::String(s) => s.as_str(),
            other => {
                return Err(BridgeError::InvalidRequest(format!(
                    "'to' must be a string or group id, got {}",
                    other
                )))
            }
        };

        if raw == DEFAULT_BIND_GROUP_ALIAS {
            return Ok(self.group_target(DEFAULT_BIND_GROUP));
        }
        if raw == COORDINATOR_ALIAS {
            return Ok(Target::Coordinator(self.ctx.radio.coordinator()));
        }
        let Some((entity, label)) = self.ctx.entities.resolve_path(raw) else {
            // A bare number names a group even when it is not configured.
            if let Ok(id) = raw.parse::<GroupId>() {
                return Ok(self.group_target(id));
            }
            return Err(BridgeError::UnknownBindEntity {
                side: Side::Target,
                alias: raw.to_string(),
            });
        };

        match entity {
            Entity::Group(group) => {
                if let Some(label) = label {
                    return Err(BridgeError::UnknownEndpoint {
                        side: Side::Target,
                        alias: group.friendly_name,
                        endpoint: label,
                    });
                }
                Ok(Target::Group {
                    alias: group.friendly_name,
                    id: group.id,
                    members: group.members,
                })
            }
            Entity::Device(device) => {
                let (info, definition) = self.ctx.describe(&device.ieee).await;
                let info = info.ok_or_else(|| BridgeError::UnknownBindEntity {
                    side: Side::Target,
                    alias: device.friendly_name.clone(),
                })?;
                let endpoint =
                    resolve_endpoint(definition.as_deref(), Some(&info), label.as_deref())
                        .ok_or_else(|| BridgeError::UnknownEndpoint {
                            side: Side::Target,
                            alias: device.friendly_name.clone(),
                            endpoint: label.clone().unwrap_or_default(),
                        })?;
                Ok(Target::Endpoint {
                    alias: device.friendly_name,
                    addr: EndpointAddr::new(info.ieee.clone(), endpoint),
                    info,
                })
            }
        }
    }

    fn group_target(&self, id: GroupId) -> Target {
        match self.ctx.entities.group(id) {
            Some(group) => Target::Group {
                alias: group.friendly_name,
                id,
                members: group.members,
            },
            None => Target::Group {
                alias: id.to_string(),
                id,
                members: Vec::new(),
            },
        }
    }

    /// Coordinator, unknown and memberless groups accept any cluster; a
    /// group with members accepts the union of their input clusters.
    async fn target_accepts(&self, target: &Target, cluster: &Cluster) -> bool {
        match target {
            Target::Coordinator(_) => true,
            Target::Endpoint { addr, info, .. } => info
                .endpoint(addr.endpoint)
                .is_some_and(|ep| ep.supports_input(cluster)),
            Target::Group { members, .. } => {
                if members.is_empty() {
                    return true;
                }
                for member in members {
                    let Some(info) = self.ctx.radio.device(&member.ieee).await else {
                        continue;
                    };
                    if info
                        .endpoint(member.endpoint)
                        .is_some_and(|ep| ep.supports_input(cluster))
                    {
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Concrete endpoints behind a target.
    fn reporting_endpoints(target: &Target) -> Vec<EndpointAddr> {
        match target {
            Target::Endpoint { addr, .. } => vec![addr.clone()],
            Target::Group { members, .. } => members.clone(),
            Target::Coordinator(_) => Vec::new(),
        }
    }

    async fn handle_for(&self, addr: &EndpointAddr) -> Option<DeviceHandle> {
        let info = self.ctx.radio.device(&addr.ieee).await?;
        Some(DeviceHandle::new(info, self.ctx.radio.clone(), self.ctx.queue.clone()))
    }

    async fn setup_reporting(&self, target: &Target, clusters: &[Cluster]) {
        for addr in Self::reporting_endpoints(target) {
            let Some(handle) = self.handle_for(&addr).await else {
                continue;
            };
            for cluster in clusters {
                let supported = handle
                    .endpoint(addr.endpoint)
                    .is_some_and(|ep| ep.supports_input(cluster));
                if !supported {
                    continue;
                }
                if let Err(e) = handle.setup_reporting(addr.endpoint, cluster).await {
                    warn!(
                        category = "reporting",
                        target = %addr,
                        cluster = %cluster,
                        "Failed to setup reporting: {}",
                        e
                    );
                }
            }
        }
    }

    async fn disable_reporting(
        &self,
        source: &EndpointAddr,
        target: &Target,
        clusters: &[Cluster],
    ) {
        let radio_target = target.radio_target();
        let devices = self.ctx.radio.devices().await;

        for cluster in clusters {
            let still_bound = devices.iter().any(|device| {
                device.endpoints.iter().any(|ep| {
                    let addr = EndpointAddr::new(device.ieee.clone(), ep.id);
                    &addr != source && ep.is_bound(cluster, &radio_target)
                })
            });
            if still_bound {
                debug!(
                    category = "reporting",
                    cluster = %cluster,
                    "Another source is still bound to '{}', keeping reporting",
                    target.alias()
                );
                continue;
            }

            for addr in Self::reporting_endpoints(target) {
                let Some(handle) = self.handle_for(&addr).await else {
                    continue;
                };
                let configured = handle
                    .endpoint(addr.endpoint)
                    .is_some_and(|ep| ep.supports_input(cluster));
                if !configured {
                    continue;
                }
                if let Err(e) = handle.disable_reporting(addr.endpoint, cluster).await {
                    warn!(
                        category = "reporting",
                        target = %addr,
                        cluster = %cluster,
                        "Failed to disable reporting: {}",
                        e
                    );
                }
            }
        }
    }
}
