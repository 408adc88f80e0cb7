//! Device configuration state machine.
//!
//! ```text
//!            trigger                 routine ok
//!   Unset ───────────▶ Configuring ─────────────▶ Configured
//!     ▲                    │
//!     └── attempts < 3 ────┤ routine error
//!                          └── attempts = 3 ────▶ Failed
//! ```
//!
//! Triggers are startup, a completed interview, the first radio message of
//! an `Unset` device and operator requests. A `Configuring` device ignores new triggers. `Failed`
//! devices only leave that state through an operator request (which resets
//! the attempt counter) or a rejoin.

use std::sync::Arc;

use async_trait::async_trait;
use meshbridge_core::BridgeEvent;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{BridgeError, BridgeResult};
use crate::queue::RadioQueue;
use crate::radio::{
    Cluster, DeviceInfo, EndpointAddr, EndpointId, EndpointInfo, Ieee, RadioError, RadioTarget,
    ReportingConfig, SharedRadio,
};
use crate::reporting::{has_reporting, templates, without_redundant};
use crate::runtime::ConfigurationStatus;

/// Consecutive failures after which automatic configuration stops.
pub const MAX_CONFIGURE_ATTEMPTS: u32 = 3;

/// Model-specific post-join setup.
#[async_trait]
pub trait ConfigureRoutine: Send + Sync {
    async fn configure(&self, device: &DeviceHandle) -> BridgeResult<()>;
}

/// Access to one device for configure routines and the binding engine.
/// Every radio call goes through the queue.
#[derive(Clone)]
pub struct DeviceHandle {
    info: DeviceInfo,
    coordinator: EndpointAddr,
    radio: SharedRadio,
    queue: RadioQueue,
}

impl DeviceHandle {
    pub fn new(info: DeviceInfo, radio: SharedRadio, queue: RadioQueue) -> Self {
        Self {
            coordinator: radio.coordinator(),
            info,
            radio,
            queue,
        }
    }

    pub fn ieee(&self) -> &Ieee {
        &self.info.ieee
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<&EndpointInfo> {
        self.info.endpoint(id)
    }

    fn addr(&self, endpoint: EndpointId) -> EndpointAddr {
        EndpointAddr::new(self.info.ieee.clone(), endpoint)
    }

    pub async fn bind(
        &self,
        endpoint: EndpointId,
        cluster: Cluster,
        target: RadioTarget,
    ) -> BridgeResult<()> {
        let radio = self.radio.clone();
        let source = self.addr(endpoint);
        let label = format!("bind {} {} -> {}", source, cluster, target);
        self.queue
            .run(label, async move { radio.bind(&source, &cluster, &target).await })
            .await?;
        Ok(())
    }

    pub async fn bind_to_coordinator(
        &self,
        endpoint: EndpointId,
        cluster: Cluster,
    ) -> BridgeResult<()> {
        let target = RadioTarget::Endpoint(self.coordinator.clone());
        self.bind(endpoint, cluster, target).await
    }

    pub async fn configure_reporting(
        &self,
        endpoint: EndpointId,
        cluster: Cluster,
        items: Vec<ReportingConfig>,
    ) -> BridgeResult<()> {
        let radio = self.radio.clone();
        let addr = self.addr(endpoint);
        let label = format!("configure reporting {} {}", addr, cluster);
        self.queue
            .run(label, async move {
                radio.configure_reporting(&addr, &cluster, &items).await
            })
            .await?;
        Ok(())
    }

    pub async fn read(
        &self,
        endpoint: EndpointId,
        cluster: Cluster,
        attributes: Vec<String>,
    ) -> BridgeResult<Map<String, Value>> {
        let radio = self.radio.clone();
        let target = RadioTarget::Endpoint(self.addr(endpoint));
        let label = format!("read {} {}", target, cluster);
        Ok(self
            .queue
            .run(label, async move { radio.read(&target, &cluster, &attributes).await })
            .await?)
    }

    pub async fn write(
        &self,
        endpoint: EndpointId,
        cluster: Cluster,
        attributes: Map<String, Value>,
    ) -> BridgeResult<()> {
        let radio = self.radio.clone();
        let target = RadioTarget::Endpoint(self.addr(endpoint));
        let label = format!("write {} {}", target, cluster);
        self.queue
            .run(label, async move { radio.write(&target, &cluster, &attributes).await })
            .await?;
        Ok(())
    }

    /// Cached colour capabilities, read from the device when not cached.
    pub async fn color_capabilities(&self, endpoint: EndpointId) -> Option<u16> {
        if let Some(caps) = self.endpoint(endpoint).and_then(|e| e.color_capabilities) {
            return Some(caps);
        }
        match self
            .read(endpoint, Cluster::ColorCtrl, vec!["colorCapabilities".to_string()])
            .await
        {
            Ok(values) => values
                .get("colorCapabilities")
                .and_then(Value::as_u64)
                .and_then(|caps| u16::try_from(caps).ok()),
            Err(e) => {
                warn!(
                    category = "reporting",
                    ieee = %self.info.ieee,
                    "Failed to read color capabilities: {}",
                    e
                );
                None
            }
        }
    }

    /// Configure the reporting template of `cluster` on `endpoint`, binding
    /// the cluster to the coordinator first when it is not bound yet.
    /// Returns false when nothing needed configuring.
    pub async fn setup_reporting(
        &self,
        endpoint: EndpointId,
        cluster: &Cluster,
    ) -> BridgeResult<bool> {
        let Some(info) = self.endpoint(endpoint) else {
            return Ok(false);
        };
        let caps = if cluster == &Cluster::ColorCtrl {
            self.color_capabilities(endpoint).await
        } else {
            None
        };
        let items = without_redundant(info, cluster, templates(cluster, caps));
        if items.is_empty() {
            debug!(
                category = "reporting",
                ieee = %self.info.ieee,
                endpoint,
                cluster = %cluster,
                "Reporting already configured"
            );
            return Ok(false);
        }

        let coordinator = RadioTarget::Endpoint(self.coordinator.clone());
        if !info.is_bound(cluster, &coordinator) {
            self.bind(endpoint, cluster.clone(), coordinator).await?;
        }
        self.configure_reporting(endpoint, cluster.clone(), items).await?;
        Ok(true)
    }

    /// Switch the template attributes of `cluster` off (maximum interval
    /// 0xFFFF).
    pub async fn disable_reporting(
        &self,
        endpoint: EndpointId,
        cluster: &Cluster,
    ) -> BridgeResult<()> {
        let caps = self.endpoint(endpoint).and_then(|e| e.color_capabilities);
        let items: Vec<_> = templates(cluster, caps)
            .iter()
            .map(ReportingConfig::disabled)
            .collect();
        if items.is_empty() {
            return Ok(());
        }
        self.configure_reporting(endpoint, cluster.clone(), items).await
    }
}

/// Configure routine for lights: bind on/off, level and colour to the
/// coordinator and configure their reporting templates.
pub struct StandardLightConfigure;

#[async_trait]
impl ConfigureRoutine for StandardLightConfigure {
    async fn configure(&self, device: &DeviceHandle) -> BridgeResult<()> {
        let endpoints: Vec<(EndpointId, Vec<Cluster>)> = device
            .info()
            .endpoints
            .iter()
            .map(|ep| {
                let clusters = ep
                    .input_clusters
                    .iter()
                    .filter(|c| has_reporting(c))
                    .cloned()
                    .collect();
                (ep.id, clusters)
            })
            .collect();

        for (endpoint, clusters) in endpoints {
            for cluster in clusters {
                device.setup_reporting(endpoint, &cluster).await?;
            }
        }
        Ok(())
    }
}

/// What caused a configuration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    /// The driver finished interviewing the device
    Interview,
    FirstMessage,
    Operator,
}

/// Result of one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigureOutcome {
    /// The routine ran and succeeded
    Configured,
    /// The routine failed; the device may be retried
    Failed { attempts: u32, error: String },
    /// The routine failed for the last automatic time
    Exhausted { attempts: u32, error: String },
    /// Another attempt is running
    AlreadyConfiguring,
    /// Nothing was attempted and no attempt was counted
    Skipped(&'static str),
    /// The device rejoined or left while the routine ran
    Stale,
}

/// Drives the configuration state machine of every device.
#[derive(Clone)]
pub struct Configurator {
    ctx: Context,
}

impl Configurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Whether a trigger would be acted upon right now.
    pub fn is_eligible(&self, ieee: &Ieee, trigger: Trigger) -> bool {
        match self.ctx.runtime.configuration(ieee) {
            ConfigurationStatus::Unset => true,
            ConfigurationStatus::Configuring => false,
            ConfigurationStatus::Configured | ConfigurationStatus::Failed => {
                trigger == Trigger::Operator
            }
        }
    }

    pub async fn configure(&self, ieee: &Ieee, trigger: Trigger) -> BridgeResult<ConfigureOutcome> {
        let (info, definition) = self.ctx.describe(ieee).await;
        let Some(info) = info else {
            return Err(BridgeError::UnknownEntity(ieee.to_string()));
        };
        if !info.interview_completed {
            return Ok(ConfigureOutcome::Skipped("interview not completed"));
        }
        let entity = self.ctx.entities.device(ieee);
        if entity.as_ref().is_some_and(|e| e.options.disable_configure) {
            return Ok(ConfigureOutcome::Skipped("configuration disabled"));
        }
        let Some(routine) = definition.and_then(|d| d.configure.clone()) else {
            return Ok(ConfigureOutcome::Skipped("model has no configure routine"));
        };

        let claimed = self.ctx.runtime.with(ieee, |rt| {
            match (rt.configuration, trigger) {
                (ConfigurationStatus::Configuring, _) => {
                    return Err(ConfigureOutcome::AlreadyConfiguring)
                }
                (ConfigurationStatus::Configured, t) if t != Trigger::Operator => {
                    return Err(ConfigureOutcome::Skipped("already configured"))
                }
                (ConfigurationStatus::Failed, t) if t != Trigger::Operator => {
                    return Err(ConfigureOutcome::Skipped("configuration exhausted"))
                }
                _ => {}
            }
            if trigger == Trigger::Operator {
                rt.configure_attempts = 0;
            }
            rt.configuration = ConfigurationStatus::Configuring;
            Ok((rt.epoch, rt.configure_attempts))
        });
        let (epoch, attempts) = match claimed {
            Ok(claim) => claim,
            Err(outcome) => {
                debug!(
                    category = "configure",
                    ieee = %ieee,
                    ?trigger,
                    ?outcome,
                    "Configure trigger ignored"
                );
                return Ok(outcome);
            }
        };
        self.emit(ieee, ConfigurationStatus::Configuring, attempts);

        let alias = entity
            .map(|e| e.friendly_name)
            .unwrap_or_else(|| ieee.to_string());
        info!(category = "configure", ieee = %ieee, ?trigger, "Configuring '{}'", alias);

        let handle = DeviceHandle::new(info, self.ctx.radio.clone(), self.ctx.queue.clone());
        let result = run_routine(routine, handle).await;

        let applied = self.ctx.runtime.with_current(ieee, epoch, |rt| match &result {
            Ok(()) => {
                rt.configuration = ConfigurationStatus::Configured;
                rt.configure_attempts = 0;
                (rt.configuration, rt.configure_attempts)
            }
            Err(_) => {
                rt.configure_attempts += 1;
                rt.configuration = if rt.configure_attempts >= MAX_CONFIGURE_ATTEMPTS {
                    ConfigurationStatus::Failed
                } else {
                    ConfigurationStatus::Unset
                };
                (rt.configuration, rt.configure_attempts)
            }
        });
        let Some((status, attempts)) = applied else {
            debug!(
                category = "configure",
                ieee = %ieee,
                "Device changed while configuring, result dropped"
            );
            return Ok(ConfigureOutcome::Stale);
        };
        self.emit(ieee, status, attempts);

        match result {
            Ok(()) => {
                info!(category = "configure", ieee = %ieee, "Successfully configured '{}'", alias);
                Ok(ConfigureOutcome::Configured)
            }
            Err(e) if status == ConfigurationStatus::Failed => {
                let exhausted = BridgeError::ConfigurationExhausted {
                    alias: alias.clone(),
                    attempts,
                };
                warn!(category = "configure", ieee = %ieee, "{}: {}", exhausted, e);
                Ok(ConfigureOutcome::Exhausted {
                    attempts,
                    error: e.to_string(),
                })
            }
            Err(e) => {
                warn!(
                    category = "configure",
                    ieee = %ieee,
                    attempts,
                    "Failed to configure '{}': {}",
                    alias,
                    e
                );
                Ok(ConfigureOutcome::Failed {
                    attempts,
                    error: e.to_string(),
                })
            }
        }
    }

    fn emit(&self, ieee: &Ieee, status: ConfigurationStatus, attempts: u32) {
        self.ctx.emit(BridgeEvent::ConfigurationChanged {
            ieee: ieee.to_string(),
            status: status.to_string(),
            attempts,
            timestamp: chrono::Utc::now().timestamp(),
        });
    }
}

/// Run the routine in its own task so a panic inside it counts as a
/// failure instead of leaving the device in `Configuring`.
async fn run_routine(routine: Arc<dyn ConfigureRoutine>, handle: DeviceHandle) -> BridgeResult<()> {
    let task = tokio::spawn(async move { routine.configure(&handle).await });
    match task.await {
        Ok(result) => result,
        Err(e) => Err(RadioError::Aborted(format!("configure routine: {}", e)).into()),
    }
}
