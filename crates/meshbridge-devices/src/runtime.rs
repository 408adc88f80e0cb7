//! Per-device runtime state.
//!
//! The [`DeviceRuntimeRegistry`] is owned by the bridge and shared by `Arc`
//! with the pipeline, the configuration state machine and the availability
//! monitor. Entries are created on first reference and discarded on removal.
//! Every entry carries an epoch drawn from a registry-wide counter; removal
//! and rejoin move the device to a fresh epoch, so a completion that captured
//! an older epoch can detect that its device state is gone.
//!
//! Critical sections are short and never span an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use meshbridge_core::AvailabilityState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::entity::EntityKey;
use crate::radio::Ieee;

/// Whether post-join setup has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationStatus {
    #[default]
    Unset,
    Configuring,
    Configured,
    Failed,
}

impl fmt::Display for ConfigurationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Configuring => write!(f, "configuring"),
            Self::Configured => write!(f, "configured"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Liveness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Mains powered, probed on timeout
    Active,
    /// Battery powered, never probed
    Passive,
}

/// Liveness bookkeeping of one device.
#[derive(Debug)]
pub struct AvailabilityRuntime {
    pub classification: Classification,
    /// Set once the monitor has classified the device
    pub tracked: bool,
    pub last_seen: Option<Instant>,
    /// Pending expiry timer
    pub timer: Option<AbortHandle>,
    /// Bumped on every rearm; a firing timer checks it is still the latest
    pub timer_generation: u64,
    /// Last state published to the bus
    pub state: AvailabilityState,
    /// A probe (or its retry) is outstanding
    pub probing: bool,
}

impl Default for AvailabilityRuntime {
    fn default() -> Self {
        Self {
            classification: Classification::Passive,
            tracked: false,
            last_seen: None,
            timer: None,
            timer_generation: 0,
            state: AvailabilityState::Unknown,
            probing: false,
        }
    }
}

impl AvailabilityRuntime {
    /// Abort the pending timer, if any.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Brightness memory of a light entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightMemory {
    /// Level to restore on the next ON without explicit brightness
    pub restore_brightness: Option<u8>,
}

/// Runtime state of one device.
#[derive(Debug)]
pub struct DeviceRuntime {
    pub epoch: u64,
    pub configuration: ConfigurationStatus,
    pub configure_attempts: u32,
    pub availability: AvailabilityRuntime,
}

impl DeviceRuntime {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            configuration: ConfigurationStatus::Unset,
            configure_attempts: 0,
            availability: AvailabilityRuntime::default(),
        }
    }
}

#[derive(Default)]
struct RuntimeTable {
    devices: HashMap<Ieee, DeviceRuntime>,
    lights: HashMap<EntityKey, LightMemory>,
    next_epoch: u64,
}

impl RuntimeTable {
    fn allocate_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    fn entry(&mut self, ieee: &Ieee) -> &mut DeviceRuntime {
        let next_epoch = &mut self.next_epoch;
        self.devices.entry(ieee.clone()).or_insert_with(|| {
            *next_epoch += 1;
            DeviceRuntime::new(*next_epoch)
        })
    }
}

/// Registry of per-device runtime state.
#[derive(Clone, Default)]
pub struct DeviceRuntimeRegistry {
    inner: Arc<Mutex<RuntimeTable>>,
}

impl DeviceRuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the device's runtime, creating it when missing.
    pub fn with<R>(&self, ieee: &Ieee, f: impl FnOnce(&mut DeviceRuntime) -> R) -> R {
        f(self.inner.lock().entry(ieee))
    }

    /// Run `f` only when the device still has runtime state at `epoch`.
    pub fn with_current<R>(
        &self,
        ieee: &Ieee,
        epoch: u64,
        f: impl FnOnce(&mut DeviceRuntime) -> R,
    ) -> Option<R> {
        let mut table = self.inner.lock();
        match table.devices.get_mut(ieee) {
            Some(runtime) if runtime.epoch == epoch => Some(f(runtime)),
            _ => None,
        }
    }

    pub fn contains(&self, ieee: &Ieee) -> bool {
        self.inner.lock().devices.contains_key(ieee)
    }

    pub fn epoch(&self, ieee: &Ieee) -> u64 {
        self.with(ieee, |rt| rt.epoch)
    }

    pub fn is_current(&self, ieee: &Ieee, epoch: u64) -> bool {
        self.inner
            .lock()
            .devices
            .get(ieee)
            .is_some_and(|rt| rt.epoch == epoch)
    }

    pub fn configuration(&self, ieee: &Ieee) -> ConfigurationStatus {
        self.inner
            .lock()
            .devices
            .get(ieee)
            .map(|rt| rt.configuration)
            .unwrap_or_default()
    }

    pub fn configure_attempts(&self, ieee: &Ieee) -> u32 {
        self.inner
            .lock()
            .devices
            .get(ieee)
            .map(|rt| rt.configure_attempts)
            .unwrap_or(0)
    }

    pub fn availability_state(&self, ieee: &Ieee) -> AvailabilityState {
        self.inner
            .lock()
            .devices
            .get(ieee)
            .map(|rt| rt.availability.state)
            .unwrap_or(AvailabilityState::Unknown)
    }

    /// Device rejoined: configuration starts over, the liveness timer is
    /// cancelled and outstanding completions become stale. Returns the new
    /// epoch.
    pub fn rejoin(&self, ieee: &Ieee) -> u64 {
        let mut table = self.inner.lock();
        let epoch = table.allocate_epoch();
        let runtime = table.entry(ieee);
        runtime.epoch = epoch;
        runtime.configuration = ConfigurationStatus::Unset;
        runtime.configure_attempts = 0;
        runtime.availability.cancel_timer();
        runtime.availability.probing = false;
        epoch
    }

    /// Discard the device's runtime state and cancel its timer.
    pub fn remove(&self, ieee: &Ieee) -> Option<DeviceRuntime> {
        let mut table = self.inner.lock();
        table.lights.remove(&EntityKey::Device(ieee.clone()));
        let mut runtime = table.devices.remove(ieee)?;
        runtime.availability.cancel_timer();
        Some(runtime)
    }

    pub fn devices(&self) -> Vec<Ieee> {
        self.inner.lock().devices.keys().cloned().collect()
    }

    pub fn light(&self, key: &EntityKey) -> LightMemory {
        self.inner.lock().lights.get(key).copied().unwrap_or_default()
    }

    pub fn update_light<R>(&self, key: &EntityKey, f: impl FnOnce(&mut LightMemory) -> R) -> R {
        let mut table = self.inner.lock();
        f(table.lights.entry(key.clone()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_created_on_first_reference() {
        let registry = DeviceRuntimeRegistry::new();
        let ieee = Ieee::new("0x01");
        assert!(!registry.contains(&ieee));
        assert_eq!(registry.configuration(&ieee), ConfigurationStatus::Unset);

        registry.with(&ieee, |rt| rt.configuration = ConfigurationStatus::Configured);
        assert!(registry.contains(&ieee));
        assert_eq!(registry.configuration(&ieee), ConfigurationStatus::Configured);
    }

    #[test]
    fn test_rejoin_invalidates_epoch() {
        let registry = DeviceRuntimeRegistry::new();
        let ieee = Ieee::new("0x01");
        let before = registry.epoch(&ieee);
        registry.with(&ieee, |rt| {
            rt.configuration = ConfigurationStatus::Failed;
            rt.configure_attempts = 3;
        });

        let after = registry.rejoin(&ieee);
        assert_ne!(before, after);
        assert!(!registry.is_current(&ieee, before));
        assert!(registry.with_current(&ieee, before, |_| ()).is_none());
        assert_eq!(registry.configuration(&ieee), ConfigurationStatus::Unset);
        assert_eq!(registry.configure_attempts(&ieee), 0);
    }

    #[test]
    fn test_epochs_not_reused_after_removal() {
        let registry = DeviceRuntimeRegistry::new();
        let ieee = Ieee::new("0x01");
        let first = registry.epoch(&ieee);
        registry.remove(&ieee);
        let second = registry.epoch(&ieee);
        assert_ne!(first, second);
    }

    #[test]
    fn test_light_memory_per_entity() {
        let registry = DeviceRuntimeRegistry::new();
        let lamp = EntityKey::Device(Ieee::new("0x01"));
        let group = EntityKey::Group(4);
        registry.update_light(&lamp, |m| m.restore_brightness = Some(120));
        assert_eq!(registry.light(&lamp).restore_brightness, Some(120));
        assert_eq!(registry.light(&group).restore_brightness, None);

        registry.remove(&Ieee::new("0x01"));
        assert_eq!(registry.light(&lamp), LightMemory::default());
    }
}
