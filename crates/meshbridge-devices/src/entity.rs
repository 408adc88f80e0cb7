//! Entity registry.
//!
//! Maps friendly names (aliases) to devices and groups and back. Aliases are
//! unique across devices and groups; every mutation updates both directions
//! under one write lock, so a reader never observes a half-applied rename.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use meshbridge_core::config::validate_friendly_name;
use meshbridge_core::{BridgeSettings, EntityOptions};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::radio::{EndpointAddr, GroupId, Ieee};

/// Stable key of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityKey {
    Device(Ieee),
    Group(GroupId),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(ieee) => write!(f, "{}", ieee),
            Self::Group(id) => write!(f, "group:{}", id),
        }
    }
}

/// A radio node known to the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntity {
    pub ieee: Ieee,
    pub friendly_name: String,
    pub options: EntityOptions,
}

/// A logical set of device endpoints addressed as one.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupEntity {
    pub id: GroupId,
    pub friendly_name: String,
    pub members: Vec<EndpointAddr>,
    pub options: EntityOptions,
}

impl GroupEntity {
    pub fn has_member(&self, ieee: &Ieee) -> bool {
        self.members.iter().any(|m| &m.ieee == ieee)
    }
}

/// Anything addressable from the bus by alias.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Device(DeviceEntity),
    Group(GroupEntity),
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Device(d) => EntityKey::Device(d.ieee.clone()),
            Self::Group(g) => EntityKey::Group(g.id),
        }
    }

    pub fn friendly_name(&self) -> &str {
        match self {
            Self::Device(d) => &d.friendly_name,
            Self::Group(g) => &g.friendly_name,
        }
    }

    pub fn options(&self) -> &EntityOptions {
        match self {
            Self::Device(d) => &d.options,
            Self::Group(g) => &g.options,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

#[derive(Default)]
struct EntityIndex {
    devices: HashMap<Ieee, DeviceEntity>,
    groups: BTreeMap<GroupId, GroupEntity>,
    aliases: HashMap<String, EntityKey>,
}

impl EntityIndex {
    fn entity(&self, key: &EntityKey) -> Option<Entity> {
        match key {
            EntityKey::Device(ieee) => self.devices.get(ieee).cloned().map(Entity::Device),
            EntityKey::Group(id) => self.groups.get(id).cloned().map(Entity::Group),
        }
    }

    fn claim_alias(&self, alias: &str, owner: &EntityKey) -> BridgeResult<()> {
        match self.aliases.get(alias) {
            Some(existing) if existing != owner => {
                Err(BridgeError::DuplicateAlias(alias.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Bidirectional alias registry for devices and groups.
#[derive(Clone, Default)]
pub struct EntityRegistry {
    inner: Arc<RwLock<EntityIndex>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configured devices and groups.
    pub fn from_settings(settings: &BridgeSettings) -> BridgeResult<Self> {
        let registry = Self::new();
        for device in &settings.devices {
            registry.register_device(
                Ieee::new(&device.ieee),
                &device.friendly_name,
                device.options.clone(),
            )?;
        }
        for group in &settings.groups {
            let members = group
                .parsed_members()?
                .into_iter()
                .map(|(ieee, ep)| EndpointAddr::new(Ieee::new(ieee), ep))
                .collect();
            registry.register_group(
                group.id,
                &group.friendly_name,
                members,
                group.options.clone(),
            )?;
        }
        info!(
            category = "entity",
            devices = settings.devices.len(),
            groups = settings.groups.len(),
            "Entity registry loaded"
        );
        Ok(registry)
    }

    /// Add or replace a device. Re-registering a known device under a new
    /// alias releases its old alias.
    pub fn register_device(
        &self,
        ieee: Ieee,
        friendly_name: &str,
        options: EntityOptions,
    ) -> BridgeResult<()> {
        let key = EntityKey::Device(ieee.clone());
        let mut index = self.inner.write();
        index.claim_alias(friendly_name, &key)?;

        let previous = index.devices.get(&ieee).map(|d| d.friendly_name.clone());
        if let Some(old) = previous {
            index.aliases.remove(&old);
        }
        index.aliases.insert(friendly_name.to_string(), key);
        index.devices.insert(
            ieee.clone(),
            DeviceEntity {
                ieee,
                friendly_name: friendly_name.to_string(),
                options,
            },
        );
        Ok(())
    }

    /// Return the device, registering it under its IEEE address when it is
    /// not known yet.
    pub fn ensure_device(&self, ieee: &Ieee) -> DeviceEntity {
        if let Some(device) = self.device(ieee) {
            return device;
        }
        let mut index = self.inner.write();
        // Re-check under the write lock.
        if let Some(device) = index.devices.get(ieee) {
            return device.clone();
        }
        let key = EntityKey::Device(ieee.clone());
        let mut friendly_name = ieee.to_string();
        let mut suffix = 1;
        while index.claim_alias(&friendly_name, &key).is_err() {
            suffix += 1;
            friendly_name = format!("{}_{}", ieee, suffix);
        }
        if suffix > 1 {
            warn!(
                category = "entity",
                ieee = %ieee,
                alias = %friendly_name,
                "Address is taken as an alias, registering under a suffixed name"
            );
        }
        let device = DeviceEntity {
            ieee: ieee.clone(),
            friendly_name,
            options: EntityOptions::default(),
        };
        index.aliases.insert(device.friendly_name.clone(), key);
        index.devices.insert(ieee.clone(), device.clone());
        debug!(category = "entity", ieee = %ieee, "Registered device under its address");
        device
    }

    pub fn register_group(
        &self,
        id: GroupId,
        friendly_name: &str,
        members: Vec<EndpointAddr>,
        options: EntityOptions,
    ) -> BridgeResult<()> {
        let key = EntityKey::Group(id);
        let mut index = self.inner.write();
        index.claim_alias(friendly_name, &key)?;

        let previous = index.groups.get(&id).map(|g| g.friendly_name.clone());
        if let Some(old) = previous {
            index.aliases.remove(&old);
        }
        index.aliases.insert(friendly_name.to_string(), key);
        index.groups.insert(
            id,
            GroupEntity {
                id,
                friendly_name: friendly_name.to_string(),
                members,
                options,
            },
        );
        Ok(())
    }

    /// Forget a device and drop it from every group it belonged to.
    pub fn remove_device(&self, ieee: &Ieee) -> Option<DeviceEntity> {
        let mut index = self.inner.write();
        let device = index.devices.remove(ieee)?;
        index.aliases.remove(&device.friendly_name);
        for group in index.groups.values_mut() {
            group.members.retain(|m| &m.ieee != ieee);
        }
        Some(device)
    }

    /// Change the alias of a device or group.
    pub fn rename(&self, from: &str, to: &str) -> BridgeResult<EntityKey> {
        validate_friendly_name(to)?;
        let mut index = self.inner.write();
        let key = index
            .aliases
            .get(from)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownEntity(from.to_string()))?;
        index.claim_alias(to, &key)?;

        index.aliases.remove(from);
        index.aliases.insert(to.to_string(), key.clone());
        match &key {
            EntityKey::Device(ieee) => {
                if let Some(device) = index.devices.get_mut(ieee) {
                    device.friendly_name = to.to_string();
                }
            }
            EntityKey::Group(id) => {
                if let Some(group) = index.groups.get_mut(id) {
                    group.friendly_name = to.to_string();
                }
            }
        }
        info!(category = "entity", key = %key, "Renamed '{}' to '{}'", from, to);
        Ok(key)
    }

    pub fn resolve(&self, alias: &str) -> Option<Entity> {
        let index = self.inner.read();
        let key = index.aliases.get(alias)?;
        index.entity(key)
    }

    pub fn resolve_key(&self, alias: &str) -> Option<EntityKey> {
        self.inner.read().aliases.get(alias).cloned()
    }

    /// Resolve `alias[/label]`. The full path wins over an alias plus
    /// endpoint label, so aliases may contain `/`.
    pub fn resolve_path(&self, path: &str) -> Option<(Entity, Option<String>)> {
        if let Some(entity) = self.resolve(path) {
            return Some((entity, None));
        }
        let (alias, label) = path.rsplit_once('/')?;
        if label.is_empty() {
            return None;
        }
        self.resolve(alias).map(|entity| (entity, Some(label.to_string())))
    }

    pub fn get(&self, key: &EntityKey) -> Option<Entity> {
        self.inner.read().entity(key)
    }

    pub fn device(&self, ieee: &Ieee) -> Option<DeviceEntity> {
        self.inner.read().devices.get(ieee).cloned()
    }

    pub fn group(&self, id: GroupId) -> Option<GroupEntity> {
        self.inner.read().groups.get(&id).cloned()
    }

    pub fn alias_of(&self, key: &EntityKey) -> Option<String> {
        self.get(key).map(|e| e.friendly_name().to_string())
    }

    /// Groups that have at least one endpoint of the device as member.
    pub fn groups_containing(&self, ieee: &Ieee) -> Vec<GroupEntity> {
        self.inner
            .read()
            .groups
            .values()
            .filter(|g| g.has_member(ieee))
            .cloned()
            .collect()
    }

    pub fn devices(&self) -> Vec<DeviceEntity> {
        let mut devices: Vec<_> = self.inner.read().devices.values().cloned().collect();
        devices.sort_by(|a, b| a.friendly_name.cmp(&b.friendly_name));
        devices
    }

    pub fn groups(&self) -> Vec<GroupEntity> {
        self.inner.read().groups.values().cloned().collect()
    }
}
