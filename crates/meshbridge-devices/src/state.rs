//! Last-known entity state.
//!
//! Published state is merged into this cache (new properties over old) and
//! optionally persisted to a JSON file so it survives restarts. Nothing else
//! is persisted by the bridge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::entity::EntityKey;
use crate::error::BridgeResult;
use crate::radio::Ieee;

/// Merged state per entity.
#[derive(Clone, Default)]
pub struct StateCache {
    entries: Arc<RwLock<HashMap<EntityKey, Map<String, Value>>>>,
    path: Option<PathBuf>,
}

fn key_to_string(key: &EntityKey) -> String {
    key.to_string()
}

fn key_from_string(raw: &str) -> EntityKey {
    match raw.strip_prefix("group:").and_then(|id| id.parse().ok()) {
        Some(id) => EntityKey::Group(id),
        None => EntityKey::Device(Ieee::new(raw)),
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache backed by `path`. Existing content is loaded; a missing file
    /// starts empty.
    pub fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(meshbridge_core::Error::from)?;
            let raw: HashMap<String, Map<String, Value>> =
                serde_json::from_str(&content).map_err(meshbridge_core::Error::from)?;
            entries = raw
                .into_iter()
                .map(|(k, v)| (key_from_string(&k), v))
                .collect();
            info!(
                category = "state",
                entries = entries.len(),
                "Loaded state from {}",
                path.display()
            );
        }
        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            path: Some(path),
        })
    }

    pub fn get(&self, key: &EntityKey) -> Map<String, Value> {
        self.entries.read().get(key).cloned().unwrap_or_default()
    }

    /// Merge `update` over the last known state and return the result.
    pub fn merge(&self, key: &EntityKey, update: &Map<String, Value>) -> Map<String, Value> {
        let mut entries = self.entries.write();
        let state = entries.entry(key.clone()).or_default();
        for (k, v) in update {
            state.insert(k.clone(), v.clone());
        }
        state.clone()
    }

    pub fn remove(&self, key: &EntityKey) {
        self.entries.write().remove(key);
    }

    /// Write the cache to its backing file, if it has one.
    pub fn save(&self) -> BridgeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw: HashMap<String, Map<String, Value>> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (key_to_string(k), v.clone()))
            .collect();
        let content = serde_json::to_string_pretty(&raw).map_err(meshbridge_core::Error::from)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(meshbridge_core::Error::from)?;
        }
        std::fs::write(path, content).map_err(meshbridge_core::Error::from)?;
        debug!(category = "state", "Saved state to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_unrelated_properties() {
        let cache = StateCache::new();
        let key = EntityKey::Device(Ieee::new("0x01"));
        let mut first = Map::new();
        first.insert("state".into(), json!("ON"));
        first.insert("brightness".into(), json!(200));
        cache.merge(&key, &first);

        let mut second = Map::new();
        second.insert("state".into(), json!("OFF"));
        let merged = cache.merge(&key, &second);
        assert_eq!(merged["state"], json!("OFF"));
        assert_eq!(merged["brightness"], json!(200));
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let cache = StateCache::open(&path).unwrap();
        let mut update = Map::new();
        update.insert("state".into(), json!("ON"));
        cache.merge(&EntityKey::Device(Ieee::new("0x01")), &update);
        cache.merge(&EntityKey::Group(5), &update);
        cache.save().unwrap();

        let reloaded = StateCache::open(&path).unwrap();
        assert_eq!(reloaded.get(&EntityKey::Group(5))["state"], json!("ON"));
        assert_eq!(
            reloaded.get(&EntityKey::Device(Ieee::new("0x01")))["state"],
            json!("ON")
        );
    }
}
