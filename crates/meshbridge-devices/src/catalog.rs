//! Per-model definitions.
//!
//! The catalog answers "which converters, which configure routine and which
//! endpoint names does this hardware model have". Real catalogs are large
//! external tables; [`StaticCatalog`] is an in-memory implementation with an
//! optional fallback definition for unknown models.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::configure::{ConfigureRoutine, StandardLightConfigure};
use crate::converters::{
    BrightnessConverter, ColorReport, ColorTempConverter, ColorXyConverter, Converter,
    FromConverter, LevelReport, OnOffConverter, OnOffReport,
};
use crate::radio::{Cluster, DeviceInfo, EndpointId};

/// Capabilities of one hardware model.
#[derive(Clone)]
pub struct ModelDefinition {
    pub model: String,
    pub vendor: String,
    pub description: String,
    pub converters: Vec<Arc<dyn Converter>>,
    pub from_converters: Vec<Arc<dyn FromConverter>>,
    /// Post-join setup, if the model needs any
    pub configure: Option<Arc<dyn ConfigureRoutine>>,
    /// Endpoint labels usable in topics (`left`, `l2`, ...)
    pub endpoints: BTreeMap<String, EndpointId>,
    pub default_endpoint: Option<EndpointId>,
}

impl std::fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("model", &self.model)
            .field("vendor", &self.vendor)
            .field("converters", &self.converters.len())
            .field("configure", &self.configure.is_some())
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl ModelDefinition {
    pub fn new(model: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            vendor: vendor.into(),
            description: String::new(),
            converters: Vec::new(),
            from_converters: Vec::new(),
            configure: None,
            endpoints: BTreeMap::new(),
            default_endpoint: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converters.push(converter);
        self
    }

    pub fn with_from_converter(mut self, converter: Arc<dyn FromConverter>) -> Self {
        self.from_converters.push(converter);
        self
    }

    pub fn with_configure(mut self, routine: Arc<dyn ConfigureRoutine>) -> Self {
        self.configure = Some(routine);
        self
    }

    pub fn with_endpoint(mut self, label: impl Into<String>, id: EndpointId) -> Self {
        self.endpoints.insert(label.into(), id);
        self
    }

    pub fn with_default_endpoint(mut self, id: EndpointId) -> Self {
        self.default_endpoint = Some(id);
        self
    }

    /// First converter that handles `key`.
    pub fn converter_for(&self, key: &str) -> Option<Arc<dyn Converter>> {
        self.converters
            .iter()
            .find(|c| c.keys().iter().any(|k| *k == key))
            .cloned()
    }

    pub fn from_converters_for(&self, cluster: &Cluster) -> Vec<Arc<dyn FromConverter>> {
        self.from_converters
            .iter()
            .filter(|c| &c.cluster() == cluster)
            .cloned()
            .collect()
    }

    pub fn endpoint_label(&self, id: EndpointId) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|(_, ep)| **ep == id)
            .map(|(label, _)| label.as_str())
    }
}

/// Generic light: on/off, level and colour converters with the standard
/// configure routine.
pub fn generic_light(model: impl Into<String>, vendor: impl Into<String>) -> ModelDefinition {
    ModelDefinition::new(model, vendor)
        .with_description("Generic light")
        .with_converter(Arc::new(OnOffConverter))
        .with_converter(Arc::new(BrightnessConverter))
        .with_converter(Arc::new(ColorTempConverter))
        .with_converter(Arc::new(ColorXyConverter))
        .with_from_converter(Arc::new(OnOffReport))
        .with_from_converter(Arc::new(LevelReport))
        .with_from_converter(Arc::new(ColorReport))
        .with_configure(Arc::new(StandardLightConfigure))
}

/// Model lookup.
pub trait Catalog: Send + Sync {
    fn find(&self, model: &str) -> Option<Arc<ModelDefinition>>;
}

/// Shared catalog handle.
pub type SharedCatalog = Arc<dyn Catalog>;

/// In-memory catalog.
#[derive(Default)]
pub struct StaticCatalog {
    models: HashMap<String, Arc<ModelDefinition>>,
    fallback: Option<Arc<ModelDefinition>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, definition: ModelDefinition) -> Self {
        self.models
            .insert(definition.model.clone(), Arc::new(definition));
        self
    }

    /// Definition returned for models that are not listed.
    pub fn with_fallback(mut self, definition: ModelDefinition) -> Self {
        self.fallback = Some(Arc::new(definition));
        self
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Catalog for StaticCatalog {
    fn find(&self, model: &str) -> Option<Arc<ModelDefinition>> {
        self.models
            .get(model)
            .cloned()
            .or_else(|| self.fallback.clone())
    }
}

/// Resolve an endpoint label against the model definition and the device.
///
/// No label: the model's default endpoint, else the device's first endpoint,
/// else 1. A label is a model endpoint name or a numeric id the device has.
pub fn resolve_endpoint(
    definition: Option<&ModelDefinition>,
    device: Option<&DeviceInfo>,
    label: Option<&str>,
) -> Option<EndpointId> {
    let Some(label) = label else {
        return definition
            .and_then(|d| d.default_endpoint)
            .or_else(|| device.and_then(|d| d.endpoints.first()).map(|e| e.id))
            .or(Some(1));
    };

    if let Some(id) = definition.and_then(|d| d.endpoints.get(label)) {
        return Some(*id);
    }
    let id = label.parse::<EndpointId>().ok()?;
    match device {
        Some(device) if device.endpoint(id).is_none() => None,
        _ => Some(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::EndpointInfo;

    #[test]
    fn test_fallback_definition() {
        let catalog = StaticCatalog::new()
            .with_model(generic_light("LCT015", "Philips"))
            .with_fallback(ModelDefinition::new("unknown", "unknown"));
        assert_eq!(catalog.find("LCT015").unwrap().vendor, "Philips");
        assert_eq!(catalog.find("XYZ").unwrap().model, "unknown");
        assert!(StaticCatalog::new().find("XYZ").is_none());
    }

    #[test]
    fn test_converter_lookup_by_key() {
        let light = generic_light("LCT015", "Philips");
        assert!(light.converter_for("brightness_percent").is_some());
        assert!(light.converter_for("color").is_some());
        assert!(light.converter_for("linkquality").is_none());
        assert_eq!(light.from_converters_for(&Cluster::LevelCtrl).len(), 1);
    }

    #[test]
    fn test_endpoint_resolution() {
        let definition = ModelDefinition::new("switch", "acme")
            .with_endpoint("left", 1)
            .with_endpoint("right", 2)
            .with_default_endpoint(2);
        let device = DeviceInfo::new("0x01", "switch")
            .with_endpoint(EndpointInfo::new(1))
            .with_endpoint(EndpointInfo::new(2));

        assert_eq!(resolve_endpoint(Some(&definition), Some(&device), None), Some(2));
        assert_eq!(resolve_endpoint(Some(&definition), Some(&device), Some("left")), Some(1));
        assert_eq!(resolve_endpoint(Some(&definition), Some(&device), Some("1")), Some(1));
        assert_eq!(resolve_endpoint(Some(&definition), Some(&device), Some("7")), None);
        assert_eq!(resolve_endpoint(Some(&definition), Some(&device), Some("top")), None);
        assert_eq!(resolve_endpoint(None, Some(&device), None), Some(1));
    }
}
