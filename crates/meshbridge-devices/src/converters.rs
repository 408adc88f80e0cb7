//! Property converters.
//!
//! A [`Converter`] turns one semantic property of a bus message (`state`,
//! `brightness`, `color_temp`, ...) into at most one radio [`Operation`].
//! A [`FromConverter`] turns attributes reported or read from a cluster back
//! into state properties. Model definitions in the catalog are built from
//! these; the generic light set below covers on/off, dimmable and colour
//! lights.

use meshbridge_core::EntityOptions;
use serde_json::{json, Map, Value};

use crate::error::{BridgeError, BridgeResult};
use crate::radio::{Cluster, EndpointId};

/// What a converter asks the radio to do.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioAction {
    Command { name: String, payload: Value },
    Write { attributes: Map<String, Value> },
    Read { attributes: Vec<String> },
}

/// Radio operation descriptor produced by a converter.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub cluster: Cluster,
    pub action: RadioAction,
    /// Send to this endpoint instead of the resolved one
    pub endpoint: Option<EndpointId>,
    /// State to publish when the operation succeeds (optimistic entities)
    pub state: Map<String, Value>,
    /// Attributes to read back for non-optimistic entities
    pub read_back: Vec<String>,
}

impl Operation {
    pub fn command(cluster: Cluster, name: impl Into<String>, payload: Value) -> Self {
        Self {
            cluster,
            action: RadioAction::Command {
                name: name.into(),
                payload,
            },
            endpoint: None,
            state: Map::new(),
            read_back: Vec::new(),
        }
    }

    pub fn read(cluster: Cluster, attributes: &[&str]) -> Self {
        Self {
            cluster,
            action: RadioAction::Read {
                attributes: attributes.iter().map(|a| a.to_string()).collect(),
            },
            endpoint: None,
            state: Map::new(),
            read_back: Vec::new(),
        }
    }

    pub fn with_state(mut self, key: &str, value: Value) -> Self {
        self.state.insert(key.to_string(), value);
        self
    }

    pub fn with_read_back(mut self, attributes: &[&str]) -> Self {
        self.read_back = attributes.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Same physical call as `other` (cluster, action and endpoint).
    pub fn same_call(&self, other: &Operation) -> bool {
        self.cluster == other.cluster
            && self.action == other.action
            && self.endpoint == other.endpoint
    }
}

/// Context handed to every converter of one message.
pub struct ConvertMeta<'a> {
    /// The whole message, after brightness restore rewriting
    pub message: &'a Map<String, Value>,
    /// Last known state of the entity
    pub state: &'a Map<String, Value>,
    /// Transition in tenths of a second, computed once per message
    pub transition: Option<u16>,
    /// Endpoint label from the topic
    pub endpoint_name: Option<&'a str>,
    pub options: &'a EntityOptions,
}

/// Converts one or more message keys into radio operations.
pub trait Converter: Send + Sync {
    /// Message keys this converter handles.
    fn keys(&self) -> &'static [&'static str];

    /// Translate a `/set` value.
    fn convert_set(
        &self,
        key: &str,
        value: &Value,
        meta: &ConvertMeta<'_>,
    ) -> BridgeResult<Option<Operation>>;

    /// Translate a `/get` request.
    fn convert_get(&self, _key: &str, _meta: &ConvertMeta<'_>) -> BridgeResult<Option<Operation>> {
        Ok(None)
    }
}

/// Converts cluster attributes into state properties.
pub trait FromConverter: Send + Sync {
    fn cluster(&self) -> Cluster;

    fn convert(
        &self,
        attributes: &Map<String, Value>,
        state: &Map<String, Value>,
    ) -> Map<String, Value>;
}

fn invalid(key: &str, reason: impl Into<String>) -> BridgeError {
    BridgeError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Interpret a `state` value as ON/OFF/TOGGLE (upper case).
pub fn parse_state(value: &Value) -> Option<&'static str> {
    match value {
        Value::String(s) => match s.to_ascii_uppercase().as_str() {
            "ON" => Some("ON"),
            "OFF" => Some("OFF"),
            "TOGGLE" => Some("TOGGLE"),
            _ => None,
        },
        Value::Bool(true) => Some("ON"),
        Value::Bool(false) => Some("OFF"),
        _ => None,
    }
}

fn number(key: &str, value: &Value) -> BridgeResult<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(key, "not a number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(key, format!("'{}' is not a number", s))),
        _ => Err(invalid(key, "expected a number")),
    }
}

/// `state`: on/off/toggle.
///
/// OFF with a transition is sent as a level move to zero so the light fades.
pub struct OnOffConverter;

impl Converter for OnOffConverter {
    fn keys(&self) -> &'static [&'static str] {
        &["state"]
    }

    fn convert_set(
        &self,
        key: &str,
        value: &Value,
        meta: &ConvertMeta<'_>,
    ) -> BridgeResult<Option<Operation>> {
        let state = parse_state(value)
            .ok_or_else(|| invalid(key, format!("{} is not ON, OFF or TOGGLE", value)))?;

        let operation = match state {
            "OFF" => {
                let operation = match meta.transition {
                    Some(transtime) if transtime > 0 => Operation::command(
                        Cluster::LevelCtrl,
                        "moveToLevelWithOnOff",
                        json!({ "level": 0, "transtime": transtime }),
                    ),
                    _ => Operation::command(Cluster::OnOff, "off", json!({})),
                };
                operation.with_state("state", json!("OFF"))
            }
            "ON" => {
                Operation::command(Cluster::OnOff, "on", json!({})).with_state("state", json!("ON"))
            }
            _ => {
                let operation = Operation::command(Cluster::OnOff, "toggle", json!({}));
                // Unknown prior state: send the toggle, publish nothing.
                match meta.state.get("state").and_then(parse_state) {
                    Some("ON") => operation.with_state("state", json!("OFF")),
                    Some("OFF") => operation.with_state("state", json!("ON")),
                    _ => operation,
                }
            }
        };
        Ok(Some(operation.with_read_back(&["onOff"])))
    }

    fn convert_get(&self, _key: &str, _meta: &ConvertMeta<'_>) -> BridgeResult<Option<Operation>> {
        Ok(Some(Operation::read(Cluster::OnOff, &["onOff"])))
    }
}

/// `brightness` (1-254) and `brightness_percent` (0-100).
pub struct BrightnessConverter;

impl Converter for BrightnessConverter {
    fn keys(&self) -> &'static [&'static str] {
        &["brightness", "brightness_percent"]
    }

    fn convert_set(
        &self,
        key: &str,
        value: &Value,
        meta: &ConvertMeta<'_>,
    ) -> BridgeResult<Option<Operation>> {
        let raw = number(key, value)?;
        let level = if key == "brightness_percent" {
            if !(0.0..=100.0).contains(&raw) {
                return Err(invalid(key, "must be between 0 and 100"));
            }
            (raw * 2.54).round()
        } else {
            if !(0.0..=255.0).contains(&raw) {
                return Err(invalid(key, "must be between 0 and 255"));
            }
            raw.round()
        };
        let level = level.min(254.0) as u8;

        let operation = Operation::command(
            Cluster::LevelCtrl,
            "moveToLevelWithOnOff",
            json!({ "level": level, "transtime": meta.transition.unwrap_or(0) }),
        )
        .with_state("brightness", json!(level))
        .with_state("state", json!(if level > 0 { "ON" } else { "OFF" }))
        .with_read_back(&["currentLevel"]);
        Ok(Some(operation))
    }

    fn convert_get(&self, _key: &str, _meta: &ConvertMeta<'_>) -> BridgeResult<Option<Operation>> {
        Ok(Some(Operation::read(Cluster::LevelCtrl, &["currentLevel"])))
    }
}

/// `color_temp` in mireds.
pub struct ColorTempConverter;

impl Converter for ColorTempConverter {
    fn keys(&self) -> &'static [&'static str] {
        &["color_temp"]
    }

    fn convert_set(
        &self,
        key: &str,
        value: &Value,
        meta: &ConvertMeta<'_>,
    ) -> BridgeResult<Option<Operation>> {
        let mireds = number(key, value)?;
        if !(0.0..=65279.0).contains(&mireds) {
            return Err(invalid(key, "out of range"));
        }
        let mireds = mireds.round() as u16;
        let operation = Operation::command(
            Cluster::ColorCtrl,
            "moveToColorTemp",
            json!({ "colortemp": mireds, "transtime": meta.transition.unwrap_or(0) }),
        )
        .with_state("color_temp", json!(mireds))
        .with_state("color_mode", json!("color_temp"))
        .with_read_back(&["colorTemperature"]);
        Ok(Some(operation))
    }

    fn convert_get(&self, _key: &str, _meta: &ConvertMeta<'_>) -> BridgeResult<Option<Operation>> {
        Ok(Some(Operation::read(Cluster::ColorCtrl, &["colorTemperature"])))
    }
}

/// `color` as CIE `{x, y}`.
pub struct ColorXyConverter;

impl Converter for ColorXyConverter {
    fn keys(&self) -> &'static [&'static str] {
        &["color"]
    }

    fn convert_set(
        &self,
        key: &str,
        value: &Value,
        meta: &ConvertMeta<'_>,
    ) -> BridgeResult<Option<Operation>> {
        let coordinate = |axis: &str| -> BridgeResult<f64> {
            let v = value
                .get(axis)
                .ok_or_else(|| invalid(key, format!("missing '{}'", axis)))?;
            let v = number(key, v)?;
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid(key, format!("'{}' must be between 0 and 1", axis)));
            }
            Ok(v)
        };
        let x = coordinate("x")?;
        let y = coordinate("y")?;

        let operation = Operation::command(
            Cluster::ColorCtrl,
            "moveToColor",
            json!({
                "colorx": (x * 65535.0).round() as u16,
                "colory": (y * 65535.0).round() as u16,
                "transtime": meta.transition.unwrap_or(0),
            }),
        )
        .with_state("color", json!({ "x": x, "y": y }))
        .with_state("color_mode", json!("xy"))
        .with_read_back(&["currentX", "currentY"]);
        Ok(Some(operation))
    }

    fn convert_get(&self, _key: &str, _meta: &ConvertMeta<'_>) -> BridgeResult<Option<Operation>> {
        Ok(Some(Operation::read(Cluster::ColorCtrl, &["currentX", "currentY"])))
    }
}

/// `onOff` attribute to `state`.
pub struct OnOffReport;

impl FromConverter for OnOffReport {
    fn cluster(&self) -> Cluster {
        Cluster::OnOff
    }

    fn convert(
        &self,
        attributes: &Map<String, Value>,
        _state: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        let on = match attributes.get("onOff") {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::Number(n)) => n.as_u64().map(|n| n != 0),
            _ => None,
        };
        if let Some(on) = on {
            out.insert("state".to_string(), json!(if on { "ON" } else { "OFF" }));
        }
        out
    }
}

/// `currentLevel` attribute to `brightness`.
pub struct LevelReport;

impl FromConverter for LevelReport {
    fn cluster(&self) -> Cluster {
        Cluster::LevelCtrl
    }

    fn convert(
        &self,
        attributes: &Map<String, Value>,
        _state: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        if let Some(level) = attributes.get("currentLevel").and_then(Value::as_u64) {
            out.insert("brightness".to_string(), json!(level.min(254)));
        }
        out
    }
}

/// Colour attributes to `color_temp`, `color` and `color_mode`.
pub struct ColorReport;

fn rounded(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

impl FromConverter for ColorReport {
    fn cluster(&self) -> Cluster {
        Cluster::ColorCtrl
    }

    fn convert(
        &self,
        attributes: &Map<String, Value>,
        state: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        if let Some(mireds) = attributes.get("colorTemperature").and_then(Value::as_u64) {
            out.insert("color_temp".to_string(), json!(mireds));
        }

        let x = attributes.get("currentX").and_then(Value::as_u64);
        let y = attributes.get("currentY").and_then(Value::as_u64);
        if x.is_some() || y.is_some() {
            // A report may carry one axis only; keep the other from state.
            let previous = state.get("color");
            let axis = |raw: Option<u64>, name: &str| {
                raw.map(|v| rounded(v as f64 / 65535.0))
                    .or_else(|| previous.and_then(|c| c.get(name)).and_then(Value::as_f64))
            };
            let mut color = Map::new();
            if let Some(x) = axis(x, "x") {
                color.insert("x".to_string(), json!(x));
            }
            if let Some(y) = axis(y, "y") {
                color.insert("y".to_string(), json!(y));
            }
            out.insert("color".to_string(), Value::Object(color));
        }

        match attributes.get("colorMode").and_then(Value::as_u64) {
            Some(0) => {
                out.insert("color_mode".to_string(), json!("hs"));
            }
            Some(1) => {
                out.insert("color_mode".to_string(), json!("xy"));
            }
            Some(2) => {
                out.insert("color_mode".to_string(), json!("color_temp"));
            }
            _ => {}
        }
        out
    }
}
