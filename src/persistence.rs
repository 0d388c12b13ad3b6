use crate::error::BoardResult;
use crate::layer::LayerState;
use crate::layout::BoardConfig;
use log::warn;
use serde_json::{Map, Value};

pub const BOARD_WIDTH: &str = "board_width";
pub const BOARD_HEIGHT: &str = "board_height";
pub const BORDER_WIDTH: &str = "border_width";
pub const CANVAS_COLOR: &str = "canvas_color";
pub const AUTO_SIZE: &str = "auto_size";
pub const DISPLAY_SCALE: &str = "display_scale";
pub const IMAGE_STATES: &str = "image_states";

#[derive(Clone, Debug, PartialEq)]
pub struct WidgetValue {
    pub name: String,
    pub value: Value,
}

/// Per-instance values the host saves and hands back on reload.
///
/// Every write lands in both the property map and the widget value list the
/// host serializes, so the two never disagree.
#[derive(Clone, Debug, Default)]
pub struct PropertyStore {
    properties: Map<String, Value>,
    widgets: Vec<WidgetValue>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_properties(properties: Map<String, Value>) -> Self {
        let widgets = properties
            .iter()
            .map(|(name, value)| WidgetValue {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        Self { properties, widgets }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.widgets.iter_mut().find(|w| w.name == name) {
            Some(widget) => widget.value = value.clone(),
            None => self.widgets.push(WidgetValue {
                name: name.to_string(),
                value: value.clone(),
            }),
        }
        self.properties.insert(name.to_string(), value);
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn widget_values(&self) -> Vec<Value> {
        self.widgets.iter().map(|w| w.value.clone()).collect()
    }

    pub fn widgets(&self) -> &[WidgetValue] {
        &self.widgets
    }
}

pub fn read_config(store: &PropertyStore) -> BoardConfig {
    let mut config = BoardConfig::default();
    let as_u32 = |name: &str| {
        store
            .get(name)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round().min(u32::MAX as f64) as u32)
    };
    if let Some(v) = as_u32(BOARD_WIDTH) {
        config.board_width = v;
    }
    if let Some(v) = as_u32(BOARD_HEIGHT) {
        config.board_height = v;
    }
    if let Some(v) = as_u32(BORDER_WIDTH) {
        config.border_width = v;
    }
    if let Some(v) = store.get(CANVAS_COLOR).and_then(Value::as_str) {
        config.canvas_color = v.to_string();
    }
    if let Some(v) = store.get(AUTO_SIZE).and_then(Value::as_bool) {
        config.auto_size = v;
    }
    if let Some(v) = store.get(DISPLAY_SCALE).and_then(Value::as_f64) {
        config.display_scale = v;
    }
    config.clamp();
    config
}

pub fn write_config(store: &mut PropertyStore, config: &BoardConfig) {
    store.set(BOARD_WIDTH, config.board_width.into());
    store.set(BOARD_HEIGHT, config.board_height.into());
    store.set(BORDER_WIDTH, config.border_width.into());
    store.set(CANVAS_COLOR, config.canvas_color.clone().into());
    store.set(AUTO_SIZE, config.auto_size.into());
    store.set(DISPLAY_SCALE, config.display_scale.into());
}

/// Parses persisted layer states, given either as JSON text or as an array.
pub fn parse_image_states(value: &Value) -> BoardResult<Vec<LayerState>> {
    let states = match value {
        Value::String(text) if text.trim().is_empty() => Vec::new(),
        Value::String(text) => serde_json::from_str(text)?,
        other => serde_json::from_value(other.clone())?,
    };
    Ok(states)
}

/// Restored states, or `None` when absent or unreadable.
pub fn read_image_states(store: &PropertyStore) -> Option<Vec<LayerState>> {
    let value = store.get(IMAGE_STATES)?;
    match parse_image_states(value) {
        Ok(states) if states.is_empty() => None,
        Ok(states) => Some(states),
        Err(err) => {
            warn!("discarding persisted image states: {}", err);
            None
        }
    }
}

pub fn write_image_states(store: &mut PropertyStore, layers: &[LayerState]) -> BoardResult<()> {
    let text = serde_json::to_string(layers)?;
    store.set(IMAGE_STATES, Value::String(text));
    Ok(())
}
