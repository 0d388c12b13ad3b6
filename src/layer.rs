use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LayerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Affine placement of a layer; `x`/`y` is the layer center in board-local
/// coordinates (origin at the outer top-left, border included).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: f64,
    pub skew_x: f64,
    pub skew_y: f64,
}

impl Transform {
    pub fn centered(center: (f64, f64)) -> Self {
        Self {
            x: center.0,
            y: center.1,
            ..Self::default()
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            skew_x: 0.0,
            skew_y: 0.0,
        }
    }
}

pub fn default_adjustments() -> Map<String, Value> {
    let mut map = Map::new();
    for key in ["brightness", "contrast", "saturation"] {
        map.insert(key.to_string(), Value::from(0.0));
    }
    map
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerState {
    #[serde(default)]
    pub id: Option<LayerId>,
    #[serde(default)]
    pub order: usize,
    #[serde(flatten)]
    pub transform: Transform,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub source: Option<String>,
    /// Set once the user moved, scaled or rotated the layer by hand.
    #[serde(default)]
    pub transformed: bool,
    #[serde(default = "default_adjustments")]
    pub adjustments: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl LayerState {
    pub fn new(order: usize, center: (f64, f64)) -> Self {
        Self {
            id: None,
            order,
            transform: Transform::centered(center),
            visible: true,
            locked: false,
            source: None,
            transformed: false,
            adjustments: default_adjustments(),
        }
    }

    /// Returns the layer to its default placement, keeping identity,
    /// stacking and flags.
    pub fn reset_transform(&mut self, center: (f64, f64)) {
        self.transform = Transform::centered(center);
        self.transformed = false;
    }

    pub fn source_filename(&self) -> Option<&str> {
        self.source.as_deref().map(filename_of)
    }
}

/// Last path segment, used to match layers whose directory or query changed.
pub fn filename_of(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use crate::layer::{filename_of, LayerState};

    #[test]
    fn test_filename_of() {
        assert_eq!("a.png", filename_of("out/sub/a.png"));
        assert_eq!("b.png", filename_of("C:\\tmp\\b.png"));
        assert_eq!("c.png", filename_of("c.png?rand=3"));
    }

    #[test]
    fn test_state_defaults_when_fields_missing() {
        let state: LayerState = serde_json::from_str(r#"{"x": 12, "y": 8, "source": "a.png"}"#).unwrap();
        assert_eq!(12.0, state.transform.x);
        assert_eq!(1.0, state.transform.scale_x);
        assert!(state.visible);
        assert!(!state.locked);
        assert!(state.id.is_none());
        assert!(state.adjustments.contains_key("brightness"));
    }

    #[test]
    fn test_state_wire_names() {
        let mut state = LayerState::new(2, (10.0, 20.0));
        state.adjustments.insert("hue".to_string(), 5.into());
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(1.0, value["scaleX"]);
        assert_eq!(2, value["order"]);
        assert_eq!(5, value["adjustments"]["hue"]);
    }
}
