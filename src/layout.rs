use crate::layer_store::LayerStore;
use log::debug;
use serde::{Deserialize, Serialize};

pub const MIN_BOARD_SIZE: u32 = 256;
pub const MAX_BOARD_SIZE: u32 = 8192;
pub const MIN_BORDER_WIDTH: u32 = 10;
pub const MAX_BORDER_WIDTH: u32 = 200;
pub const MIN_DISPLAY_SCALE: f64 = 0.1;
pub const MAX_DISPLAY_SCALE: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub board_width: u32,
    pub board_height: u32,
    pub border_width: u32,
    pub canvas_color: String,
    pub auto_size: bool,
    pub display_scale: f64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            board_width: 1024,
            board_height: 1024,
            border_width: 40,
            canvas_color: "#ffffff".to_string(),
            auto_size: false,
            display_scale: 1.0,
        }
    }
}

impl BoardConfig {
    /// Brings every field into its allowed range.
    ///
    /// An auto-sized board follows its first image and is only bounded from
    /// above; a manual board must also respect the minimum size.
    pub fn clamp(&mut self) {
        let min_size = if self.auto_size { 1 } else { MIN_BOARD_SIZE };
        self.board_width = self.board_width.clamp(min_size, MAX_BOARD_SIZE);
        self.board_height = self.board_height.clamp(min_size, MAX_BOARD_SIZE);
        self.border_width = self.border_width.clamp(MIN_BORDER_WIDTH, MAX_BORDER_WIDTH);
        self.display_scale = if self.display_scale.is_finite() {
            self.display_scale.clamp(MIN_DISPLAY_SCALE, MAX_DISPLAY_SCALE)
        } else {
            MAX_DISPLAY_SCALE
        };
    }

    pub fn geometry(&self) -> BoardGeometry {
        BoardGeometry {
            board_width: self.board_width,
            board_height: self.board_height,
            border_width: self.border_width,
        }
    }

    /// Default anchor of a layer: the middle of the board.
    pub fn center(&self) -> (f64, f64) {
        self.geometry().center()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoardGeometry {
    pub board_width: u32,
    pub board_height: u32,
    pub border_width: u32,
}

impl BoardGeometry {
    pub fn center(&self) -> (f64, f64) {
        let border = self.border_width as f64;
        (
            border + self.board_width as f64 / 2.0,
            border + self.board_height as f64 / 2.0,
        )
    }

    /// Maps `point` on this board to the same relative spot on `to`.
    pub fn rescale(&self, to: &BoardGeometry, point: (f64, f64)) -> (f64, f64) {
        let from_border = self.border_width as f64;
        let to_border = to.border_width as f64;
        let sx = to.board_width as f64 / self.board_width.max(1) as f64;
        let sy = to.board_height as f64 / self.board_height.max(1) as f64;
        (
            to_border + (point.0 - from_border) * sx,
            to_border + (point.1 - from_border) * sy,
        )
    }
}

/// On-screen size of the board including its border.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

pub struct LayoutResult {
    pub display: DisplaySize,
    pub geometry: BoardGeometry,
    pub resized: bool,
}

/// Clamps `config`, derives the display size and, when the board geometry
/// changed since `previous`, moves every layer still sitting on its default
/// anchor proportionally. Layers the user placed by hand are left alone.
pub fn update_size(
    config: &mut BoardConfig,
    previous: Option<BoardGeometry>,
    store: &mut LayerStore,
) -> LayoutResult {
    config.clamp();
    let geometry = config.geometry();
    let border = geometry.border_width as f64 * 2.0;
    let display = DisplaySize {
        width: (geometry.board_width as f64 + border) * config.display_scale,
        height: (geometry.board_height as f64 + border) * config.display_scale,
        scale: config.display_scale,
    };
    let resized = match previous {
        Some(previous) if previous != geometry => {
            for layer in store.iter_mut().filter(|l| !l.transformed) {
                let (x, y) = previous.rescale(&geometry, (layer.transform.x, layer.transform.y));
                layer.transform.x = x;
                layer.transform.y = y;
            }
            debug!(
                "board resized from {}x{} to {}x{}",
                previous.board_width, previous.board_height, geometry.board_width, geometry.board_height
            );
            true
        }
        _ => false,
    };
    LayoutResult {
        display,
        geometry,
        resized,
    }
}

#[cfg(test)]
mod tests {
    use crate::layer::LayerState;
    use crate::layer_store::LayerStore;
    use crate::layout::{update_size, BoardConfig};

    #[test]
    fn test_clamps_config() {
        let mut config = BoardConfig {
            board_width: 100,
            board_height: 20000,
            border_width: 500,
            display_scale: 3.0,
            ..BoardConfig::default()
        };
        let mut store = LayerStore::new("layer");
        let result = update_size(&mut config, None, &mut store);
        assert_eq!((256, 8192, 200), (config.board_width, config.board_height, config.border_width));
        assert_eq!(1.0, config.display_scale);
        assert_eq!(656.0, result.display.width);
        assert!(!result.resized);

        config.display_scale = 0.01;
        let result = update_size(&mut config, None, &mut store);
        assert_eq!(0.1, result.display.scale);
    }

    #[test]
    fn test_auto_size_keeps_small_board() {
        let mut config = BoardConfig {
            board_width: 8192,
            board_height: 200,
            auto_size: true,
            ..BoardConfig::default()
        };
        config.clamp();
        assert_eq!((8192, 200), (config.board_width, config.board_height));
    }

    #[test]
    fn test_resize_moves_default_anchors_only() {
        let mut config = BoardConfig {
            board_width: 1000,
            board_height: 500,
            border_width: 50,
            ..BoardConfig::default()
        };
        let previous = config.geometry();
        let mut store = LayerStore::new("layer");
        let mut placed = LayerState::new(1, (80.0, 90.0));
        placed.transformed = true;
        store.replace(vec![LayerState::new(0, config.center()), placed]);

        config.board_width = 2000;
        config.board_height = 1000;
        config.border_width = 10;
        let result = update_size(&mut config, Some(previous), &mut store);

        assert!(result.resized);
        assert_eq!(config.center().0, store.layers()[0].transform.x);
        assert_eq!(config.center().1, store.layers()[0].transform.y);
        assert_eq!(80.0, store.layers()[1].transform.x);
    }
}
