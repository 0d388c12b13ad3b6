use crate::layer::LayerState;
use crate::layout::BoardGeometry;
use crate::loader::RasterHandle;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputLayer {
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: f64,
    pub image: String,
}

/// What the downstream pipeline receives after a load and layout pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositeOutput {
    pub canvas: CanvasSize,
    pub layers: Vec<OutputLayer>,
    pub image: Vec<String>,
}

impl CompositeOutput {
    /// Collects visible, loaded layers bottom to top with positions relative
    /// to the board rather than the bordered surface.
    pub fn build(
        geometry: &BoardGeometry,
        layers: &[LayerState],
        handles: &[Option<RasterHandle>],
    ) -> Self {
        let border = geometry.border_width as f64;
        let mut ranked: Vec<usize> = (0..layers.len()).collect();
        ranked.sort_by_key(|i| (layers[*i].order, *i));

        let mut out_layers = Vec::new();
        for index in ranked {
            let layer = &layers[index];
            let loaded = matches!(handles.get(index), Some(Some(_)));
            let Some(source) = layer.source.clone() else {
                continue;
            };
            if !loaded || !layer.visible {
                continue;
            }
            out_layers.push(OutputLayer {
                x: layer.transform.x - border,
                y: layer.transform.y - border,
                scale_x: layer.transform.scale_x,
                scale_y: layer.transform.scale_y,
                rotation: layer.transform.rotation,
                image: source,
            });
        }
        let image = out_layers.iter().map(|l| l.image.clone()).collect();
        Self {
            canvas: CanvasSize {
                width: geometry.board_width,
                height: geometry.board_height,
            },
            layers: out_layers,
            image,
        }
    }
}
