use crate::event::{EventContext, EventListener, TransformEvent, TransformPhase};
use crate::layer::{LayerId, LayerState};
use crate::layer_store::LayerStore;
use crate::layout::BoardGeometry;
use crate::scheduler::Deferred;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_MAX_HISTORY: usize = 20;

/// Immutable copy of every layer state at one instant.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    layers: Vec<LayerState>,
}

impl HistoryEntry {
    pub fn capture(layers: &[LayerState]) -> Self {
        Self {
            layers: layers.to_vec(),
        }
    }

    pub fn layers(&self) -> &[LayerState] {
        &self.layers
    }

    /// Writes the captured transforms and flags back into `store`, matching
    /// layers by id. Layers unknown to the entry are left alone.
    pub fn apply(&self, store: &mut LayerStore) {
        let by_id: HashMap<&LayerId, &LayerState> = self
            .layers
            .iter()
            .filter_map(|l| l.id.as_ref().map(|id| (id, l)))
            .collect();
        for layer in store.iter_mut() {
            let Some(saved) = layer.id.as_ref().and_then(|id| by_id.get(id)) else {
                continue;
            };
            layer.transform = saved.transform;
            layer.transformed = saved.transformed;
            layer.visible = saved.visible;
            layer.locked = saved.locked;
            layer.order = saved.order;
            layer.adjustments = saved.adjustments.clone();
        }
        store.normalize_order();
    }
}

/// Bounded undo/redo stack of layer snapshots.
pub struct History {
    max_history: usize,
    history: Vec<HistoryEntry>,
    history_ptr: Option<usize>,
    debounce: Duration,
}

impl History {
    pub fn new(max_history: usize, debounce: Duration) -> Self {
        History {
            max_history: max_history.max(1),
            history: Vec::new(),
            history_ptr: None,
            debounce,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Current position, or -1 when nothing was captured yet.
    pub fn pointer(&self) -> isize {
        self.history_ptr.map(|p| p as isize).unwrap_or(-1)
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.history.get(self.history_ptr?)
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.history_ptr, Some(p) if p > 0)
    }

    pub fn can_redo(&self) -> bool {
        match self.history_ptr {
            Some(p) => p + 1 < self.history.len(),
            None => false,
        }
    }

    pub fn snapshot(&mut self, layers: &[LayerState]) {
        let expected_len = self.history_ptr.map(|p| p + 1).unwrap_or(0);
        self.history.truncate(expected_len);
        self.history.push(HistoryEntry::capture(layers));
        let mut ptr = self.history.len() - 1;
        if self.history.len() > self.max_history {
            self.history.remove(0);
            ptr -= 1;
        }
        self.history_ptr = Some(ptr);
    }

    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        let ptr = self.history_ptr.filter(|p| *p > 0)? - 1;
        self.history_ptr = Some(ptr);
        self.history.get(ptr)
    }

    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        if !self.can_redo() {
            return None;
        }
        let ptr = self.history_ptr? + 1;
        self.history_ptr = Some(ptr);
        self.history.get(ptr)
    }

    /// Moves the layers no entry has placed by hand onto the anchors of a
    /// resized board, so walking the history never brings back old anchors.
    pub fn rescale(&mut self, from: &BoardGeometry, to: &BoardGeometry) {
        for entry in &mut self.history {
            for layer in entry.layers.iter_mut().filter(|l| !l.transformed) {
                let (x, y) = from.rescale(to, (layer.transform.x, layer.transform.y));
                layer.transform.x = x;
                layer.transform.y = y;
            }
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.history_ptr = None;
    }
}

impl EventListener<TransformEvent> for History {
    fn handle_event(&mut self, event: &mut TransformEvent, ctx: &mut EventContext<'_>) {
        if event.rejected {
            return;
        }
        // A finished gesture is captured as soon as the node runs due work.
        let delay = match event.phase {
            TransformPhase::Dragging => self.debounce,
            TransformPhase::Committed => Duration::ZERO,
        };
        ctx.scheduler.debounce(Deferred::Snapshot, ctx.now, delay);
    }
}
