use crate::event::{EventContext, EventListener, TransformEvent};
use crate::id_generator::IdGenerator;
use crate::layer::{filename_of, LayerId, LayerState};
use log::warn;
use std::collections::HashSet;

/// Ordered layer states of one board; index `i` always pairs with raster
/// handle `i`, while `id` and `order` carry identity across load cycles.
pub struct LayerStore {
    layers: Vec<LayerState>,
    id_generator: IdGenerator,
}

impl LayerStore {
    pub fn new(id_prefix: &str) -> Self {
        Self {
            layers: Vec::new(),
            id_generator: IdGenerator::new(id_prefix),
        }
    }

    pub fn layers(&self) -> &[LayerState] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LayerState> {
        self.layers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut LayerState> {
        self.layers.get_mut(index)
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, LayerState> {
        self.layers.iter_mut()
    }

    pub fn index_of(&self, id: &LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id.as_ref() == Some(id))
    }

    pub fn replace(&mut self, layers: Vec<LayerState>) {
        self.layers = layers;
        self.ensure_ids();
    }

    /// Gives every layer lacking one a fresh id; existing ids are kept.
    pub fn ensure_ids(&mut self) {
        for layer in &self.layers {
            if let Some(id) = &layer.id {
                self.id_generator.reserve(id);
            }
        }
        let mut seen = HashSet::new();
        for layer in &mut self.layers {
            let duplicated = match &layer.id {
                Some(id) => !seen.insert(id.clone()),
                None => false,
            };
            if layer.id.is_none() || duplicated {
                let id = self.id_generator.generate_id();
                seen.insert(id.clone());
                layer.id = Some(id);
            }
        }
    }

    /// Moves the layer at `index` one step up (`direction > 0`) or down the
    /// stack and renumbers every order densely from 0.
    ///
    /// Returns false without touching anything when the move would leave
    /// the stack.
    pub fn move_layer(&mut self, index: usize, direction: i32) -> bool {
        if index >= self.layers.len() || direction == 0 {
            warn!("cannot move layer {} in direction {}", index, direction);
            return false;
        }
        let mut ranked = self.ranked_indices();
        let Some(pos) = ranked.iter().position(|i| *i == index) else {
            return false;
        };
        let target = if direction > 0 {
            pos + 1
        } else if pos == 0 {
            warn!("layer {} is already at the bottom", index);
            return false;
        } else {
            pos - 1
        };
        if target >= ranked.len() {
            warn!("layer {} is already on top", index);
            return false;
        }
        ranked.swap(pos, target);
        self.apply_ranking(&ranked);
        true
    }

    pub fn set_visibility(&mut self, index: usize, visible: bool) -> bool {
        match self.layers.get_mut(index) {
            Some(layer) if layer.visible != visible => {
                layer.visible = visible;
                true
            }
            Some(_) => false,
            None => {
                warn!("no layer at index {}", index);
                false
            }
        }
    }

    pub fn set_lock(&mut self, index: usize, locked: bool) -> bool {
        match self.layers.get_mut(index) {
            Some(layer) if layer.locked != locked => {
                layer.locked = locked;
                true
            }
            Some(_) => false,
            None => {
                warn!("no layer at index {}", index);
                false
            }
        }
    }

    /// Renumbers orders to `0..n` keeping their relative ranking; ties are
    /// broken by array position.
    pub fn normalize_order(&mut self) {
        let ranked = self.ranked_indices();
        self.apply_ranking(&ranked);
    }

    /// Indices into the layer array sorted bottom to top.
    pub fn ranked_indices(&self) -> Vec<usize> {
        let mut ranked: Vec<usize> = (0..self.layers.len()).collect();
        ranked.sort_by_key(|i| (self.layers[*i].order, *i));
        ranked
    }

    fn apply_ranking(&mut self, ranked: &[usize]) {
        for (order, index) in ranked.iter().enumerate() {
            self.layers[*index].order = order;
        }
    }
}

impl EventListener<TransformEvent> for LayerStore {
    fn handle_event(&mut self, event: &mut TransformEvent, _ctx: &mut EventContext<'_>) {
        let Some(index) = self.index_of(&event.layer) else {
            warn!("transform for unknown layer {}", event.layer);
            event.rejected = true;
            return;
        };
        let layer = &mut self.layers[index];
        if layer.locked {
            warn!("ignoring transform of locked layer {}", event.layer);
            event.rejected = true;
            return;
        }
        layer.transform = event.transform;
        layer.transformed = true;
    }
}

/// Builds the layer list for `source_paths` from the states the host handed
/// back (`incoming`) and the states tracked locally (`existing`).
///
/// Placement, adjustments and other content come from `incoming`, matched by
/// source filename and then by position; a slot with no incoming state gets
/// a default one centered at `center`. Identity, stacking order and the
/// visible/locked flags are carried over from `existing`, again matched by
/// filename first and position second. Slots that match no existing layer
/// keep the id and relative order of their incoming state and are stacked
/// above all carried-over layers; slots with neither go on top in source
/// order. Existing layers whose slot
/// disappeared are dropped. The result is dense in `order` and its ids are
/// left for [`LayerStore::ensure_ids`] to fill in.
pub fn merge_incoming(
    existing: &[LayerState],
    incoming: &[LayerState],
    source_paths: &[String],
    center: (f64, f64),
) -> Vec<LayerState> {
    let mut incoming_used = vec![false; incoming.len()];
    let mut existing_used = vec![false; existing.len()];

    let mut merged: Vec<(LayerState, (u8, usize))> = Vec::with_capacity(source_paths.len());
    for (index, path) in source_paths.iter().enumerate() {
        let name = filename_of(path);

        let base = claim(incoming, &mut incoming_used, index, name);
        let mut state = match base {
            Some(i) => incoming[i].clone(),
            None => LayerState::new(index, center),
        };
        state.source = Some(path.clone());

        let identity = claim(existing, &mut existing_used, index, name);
        let rank = match identity {
            Some(e) => {
                let prior = &existing[e];
                state.id = prior.id.clone();
                state.visible = prior.visible;
                state.locked = prior.locked;
                (0, prior.order)
            }
            // Restored state with no local counterpart keeps its own id and
            // relative order.
            None if base.is_some() => (1, state.order),
            None => (2, index),
        };
        merged.push((state, rank));
    }

    // A restored id already carried by a kept local layer yields to it.
    let kept: HashSet<LayerId> = merged
        .iter()
        .filter(|(_, rank)| rank.0 == 0)
        .filter_map(|(state, _)| state.id.clone())
        .collect();
    for (state, rank) in &mut merged {
        if rank.0 == 1 && state.id.as_ref().is_some_and(|id| kept.contains(id)) {
            state.id = None;
        }
    }

    // Carried-over layers keep their relative stacking; newcomers go on top.
    let mut ranked: Vec<usize> = (0..merged.len()).collect();
    ranked.sort_by_key(|i| (merged[*i].1, *i));
    for (order, index) in ranked.iter().enumerate() {
        merged[*index].0.order = order;
    }
    merged.into_iter().map(|(state, _)| state).collect()
}

fn claim(candidates: &[LayerState], used: &mut [bool], index: usize, name: &str) -> Option<usize> {
    let by_name = candidates
        .iter()
        .enumerate()
        .position(|(i, c)| !used[i] && c.source_filename() == Some(name));
    let by_index = || {
        let fallback = candidates.get(index)?;
        // A positional match must not steal a layer that belongs to another
        // file in the new list.
        if used[index] || (fallback.source.is_some() && fallback.source_filename() != Some(name)) {
            None
        } else {
            Some(index)
        }
    };
    let found = by_name.or_else(by_index)?;
    used[found] = true;
    Some(found)
}
