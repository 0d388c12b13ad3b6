use crate::cache::{CacheEntry, ImageCache, InstanceId};
use crate::error::{BoardError, BoardResult};
use crate::event::{
    EventContext, EventListener, EventRegistration, ListenerFn, OutputReady, Persisted, PromptRequested,
    RenderRequested, StatusChanged, TransformEvent, TransformPhase,
};
use crate::history::{History, DEFAULT_MAX_HISTORY};
use crate::layer::{LayerId, LayerState};
use crate::layer_store::{merge_incoming, LayerStore};
use crate::layout::{update_size, BoardConfig, BoardGeometry, DisplaySize, MAX_BOARD_SIZE};
use crate::loader::{
    fetch_all, ImageSource, LoadOutcome, LoadStatus, RasterHandle, RetryPolicy, Settled, SourceList,
};
use crate::output::CompositeOutput;
use crate::persistence::{
    parse_image_states, read_config, read_image_states, write_config, write_image_states, PropertyStore,
};
use crate::scheduler::{Deferred, Scheduler};
use crate::time::Clock;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub max_history: usize,
    pub snapshot_debounce_ms: u64,
    pub persist_debounce_ms: u64,
    pub retry: RetryPolicy,
    pub auto_size_max: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            snapshot_debounce_ms: 300,
            persist_debounce_ms: 300,
            retry: RetryPolicy::default(),
            auto_size_max: MAX_BOARD_SIZE,
        }
    }
}

/// What the host asks the loader to show.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub sources: Value,
    /// States the host persisted for this node, as JSON text or array.
    pub prior_states: Option<Value>,
    /// Drop cached images for these paths and fetch them again.
    pub force_refresh: bool,
}

impl LoadRequest {
    pub fn new(sources: Value) -> Self {
        Self {
            sources,
            prior_states: None,
            force_refresh: false,
        }
    }

    pub fn paths<S: AsRef<str>>(paths: &[S]) -> Self {
        Self::new(Value::Array(
            paths.iter().map(|p| Value::from(p.as_ref())).collect(),
        ))
    }

    pub fn with_prior_states(mut self, states: Value) -> Self {
        self.prior_states = Some(states);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

/// A loaded layer as the render surface sees it.
#[derive(Clone, Debug)]
pub struct RenderLayer {
    pub index: usize,
    pub handle: RasterHandle,
    pub state: LayerState,
}

struct LoadPlan {
    generation: u64,
    sources: SourceList,
    fingerprint: String,
    incoming: Option<Vec<LayerState>>,
    cached: Vec<Option<RasterHandle>>,
    to_fetch: Vec<String>,
    retry: RetryPolicy,
}

struct NodeState {
    instance: InstanceId,
    options: EngineOptions,
    config: BoardConfig,
    geometry: Option<BoardGeometry>,
    display: Option<DisplaySize>,
    handles: Vec<Option<RasterHandle>>,
    store: LayerStore,
    history: History,
    scheduler: Scheduler,
    properties: PropertyStore,
    is_loading: bool,
    fingerprint: Option<String>,
    generation: u64,
    selected: Option<LayerId>,
    status: LoadStatus,
    outbox: Vec<Box<dyn Any>>,
}

impl NodeState {
    fn notify<T: 'static>(&mut self, notice: T) {
        self.outbox.push(Box::new(notice));
    }

    fn set_status(&mut self, status: LoadStatus) {
        if self.status != status {
            self.status = status.clone();
            self.notify(StatusChanged { status });
        }
    }

    fn request_render(&mut self) {
        self.notify(RenderRequested);
    }

    fn snapshot_now(&mut self) {
        self.scheduler.cancel(Deferred::Snapshot);
        self.history.snapshot(self.store.layers());
    }

    /// Captures a pending debounced snapshot before the history is walked.
    fn settle_pending_snapshot(&mut self) {
        if self.scheduler.cancel(Deferred::Snapshot) {
            self.history.snapshot(self.store.layers());
        }
    }

    fn persist_now(&mut self) {
        self.scheduler.cancel(Deferred::Persist);
        write_config(&mut self.properties, &self.config);
        if let Err(err) = write_image_states(&mut self.properties, self.store.layers()) {
            warn!("failed to persist layer states of board {}: {}", self.instance, err);
            return;
        }
        self.notify(Persisted);
    }

    fn schedule_persist(&mut self, now: Duration) {
        let delay = Duration::from_millis(self.options.persist_debounce_ms);
        self.scheduler.debounce(Deferred::Persist, now, delay);
    }

    fn schedule_snapshot(&mut self, now: Duration) {
        let delay = Duration::from_millis(self.options.snapshot_debounce_ms);
        self.scheduler.debounce(Deferred::Snapshot, now, delay);
    }

    fn run(&mut self, task: Deferred) {
        match task {
            Deferred::Snapshot => self.snapshot_now(),
            Deferred::Persist => self.persist_now(),
        }
    }

    /// Reconciles board size with the layers, then renders and persists.
    fn relayout(&mut self) {
        let previous = self.geometry;
        let result = update_size(&mut self.config, previous, &mut self.store);
        if let (true, Some(previous)) = (result.resized, previous) {
            self.history.rescale(&previous, &result.geometry);
        }
        self.geometry = Some(result.geometry);
        self.display = Some(result.display);
        self.request_render();
        self.persist_now();
    }

    /// Sizes the board after the first image. Returns whether it changed.
    fn auto_size(&mut self, handle: &RasterHandle) -> BoardResult<bool> {
        if handle.width() == 0 || handle.height() == 0 {
            return Err(BoardError::InvalidParameter("image has no pixels".to_string()));
        }
        let max = self.options.auto_size_max.clamp(1, MAX_BOARD_SIZE);
        let width = handle.width().min(max);
        let height = handle.height().min(max);
        if (width, height) == (self.config.board_width, self.config.board_height) {
            return Ok(false);
        }
        info!(
            "auto-sizing board {} from {}x{} to {}x{}",
            self.instance, self.config.board_width, self.config.board_height, width, height
        );
        self.config.board_width = width;
        self.config.board_height = height;
        // Every layer restarts from the new center, so there is nothing left
        // to rescale proportionally.
        let center = self.config.center();
        for layer in self.store.iter_mut() {
            layer.reset_transform(center);
        }
        let geometry = self.config.geometry();
        if let Some(previous) = self.geometry {
            self.history.rescale(&previous, &geometry);
        }
        self.geometry = Some(geometry);
        self.relayout();
        Ok(true)
    }

    fn output(&self) -> Option<CompositeOutput> {
        let geometry = self.geometry?;
        Some(CompositeOutput::build(&geometry, self.store.layers(), &self.handles))
    }
}

struct NodeInner {
    instance: InstanceId,
    state: RefCell<NodeState>,
    listeners: RefCell<EventRegistration>,
    next_listener_id: Cell<u32>,
    pending_listeners: RefCell<Vec<(u32, TypeId, ListenerFn)>>,
    pending_removals: RefCell<Vec<u32>>,
    cache: Rc<RefCell<ImageCache>>,
    source: Rc<dyn ImageSource>,
    clock: Rc<dyn Clock>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        if let Ok(mut cache) = self.cache.try_borrow_mut() {
            cache.release_instance(self.instance);
        }
    }
}

/// One compositing board: its layers, their history and the images behind
/// them. Clones are handles to the same board.
#[derive(Clone)]
pub struct BoardNode {
    inner: Rc<NodeInner>,
}

impl BoardNode {
    pub fn new(
        properties: PropertyStore,
        options: EngineOptions,
        cache: Rc<RefCell<ImageCache>>,
        source: Rc<dyn ImageSource>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let instance = cache.borrow_mut().register_instance();
        let config = read_config(&properties);
        let history = History::new(
            options.max_history,
            Duration::from_millis(options.snapshot_debounce_ms),
        );
        let mut state = NodeState {
            instance,
            options,
            config,
            geometry: None,
            display: None,
            handles: Vec::new(),
            store: LayerStore::new(&format!("layer_{}", instance)),
            history,
            scheduler: Scheduler::new(),
            properties,
            is_loading: false,
            fingerprint: None,
            generation: 0,
            selected: None,
            status: LoadStatus::Idle,
            outbox: Vec::new(),
        };
        let result = update_size(&mut state.config, None, &mut state.store);
        state.geometry = Some(result.geometry);
        state.display = Some(result.display);
        Self {
            inner: Rc::new(NodeInner {
                instance,
                state: RefCell::new(state),
                listeners: RefCell::new(EventRegistration::new()),
                next_listener_id: Cell::new(1),
                pending_listeners: RefCell::new(Vec::new()),
                pending_removals: RefCell::new(Vec::new()),
                cache,
                source,
                clock,
            }),
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.inner.instance
    }

    /// Registers a listener for notices of type `T`. Listeners added while
    /// notices are being delivered start with the next notice.
    pub fn add_listener<T: 'static, F: FnMut(&mut T) + 'static>(&self, handler: F) -> u32 {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id + 1);
        let (event_type_id, listener) = EventRegistration::wrap_listener(handler);
        match self.inner.listeners.try_borrow_mut() {
            Ok(mut listeners) => listeners.insert_listener(id, event_type_id, listener),
            Err(_) => self
                .inner
                .pending_listeners
                .borrow_mut()
                .push((id, event_type_id, listener)),
        }
        id
    }

    pub fn remove_listener(&self, id: u32) {
        match self.inner.listeners.try_borrow_mut() {
            Ok(mut listeners) => listeners.remove_listener(id),
            Err(_) => self.inner.pending_removals.borrow_mut().push(id),
        }
    }

    /// Resolves `request.sources` into layers.
    ///
    /// At most one cycle runs per board; a call made while another is in
    /// flight fails with [`BoardError::Busy`] and changes nothing.
    pub async fn load_images(&self, request: LoadRequest) -> BoardResult<LoadOutcome> {
        let plan = match self.begin_load(&request) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                self.deliver();
                return Ok(LoadOutcome::Skipped);
            }
            Err(err) => {
                self.deliver();
                return Err(err);
            }
        };
        let fetched = fetch_all(self.inner.source.clone(), plan.to_fetch.clone(), plan.retry).await;
        let result = self.finish_load(plan, fetched);
        self.deliver();
        result
    }

    fn begin_load(&self, request: &LoadRequest) -> BoardResult<Option<LoadPlan>> {
        let mut state = self.inner.state.borrow_mut();
        let sources = match SourceList::from_value(&request.sources) {
            Ok(sources) => sources,
            Err(err) => {
                warn!("board {}: {}", self.inner.instance, err);
                state.set_status(LoadStatus::NoValidImages);
                return Err(err);
            }
        };
        if state.is_loading {
            warn!("board {} is already loading, ignoring request", self.inner.instance);
            return Err(BoardError::Busy);
        }
        let fingerprint = sources.fingerprint();
        if !request.force_refresh
            && !state.config.auto_size
            && state.fingerprint.as_deref() == Some(fingerprint.as_str())
        {
            debug!("board {}: sources unchanged, skipping load", self.inner.instance);
            return Ok(None);
        }

        let incoming = match &request.prior_states {
            Some(value) => match parse_image_states(value) {
                Ok(states) => Some(states),
                Err(err) => {
                    warn!("board {}: ignoring prior states: {}", self.inner.instance, err);
                    None
                }
            },
            None if state.store.is_empty() => read_image_states(&state.properties),
            None => None,
        };

        let mut cache = self.inner.cache.borrow_mut();
        let mut cached = Vec::with_capacity(sources.len());
        let mut to_fetch: Vec<String> = Vec::new();
        for path in sources.paths() {
            if request.force_refresh {
                cache.invalidate(self.inner.instance, path);
            }
            match cache.get(self.inner.instance, path) {
                Some(entry) => {
                    debug!("board {}: cache hit for {}", self.inner.instance, path);
                    cached.push(Some(entry.handle.clone()));
                }
                None => {
                    cached.push(None);
                    if !to_fetch.contains(path) {
                        to_fetch.push(path.clone());
                    }
                }
            }
        }

        state.is_loading = true;
        state.generation += 1;
        state.set_status(LoadStatus::Loading {
            total: sources.len(),
        });
        Ok(Some(LoadPlan {
            generation: state.generation,
            sources,
            fingerprint,
            incoming,
            cached,
            to_fetch,
            retry: state.options.retry,
        }))
    }

    fn finish_load(
        &self,
        plan: LoadPlan,
        fetched: HashMap<String, BoardResult<CacheEntry>>,
    ) -> BoardResult<LoadOutcome> {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        if plan.generation != state.generation || !state.is_loading {
            debug!("board {}: discarding results of a stale load", self.inner.instance);
            return Ok(LoadOutcome::Superseded);
        }
        state.is_loading = false;

        {
            let mut cache = self.inner.cache.borrow_mut();
            for (path, result) in &fetched {
                if let Ok(entry) = result {
                    cache.insert(self.inner.instance, path, entry.clone());
                }
            }
        }

        let paths = plan.sources.paths();
        let total = paths.len();
        let settled: Vec<Settled> = paths
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let handle = plan.cached[index].clone().or_else(|| match fetched.get(path) {
                    Some(Ok(entry)) => Some(entry.handle.clone()),
                    _ => None,
                });
                Settled { index, handle }
            })
            .collect();

        let incoming = match plan.incoming {
            Some(incoming) => incoming,
            None => state.store.layers().to_vec(),
        };
        let merged = merge_incoming(state.store.layers(), &incoming, paths, state.config.center());
        state.store.replace(merged);
        state.handles = vec![None; total];
        if let Some(selected) = &state.selected {
            if state.store.index_of(selected).is_none() {
                state.selected = None;
            }
        }

        for slot in settled {
            let Some(handle) = slot.handle else {
                warn!(
                    "board {}: layer {} ({}) failed to load",
                    self.inner.instance, slot.index, paths[slot.index]
                );
                continue;
            };
            if slot.index == 0 && state.config.auto_size {
                if let Err(err) = state.auto_size(&handle) {
                    warn!("board {}: auto-size failed: {}", self.inner.instance, err);
                    continue;
                }
            }
            state.handles[slot.index] = Some(handle);
        }

        let loaded = state.handles.iter().filter(|h| h.is_some()).count();
        state.relayout();
        state.snapshot_now();
        if loaded == 0 {
            error!("board {}: none of {} images could be loaded", self.inner.instance, total);
            state.set_status(LoadStatus::Failed { total });
            return Err(BoardError::NoImagesLoaded { total });
        }

        state.fingerprint = Some(plan.fingerprint);
        state.set_status(LoadStatus::Loaded { loaded, total });
        info!("board {}: loaded {}/{}", self.inner.instance, loaded, total);
        if let Some(output) = state.output() {
            state.notify(OutputReady { output });
        }
        Ok(LoadOutcome::Loaded { loaded, total })
    }

    /// Applies a transform from the render surface. Bursts of events are
    /// folded into one trailing history entry and one persistence write.
    pub fn handle_transform(&self, mut event: TransformEvent) -> bool {
        let now = self.inner.clock.now();
        {
            let mut guard = self.inner.state.borrow_mut();
            let state = &mut *guard;
            let mut ctx = EventContext {
                now,
                scheduler: &mut state.scheduler,
            };
            state.store.handle_event(&mut event, &mut ctx);
            state.history.handle_event(&mut event, &mut ctx);
            if !event.rejected {
                match event.phase {
                    TransformPhase::Dragging => state.schedule_persist(now),
                    TransformPhase::Committed => state.persist_now(),
                }
                for task in state.scheduler.take_due(now) {
                    state.run(task);
                }
                state.request_render();
            }
        }
        self.deliver();
        !event.rejected
    }

    pub fn move_layer(&self, index: usize, direction: i32) -> bool {
        self.mutate(|state| {
            if !state.store.move_layer(index, direction) {
                return false;
            }
            state.snapshot_now();
            state.persist_now();
            state.request_render();
            true
        })
    }

    pub fn set_visibility(&self, index: usize, visible: bool) -> bool {
        self.mutate(|state| {
            if !state.store.set_visibility(index, visible) {
                return false;
            }
            state.snapshot_now();
            state.persist_now();
            state.request_render();
            true
        })
    }

    pub fn set_lock(&self, index: usize, locked: bool) -> bool {
        self.mutate(|state| {
            if !state.store.set_lock(index, locked) {
                return false;
            }
            if locked {
                let id = state.store.get(index).and_then(|l| l.id.clone());
                if state.selected.is_some() && state.selected == id {
                    state.selected = None;
                }
            }
            state.snapshot_now();
            state.persist_now();
            state.request_render();
            true
        })
    }

    pub fn set_adjustment(&self, index: usize, key: &str, value: Value) -> bool {
        let now = self.inner.clock.now();
        self.mutate(|state| {
            let Some(layer) = state.store.get_mut(index) else {
                warn!("no layer at index {}", index);
                return false;
            };
            layer.adjustments.insert(key.to_string(), value);
            state.schedule_snapshot(now);
            state.schedule_persist(now);
            state.request_render();
            true
        })
    }

    pub fn select_layer(&self, id: Option<LayerId>) -> bool {
        self.mutate(|state| {
            let Some(id) = id else {
                state.selected = None;
                return true;
            };
            match state.store.index_of(&id).and_then(|i| state.store.get(i)) {
                Some(layer) if layer.locked => {
                    warn!("layer {} is locked and cannot be selected", id);
                    false
                }
                Some(_) => {
                    state.selected = Some(id);
                    state.request_render();
                    true
                }
                None => false,
            }
        })
    }

    pub fn selected(&self) -> Option<LayerId> {
        self.inner.state.borrow().selected.clone()
    }

    pub fn undo(&self) -> bool {
        self.mutate(|state| {
            state.settle_pending_snapshot();
            let Some(entry) = state.history.undo().cloned() else {
                return false;
            };
            entry.apply(&mut state.store);
            state.persist_now();
            state.request_render();
            true
        })
    }

    pub fn redo(&self) -> bool {
        self.mutate(|state| {
            state.settle_pending_snapshot();
            let Some(entry) = state.history.redo().cloned() else {
                return false;
            };
            entry.apply(&mut state.store);
            state.persist_now();
            state.request_render();
            true
        })
    }

    /// Puts every layer back on its default anchor.
    pub fn reset_canvas(&self) {
        self.mutate(|state| {
            state.settle_pending_snapshot();
            let center = state.config.center();
            for layer in state.store.iter_mut() {
                layer.reset_transform(center);
            }
            state.snapshot_now();
            state.persist_now();
            state.request_render();
        });
    }

    /// Re-derives board and display size from the current configuration.
    pub fn update_size(&self) {
        self.mutate(|state| state.relayout());
    }

    pub fn set_config(&self, config: BoardConfig) {
        self.mutate(|state| {
            state.config = config;
            state.relayout();
        });
    }

    /// Writes a host property and reapplies the board configuration.
    pub fn set_property(&self, name: &str, value: Value) {
        self.mutate(|state| {
            state.properties.set(name, value);
            let auto_size = state.config.auto_size;
            let (width, height) = (state.config.board_width, state.config.board_height);
            state.config = read_config(&state.properties);
            if auto_size && state.config.auto_size {
                // Board size keeps following the first image.
                state.config.board_width = width;
                state.config.board_height = height;
            }
            state.relayout();
        });
    }

    /// Asks the host to re-run the owning node with current values.
    pub fn trigger_prompt(&self) {
        self.mutate(|state| {
            if state.scheduler.is_pending(Deferred::Persist) {
                state.persist_now();
            }
            state.notify(PromptRequested);
        });
    }

    /// Runs deferred work whose time has come.
    pub fn tick(&self) {
        let now = self.inner.clock.now();
        self.mutate(|state| {
            for task in state.scheduler.take_due(now) {
                state.run(task);
            }
        });
    }

    /// Runs all deferred work now.
    pub fn flush(&self) {
        self.mutate(|state| {
            for task in state.scheduler.flush() {
                state.run(task);
            }
        });
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner.state.borrow().scheduler.next_deadline()
    }

    /// Drops images and abandons any load in flight. Layer states and
    /// history are kept so the board can be loaded again.
    pub fn teardown(&self) {
        self.mutate(|state| {
            for task in state.scheduler.flush() {
                state.run(task);
            }
            state.generation += 1;
            state.is_loading = false;
            state.fingerprint = None;
            let count = state.store.len();
            state.handles = vec![None; count];
            state.set_status(LoadStatus::Idle);
        });
        self.inner.cache.borrow_mut().release_instance(self.inner.instance);
    }

    pub fn layers(&self) -> Vec<LayerState> {
        self.inner.state.borrow().store.layers().to_vec()
    }

    pub fn handles(&self) -> Vec<Option<RasterHandle>> {
        self.inner.state.borrow().handles.clone()
    }

    /// Loaded layers bottom to top.
    pub fn render_layers(&self) -> Vec<RenderLayer> {
        let state = self.inner.state.borrow();
        state
            .store
            .ranked_indices()
            .into_iter()
            .filter_map(|index| {
                let handle = state.handles.get(index)?.clone()?;
                let layer = state.store.get(index)?.clone();
                Some(RenderLayer {
                    index,
                    handle,
                    state: layer,
                })
            })
            .collect()
    }

    pub fn output(&self) -> Option<CompositeOutput> {
        self.inner.state.borrow().output()
    }

    pub fn status(&self) -> LoadStatus {
        self.inner.state.borrow().status.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    pub fn config(&self) -> BoardConfig {
        self.inner.state.borrow().config.clone()
    }

    pub fn display(&self) -> Option<DisplaySize> {
        self.inner.state.borrow().display
    }

    pub fn history_len(&self) -> usize {
        self.inner.state.borrow().history.len()
    }

    pub fn history_pointer(&self) -> isize {
        self.inner.state.borrow().history.pointer()
    }

    pub fn properties(&self) -> PropertyStore {
        self.inner.state.borrow().properties.clone()
    }

    pub fn widget_values(&self) -> Vec<Value> {
        self.inner.state.borrow().properties.widget_values()
    }

    fn mutate<R, F: FnOnce(&mut NodeState) -> R>(&self, f: F) -> R {
        let result = {
            let mut state = self.inner.state.borrow_mut();
            f(&mut state)
        };
        self.deliver();
        result
    }

    /// Hands queued notices to listeners once no state borrow is held, so a
    /// listener may call back into the node.
    fn deliver(&self) {
        loop {
            let notices = std::mem::take(&mut self.inner.state.borrow_mut().outbox);
            if notices.is_empty() {
                return;
            }
            let Ok(mut listeners) = self.inner.listeners.try_borrow_mut() else {
                // Re-entered from a listener; the outer delivery picks these up.
                let mut state = self.inner.state.borrow_mut();
                let later = std::mem::replace(&mut state.outbox, notices);
                state.outbox.extend(later);
                return;
            };
            for mut notice in notices {
                listeners.emit_any(notice.as_mut());
            }
            for (id, event_type_id, listener) in self.inner.pending_listeners.take() {
                listeners.insert_listener(id, event_type_id, listener);
            }
            for id in self.inner.pending_removals.take() {
                listeners.remove_listener(id);
            }
        }
    }
}
