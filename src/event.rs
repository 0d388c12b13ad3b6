use crate::layer::{LayerId, Transform};
use crate::loader::LoadStatus;
use crate::output::CompositeOutput;
use crate::scheduler::Scheduler;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformPhase {
    /// Intermediate drag/wheel update; arrives at pointer rate.
    Dragging,
    /// Drag-end or transform-end.
    Committed,
}

/// Emitted by the render surface whenever a layer handle moves.
#[derive(Clone, Debug)]
pub struct TransformEvent {
    pub layer: LayerId,
    pub transform: Transform,
    pub phase: TransformPhase,
    /// Set by a listener that refused the change.
    pub rejected: bool,
}

impl TransformEvent {
    pub fn new(layer: LayerId, transform: Transform, phase: TransformPhase) -> Self {
        Self {
            layer,
            transform,
            phase,
            rejected: false,
        }
    }
}

pub struct EventContext<'a> {
    pub now: Duration,
    pub scheduler: &'a mut Scheduler,
}

pub trait EventListener<T> {
    fn handle_event(&mut self, event: &mut T, ctx: &mut EventContext<'_>);
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatusChanged {
    pub status: LoadStatus,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderRequested;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Persisted;

#[derive(Clone, Debug, PartialEq)]
pub struct OutputReady {
    pub output: CompositeOutput,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PromptRequested;

pub type ListenerFn = Box<dyn FnMut(&mut dyn Any)>;

/// Typed listener table for board notices.
pub struct EventRegistration {
    next_listener_id: u32,
    typed_listeners: HashMap<TypeId, Vec<(u32, ListenerFn)>>,
    listener_types: HashMap<u32, TypeId>,
}

impl EventRegistration {
    pub fn new() -> Self {
        Self {
            next_listener_id: 1,
            typed_listeners: HashMap::new(),
            listener_types: HashMap::new(),
        }
    }

    pub fn add_listener<T: 'static, F: FnMut(&mut T) + 'static>(&mut self, handler: F) -> u32 {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        let (event_type_id, wrapper) = Self::wrap_listener(handler);
        self.insert_listener(id, event_type_id, wrapper);
        id
    }

    /// Erases the event type of `handler` so it can be stored or queued.
    pub fn wrap_listener<T: 'static, F: FnMut(&mut T) + 'static>(mut handler: F) -> (TypeId, ListenerFn) {
        let wrapper: ListenerFn = Box::new(move |e: &mut dyn Any| {
            if let Some(t) = e.downcast_mut::<T>() {
                handler(t);
            }
        });
        (TypeId::of::<T>(), wrapper)
    }

    /// Registers a wrapped listener under an id chosen by the caller.
    pub fn insert_listener(&mut self, id: u32, event_type_id: TypeId, listener: ListenerFn) {
        self.next_listener_id = self.next_listener_id.max(id + 1);
        self.typed_listeners
            .entry(event_type_id)
            .or_default()
            .push((id, listener));
        self.listener_types.insert(id, event_type_id);
    }

    pub fn remove_listener(&mut self, id: u32) {
        let Some(event_type_id) = self.listener_types.remove(&id) else {
            return;
        };
        if let Some(listeners) = self.typed_listeners.get_mut(&event_type_id) {
            listeners.retain(|(i, _)| *i != id);
        }
    }

    pub fn emit<T: 'static>(&mut self, event: &mut T) {
        self.emit_any(event);
    }

    pub fn emit_any(&mut self, event: &mut dyn Any) {
        let event_type_id = Any::type_id(&*event);
        if let Some(listeners) = self.typed_listeners.get_mut(&event_type_id) {
            for it in listeners {
                (it.1)(event);
            }
        }
    }
}

impl Default for EventRegistration {
    fn default() -> Self {
        Self::new()
    }
}
