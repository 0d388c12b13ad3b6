pub mod cache;
pub mod error;
pub mod event;
pub mod history;
pub mod layer;
pub mod layer_store;
pub mod layout;
pub mod loader;
pub mod node;
pub mod output;
pub mod persistence;
pub mod scheduler;
pub mod time;
mod id_generator;

pub use crate::cache::ImageCache;
pub use crate::error::{BoardError, BoardResult};
pub use crate::event::{TransformEvent, TransformPhase};
pub use crate::layer::{LayerId, LayerState, Transform};
pub use crate::layout::BoardConfig;
pub use crate::loader::{ImageSource, LoadOutcome, LoadStatus, RasterHandle, RetryPolicy};
pub use crate::node::{BoardNode, EngineOptions, LoadRequest};
pub use crate::persistence::PropertyStore;
pub use crate::time::{Clock, ManualClock, SystemClock};
