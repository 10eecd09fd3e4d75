mod base;

pub use base::{ActivityEvent, EventBus, EventEmitter, ExecutionEvent};
