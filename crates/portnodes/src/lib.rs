//! Standard activity library
//!
//! Collection of built-in activities for common operations, plus a
//! line-oriented script evaluator for scripted activities.

mod control;
mod debug;
mod form;
mod http;
mod script;
mod time;
mod transform;
mod variables;

pub use control::{EndActivity, IfActivity, LoopActivity, StartActivity, WhileActivity};
pub use debug::LogActivity;
pub use form::FormActivity;
pub use http::HttpRequestActivity;
pub use script::LineScriptEvaluator;
pub use time::DelayActivity;
pub use transform::JsonParseActivity;
pub use variables::SetVariableActivity;

use portruntime::ActivityRegistry;
use std::sync::Arc;

/// Register all standard activities with a registry
pub fn register_all(registry: &mut ActivityRegistry) {
    registry.register_sync(Arc::new(StartActivity::new()));
    registry.register_sync(Arc::new(EndActivity::new()));
    registry.register_sync(Arc::new(IfActivity::new()));
    registry.register_sync(Arc::new(LoopActivity::new()));
    registry.register_sync(Arc::new(WhileActivity::new()));
    registry.register_sync(Arc::new(SetVariableActivity::new()));
    registry.register_sync(Arc::new(LogActivity::new()));
    registry.register_sync(Arc::new(FormActivity::new()));
    registry.register_sync(Arc::new(JsonParseActivity::new()));
    registry.register_async(Arc::new(DelayActivity::new()));
    registry.register_async(Arc::new(HttpRequestActivity::new()));
}

/// Registry with every standard activity
pub fn standard_registry() -> ActivityRegistry {
    let mut registry = ActivityRegistry::new();
    register_all(&mut registry);
    registry
}
