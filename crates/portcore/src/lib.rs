//! Core abstractions for the portflow engine
//!
//! This crate provides the data model the engine runs on: values, activity
//! capability traits and descriptors, ports, flow definitions, the per-run
//! execution state and parameter templating. It has no engine logic.

mod activity;
mod context;
mod error;
pub mod events;
mod flow;
mod port;
mod state;
mod template;
mod value;

pub use activity::{
    Activity, AsyncActivity, Descriptor, FromValue, JoinMode, Parameter, ParameterDescriptor,
    PortDescriptor, Readiness, SyncActivity, BODY_COMPLETE_PORT, LOOP_BODY_COMPLETED,
    LOOP_PHASE_KEY,
};
pub use context::{ActivityContext, ExecutionOptions, Services};
pub use error::{ActivityError, FlowError, GraphError};
pub use events::*;
pub use flow::{
    ActivityId, ActivitySpec, ApprovalSpec, Connection, ExecutionMode, FlowDefinition, FlowId,
    FlowSettings, InstanceId, Position,
};
pub use port::{Direction, ExecutedPort, Port, PortSet};
pub use state::{
    ApprovalStatus, EnqueueOutcome, ExecutedConnection, ExecutionSnapshot, ExecutionState,
    ExecutionStatus, LogEntry, LogLevel, QueueItem, QueueTransition, StepStatus,
};
pub use template::{Clock, FixedClock, SystemClock, TemplateResolver};
pub use value::{Value, ValueKind, ValueObject, ValueStore};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
