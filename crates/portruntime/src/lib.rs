//! Flow execution runtime
//!
//! This crate turns flow definitions into runnable graphs and drives them:
//! the activity registry and parser, the connection and queue managers,
//! the gate pipeline, execution strategies, mode policies and the
//! coordinator loop, plus the `FlowRuntime` facade with checkpointing.

mod approvals;
mod connection;
mod coordinator;
mod engine;
mod executor;
mod gates;
mod graph;
mod mode;
mod parser;
mod queue;
mod registry;
mod runtime;
mod scheduler;
mod script;
mod store;
mod strategy;

pub use approvals::{aggregate, ApprovalRegistry, ApprovalResolver, ConditionApproval, ManualApproval};
pub use connection::ConnectionManager;
pub use coordinator::{ExecutionCoordinator, RunOutcome};
pub use engine::{Engine, FlowScope};
pub use executor::ActivityExecutor;
pub use gates::{
    GatePipeline, GateStep, StepOutcome, APPROVALS, READINESS_CHECK, WAIT_FOR_CONNECTIONS,
};
pub use graph::{
    describe_activity, describe_flow, ActivityBody, ActivityInstance, BodyShape,
    CompositeActivity, Flow, ScriptedActivity,
};
pub use mode::{mode_strategy, AutomaticMode, ManualMode, ModeStrategy, StepByStepMode};
pub use queue::QueueManager;
pub use registry::{
    composite_descriptor, ActivityFactory, ActivityRegistry, ScriptActivityFactory,
    SharedActivityFactory, COMPOSITE_TYPE, SCRIPT_TYPE,
};
pub use runtime::{FlowRuntime, RunReport, RuntimeConfig};
pub use scheduler::{InMemoryScheduler, JobId, JobScheduler, RecurringJob, Trigger};
pub use script::{ScriptEvaluator, ScriptOutcome, ScriptRequest};
pub use store::{InMemoryStateStore, InstanceRecord, StateStore};
pub use strategy::{
    AsyncStrategy, CompositeStrategy, ExecutionResult, ExecutionStrategy, ScriptedStrategy,
    StrategyResolver, SyncStrategy, EXECUTE_STEP,
};
