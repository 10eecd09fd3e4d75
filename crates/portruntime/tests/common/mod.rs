// Test-only activities and helpers shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use portcore::{
    Activity, ActivityContext, ActivityError, ActivityId, ActivitySpec, AsyncActivity, Descriptor,
    ExecutionMode, ExecutionState, ExecutionStatus, FlowDefinition, FlowError, Parameter,
    Readiness, SyncActivity, Value, ValueKind, BODY_COMPLETE_PORT, LOOP_BODY_COMPLETED,
    LOOP_PHASE_KEY,
};
use portruntime::{
    ActivityRegistry, Engine, ExecutionCoordinator, Flow, RunOutcome, RuntimeConfig,
    ScriptEvaluator, ScriptOutcome, ScriptRequest,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// Fires `Out` with its own id.
pub struct Pass {
    descriptor: Descriptor,
}

impl Pass {
    pub fn new(activity_type: &str) -> Self {
        Self {
            descriptor: Descriptor::new(activity_type, activity_type)
                .input("In")
                .output("Out", ValueKind::String),
        }
    }

    pub fn interactive(activity_type: &str) -> Self {
        let mut pass = Self::new(activity_type);
        pass.descriptor = pass.descriptor.interactive();
        pass
    }
}

impl Activity for Pass {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for Pass {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let id = ctx.activity_id.to_string();
        ctx.fire("Out", id)
    }
}

/// Increments the `count` variable and fires `Out`.
pub struct Count {
    descriptor: Descriptor,
}

impl Count {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("test.count", "Count")
                .input("In")
                .output("Out", ValueKind::Number),
        }
    }
}

impl Activity for Count {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for Count {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let count = ctx.variable("count").and_then(|v| v.as_f64()).unwrap_or(0.0) + 1.0;
        ctx.set_variable("count", count);
        ctx.fire("Out", count)
    }
}

const TIMES: Parameter<i64> = Parameter::new("times");

/// Minimal counted loop driven by the re-arm phase marker.
pub struct Repeat {
    descriptor: Descriptor,
}

impl Repeat {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("test.repeat", "Repeat")
                .parameter(TIMES.required())
                .input("In")
                .input(BODY_COMPLETE_PORT)
                .output("Body", ValueKind::Number)
                .output("Done", ValueKind::Number),
        }
    }
}

impl Activity for Repeat {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for Repeat {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let times = ctx.parameter(&TIMES)?;
        let rearmed = ctx.memory(LOOP_PHASE_KEY) == Some(Value::from(LOOP_BODY_COMPLETED));
        ctx.clear_memory(LOOP_PHASE_KEY);

        let index = if rearmed {
            ctx.memory("index").and_then(|v| v.as_f64()).unwrap_or(0.0) as i64 + 1
        } else {
            0
        };
        if index < times {
            ctx.set_memory("index", index);
            ctx.fire("Body", index)
        } else {
            ctx.fire("Done", index)
        }
    }
}

/// Only ready once the `go` variable is true.
pub struct Gate {
    descriptor: Descriptor,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("test.gate", "Gate")
                .input("In")
                .output("Out", ValueKind::Any),
        }
    }
}

impl Activity for Gate {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn is_ready_to_execute(&self, ctx: &ActivityContext) -> Readiness {
        match ctx.variable("go").and_then(|v| v.as_bool()) {
            Some(true) => Readiness::Ready,
            _ => Readiness::NotReady("go is not set".to_string()),
        }
    }
}

impl SyncActivity for Gate {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        ctx.fire("Out", Value::Null)
    }
}

const INPUT: Parameter<Value> = Parameter::new("input");

/// Copies its `input` parameter into the `result` variable.
pub struct Store {
    descriptor: Descriptor,
}

impl Store {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("test.store", "Store")
                .parameter(INPUT.required())
                .input("In")
                .output("Out", ValueKind::Any),
        }
    }
}

impl Activity for Store {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for Store {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let input = ctx.parameter(&INPUT)?;
        ctx.set_variable("result", input.clone());
        ctx.fire("Out", input)
    }
}

/// Always returns an error from its body.
pub struct Broken {
    descriptor: Descriptor,
}

impl Broken {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("test.broken", "Broken")
                .input("In")
                .output("Out", ValueKind::Any),
        }
    }
}

impl Activity for Broken {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for Broken {
    fn execute(&self, _ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        Err(ActivityError::ExecutionFailed("boom".to_string()))
    }
}

/// Panics instead of returning.
pub struct Panicking {
    descriptor: Descriptor,
}

impl Panicking {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("test.panic", "Panicking")
                .input("In")
                .output("Out", ValueKind::Any),
        }
    }
}

impl Activity for Panicking {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for Panicking {
    fn execute(&self, _ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        panic!("kaboom")
    }
}

/// Sleeps for a while, then sets `slow_done`.
pub struct Slow {
    descriptor: Descriptor,
}

impl Slow {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("test.slow", "Slow")
                .input("In")
                .output("Out", ValueKind::Any),
        }
    }
}

impl Activity for Slow {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

#[async_trait]
impl AsyncActivity for Slow {
    async fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        ctx.set_variable("slow_done", true);
        ctx.fire("Out", Value::Null)
    }
}

/// Script stub: `fail:<message>` fails, anything else fires that port with
/// the `value` parameter.
pub struct StubScripts;

#[async_trait]
impl ScriptEvaluator for StubScripts {
    async fn evaluate(&self, request: ScriptRequest) -> ScriptOutcome {
        match request.script.strip_prefix("fail:") {
            Some(message) => ScriptOutcome::failed(message),
            None => ScriptOutcome {
                ports: vec![(
                    request.script.clone(),
                    request.parameters.get("value").cloned().unwrap_or(Value::Null),
                )],
                logs: vec![(portcore::LogLevel::Info, "stub ran".to_string())],
                failure: None,
            },
        }
    }
}

pub fn registry() -> ActivityRegistry {
    let mut registry = ActivityRegistry::new();
    registry.register_sync(Arc::new(Pass::new("test.pass")));
    registry.register_sync(Arc::new(Pass::interactive("test.task")));
    registry.register_sync(Arc::new(Count::new()));
    registry.register_sync(Arc::new(Repeat::new()));
    registry.register_sync(Arc::new(Gate::new()));
    registry.register_sync(Arc::new(Store::new()));
    registry.register_sync(Arc::new(Broken::new()));
    registry.register_sync(Arc::new(Panicking::new()));
    registry.register_async(Arc::new(Slow::new()));
    registry
}

pub fn engine() -> Arc<Engine> {
    Arc::new(
        Engine::new(Arc::new(registry()), RuntimeConfig::default())
            .with_script_evaluator(Arc::new(StubScripts)),
    )
}

pub fn parse(engine: &Engine, definition: &FlowDefinition) -> Arc<Flow> {
    Arc::new(engine.parse(definition).expect("definition is valid"))
}

/// One run call on an existing state.
pub async fn run_state(
    engine: &Arc<Engine>,
    flow: &Arc<Flow>,
    state: &Arc<ExecutionState>,
    mode: Option<ExecutionMode>,
) -> Result<RunOutcome, FlowError> {
    let scope = engine.scope(
        Arc::clone(flow),
        Arc::clone(state),
        mode,
        CancellationToken::new(),
    );
    ExecutionCoordinator::new(scope).run().await
}

/// Parse and run a definition on a fresh state.
pub async fn run(
    engine: &Arc<Engine>,
    definition: &FlowDefinition,
    mode: Option<ExecutionMode>,
) -> (RunOutcome, Arc<ExecutionState>) {
    let flow = parse(engine, definition);
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
    let outcome = run_state(engine, &flow, &state, mode)
        .await
        .expect("run succeeds");
    (outcome, state)
}

pub fn status(state: &ExecutionState, id: &str) -> Option<ExecutionStatus> {
    state.queue_item(&ActivityId::from(id)).map(|item| item.status)
}

/// Number of recorded transitions of `id` into `to`
pub fn transitions_to(state: &ExecutionState, id: &str, to: ExecutionStatus) -> usize {
    state
        .transitions()
        .iter()
        .filter(|t| t.activity_id.as_str() == id && t.to == to)
        .count()
}

pub fn pass(id: &str) -> ActivitySpec {
    ActivitySpec::new(id, "test.pass")
}

/// `ids[0] -> ids[1] -> ...` through `Out`/`In`
pub fn chain(name: &str, ids: &[&str]) -> FlowDefinition {
    let mut definition = FlowDefinition::new(name);
    for id in ids {
        definition.add_activity(pass(id));
    }
    for pair in ids.windows(2) {
        definition.connect(pair[0], "Out", pair[1], "In");
    }
    definition
}
