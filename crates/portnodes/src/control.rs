//! Flow control activities: start, end, branching and loops.

use portcore::{
    Activity, ActivityContext, ActivityError, Descriptor, JoinMode, Parameter, SyncActivity,
    Value, ValueKind, BODY_COMPLETE_PORT, LOOP_BODY_COMPLETED, LOOP_PHASE_KEY,
};

/// Entry point of a flow. Fires `Out` once.
pub struct StartActivity {
    descriptor: Descriptor,
}

impl StartActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("flow.start", "Start")
                .category("flow")
                .description("Entry point of a flow")
                .output("Out", ValueKind::Any),
        }
    }
}

impl Activity for StartActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for StartActivity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        ctx.fire("Out", Value::Null)
    }
}

/// Terminal activity. Runs once per arriving branch.
pub struct EndActivity {
    descriptor: Descriptor,
}

impl EndActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("flow.end", "End")
                .category("flow")
                .description("Marks the end of a branch")
                .input("In")
                .join(JoinMode::Any),
        }
    }
}

impl Activity for EndActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for EndActivity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        ctx.info("Branch finished");
        Ok(())
    }
}

const CONDITION: Parameter<bool> = Parameter::new("condition");

/// Fires `True` or `False` depending on its condition.
pub struct IfActivity {
    descriptor: Descriptor,
}

impl IfActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("flow.if", "If")
                .category("flow")
                .description("Branches on a boolean condition")
                .parameter(CONDITION.required())
                .input("In")
                .output("True", ValueKind::Bool)
                .output("False", ValueKind::Bool),
        }
    }
}

impl Activity for IfActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for IfActivity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        if ctx.parameter(&CONDITION)? {
            ctx.fire("True", true)
        } else {
            ctx.fire("False", false)
        }
    }
}

const ITERATIONS: Parameter<i64> = Parameter::new("iterations");
const VARIABLE: Parameter<String> = Parameter::new("variable");
const INDEX_KEY: &str = "index";

/// Counted loop.
///
/// Fires `Body` with the iteration index; the body connects back to
/// `BodyComplete`, which re-arms the loop for the next iteration. Fires
/// `Done` with the number of iterations when finished.
pub struct LoopActivity {
    descriptor: Descriptor,
}

impl LoopActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("flow.loop", "Loop")
                .category("flow")
                .description("Runs its body a fixed number of times")
                .parameter(ITERATIONS.required())
                .parameter(VARIABLE.optional(None))
                .input("In")
                .input(BODY_COMPLETE_PORT)
                .output("Body", ValueKind::Number)
                .output("Done", ValueKind::Number),
        }
    }
}

impl Activity for LoopActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for LoopActivity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let iterations = ctx.parameter(&ITERATIONS)?.max(0);
        let index = next_index(ctx);

        if index < iterations {
            ctx.set_memory(INDEX_KEY, index);
            if let Some(variable) = ctx.optional_parameter(&VARIABLE)? {
                ctx.set_variable(variable, index);
            }
            ctx.fire("Body", index)
        } else {
            ctx.clear_memory(INDEX_KEY);
            ctx.fire("Done", iterations)
        }
    }
}

const MAX_ITERATIONS: Parameter<i64> = Parameter::new("max_iterations");

/// Loops while its condition holds. The condition is re-resolved on every
/// re-arm.
pub struct WhileActivity {
    descriptor: Descriptor,
}

impl WhileActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("flow.while", "While")
                .category("flow")
                .description("Runs its body while a condition holds")
                .parameter(CONDITION.required())
                .parameter(MAX_ITERATIONS.optional(Some("1000")))
                .input("In")
                .input(BODY_COMPLETE_PORT)
                .output("Body", ValueKind::Number)
                .output("Done", ValueKind::Number),
        }
    }
}

impl Activity for WhileActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for WhileActivity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let index = next_index(ctx);
        let max = ctx.parameter(&MAX_ITERATIONS)?;

        if index >= max {
            ctx.warn(format!("Stopped after {} iterations", max));
            ctx.clear_memory(INDEX_KEY);
            return ctx.fire("Done", index);
        }
        if ctx.parameter(&CONDITION)? {
            ctx.set_memory(INDEX_KEY, index);
            ctx.fire("Body", index)
        } else {
            ctx.clear_memory(INDEX_KEY);
            ctx.fire("Done", index)
        }
    }
}

/// Index of this iteration: 0 on entry, previous + 1 after a re-arm.
/// Consumes the phase marker.
fn next_index(ctx: &ActivityContext) -> i64 {
    let rearmed = ctx
        .memory(LOOP_PHASE_KEY)
        .and_then(|v| v.as_str().map(|s| s == LOOP_BODY_COMPLETED))
        .unwrap_or(false);
    ctx.clear_memory(LOOP_PHASE_KEY);

    if rearmed {
        ctx.memory(INDEX_KEY)
            .and_then(|v| v.as_f64())
            .map(|i| i as i64 + 1)
            .unwrap_or(0)
    } else {
        0
    }
}
