use portcore::{
    Activity, ActivityContext, ActivityError, Descriptor, Parameter, SyncActivity, Value,
    ValueKind,
};

const NAME: Parameter<String> = Parameter::new("name");
const VALUE: Parameter<Value> = Parameter::new("value");

/// Assigns a flow variable
pub struct SetVariableActivity {
    descriptor: Descriptor,
}

impl SetVariableActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("data.set_variable", "Set Variable")
                .category("data")
                .description("Assigns a value to a flow variable")
                .parameter(NAME.required())
                .parameter(VALUE.required())
                .input("In")
                .output("Out", ValueKind::Any),
        }
    }
}

impl Activity for SetVariableActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for SetVariableActivity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let name = ctx.parameter(&NAME)?;
        if name.trim().is_empty() {
            return Err(ActivityError::InvalidParameter {
                name: "name".to_string(),
                expected: "variable name".to_string(),
                actual: name,
            });
        }
        let value = ctx.parameter(&VALUE)?;

        ctx.set_variable(name, value.clone());
        ctx.fire("Out", value)
    }
}
