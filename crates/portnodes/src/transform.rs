use portcore::{
    Activity, ActivityContext, ActivityError, Descriptor, Parameter, SyncActivity, Value,
    ValueKind,
};

const JSON: Parameter<String> = Parameter::new("json");

/// Parse JSON text. Malformed input fires `Failed` with the parse error.
pub struct JsonParseActivity {
    descriptor: Descriptor,
}

impl JsonParseActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("transform.json_parse", "JSON Parse")
                .category("transform")
                .description("Parse JSON string")
                .parameter(JSON.required())
                .input("In")
                .output("Parsed", ValueKind::Json)
                .output("Failed", ValueKind::String),
        }
    }
}

impl Activity for JsonParseActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for JsonParseActivity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let input = ctx.parameter(&JSON)?;

        match serde_json::from_str::<serde_json::Value>(&input) {
            Ok(parsed) => ctx.fire("Parsed", Value::Json(parsed)),
            Err(e) => {
                let message = format!("JSON parse error: {}", e);
                ctx.warn(message.clone());
                ctx.fire("Failed", message)
            }
        }
    }
}
