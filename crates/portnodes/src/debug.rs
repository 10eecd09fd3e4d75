use portcore::{
    Activity, ActivityContext, ActivityError, Descriptor, LogLevel, Parameter, SyncActivity,
    ValueKind,
};

const MESSAGE: Parameter<String> = Parameter::new("message");
const LEVEL: Parameter<String> = Parameter::new("level");

/// Writes a templated message to the execution log
pub struct LogActivity {
    descriptor: Descriptor,
}

impl LogActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("debug.log", "Log")
                .category("debug")
                .description("Logs a message for debugging")
                .parameter(MESSAGE.required())
                .parameter(LEVEL.optional(Some("info")))
                .input("In")
                .output("Out", ValueKind::String),
        }
    }
}

impl Activity for LogActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl SyncActivity for LogActivity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let message = ctx.parameter(&MESSAGE)?;
        let level = match ctx.parameter(&LEVEL)?.to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        };

        ctx.log(level, message.clone());
        ctx.fire("Out", message)
    }
}
