use portcore::{
    Activity, ActivityContext, ActivityError, Descriptor, Parameter, Readiness, SyncActivity,
    Value, ValueKind,
};
use std::collections::HashMap;

const FIELDS: Parameter<String> = Parameter::new("fields");

/// Collects input from a person. The listed fields are flow variables set
/// from outside the run; the form stays waiting until all of them are set.
pub struct FormActivity {
    descriptor: Descriptor,
}

impl FormActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("form.input", "Form")
                .category("interaction")
                .description("Waits for form fields to be filled in")
                .parameter(FIELDS.required())
                .input("In")
                .output("Submitted", ValueKind::Object)
                .interactive(),
        }
    }

    fn fields(ctx: &ActivityContext) -> Result<Vec<String>, ActivityError> {
        Ok(ctx
            .parameter(&FIELDS)?
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl Activity for FormActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn is_ready_to_execute(&self, ctx: &ActivityContext) -> Readiness {
        let fields = match Self::fields(ctx) {
            Ok(fields) => fields,
            Err(e) => return Readiness::NotReady(e.to_string()),
        };
        let missing: Vec<String> = fields
            .into_iter()
            .filter(|f| ctx.variable(f).map(|v| v.is_null()).unwrap_or(true))
            .collect();

        if missing.is_empty() {
            Readiness::Ready
        } else {
            Readiness::NotReady(format!("Waiting for form fields: {}", missing.join(", ")))
        }
    }
}

impl SyncActivity for FormActivity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let values: HashMap<String, Value> = Self::fields(ctx)?
            .into_iter()
            .map(|f| {
                let value = ctx.variable(&f).unwrap_or(Value::Null);
                (f, value)
            })
            .collect();

        ctx.info(format!("Form submitted with {} fields", values.len()));
        ctx.fire("Submitted", Value::Object(values))
    }
}
