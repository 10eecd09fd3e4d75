use async_trait::async_trait;
use portcore::{
    Activity, ActivityContext, ActivityError, AsyncActivity, Descriptor, Parameter, ValueKind,
};
use tokio::time::{sleep, Duration};

const DELAY_MS: Parameter<f64> = Parameter::new("delay_ms");

/// Delay execution for a specified duration
pub struct DelayActivity {
    descriptor: Descriptor,
}

impl DelayActivity {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor::new("time.delay", "Delay")
                .category("time")
                .description("Delay execution for specified milliseconds")
                .parameter(DELAY_MS.optional(Some("1000")))
                .input("In")
                .output("Out", ValueKind::Number),
        }
    }
}

impl Activity for DelayActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

#[async_trait]
impl AsyncActivity for DelayActivity {
    async fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let delay_ms = ctx.parameter(&DELAY_MS)?.max(0.0) as u64;

        ctx.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(ActivityError::Cancelled),
        }

        ctx.fire("Out", delay_ms as f64)
    }
}
