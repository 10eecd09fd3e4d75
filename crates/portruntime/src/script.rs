use async_trait::async_trait;
use portcore::{LogLevel, Value};
use std::collections::HashMap;

/// Input to a script evaluation: the script body and the activity's
/// resolved parameters, by name.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub script: String,
    pub parameters: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptOutcome {
    /// Ports to fire, in order
    pub ports: Vec<(String, Value)>,
    pub logs: Vec<(LogLevel, String)>,
    /// Set when the script failed. Failures are reported, not raised.
    pub failure: Option<String>,
}

impl ScriptOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }
}

/// External expression/script engine used by scripted activities
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn evaluate(&self, request: ScriptRequest) -> ScriptOutcome;
}
