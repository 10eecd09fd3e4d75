//! Line-oriented script evaluator for scripted activities.
//!
//! One command per line:
//!
//! ```text
//! # comment
//! log Processing order {order.id}
//! warn Stock is low
//! fire Out {"total": {total}}
//! fail Customer {customer} is blocked
//! ```
//!
//! `{name}` is replaced with the rendered parameter value (dotted paths
//! allowed). `fire` data is parsed as JSON and falls back to text.

use async_trait::async_trait;
use portcore::{LogLevel, Value};
use portruntime::{ScriptEvaluator, ScriptOutcome, ScriptRequest};
use regex::{Captures, Regex};
use std::collections::HashMap;

const PLACEHOLDER: &str = r"\{([A-Za-z_][A-Za-z0-9_.]*)\}";

pub struct LineScriptEvaluator {
    placeholder: Regex,
}

impl LineScriptEvaluator {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(PLACEHOLDER).expect("placeholder pattern is a valid regex"),
        }
    }

    fn interpolate(&self, text: &str, parameters: &HashMap<String, Value>) -> String {
        self.placeholder
            .replace_all(text, |caps: &Captures| {
                let path: Vec<&str> = caps[1].split('.').collect();
                match path.split_first() {
                    Some((root, rest)) => parameters
                        .get(*root)
                        .and_then(|v| v.lookup(rest))
                        .map(|v| v.render())
                        // Unknown names are left alone so JSON braces survive.
                        .unwrap_or_else(|| caps[0].to_string()),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Evaluate a script synchronously.
    pub fn run(&self, script: &str, parameters: &HashMap<String, Value>) -> ScriptOutcome {
        let mut outcome = ScriptOutcome::default();

        for (number, line) in script.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = self.interpolate(rest.trim(), parameters);

            match command {
                "log" => outcome.logs.push((LogLevel::Info, rest)),
                "warn" => outcome.logs.push((LogLevel::Warning, rest)),
                "fire" => {
                    let (port, data) = rest.split_once(char::is_whitespace).unwrap_or((rest.as_str(), ""));
                    if port.is_empty() {
                        outcome.failure = Some(format!("line {}: fire needs a port", number + 1));
                        break;
                    }
                    let data = match data.trim() {
                        "" => Value::Null,
                        text => serde_json::from_str::<serde_json::Value>(text)
                            .map(Value::from_json)
                            .unwrap_or_else(|_| Value::String(text.to_string())),
                    };
                    outcome.ports.push((port.to_string(), data));
                }
                "fail" => {
                    outcome.failure = Some(if rest.is_empty() {
                        "script failed".to_string()
                    } else {
                        rest
                    });
                    break;
                }
                other => {
                    outcome.failure =
                        Some(format!("line {}: unknown command '{}'", number + 1, other));
                    break;
                }
            }
        }
        outcome
    }
}

impl Default for LineScriptEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptEvaluator for LineScriptEvaluator {
    async fn evaluate(&self, request: ScriptRequest) -> ScriptOutcome {
        self.run(&request.script, &request.parameters)
    }
}
