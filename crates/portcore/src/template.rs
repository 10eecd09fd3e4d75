//! Parameter templating.
//!
//! A parameter definition is either a literal or text containing tokens:
//!
//! - `$var(path)`   flow variable, dotted path into structured values
//! - `$param(path)` flow parameter
//! - `$clock(spec)` current time: `now`, `today`, `unix` or a chrono format
//!
//! `$$` produces a literal `$`. References to unset values render as the
//! empty string.

use crate::{ActivityError, ExecutionState, Value, ValueKind};
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::fmt::Write;
use std::sync::Arc;

const TOKEN_PATTERN: &str = r"\$\$|\$(var|param|clock)\(([^)]*)\)";

/// Source of the current time for `$clock(...)` tokens
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant, for reproducible runs
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub struct TemplateResolver {
    pattern: Regex,
    clock: Arc<dyn Clock>,
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            pattern: Regex::new(TOKEN_PATTERN).expect("token pattern is a valid regex"),
            clock,
        }
    }

    pub fn is_template(&self, definition: &str) -> bool {
        self.pattern.is_match(definition)
    }

    /// Resolve every token in `definition` to text.
    pub fn resolve(&self, definition: &str, state: &ExecutionState) -> String {
        self.pattern
            .replace_all(definition, |caps: &Captures| self.render_token(caps, state))
            .into_owned()
    }

    /// Resolve a definition and convert it to the declared kind.
    ///
    /// A definition consisting of a single variable or parameter reference
    /// keeps the referenced value as-is when the kind accepts it.
    pub fn resolve_value(
        &self,
        definition: &str,
        kind: ValueKind,
        state: &ExecutionState,
    ) -> Result<Value, ActivityError> {
        if let Some(caps) = self.pattern.captures(definition) {
            let whole = caps.get(0).map(|m| m.as_str().len()) == Some(definition.len());
            if whole && caps.get(1).map(|m| m.as_str()) != Some("clock") {
                if let Some(value) = self.lookup(&caps, state) {
                    if kind.accepts(&value) && !value.is_null() {
                        return Ok(value);
                    }
                }
            }
        }
        kind.convert(&self.resolve(definition, state))
    }

    fn lookup(&self, caps: &Captures, state: &ExecutionState) -> Option<Value> {
        let source = caps.get(1)?.as_str();
        let path: Vec<&str> = caps.get(2)?.as_str().trim().split('.').collect();
        let (root, rest) = path.split_first()?;
        let value = match source {
            "var" => state.variable(root)?,
            "param" => state.parameter(root)?,
            _ => return None,
        };
        value.lookup(rest)
    }

    fn render_token(&self, caps: &Captures, state: &ExecutionState) -> String {
        match caps.get(1).map(|m| m.as_str()) {
            None => "$".to_string(),
            Some("clock") => {
                let spec = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("now");
                self.render_clock(spec)
            }
            Some(_) => self
                .lookup(caps, state)
                .map(|value| value.render())
                .unwrap_or_default(),
        }
    }

    fn render_clock(&self, spec: &str) -> String {
        let now = self.clock.now();
        match spec {
            "" | "now" => now.to_rfc3339(),
            "today" => now.format("%Y-%m-%d").to_string(),
            "unix" => now.timestamp().to_string(),
            format => {
                // Unknown specifiers make chrono's Display fail.
                let mut out = String::new();
                match write!(out, "{}", now.format(format)) {
                    Ok(()) => out,
                    Err(_) => String::new(),
                }
            }
        }
    }
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateResolver").finish_non_exhaustive()
    }
}
