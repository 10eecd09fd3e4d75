use crate::{ActivityContext, ActivityError, Direction, Value, ValueKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Input port on loop constructs that marks the end of one body iteration.
/// Connections into it are loop-back edges.
pub const BODY_COMPLETE_PORT: &str = "BodyComplete";

/// Memory key holding a loop's phase marker.
pub const LOOP_PHASE_KEY: &str = "phase";

/// Phase marker written when a loop-back connection fires.
pub const LOOP_BODY_COMPLETED: &str = "body_completed";

/// Base capability shared by every activity implementation
pub trait Activity: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    /// Activity-specific readiness. Returning `NotReady` keeps the activity
    /// waiting without failing the run.
    fn is_ready_to_execute(&self, _ctx: &ActivityContext) -> Readiness {
        Readiness::Ready
    }
}

/// Activity whose body runs to completion without awaiting
pub trait SyncActivity: Activity {
    fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError>;
}

/// Activity whose body awaits (network calls, timers, ...)
#[async_trait]
pub trait AsyncActivity: Activity {
    async fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

/// How many inbound connections must fire before an activation may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub required: bool,
    pub default: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub name: String,
    pub direction: Direction,
    #[serde(default)]
    pub data_type: ValueKind,
    #[serde(default)]
    pub description: String,
}

impl PortDescriptor {
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Input,
            data_type: ValueKind::Any,
            description: String::new(),
        }
    }

    pub fn output(name: impl Into<String>, data_type: ValueKind) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Output,
            data_type,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Static description of an activity type: its parameters, ports and flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub activity_type: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub ports: Vec<PortDescriptor>,
    pub requires_interaction: bool,
    pub join: JoinMode,
}

impl Descriptor {
    pub fn new(activity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            activity_type: activity_type.into(),
            name: name.into(),
            category: "general".to_string(),
            description: String::new(),
            parameters: Vec::new(),
            ports: Vec::new(),
            requires_interaction: false,
            join: JoinMode::All,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn port(mut self, port: PortDescriptor) -> Self {
        self.ports.push(port);
        self
    }

    pub fn input(self, name: impl Into<String>) -> Self {
        self.port(PortDescriptor::input(name))
    }

    pub fn output(self, name: impl Into<String>, data_type: ValueKind) -> Self {
        self.port(PortDescriptor::output(name, data_type))
    }

    pub fn interactive(mut self) -> Self {
        self.requires_interaction = true;
        self
    }

    pub fn join(mut self, join: JoinMode) -> Self {
        self.join = join;
        self
    }

    pub fn find_parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn find_port(&self, name: &str) -> Option<&PortDescriptor> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.ports.iter().filter(|p| p.direction == Direction::Output)
    }
}

/// Rust types a parameter can be read as
pub trait FromValue: Sized {
    const KIND: ValueKind;

    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for Value {
    const KIND: ValueKind = ValueKind::Any;

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl FromValue for String {
    const KIND: ValueKind = ValueKind::String;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s),
            other => Some(other.render()),
        }
    }
}

impl FromValue for f64 {
    const KIND: ValueKind = ValueKind::Number;

    fn from_value(value: Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for i64 {
    const KIND: ValueKind = ValueKind::Number;

    fn from_value(value: Value) -> Option<Self> {
        value.as_f64().filter(|n| n.fract() == 0.0).map(|n| n as i64)
    }
}

impl FromValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for serde_json::Value {
    const KIND: ValueKind = ValueKind::Json;

    fn from_value(value: Value) -> Option<Self> {
        Some(value.to_json())
    }
}

/// Typed accessor for a named parameter, declared once per activity type:
///
/// ```ignore
/// const COUNT: Parameter<i64> = Parameter::new("count");
/// let count = ctx.parameter(&COUNT)?;
/// ```
pub struct Parameter<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Parameter<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: FromValue> Parameter<T> {
    pub fn kind(&self) -> ValueKind {
        T::KIND
    }

    pub fn required(&self) -> ParameterDescriptor {
        ParameterDescriptor {
            name: self.name.to_string(),
            kind: T::KIND,
            required: true,
            default: None,
            description: String::new(),
        }
    }

    pub fn optional(&self, default: Option<&str>) -> ParameterDescriptor {
        ParameterDescriptor {
            name: self.name.to_string(),
            kind: T::KIND,
            required: false,
            default: default.map(str::to_string),
            description: String::new(),
        }
    }
}

impl<T> Clone for Parameter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Parameter<T> {}

impl<T> std::fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Parameter").field(&self.name).finish()
    }
}
