use crate::{JoinMode, PortDescriptor, BODY_COMPLETE_PORT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type FlowId = Uuid;
pub type InstanceId = Uuid;

/// Stable identifier of an activity within one flow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(String);

impl ActivityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActivityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActivityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Serialized flow definition, as produced by the designer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: FlowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: FlowSettings,
    pub activities: Vec<ActivitySpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Initial values of flow variables
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            settings: FlowSettings::default(),
            activities: Vec::new(),
            connections: Vec::new(),
            variables: HashMap::new(),
        }
    }

    pub fn add_activity(&mut self, activity: ActivitySpec) -> ActivityId {
        let id = activity.id.clone();
        self.activities.push(activity);
        id
    }

    pub fn connect(
        &mut self,
        source: impl Into<ActivityId>,
        source_port: impl Into<String>,
        target: impl Into<ActivityId>,
        target_port: impl Into<String>,
    ) {
        self.connections.push(Connection::new(source, source_port, target, target_port));
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.settings.mode = Some(mode);
        self
    }

    pub fn find_activity(&self, id: &ActivityId) -> Option<&ActivitySpec> {
        self.activities.iter().find(|a| &a.id == id)
    }
}

/// One activity in a flow definition. Parameter values are raw
/// definitions (literals or templates) resolved when the activity reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySpec {
    pub id: ActivityId,
    pub activity_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub approvals: Vec<ApprovalSpec>,
    /// Declared ports, for activity types whose ports are defined per flow
    #[serde(default)]
    pub ports: Vec<PortDescriptor>,
    #[serde(default)]
    pub script: Option<String>,
    /// Child flow of a composite activity
    #[serde(default)]
    pub flow: Option<Box<FlowDefinition>>,
    /// Overrides the activity type's join mode
    #[serde(default)]
    pub join: Option<JoinMode>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub position: Option<Position>,
}

impl ActivitySpec {
    pub fn new(id: impl Into<ActivityId>, activity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            activity_type: activity_type.into(),
            name: None,
            parameters: HashMap::new(),
            approvals: Vec::new(),
            ports: Vec::new(),
            script: None,
            flow: None,
            join: None,
            priority: 0,
            position: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, definition: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), definition.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_approval(mut self, approval: ApprovalSpec) -> Self {
        self.approvals.push(approval);
        self
    }

    pub fn with_port(mut self, port: PortDescriptor) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_flow(mut self, flow: FlowDefinition) -> Self {
        self.flow = Some(Box::new(flow));
        self
    }

    pub fn with_join(mut self, join: JoinMode) -> Self {
        self.join = Some(join);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }
}

/// Directed edge from an output port to an input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub source: ActivityId,
    pub source_port: String,
    pub target: ActivityId,
    pub target_port: String,
}

impl Connection {
    pub fn new(
        source: impl Into<ActivityId>,
        source_port: impl Into<String>,
        target: impl Into<ActivityId>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_port: source_port.into(),
            target: target.into(),
            target_port: target_port.into(),
        }
    }

    pub fn is_loop_back(&self) -> bool {
        self.target_port == BODY_COMPLETE_PORT
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source, self.source_port, self.target, self.target_port
        )
    }
}

/// An approval or check attached to an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSpec {
    pub id: String,
    pub resolver: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl ApprovalSpec {
    pub fn new(id: impl Into<String>, resolver: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resolver: resolver.into(),
            options: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Activity position in the visual designer
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Per-flow execution settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Falls back to the runtime's default mode when unset
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    /// Overrides the runtime's batch size for interactive work
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Automatic,
    Manual,
    StepByStep,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(ExecutionMode::Automatic),
            "manual" => Ok(ExecutionMode::Manual),
            "step" | "step_by_step" | "step-by-step" => Ok(ExecutionMode::StepByStep),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}
