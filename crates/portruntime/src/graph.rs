use portcore::{
    Activity, ActivityContext, ActivityId, ApprovalSpec, AsyncActivity, Connection, Descriptor,
    FlowId, FlowSettings, JoinMode, Readiness, SyncActivity, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Runtime shape of an activity body, used to pick its execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyShape {
    Sync,
    Async,
    Scripted,
    Composite,
}

/// Tagged activity body. Dispatch goes through the strategy resolver.
#[derive(Clone)]
pub enum ActivityBody {
    Sync(Arc<dyn SyncActivity>),
    Async(Arc<dyn AsyncActivity>),
    Scripted(Arc<ScriptedActivity>),
    Composite(Arc<CompositeActivity>),
}

impl ActivityBody {
    pub fn shape(&self) -> BodyShape {
        match self {
            ActivityBody::Sync(_) => BodyShape::Sync,
            ActivityBody::Async(_) => BodyShape::Async,
            ActivityBody::Scripted(_) => BodyShape::Scripted,
            ActivityBody::Composite(_) => BodyShape::Composite,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        match self {
            ActivityBody::Sync(a) => a.descriptor(),
            ActivityBody::Async(a) => a.descriptor(),
            ActivityBody::Scripted(a) => a.descriptor(),
            ActivityBody::Composite(a) => a.descriptor(),
        }
    }

    pub fn is_ready_to_execute(&self, ctx: &ActivityContext) -> Readiness {
        match self {
            ActivityBody::Sync(a) => a.is_ready_to_execute(ctx),
            ActivityBody::Async(a) => a.is_ready_to_execute(ctx),
            ActivityBody::Scripted(a) => a.is_ready_to_execute(ctx),
            ActivityBody::Composite(a) => a.is_ready_to_execute(ctx),
        }
    }
}

/// Custom activity whose body is a script run by the configured evaluator
pub struct ScriptedActivity {
    pub descriptor: Descriptor,
    pub script: String,
}

impl Activity for ScriptedActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

/// Activity that runs a nested flow to completion
pub struct CompositeActivity {
    pub descriptor: Descriptor,
    pub flow: Arc<Flow>,
}

impl Activity for CompositeActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

/// One node of a parsed flow. Topology is fixed after parsing.
pub struct ActivityInstance {
    pub id: ActivityId,
    pub name: Option<String>,
    pub descriptor: Arc<Descriptor>,
    /// Raw parameter definitions, resolved on read
    pub definitions: Arc<HashMap<String, String>>,
    pub approvals: Vec<ApprovalSpec>,
    pub join: JoinMode,
    pub priority: i32,
    pub body: ActivityBody,
}

impl ActivityInstance {
    pub fn activity_type(&self) -> &str {
        &self.descriptor.activity_type
    }

    pub fn requires_interaction(&self) -> bool {
        self.descriptor.requires_interaction
    }
}

/// Validated, runnable flow graph
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    pub settings: FlowSettings,
    pub activities: HashMap<ActivityId, Arc<ActivityInstance>>,
    /// Activity ids in definition order
    pub order: Vec<ActivityId>,
    pub connections: Vec<Connection>,
    pub variables: HashMap<String, Value>,
}

impl Flow {
    pub fn activity(&self, id: &ActivityId) -> Option<&Arc<ActivityInstance>> {
        self.activities.get(id)
    }

    /// Activities without inbound connections, loop-back edges aside.
    pub fn roots(&self) -> Vec<ActivityId> {
        self.order
            .iter()
            .filter(|id| {
                !self
                    .connections
                    .iter()
                    .any(|c| &c.target == *id && !c.is_loop_back())
            })
            .cloned()
            .collect()
    }
}

/// One-line human description of an activity instance.
pub fn describe_activity(activity: &ActivityInstance) -> String {
    let descriptor = &activity.descriptor;
    let outputs: Vec<&str> = descriptor.outputs().map(|p| p.name.as_str()).collect();
    format!(
        "{} [{}]{}{} -> {}",
        activity.name.as_deref().unwrap_or(activity.id.as_str()),
        descriptor.activity_type,
        if descriptor.requires_interaction { " (interactive)" } else { "" },
        if activity.approvals.is_empty() {
            String::new()
        } else {
            format!(" ({} approvals)", activity.approvals.len())
        },
        outputs.join(", ")
    )
}

/// Multi-line description of a flow, activities in definition order.
pub fn describe_flow(flow: &Flow) -> String {
    let mut lines = vec![format!(
        "{} ({} activities, {} connections)",
        flow.name,
        flow.activities.len(),
        flow.connections.len()
    )];
    for id in &flow.order {
        if let Some(activity) = flow.activity(id) {
            lines.push(format!("  {}", describe_activity(activity)));
        }
    }
    lines.join("\n")
}
