use crate::graph::{ActivityBody, ScriptedActivity};
use portcore::{
    ActivityError, ActivitySpec, AsyncActivity, Descriptor, GraphError, JoinMode,
    ParameterDescriptor, SyncActivity, ValueKind,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Activity type of scripted custom activities
pub const SCRIPT_TYPE: &str = "core.script";

/// Activity type of composite activities wrapping a child flow
pub const COMPOSITE_TYPE: &str = "core.composite";

/// Factory trait for creating activity bodies from their flow spec
pub trait ActivityFactory: Send + Sync {
    fn activity_type(&self) -> &str;

    /// Type-level descriptor: parameters, ports and flags
    fn descriptor(&self) -> Descriptor;

    fn create(&self, spec: &ActivitySpec) -> Result<ActivityBody, ActivityError>;
}

/// Factory for stateless activities: every instance shares one body.
pub struct SharedActivityFactory {
    descriptor: Descriptor,
    body: ActivityBody,
}

impl SharedActivityFactory {
    pub fn new(body: ActivityBody) -> Self {
        Self {
            descriptor: body.descriptor().clone(),
            body,
        }
    }
}

impl ActivityFactory for SharedActivityFactory {
    fn activity_type(&self) -> &str {
        &self.descriptor.activity_type
    }

    fn descriptor(&self) -> Descriptor {
        self.descriptor.clone()
    }

    fn create(&self, _spec: &ActivitySpec) -> Result<ActivityBody, ActivityError> {
        Ok(self.body.clone())
    }
}

/// Builds scripted activities. Ports and parameters come from the spec.
pub struct ScriptActivityFactory;

impl ActivityFactory for ScriptActivityFactory {
    fn activity_type(&self) -> &str {
        SCRIPT_TYPE
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::new(SCRIPT_TYPE, "Script")
            .category("custom")
            .description("Runs a script through the configured evaluator")
            .input("In")
    }

    fn create(&self, spec: &ActivitySpec) -> Result<ActivityBody, ActivityError> {
        let script = spec
            .script
            .clone()
            .ok_or_else(|| ActivityError::MissingParameter("script".to_string()))?;
        let mut descriptor = self.descriptor();
        for port in &spec.ports {
            if descriptor.find_port(&port.name).is_none() {
                descriptor = descriptor.port(port.clone());
            }
        }
        let mut names: Vec<&String> = spec.parameters.keys().collect();
        names.sort();
        for name in names {
            descriptor = descriptor.parameter(ParameterDescriptor {
                name: name.clone(),
                kind: ValueKind::Any,
                required: false,
                default: None,
                description: String::new(),
            });
        }
        Ok(ActivityBody::Scripted(Arc::new(ScriptedActivity { descriptor, script })))
    }
}

/// Descriptor of composite activities. Parameters are taken from the spec.
pub fn composite_descriptor() -> Descriptor {
    Descriptor::new(COMPOSITE_TYPE, "Composite")
        .category("flow")
        .description("Runs a nested flow to completion")
        .input("In")
        .output("Done", ValueKind::Object)
        .output("Failed", ValueKind::String)
        .join(JoinMode::All)
}

/// Registry of available activity types.
///
/// Descriptors are captured once at registration; parsing and execution
/// read them from here instead of inspecting activity instances.
pub struct ActivityRegistry {
    factories: HashMap<String, Arc<dyn ActivityFactory>>,
    descriptors: HashMap<String, Descriptor>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            descriptors: HashMap::new(),
        };
        registry.register(Arc::new(ScriptActivityFactory));
        registry
            .descriptors
            .insert(COMPOSITE_TYPE.to_string(), composite_descriptor());
        registry
    }

    /// Register an activity factory
    pub fn register(&mut self, factory: Arc<dyn ActivityFactory>) {
        let activity_type = factory.activity_type().to_string();
        tracing::info!("Registering activity type: {}", activity_type);
        self.descriptors
            .insert(activity_type.clone(), factory.descriptor());
        self.factories.insert(activity_type, factory);
    }

    pub fn register_sync(&mut self, activity: Arc<dyn SyncActivity>) {
        self.register(Arc::new(SharedActivityFactory::new(ActivityBody::Sync(activity))));
    }

    pub fn register_async(&mut self, activity: Arc<dyn AsyncActivity>) {
        self.register(Arc::new(SharedActivityFactory::new(ActivityBody::Async(activity))));
    }

    /// Create an activity body for a spec
    pub fn create(&self, spec: &ActivitySpec) -> Result<ActivityBody, GraphError> {
        let factory = self
            .factories
            .get(&spec.activity_type)
            .ok_or_else(|| GraphError::UnknownActivityType(spec.activity_type.clone()))?;

        factory.create(spec).map_err(|e| {
            GraphError::Invalid(format!("Failed to create activity '{}': {}", spec.id, e))
        })
    }

    pub fn contains(&self, activity_type: &str) -> bool {
        self.descriptors.contains_key(activity_type)
    }

    /// Get all registered activity types, sorted
    pub fn list_activity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.descriptors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn descriptor(&self, activity_type: &str) -> Option<&Descriptor> {
        self.descriptors.get(activity_type)
    }
}

impl Default for ActivityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
