use crate::{
    events::EventEmitter, ActivityError, ActivityId, Descriptor, ExecutedPort, ExecutionMode,
    ExecutionState, FromValue, InstanceId, LogLevel, Parameter, PortSet, TemplateResolver, Value,
    ValueKind,
};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Services made available to activities, keyed by type
#[derive(Default)]
pub struct Services {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), service);
    }

    pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.insert(Arc::new(service));
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|entry| entry.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Options of the run an activity executes in
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub instance_id: InstanceId,
    pub mode: ExecutionMode,
    pub max_parallel: usize,
}

/// Execution context passed to each activity
pub struct ActivityContext {
    pub activity_id: ActivityId,

    /// Shared state of the flow instance
    pub state: Arc<ExecutionState>,

    pub services: Arc<Services>,

    pub options: ExecutionOptions,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    pub cancellation: CancellationToken,

    descriptor: Arc<Descriptor>,
    definitions: Arc<HashMap<String, String>>,
    resolver: Arc<TemplateResolver>,
    ports: PortSet,
}

impl ActivityContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        activity_id: ActivityId,
        descriptor: Arc<Descriptor>,
        definitions: Arc<HashMap<String, String>>,
        state: Arc<ExecutionState>,
        resolver: Arc<TemplateResolver>,
        services: Arc<Services>,
        options: ExecutionOptions,
        events: EventEmitter,
    ) -> Self {
        let ports = PortSet::from_descriptors(&descriptor.ports);
        Self {
            activity_id,
            state,
            services,
            options,
            events,
            cancellation: CancellationToken::new(),
            descriptor,
            definitions,
            resolver,
            ports,
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Read a typed parameter, resolving its template now.
    pub fn parameter<T: FromValue>(&self, parameter: &Parameter<T>) -> Result<T, ActivityError> {
        let value = self.parameter_value(parameter.name())?;
        let actual = value.render();
        T::from_value(value).ok_or_else(|| ActivityError::InvalidParameter {
            name: parameter.name().to_string(),
            expected: parameter.kind().to_string(),
            actual,
        })
    }

    /// Like `parameter`, but an undefined parameter without default is `None`.
    pub fn optional_parameter<T: FromValue>(
        &self,
        parameter: &Parameter<T>,
    ) -> Result<Option<T>, ActivityError> {
        if self.definition(parameter.name()).is_none() {
            return Ok(None);
        }
        self.parameter(parameter).map(Some)
    }

    /// Resolve a parameter to a value of its declared kind.
    pub fn parameter_value(&self, name: &str) -> Result<Value, ActivityError> {
        let definition = self
            .definition(name)
            .ok_or_else(|| ActivityError::MissingParameter(name.to_string()))?;
        let kind = self
            .descriptor
            .find_parameter(name)
            .map(|p| p.kind)
            .unwrap_or(ValueKind::Any);
        self.resolver
            .resolve_value(&definition, kind, &self.state)
            .map_err(|e| ActivityError::InvalidParameter {
                name: name.to_string(),
                expected: kind.to_string(),
                actual: e.to_string(),
            })
    }

    /// Every defined parameter, resolved.
    pub fn resolved_parameters(&self) -> Result<HashMap<String, Value>, ActivityError> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        for declared in &self.descriptor.parameters {
            if declared.default.is_some() && !names.contains(&declared.name.as_str()) {
                names.push(&declared.name);
            }
        }
        names
            .into_iter()
            .map(|name| Ok((name.to_string(), self.parameter_value(name)?)))
            .collect()
    }

    fn definition(&self, name: &str) -> Option<String> {
        self.definitions.get(name).cloned().or_else(|| {
            self.descriptor
                .find_parameter(name)
                .and_then(|p| p.default.clone())
        })
    }

    /// Resolve arbitrary template text against the run state.
    pub fn resolve(&self, text: &str) -> String {
        self.resolver.resolve(text, &self.state)
    }

    /// Fire an output port with data.
    pub fn fire(&mut self, port: &str, data: impl Into<Value>) -> Result<(), ActivityError> {
        self.ports.fire(port, data.into())
    }

    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    pub fn executed_ports(&self) -> Vec<ExecutedPort> {
        self.ports.executed()
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.state.variable(name)
    }

    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.state.set_variable(name, value.into());
    }

    pub fn memory(&self, key: &str) -> Option<Value> {
        self.state.memory(&self.activity_id, key)
    }

    pub fn set_memory(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.set_memory(&self.activity_id, key, value.into());
    }

    pub fn clear_memory(&self, key: &str) {
        self.state.remove_memory(&self.activity_id, key);
    }

    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }

    /// Record a log line in the execution trace and forward it to listeners.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Error => tracing::error!(activity = %self.activity_id, "{}", message),
            LogLevel::Warning => tracing::warn!(activity = %self.activity_id, "{}", message),
            _ => tracing::debug!(activity = %self.activity_id, "{}", message),
        }
        self.events.log(level, message.clone());
        self.state.log(Some(&self.activity_id), level, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}
