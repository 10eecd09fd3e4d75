use crate::coordinator::{ExecutionCoordinator, RunOutcome};
use crate::engine::Engine;
use crate::graph::Flow;
use crate::registry::ActivityRegistry;
use crate::store::{InMemoryStateStore, InstanceRecord, StateStore};
use portcore::{
    ActivityId, ApprovalStatus, ExecutionEvent, ExecutionMode, ExecutionSnapshot, ExecutionState,
    FlowDefinition, FlowError, FlowId, GraphError, InstanceId, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Instance {
    flow: Arc<Flow>,
    state: Arc<ExecutionState>,
    mode: ExecutionMode,
    cancellation: CancellationToken,
}

/// Result of one run call on an instance
#[derive(Debug, Clone)]
pub struct RunReport {
    pub instance_id: InstanceId,
    pub outcome: RunOutcome,
    pub state: Arc<ExecutionState>,
}

/// Main runtime for executing flows
pub struct FlowRuntime {
    engine: Arc<Engine>,
    flows: Arc<RwLock<HashMap<FlowId, Arc<Flow>>>>,
    instances: Arc<RwLock<HashMap<InstanceId, Arc<Instance>>>>,
    store: Arc<dyn StateStore>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(ActivityRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<ActivityRegistry>, config: RuntimeConfig) -> Self {
        Self::with_engine(Engine::new(registry, config))
    }

    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
            flows: Arc::new(RwLock::new(HashMap::new())),
            instances: Arc::new(RwLock::new(HashMap::new())),
            store: Arc::new(InMemoryStateStore::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<ActivityRegistry> {
        self.engine.registry()
    }

    /// Validate and register a flow definition
    pub async fn register_flow(&self, definition: &FlowDefinition) -> Result<FlowId, FlowError> {
        let flow = self.engine.parse(definition)?;
        let id = flow.id;
        tracing::info!("Registered flow {} ({})", flow.name, id);
        self.flows.write().await.insert(id, Arc::new(flow));
        Ok(id)
    }

    pub async fn flow(&self, flow_id: FlowId) -> Option<Arc<Flow>> {
        self.flows.read().await.get(&flow_id).cloned()
    }

    /// Start a new instance of a registered flow
    pub async fn start(
        &self,
        flow_id: FlowId,
        parameters: HashMap<String, Value>,
        mode: Option<ExecutionMode>,
    ) -> Result<RunReport, FlowError> {
        let flow = self
            .flow(flow_id)
            .await
            .ok_or_else(|| GraphError::FlowNotFound(flow_id.to_string()))?;

        let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
        for (name, value) in parameters {
            state.set_parameter(name, value);
        }

        let instance = Arc::new(Instance {
            mode: mode
                .or(flow.settings.mode)
                .unwrap_or(self.engine.config().default_mode),
            flow,
            state: Arc::clone(&state),
            cancellation: CancellationToken::new(),
        });
        self.instances
            .write()
            .await
            .insert(state.instance_id(), Arc::clone(&instance));

        self.run_instance(&instance).await
    }

    /// Register a definition and start it
    pub async fn execute(
        &self,
        definition: &FlowDefinition,
        parameters: HashMap<String, Value>,
    ) -> Result<RunReport, FlowError> {
        let flow_id = self.register_flow(definition).await?;
        self.start(flow_id, parameters, None).await
    }

    /// Continue a waiting or paused instance, loading it from the store if
    /// it is not in memory.
    pub async fn resume(&self, instance_id: InstanceId) -> Result<RunReport, FlowError> {
        let instance = self.instance(instance_id).await?;
        self.run_instance(&instance).await
    }

    /// Record an externally made approval decision
    pub async fn approve(
        &self,
        instance_id: InstanceId,
        activity_id: &ActivityId,
        approval_id: &str,
        status: ApprovalStatus,
    ) -> Result<(), FlowError> {
        let instance = self.instance(instance_id).await?;
        let activity = instance
            .flow
            .activity(activity_id)
            .ok_or_else(|| GraphError::ActivityNotFound(activity_id.to_string()))?;
        if !activity.approvals.iter().any(|a| a.id == approval_id) {
            return Err(GraphError::Invalid(format!(
                "Activity '{}' has no approval '{}'",
                activity_id, approval_id
            ))
            .into());
        }
        instance.state.set_approval(activity_id, approval_id, status);
        tracing::info!(%instance_id, activity = %activity_id, approval_id, ?status, "approval recorded");
        Ok(())
    }

    /// Mark a queued interactive activity for execution in manual mode
    pub async fn select(&self, instance_id: InstanceId, activity_id: &ActivityId) -> Result<(), FlowError> {
        let instance = self.instance(instance_id).await?;
        if instance.state.set_selected(activity_id, true) {
            Ok(())
        } else {
            Err(FlowError::Execution(format!("'{}' is not queued", activity_id)))
        }
    }

    /// Set a flow variable on a live instance, e.g. form input
    pub async fn set_variable(
        &self,
        instance_id: InstanceId,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), FlowError> {
        let instance = self.instance(instance_id).await?;
        instance.state.set_variable(name, value);
        Ok(())
    }

    /// Cancel an instance. Takes effect between batches.
    pub async fn cancel(&self, instance_id: InstanceId) -> bool {
        match self.instances.read().await.get(&instance_id) {
            Some(instance) => {
                instance.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn snapshot(&self, instance_id: InstanceId) -> Option<ExecutionSnapshot> {
        self.instances
            .read()
            .await
            .get(&instance_id)
            .map(|instance| instance.state.snapshot())
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.engine.events().subscribe()
    }

    async fn instance(&self, instance_id: InstanceId) -> Result<Arc<Instance>, FlowError> {
        if let Some(instance) = self.instances.read().await.get(&instance_id) {
            return Ok(Arc::clone(instance));
        }

        let record = self
            .store
            .load(instance_id)
            .await?
            .ok_or_else(|| FlowError::Store(format!("Instance not found: {}", instance_id)))?;
        let flow = self
            .flow(record.flow_id)
            .await
            .ok_or_else(|| GraphError::FlowNotFound(record.flow_id.to_string()))?;

        tracing::info!(%instance_id, "restoring instance from store");
        let instance = Arc::new(Instance {
            flow,
            mode: record.mode,
            state: Arc::new(ExecutionState::restore(record.snapshot)),
            cancellation: CancellationToken::new(),
        });
        self.instances
            .write()
            .await
            .insert(instance_id, Arc::clone(&instance));
        Ok(instance)
    }

    async fn run_instance(&self, instance: &Instance) -> Result<RunReport, FlowError> {
        let scope = self.engine.scope(
            Arc::clone(&instance.flow),
            Arc::clone(&instance.state),
            Some(instance.mode),
            instance.cancellation.clone(),
        );
        let result = ExecutionCoordinator::new(scope).run().await;

        self.store
            .save(&InstanceRecord {
                flow_id: instance.flow.id,
                mode: instance.mode,
                snapshot: instance.state.snapshot(),
            })
            .await?;

        Ok(RunReport {
            instance_id: instance.state.instance_id(),
            outcome: result?,
            state: Arc::clone(&instance.state),
        })
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Batch size for interactive work in automatic and manual mode
    pub max_parallel: usize,
    pub event_buffer_size: usize,
    /// Mode of flows that do not set one
    pub default_mode: ExecutionMode,
    /// Upper bound on coordinator cycles per run call
    pub max_cycles: usize,
}

impl RuntimeConfig {
    /// Defaults overridden by `PORTFLOW_MAX_PARALLEL`, `PORTFLOW_EVENT_BUFFER`
    /// and `PORTFLOW_MODE`.
    pub fn from_env() -> Result<Self, FlowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FlowError> {
        let mut config = Self::default();
        if let Some(value) = lookup("PORTFLOW_MAX_PARALLEL") {
            config.max_parallel = parse_number("PORTFLOW_MAX_PARALLEL", &value)?;
        }
        if let Some(value) = lookup("PORTFLOW_EVENT_BUFFER") {
            config.event_buffer_size = parse_number("PORTFLOW_EVENT_BUFFER", &value)?;
        }
        if let Some(value) = lookup("PORTFLOW_MODE") {
            config.default_mode = value
                .parse()
                .map_err(|e| FlowError::Config(format!("PORTFLOW_MODE: {}", e)))?;
        }
        Ok(config)
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize, FlowError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(FlowError::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel: 10,
            event_buffer_size: 1000,
            default_mode: ExecutionMode::Automatic,
            max_cycles: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn config_reads_overrides() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("PORTFLOW_MAX_PARALLEL", "4"),
            ("PORTFLOW_MODE", "step"),
        ]))
        .unwrap();
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.default_mode, ExecutionMode::StepByStep);
        assert_eq!(config.event_buffer_size, 1000);
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(RuntimeConfig::from_lookup(lookup(&[("PORTFLOW_MAX_PARALLEL", "0")])).is_err());
        assert!(RuntimeConfig::from_lookup(lookup(&[("PORTFLOW_MODE", "turbo")])).is_err());
    }
}
