use crate::approvals::{ApprovalRegistry, ApprovalResolver};
use crate::connection::ConnectionManager;
use crate::graph::{ActivityInstance, BodyShape, Flow};
use crate::parser;
use crate::queue::QueueManager;
use crate::registry::ActivityRegistry;
use crate::runtime::RuntimeConfig;
use crate::script::ScriptEvaluator;
use crate::strategy::{ExecutionStrategy, StrategyResolver};
use portcore::{
    ActivityContext, EventBus, ExecutionMode, ExecutionOptions, ExecutionState, FlowDefinition,
    GraphError, Services, TemplateResolver,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything shared by the runs of one runtime: registries, resolvers,
/// services and the event bus. Built once at startup.
pub struct Engine {
    registry: Arc<ActivityRegistry>,
    strategies: StrategyResolver,
    approvals: ApprovalRegistry,
    templates: Arc<TemplateResolver>,
    services: Arc<Services>,
    scripts: Option<Arc<dyn ScriptEvaluator>>,
    events: Arc<EventBus>,
    config: RuntimeConfig,
}

impl Engine {
    pub fn new(registry: Arc<ActivityRegistry>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            strategies: StrategyResolver::new(),
            approvals: ApprovalRegistry::new(),
            templates: Arc::new(TemplateResolver::new()),
            services: Arc::new(Services::new()),
            scripts: None,
            events: Arc::new(EventBus::new(config.event_buffer_size)),
            config,
        }
    }

    pub fn with_script_evaluator(mut self, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        self.scripts = Some(evaluator);
        self
    }

    pub fn with_services(mut self, services: Services) -> Self {
        self.services = Arc::new(services);
        self
    }

    pub fn with_templates(mut self, templates: TemplateResolver) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    pub fn with_approval_resolver(
        mut self,
        name: impl Into<String>,
        resolver: Arc<dyn ApprovalResolver>,
    ) -> Self {
        self.approvals.register(name, resolver);
        self
    }

    pub fn with_strategy(mut self, shape: BodyShape, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        self.strategies.register(shape, strategy);
        self
    }

    pub fn registry(&self) -> &Arc<ActivityRegistry> {
        &self.registry
    }

    pub fn strategies(&self) -> &StrategyResolver {
        &self.strategies
    }

    pub fn approvals(&self) -> &ApprovalRegistry {
        &self.approvals
    }

    pub fn templates(&self) -> &Arc<TemplateResolver> {
        &self.templates
    }

    pub fn script_evaluator(&self) -> Option<&Arc<dyn ScriptEvaluator>> {
        self.scripts.as_ref()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validate a definition and build its runnable graph.
    pub fn parse(&self, definition: &FlowDefinition) -> Result<Flow, GraphError> {
        parser::parse_flow(self, definition)
    }

    /// Bind a flow to the state of one run.
    ///
    /// The mode is taken from `mode`, then the flow settings, then the
    /// runtime default.
    pub fn scope(
        self: &Arc<Self>,
        flow: Arc<Flow>,
        state: Arc<ExecutionState>,
        mode: Option<ExecutionMode>,
        cancellation: CancellationToken,
    ) -> Arc<FlowScope> {
        let options = ExecutionOptions {
            instance_id: state.instance_id(),
            mode: mode
                .or(flow.settings.mode)
                .unwrap_or(self.config.default_mode),
            max_parallel: flow
                .settings
                .max_parallel
                .unwrap_or(self.config.max_parallel)
                .max(1),
        };
        Arc::new(FlowScope {
            engine: Arc::clone(self),
            connections: ConnectionManager::new(Arc::clone(&flow)),
            queue: QueueManager::new(),
            flow,
            state,
            options,
            cancellation,
        })
    }
}

/// One flow bound to one execution state
pub struct FlowScope {
    pub engine: Arc<Engine>,
    pub flow: Arc<Flow>,
    pub state: Arc<ExecutionState>,
    pub connections: ConnectionManager,
    pub queue: QueueManager,
    pub options: ExecutionOptions,
    pub cancellation: CancellationToken,
}

impl FlowScope {
    /// Fresh execution context for one activation of `activity`
    pub fn context_for(&self, activity: &ActivityInstance) -> ActivityContext {
        ActivityContext::new(
            activity.id.clone(),
            Arc::clone(&activity.descriptor),
            Arc::clone(&activity.definitions),
            Arc::clone(&self.state),
            Arc::clone(&self.engine.templates),
            Arc::clone(&self.engine.services),
            self.options.clone(),
            self.engine
                .events
                .create_emitter(self.options.instance_id, activity.id.clone()),
        )
        .with_cancellation(self.cancellation.clone())
    }
}
