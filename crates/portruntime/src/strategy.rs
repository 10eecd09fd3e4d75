//! Per-shape execution strategies.
//!
//! A strategy knows how to invoke one shape of activity body and how to turn
//! what the body did into an `ExecutionResult`.

use crate::approvals::aggregate;
use crate::coordinator::{ExecutionCoordinator, RunOutcome};
use crate::engine::FlowScope;
use crate::graph::{ActivityBody, ActivityInstance, BodyShape};
use crate::script::ScriptRequest;
use async_trait::async_trait;
use portcore::{
    ActivityContext, ApprovalStatus, ExecutedPort, ExecutionMode, ExecutionState,
    ExecutionStatus, FlowError, GraphError, StepStatus, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Step name under which the execution outcome is persisted
pub const EXECUTE_STEP: &str = "execute";

/// Uniform outcome of running one activity body
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub executed_ports: Vec<ExecutedPort>,
    /// Combined status of the activity's approvals at execution time
    pub approval_status: ApprovalStatus,
    pub details: Option<String>,
}

impl ExecutionResult {
    pub fn completed(executed_ports: Vec<ExecutedPort>) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            executed_ports,
            approval_status: ApprovalStatus::Approved,
            details: None,
        }
    }

    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            executed_ports: Vec::new(),
            approval_status: ApprovalStatus::Approved,
            details: Some(details.into()),
        }
    }

    fn with_approvals(mut self, state: &ExecutionState, activity: &ActivityInstance) -> Self {
        let statuses: Vec<ApprovalStatus> = activity
            .approvals
            .iter()
            .map(|a| {
                state
                    .approval(&activity.id, &a.id)
                    .unwrap_or(ApprovalStatus::Pending)
            })
            .collect();
        self.approval_status = aggregate(&statuses);
        self
    }
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Run the body. `Err` is a fatal run error; failures the body reports
    /// itself come back as a Failed result.
    async fn execute(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
        ctx: &mut ActivityContext,
    ) -> Result<ExecutionResult, FlowError>;

    /// Persist the outcome on the queue item and step data.
    fn after_execute(&self, scope: &FlowScope, activity: &ActivityInstance, result: &ExecutionResult) {
        let state = &scope.state;
        let step = match result.status {
            ExecutionStatus::Failed => StepStatus::Failed,
            _ => StepStatus::Completed,
        };
        state.set_step_status(&activity.id, EXECUTE_STEP, step);
        state.transition(
            &activity.id,
            &[ExecutionStatus::Executing],
            result.status,
            result.details.clone(),
        );
        state.set_selected(&activity.id, false);
    }
}

fn shape_mismatch(activity: &ActivityInstance, expected: BodyShape) -> FlowError {
    FlowError::Execution(format!(
        "Activity '{}' is {:?}, strategy expects {:?}",
        activity.id,
        activity.body.shape(),
        expected
    ))
}

pub struct SyncStrategy;

#[async_trait]
impl ExecutionStrategy for SyncStrategy {
    async fn execute(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
        ctx: &mut ActivityContext,
    ) -> Result<ExecutionResult, FlowError> {
        let ActivityBody::Sync(body) = &activity.body else {
            return Err(shape_mismatch(activity, BodyShape::Sync));
        };
        body.execute(ctx)?;
        Ok(ExecutionResult::completed(ctx.executed_ports()).with_approvals(&scope.state, activity))
    }
}

/// Awaits the body, giving up when the run is cancelled.
pub struct AsyncStrategy;

#[async_trait]
impl ExecutionStrategy for AsyncStrategy {
    async fn execute(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
        ctx: &mut ActivityContext,
    ) -> Result<ExecutionResult, FlowError> {
        let ActivityBody::Async(body) = &activity.body else {
            return Err(shape_mismatch(activity, BodyShape::Async));
        };

        let cancellation = ctx.cancellation.clone();
        tokio::select! {
            result = body.execute(ctx) => {
                result?;
            }
            _ = cancellation.cancelled() => {
                tracing::info!(activity = %activity.id, "cancelled while executing");
                return Ok(ExecutionResult::failed("Cancelled"));
            }
        }
        Ok(ExecutionResult::completed(ctx.executed_ports()).with_approvals(&scope.state, activity))
    }
}

/// Hands the script and resolved parameters to the script evaluator.
pub struct ScriptedStrategy;

#[async_trait]
impl ExecutionStrategy for ScriptedStrategy {
    async fn execute(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
        ctx: &mut ActivityContext,
    ) -> Result<ExecutionResult, FlowError> {
        let ActivityBody::Scripted(body) = &activity.body else {
            return Err(shape_mismatch(activity, BodyShape::Scripted));
        };
        let evaluator = scope.engine.script_evaluator().ok_or_else(|| {
            FlowError::Execution(format!(
                "Activity '{}' is scripted but no script evaluator is configured",
                activity.id
            ))
        })?;

        let parameters = match ctx.resolved_parameters() {
            Ok(parameters) => parameters,
            Err(e) => {
                ctx.error(format!("Script parameters could not be resolved: {}", e));
                return Ok(ExecutionResult::failed(e.to_string()));
            }
        };

        let outcome = evaluator
            .evaluate(ScriptRequest {
                script: body.script.clone(),
                parameters,
            })
            .await;

        for (level, message) in &outcome.logs {
            ctx.log(*level, message.clone());
        }
        if let Some(failure) = outcome.failure {
            ctx.error(format!("Script failed: {}", failure));
            return Ok(ExecutionResult::failed(failure));
        }

        for (port, data) in outcome.ports {
            ctx.fire(&port, data)?;
        }
        Ok(ExecutionResult::completed(ctx.executed_ports()).with_approvals(&scope.state, activity))
    }
}

/// Runs the child flow to completion on its own state.
pub struct CompositeStrategy;

#[async_trait]
impl ExecutionStrategy for CompositeStrategy {
    async fn execute(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
        ctx: &mut ActivityContext,
    ) -> Result<ExecutionResult, FlowError> {
        let ActivityBody::Composite(body) = &activity.body else {
            return Err(shape_mismatch(activity, BodyShape::Composite));
        };

        let child_state = Arc::new(ExecutionState::new(Uuid::new_v4()));
        for (name, value) in ctx.resolved_parameters()? {
            child_state.set_parameter(name, value);
        }

        let child = scope.engine.scope(
            Arc::clone(&body.flow),
            Arc::clone(&child_state),
            Some(ExecutionMode::Automatic),
            scope.cancellation.child_token(),
        );
        tracing::debug!(
            activity = %activity.id,
            child = %child_state.instance_id(),
            "running child flow"
        );
        let outcome = ExecutionCoordinator::new(child).run().await?;

        let failed: Vec<String> = child_state
            .queue_items()
            .into_iter()
            .filter(|item| item.status == ExecutionStatus::Failed)
            .map(|item| item.activity_id.to_string())
            .collect();

        if outcome == RunOutcome::Completed && failed.is_empty() {
            let variables: HashMap<String, Value> = child_state.variables();
            ctx.fire("Done", Value::Object(variables))?;
        } else {
            let reason = if failed.is_empty() {
                format!("Child flow did not complete: {}", outcome)
            } else {
                format!("Child activities failed: {}", failed.join(", "))
            };
            ctx.warn(reason.clone());
            ctx.fire("Failed", Value::String(reason))?;
        }
        Ok(ExecutionResult::completed(ctx.executed_ports()).with_approvals(&scope.state, activity))
    }
}

/// Maps body shapes to strategies
pub struct StrategyResolver {
    strategies: HashMap<BodyShape, Arc<dyn ExecutionStrategy>>,
}

impl StrategyResolver {
    pub fn new() -> Self {
        let mut strategies: HashMap<BodyShape, Arc<dyn ExecutionStrategy>> = HashMap::new();
        strategies.insert(BodyShape::Sync, Arc::new(SyncStrategy));
        strategies.insert(BodyShape::Async, Arc::new(AsyncStrategy));
        strategies.insert(BodyShape::Scripted, Arc::new(ScriptedStrategy));
        strategies.insert(BodyShape::Composite, Arc::new(CompositeStrategy));
        Self { strategies }
    }

    pub fn register(&mut self, shape: BodyShape, strategy: Arc<dyn ExecutionStrategy>) {
        self.strategies.insert(shape, strategy);
    }

    pub fn resolve(&self, shape: BodyShape) -> Result<Arc<dyn ExecutionStrategy>, GraphError> {
        self.strategies
            .get(&shape)
            .cloned()
            .ok_or_else(|| GraphError::NoStrategy(format!("{:?}", shape)))
    }
}

impl Default for StrategyResolver {
    fn default() -> Self {
        Self::new()
    }
}
