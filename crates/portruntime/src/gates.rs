//! Pre-execution gate pipeline.
//!
//! Steps run in a fixed order and persist their status per activation. A
//! step already recorded as Completed is skipped, so the pipeline can be
//! re-entered after a suspension without repeating side effects.

use crate::approvals::aggregate;
use crate::engine::FlowScope;
use crate::graph::ActivityInstance;
use async_trait::async_trait;
use portcore::{
    ActivityContext, ApprovalStatus, FlowError, GraphError, JoinMode, Readiness, StepStatus,
};

pub const WAIT_FOR_CONNECTIONS: &str = "wait_for_connections";
pub const READINESS_CHECK: &str = "readiness_check";
pub const APPROVALS: &str = "approvals";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Waiting(String),
    Failed(String),
}

impl StepOutcome {
    pub fn status(&self) -> StepStatus {
        match self {
            StepOutcome::Completed => StepStatus::Completed,
            StepOutcome::Waiting(_) => StepStatus::Waiting,
            StepOutcome::Failed(_) => StepStatus::Failed,
        }
    }
}

#[async_trait]
pub trait GateStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
        ctx: &ActivityContext,
    ) -> Result<StepOutcome, FlowError>;
}

pub struct GatePipeline {
    steps: Vec<Box<dyn GateStep>>,
}

impl GatePipeline {
    pub fn new(steps: Vec<Box<dyn GateStep>>) -> Self {
        Self { steps }
    }

    /// Wait for connections, then the readiness check, then approvals.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(WaitForConnections),
            Box::new(ReadinessCheck),
            Box::new(Approvals),
        ])
    }

    pub async fn run(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
        ctx: &ActivityContext,
    ) -> Result<StepOutcome, FlowError> {
        for step in &self.steps {
            if scope.state.step_status(&activity.id, step.name()) == Some(StepStatus::Completed) {
                continue;
            }

            let outcome = step.evaluate(scope, activity, ctx).await?;
            scope
                .state
                .set_step_status(&activity.id, step.name(), outcome.status());

            if outcome != StepOutcome::Completed {
                tracing::debug!(
                    activity = %activity.id,
                    step = step.name(),
                    ?outcome,
                    "gate not passed"
                );
                return Ok(outcome);
            }
        }
        Ok(StepOutcome::Completed)
    }
}

impl Default for GatePipeline {
    fn default() -> Self {
        Self::standard()
    }
}

/// Blocks until the inbound connections of this activation have fired.
/// Loop-back connections never count.
pub struct WaitForConnections;

#[async_trait]
impl GateStep for WaitForConnections {
    fn name(&self) -> &'static str {
        WAIT_FOR_CONNECTIONS
    }

    async fn evaluate(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
        _ctx: &ActivityContext,
    ) -> Result<StepOutcome, FlowError> {
        let required = scope.connections.required_inbound(&activity.id);
        if required.is_empty() {
            return Ok(StepOutcome::Completed);
        }

        let fired = scope.state.inbound_fired(&activity.id);
        let arrived = required.iter().filter(|c| fired.contains(**c)).count();
        let satisfied = match activity.join {
            JoinMode::All => arrived == required.len(),
            JoinMode::Any => arrived > 0,
        };

        if satisfied {
            Ok(StepOutcome::Completed)
        } else {
            Ok(StepOutcome::Waiting(format!(
                "Waiting for {} of {} inbound connections",
                required.len() - arrived,
                required.len()
            )))
        }
    }
}

/// Asks the activity itself whether it can run.
pub struct ReadinessCheck;

#[async_trait]
impl GateStep for ReadinessCheck {
    fn name(&self) -> &'static str {
        READINESS_CHECK
    }

    async fn evaluate(
        &self,
        _scope: &FlowScope,
        activity: &ActivityInstance,
        ctx: &ActivityContext,
    ) -> Result<StepOutcome, FlowError> {
        Ok(match activity.body.is_ready_to_execute(ctx) {
            Readiness::Ready => StepOutcome::Completed,
            Readiness::NotReady(reason) => StepOutcome::Waiting(reason),
        })
    }
}

/// Resolves every attached approval. Terminal statuses already on the
/// state are reused.
pub struct Approvals;

#[async_trait]
impl GateStep for Approvals {
    fn name(&self) -> &'static str {
        APPROVALS
    }

    async fn evaluate(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
        ctx: &ActivityContext,
    ) -> Result<StepOutcome, FlowError> {
        let mut statuses = Vec::with_capacity(activity.approvals.len());
        let mut errors = Vec::new();

        for approval in &activity.approvals {
            let status = match scope.state.approval(&activity.id, &approval.id) {
                Some(status) if status.is_terminal() => status,
                _ => {
                    let resolver = scope
                        .engine
                        .approvals()
                        .get(&approval.resolver)
                        .ok_or_else(|| {
                            GraphError::Invalid(format!(
                                "Unknown approval resolver '{}'",
                                approval.resolver
                            ))
                        })?;
                    // A resolver error rejects its approval.
                    let status = match resolver.resolve(ctx, &approval.options).await {
                        Ok(status) => status,
                        Err(e) => {
                            let reason = format!("Approval '{}' failed: {}", approval.id, e);
                            tracing::warn!(activity = %activity.id, "{}", reason);
                            errors.push(reason);
                            ApprovalStatus::Rejected
                        }
                    };
                    scope.state.set_approval(&activity.id, &approval.id, status);
                    status
                }
            };
            statuses.push(status);
        }

        Ok(match aggregate(&statuses) {
            ApprovalStatus::Approved => StepOutcome::Completed,
            ApprovalStatus::Rejected if !errors.is_empty() => StepOutcome::Failed(errors.join("; ")),
            ApprovalStatus::Rejected => {
                StepOutcome::Failed(format!("Activity '{}' was rejected", activity.id))
            }
            ApprovalStatus::Pending => StepOutcome::Waiting(format!(
                "{} approvals pending",
                statuses.iter().filter(|s| !s.is_terminal()).count()
            )),
        })
    }
}
