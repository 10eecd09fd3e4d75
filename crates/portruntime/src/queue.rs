use crate::engine::FlowScope;
use crate::gates::{GatePipeline, StepOutcome};
use crate::graph::ActivityInstance;
use portcore::{
    ActivityId, Connection, EnqueueOutcome, ExecutionState, ExecutionStatus, FlowError,
    GraphError, LogLevel, QueueItem,
};

const GATED: [ExecutionStatus; 2] = [ExecutionStatus::Pending, ExecutionStatus::Waiting];

/// Owns the work queue transitions of a run.
///
/// Every status change goes through a compare-and-set on the state, so two
/// branches converging on one activity in the same batch make it Ready once.
pub struct QueueManager {
    gates: GatePipeline,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::with_gates(GatePipeline::standard())
    }

    pub fn with_gates(gates: GatePipeline) -> Self {
        Self { gates }
    }

    /// Queue `activity_id`, mark the connection it was reached through and
    /// run its gates. A live item is not queued twice.
    pub async fn enqueue(
        &self,
        scope: &FlowScope,
        activity_id: &ActivityId,
        via: Option<&Connection>,
    ) -> Result<EnqueueOutcome, FlowError> {
        let activity = scope
            .flow
            .activity(activity_id)
            .ok_or_else(|| GraphError::ActivityNotFound(activity_id.to_string()))?;

        let outcome = scope.state.enqueue_item(activity_id, activity.priority);
        if let Some(conn) = via {
            scope.state.mark_inbound(activity_id, conn);
        }
        tracing::debug!(activity = %activity_id, ?outcome, "enqueued");

        self.evaluate(scope, activity).await?;
        Ok(outcome)
    }

    /// Force an item to Ready. Only the loop re-arm does this.
    pub fn ready(&self, state: &ExecutionState, activity_id: &ActivityId) -> bool {
        state.force_status(activity_id, ExecutionStatus::Ready)
    }

    /// Run the gates of a Pending or Waiting item and move it accordingly.
    pub async fn evaluate(
        &self,
        scope: &FlowScope,
        activity: &ActivityInstance,
    ) -> Result<ExecutionStatus, FlowError> {
        let state = &scope.state;
        let item = state
            .queue_item(&activity.id)
            .ok_or_else(|| FlowError::Execution(format!("'{}' is not queued", activity.id)))?;
        if !GATED.contains(&item.status) {
            return Ok(item.status);
        }

        let ctx = scope.context_for(activity);
        match self.gates.run(scope, activity, &ctx).await? {
            StepOutcome::Completed => {
                state.transition(&activity.id, &GATED, ExecutionStatus::Ready, None);
            }
            StepOutcome::Waiting(reason) => {
                state.transition(&activity.id, &GATED, ExecutionStatus::Waiting, Some(reason));
            }
            StepOutcome::Failed(reason) => {
                if state.transition(
                    &activity.id,
                    &GATED,
                    ExecutionStatus::Failed,
                    Some(reason.clone()),
                ) {
                    tracing::warn!(activity = %activity.id, "gate failed: {}", reason);
                    state.log(Some(&activity.id), LogLevel::Error, reason);
                }
            }
        }

        Ok(state
            .queue_item(&activity.id)
            .map(|item| item.status)
            .unwrap_or(item.status))
    }

    /// Re-evaluate every gated item, oldest first.
    pub async fn refresh(&self, scope: &FlowScope) -> Result<(), FlowError> {
        for item in self.gated(&scope.state) {
            if let Some(activity) = scope.flow.activity(&item.activity_id) {
                self.evaluate(scope, activity).await?;
            }
        }
        Ok(())
    }

    pub fn executable(&self, state: &ExecutionState) -> Vec<QueueItem> {
        state
            .queue_items()
            .into_iter()
            .filter(QueueItem::can_execute)
            .collect()
    }

    pub fn gated(&self, state: &ExecutionState) -> Vec<QueueItem> {
        state
            .queue_items()
            .into_iter()
            .filter(|item| GATED.contains(&item.status))
            .collect()
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}
