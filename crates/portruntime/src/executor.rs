use crate::engine::FlowScope;
use crate::strategy::ExecutionResult;
use chrono::Utc;
use portcore::{ActivityId, ExecutionEvent, ExecutionStatus, FlowError, GraphError, LogLevel};
use std::time::Instant;

/// Drives one activity through gates, its strategy and downstream
/// enqueueing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityExecutor;

impl ActivityExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute `activity_id` if it can run.
    ///
    /// Returns `None` when the item is held by its gates or was claimed by
    /// someone else; it stays queued for a later batch.
    pub async fn execute(
        &self,
        scope: &FlowScope,
        activity_id: &ActivityId,
    ) -> Result<Option<ExecutionResult>, FlowError> {
        let state = &scope.state;
        let activity = scope
            .flow
            .activity(activity_id)
            .cloned()
            .ok_or_else(|| GraphError::ActivityNotFound(activity_id.to_string()))?;
        let item = state
            .queue_item(activity_id)
            .ok_or_else(|| FlowError::Execution(format!("'{}' is not queued", activity_id)))?;

        if !item.can_execute()
            && scope.queue.evaluate(scope, &activity).await? != ExecutionStatus::Ready
        {
            tracing::debug!(activity = %activity_id, status = ?item.status, "skipped, gates not satisfied");
            return Ok(None);
        }
        if !state.transition(activity_id, &[ExecutionStatus::Ready], ExecutionStatus::Executing, None) {
            return Ok(None);
        }

        let strategy = scope.engine.strategies().resolve(activity.body.shape())?;
        let mut ctx = scope.context_for(&activity);
        let instance_id = scope.options.instance_id;
        let events = scope.engine.events();

        events.emit(ExecutionEvent::ActivityStarted {
            instance_id,
            activity_id: activity_id.clone(),
            activity_type: activity.activity_type().to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!("Executing activity: {} ({})", activity_id, activity.activity_type());

        let start = Instant::now();
        let result = match strategy.execute(scope, &activity, &mut ctx).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Activity {} failed: {}", activity_id, e);
                state.transition(
                    activity_id,
                    &[ExecutionStatus::Executing],
                    ExecutionStatus::Failed,
                    Some(e.to_string()),
                );
                state.log(Some(activity_id), LogLevel::Error, e.to_string());
                events.emit(ExecutionEvent::ActivityFailed {
                    instance_id,
                    activity_id: activity_id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(e);
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        strategy.after_execute(scope, &activity, &result);

        match result.status {
            ExecutionStatus::Failed => {
                let error = result.details.clone().unwrap_or_default();
                tracing::warn!("Activity {} reported failure: {}", activity_id, error);
                events.emit(ExecutionEvent::ActivityFailed {
                    instance_id,
                    activity_id: activity_id.clone(),
                    error,
                    timestamp: Utc::now(),
                });
            }
            _ => {
                tracing::info!("Activity {} completed in {}ms", activity_id, duration_ms);
                events.emit(ExecutionEvent::ActivityCompleted {
                    instance_id,
                    activity_id: activity_id.clone(),
                    ports: result.executed_ports.iter().map(|p| p.name.clone()).collect(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
        }

        if result.status == ExecutionStatus::Completed && !result.executed_ports.is_empty() {
            scope
                .connections
                .enqueue_connected_activities(scope, activity_id, &result.executed_ports)
                .await?;
        }

        Ok(Some(result))
    }
}
