use crate::engine::FlowScope;
use crate::executor::ActivityExecutor;
use crate::mode::{mode_strategy, ModeStrategy};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use portcore::{ActivityId, ExecutionEvent, ExecutionStatus, FlowError, LogLevel, QueueItem};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;

/// Where a run call left the flow instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Nothing left to execute or wait for
    Completed,
    /// Remaining items are held by their gates
    Waiting { activities: Vec<ActivityId> },
    /// The mode asked to pause; these interactive activities are ready
    Paused { surfaced: Vec<ActivityId> },
    Cancelled,
}

impl RunOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunOutcome::Completed | RunOutcome::Cancelled)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(ids: &[ActivityId]) -> String {
            ids.iter().map(ActivityId::as_str).collect::<Vec<_>>().join(", ")
        }
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Waiting { activities } => write!(f, "waiting on {}", list(activities)),
            RunOutcome::Paused { surfaced } => write!(f, "paused at {}", list(surfaced)),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

enum Cycle {
    Continue,
    Stop(RunOutcome),
}

/// Top-level run loop for one flow instance.
///
/// Each cycle refreshes the gates, runs every ready non-interactive activity
/// in parallel, and otherwise hands the ready interactive ones to the mode
/// policy. Control returns to the caller between run calls only.
pub struct ExecutionCoordinator {
    scope: Arc<FlowScope>,
    mode: Arc<dyn ModeStrategy>,
    executor: ActivityExecutor,
}

impl ExecutionCoordinator {
    pub fn new(scope: Arc<FlowScope>) -> Self {
        let mode = mode_strategy(scope.options.mode);
        Self {
            scope,
            mode,
            executor: ActivityExecutor::new(),
        }
    }

    pub fn scope(&self) -> &Arc<FlowScope> {
        &self.scope
    }

    /// Seed flow variables and queue the root activities of a fresh run.
    /// Does nothing on a state that already has queued work.
    pub async fn prepare(&self) -> Result<(), FlowError> {
        let scope = &self.scope;
        scope.connections.initialize();
        if !scope.state.queue_items().is_empty() {
            return Ok(());
        }

        for (name, value) in &scope.flow.variables {
            if scope.state.variable(name).is_none() {
                scope.state.set_variable(name.clone(), value.clone());
            }
        }
        for root in scope.flow.roots() {
            scope.queue.enqueue(scope, &root, None).await?;
        }
        Ok(())
    }

    /// Run until the flow completes, waits, pauses or is cancelled.
    pub async fn run(&self) -> Result<RunOutcome, FlowError> {
        let scope = &self.scope;
        let instance_id = scope.options.instance_id;
        let events = scope.engine.events();
        let start = Instant::now();

        events.emit(ExecutionEvent::RunStarted {
            instance_id,
            flow_id: scope.flow.id,
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Running flow {} ({}), mode {:?}",
            scope.flow.name,
            instance_id,
            self.mode.mode()
        );

        let result = self.drive().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(outcome) => outcome.to_string(),
            Err(e) => format!("error: {}", e),
        };
        tracing::info!("Flow {} {} in {}ms", instance_id, outcome, duration_ms);
        events.emit(ExecutionEvent::RunFinished {
            instance_id,
            outcome,
            duration_ms,
            timestamp: Utc::now(),
        });

        result
    }

    async fn drive(&self) -> Result<RunOutcome, FlowError> {
        self.prepare().await?;

        let max_cycles = self.scope.engine.config().max_cycles;
        let mut cycles = 0usize;
        loop {
            if self.scope.cancellation.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            if cycles >= max_cycles {
                return Err(FlowError::Execution(format!(
                    "Flow '{}' exceeded {} cycles",
                    self.scope.flow.name, max_cycles
                )));
            }
            cycles += 1;

            if let Cycle::Stop(outcome) = self.run_cycle().await? {
                return Ok(outcome);
            }
        }
    }

    async fn run_cycle(&self) -> Result<Cycle, FlowError> {
        let scope = &self.scope;
        scope.queue.refresh(scope).await?;

        let ready = scope.queue.executable(&scope.state);
        if ready.is_empty() {
            return Ok(Cycle::Stop(self.idle_outcome()));
        }

        let (interactive, automatic): (Vec<QueueItem>, Vec<QueueItem>) =
            ready.into_iter().partition(|item| self.is_interactive(item));

        if !automatic.is_empty() {
            self.execute_batch(automatic).await?;
            return Ok(Cycle::Continue);
        }

        let batch_size = self.mode.batch_size(&scope.options);
        let batch = self.mode.select(interactive.clone(), batch_size);
        if batch.is_empty() {
            return Ok(Cycle::Stop(RunOutcome::Paused {
                surfaced: interactive.into_iter().map(|i| i.activity_id).collect(),
            }));
        }

        self.execute_batch(batch).await?;
        if self.mode.should_continue() {
            return Ok(Cycle::Continue);
        }

        let surfaced: Vec<ActivityId> = scope
            .queue
            .executable(&scope.state)
            .into_iter()
            .map(|i| i.activity_id)
            .collect();
        if surfaced.is_empty() {
            Ok(Cycle::Stop(self.idle_outcome()))
        } else {
            Ok(Cycle::Stop(RunOutcome::Paused { surfaced }))
        }
    }

    fn is_interactive(&self, item: &QueueItem) -> bool {
        self.scope
            .flow
            .activity(&item.activity_id)
            .map(|activity| self.mode.requires_interaction(activity))
            .unwrap_or(false)
    }

    fn idle_outcome(&self) -> RunOutcome {
        let activities: Vec<ActivityId> = self
            .scope
            .queue
            .gated(&self.scope.state)
            .into_iter()
            .map(|i| i.activity_id)
            .collect();
        if activities.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::Waiting { activities }
        }
    }

    /// Execute one batch concurrently and wait for all of it. The first
    /// fatal error is returned once every task of the batch has settled.
    async fn execute_batch(&self, batch: Vec<QueueItem>) -> Result<(), FlowError> {
        let mut running = FuturesUnordered::new();
        for item in batch {
            let scope = Arc::clone(&self.scope);
            let executor = self.executor;
            let activity_id = item.activity_id;
            let handle = tokio::spawn({
                let activity_id = activity_id.clone();
                async move { executor.execute(&scope, &activity_id).await }
            });
            running.push(async move { (activity_id, handle.await) });
        }

        let mut first_error = None;
        while let Some((activity_id, joined)) = running.next().await {
            let error = match joined {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => e,
                Err(e) => self.task_failed(&activity_id, e),
            };
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// A task that panicked or was aborted leaves its item Executing; fail it.
    fn task_failed(&self, activity_id: &ActivityId, error: JoinError) -> FlowError {
        let message = if error.is_panic() {
            let payload = error.into_panic();
            let text = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("Activity '{}' panicked: {}", activity_id, text)
        } else {
            format!("Activity '{}' task failed: {}", activity_id, error)
        };

        let state = &self.scope.state;
        state.transition(
            activity_id,
            &[ExecutionStatus::Executing],
            ExecutionStatus::Failed,
            Some(message.clone()),
        );
        state.log(Some(activity_id), LogLevel::Error, message.clone());
        tracing::error!("{}", message);
        self.scope.engine.events().emit(ExecutionEvent::ActivityFailed {
            instance_id: self.scope.options.instance_id,
            activity_id: activity_id.clone(),
            error: message.clone(),
            timestamp: Utc::now(),
        });

        FlowError::Execution(message)
    }
}
