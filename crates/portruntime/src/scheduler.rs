//! Hooks for an external scheduler to trigger runs later.
//!
//! The engine has no notion of wall-clock time; this module only turns a
//! delay into a callback. Recurring definitions are stored for the host to
//! interpret.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use portcore::{FlowError, InstanceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub type JobId = Uuid;

/// Callback invoked when a scheduled job fires
pub type Trigger = Arc<dyn Fn(InstanceId) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringJob {
    pub id: String,
    pub instance_id: InstanceId,
    /// Schedule expression, opaque to the engine
    pub expression: String,
}

#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn schedule(&self, instance_id: InstanceId, delay: Duration) -> Result<JobId, FlowError>;

    async fn add_or_update_recurring(
        &self,
        id: &str,
        instance_id: InstanceId,
        expression: &str,
    ) -> Result<(), FlowError>;

    async fn remove_if_exists(&self, id: &str) -> Result<bool, FlowError>;
}

/// Tokio-timer scheduler
pub struct InMemoryScheduler {
    trigger: Trigger,
    pending: Arc<DashMap<JobId, JoinHandle<()>>>,
    recurring: DashMap<String, RecurringJob>,
}

impl InMemoryScheduler {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            pending: Arc::new(DashMap::new()),
            recurring: DashMap::new(),
        }
    }

    /// Cancel a delayed job that has not fired yet
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.pending.remove(&job_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending.len()
    }

    pub fn recurring(&self, id: &str) -> Option<RecurringJob> {
        self.recurring.get(id).map(|job| job.clone())
    }
}

#[async_trait]
impl JobScheduler for InMemoryScheduler {
    async fn schedule(&self, instance_id: InstanceId, delay: Duration) -> Result<JobId, FlowError> {
        let job_id = Uuid::new_v4();
        let trigger = Arc::clone(&self.trigger);
        let pending = Arc::clone(&self.pending);

        tracing::debug!(%instance_id, ?delay, %job_id, "job scheduled");
        // The job is registered before its timer starts so that it can
        // always remove its own entry.
        let (registered, wait_registered) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = wait_registered.await;
            tokio::time::sleep(delay).await;
            pending.remove(&job_id);
            tracing::info!(%instance_id, %job_id, "job triggered");
            trigger(instance_id).await;
        });
        self.pending.insert(job_id, handle);
        let _ = registered.send(());
        Ok(job_id)
    }

    async fn add_or_update_recurring(
        &self,
        id: &str,
        instance_id: InstanceId,
        expression: &str,
    ) -> Result<(), FlowError> {
        if expression.trim().is_empty() {
            return Err(FlowError::Execution(format!(
                "Recurring job '{}' has an empty schedule",
                id
            )));
        }
        self.recurring.insert(
            id.to_string(),
            RecurringJob {
                id: id.to_string(),
                instance_id,
                expression: expression.to_string(),
            },
        );
        Ok(())
    }

    async fn remove_if_exists(&self, id: &str) -> Result<bool, FlowError> {
        Ok(self.recurring.remove(id).is_some())
    }
}
