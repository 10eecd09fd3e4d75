use crate::{ActivityId, FlowId, InstanceId, LogLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted during flow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        instance_id: InstanceId,
        flow_id: FlowId,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        instance_id: InstanceId,
        outcome: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ActivityStarted {
        instance_id: InstanceId,
        activity_id: ActivityId,
        activity_type: String,
        timestamp: DateTime<Utc>,
    },
    ActivityCompleted {
        instance_id: InstanceId,
        activity_id: ActivityId,
        ports: Vec<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ActivityFailed {
        instance_id: InstanceId,
        activity_id: ActivityId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ActivityEvent {
        instance_id: InstanceId,
        activity_id: ActivityId,
        event: ActivityEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events specific to one activity execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ActivityEvent {
    Log { level: LogLevel, message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter for activities to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    instance_id: InstanceId,
    activity_id: ActivityId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        instance_id: InstanceId,
        activity_id: ActivityId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            instance_id,
            activity_id,
            sender,
        }
    }

    /// Emit an activity-specific event
    pub fn emit(&self, event: ActivityEvent) {
        let _ = self.sender.send(ExecutionEvent::ActivityEvent {
            instance_id: self.instance_id,
            activity_id: self.activity_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(ActivityEvent::Log {
            level,
            message: message.into(),
        });
    }

    /// Emit progress update
    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(ActivityEvent::Progress { percent, message });
    }
}

/// Broadcast bus shared by every run of a runtime
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, instance_id: InstanceId, activity_id: ActivityId) -> EventEmitter {
        EventEmitter::new(instance_id, activity_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
