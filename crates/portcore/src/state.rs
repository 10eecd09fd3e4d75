use crate::{ActivityId, Connection, InstanceId, Value, ValueObject, ValueStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Waiting,
    Ready,
    Executing,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Outcome of one pre-execution step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Waiting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// Scheduling record for one activity in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub activity_id: ActivityId,
    pub status: ExecutionStatus,
    /// Incremented each time a terminal item is enqueued again
    pub activation: u32,
    pub selected: bool,
    pub priority: i32,
    pub sequence: u64,
    pub reason: Option<String>,
}

impl QueueItem {
    pub fn can_execute(&self) -> bool {
        self.status == ExecutionStatus::Ready
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created,
    Reactivated,
    AlreadyQueued,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTransition {
    pub activity_id: ActivityId,
    pub activation: u32,
    pub from: Option<ExecutionStatus>,
    pub to: ExecutionStatus,
    pub sequence: u64,
}

/// Record of one connection firing, with a snapshot of the data that flowed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedConnection {
    pub connection: Connection,
    pub data: ValueStore,
    pub sequence: u64,
    pub fired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub activity_id: Option<ActivityId>,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// All mutable state of one flow instance run.
///
/// Buckets are independently synchronized so that activities executing in
/// the same batch can share one instance behind an `Arc`.
#[derive(Debug)]
pub struct ExecutionState {
    instance_id: InstanceId,
    parameters: DashMap<String, ValueObject>,
    variables: DashMap<String, ValueObject>,
    memory: DashMap<(ActivityId, String), ValueObject>,
    queue: DashMap<ActivityId, QueueItem>,
    steps: DashMap<(ActivityId, String), StepStatus>,
    approvals: DashMap<(ActivityId, String), ApprovalStatus>,
    inbound: DashMap<ActivityId, HashSet<Connection>>,
    history: Mutex<Vec<ExecutedConnection>>,
    logs: Mutex<Vec<LogEntry>>,
    transitions: Mutex<Vec<QueueTransition>>,
    sequence: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExecutionState {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            parameters: DashMap::new(),
            variables: DashMap::new(),
            memory: DashMap::new(),
            queue: DashMap::new(),
            steps: DashMap::new(),
            approvals: DashMap::new(),
            inbound: DashMap::new(),
            history: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            transitions: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    // Parameters and variables

    pub fn set_parameter(&self, name: impl Into<String>, value: Value) {
        self.parameters.insert(name.into(), ValueObject::new(value));
    }

    pub fn parameter(&self, name: &str) -> Option<Value> {
        materialize(self.parameters.get(name).as_deref(), name)
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), ValueObject::new(value));
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        materialize(self.variables.get(name).as_deref(), name)
    }

    pub fn variables(&self) -> HashMap<String, Value> {
        self.variables
            .iter()
            .filter_map(|e| e.value().get().ok().map(|v| (e.key().clone(), v.clone())))
            .collect()
    }

    // Per-activity memory

    pub fn memory(&self, activity_id: &ActivityId, key: &str) -> Option<Value> {
        let entry = self.memory.get(&(activity_id.clone(), key.to_string()));
        materialize(entry.as_deref(), key)
    }

    pub fn set_memory(&self, activity_id: &ActivityId, key: impl Into<String>, value: Value) {
        self.memory
            .insert((activity_id.clone(), key.into()), ValueObject::new(value));
    }

    pub fn remove_memory(&self, activity_id: &ActivityId, key: &str) {
        self.memory.remove(&(activity_id.clone(), key.to_string()));
    }

    // Queue

    pub fn queue_item(&self, activity_id: &ActivityId) -> Option<QueueItem> {
        self.queue.get(activity_id).map(|item| item.clone())
    }

    /// Queue items in the order they were first enqueued.
    pub fn queue_items(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self.queue.iter().map(|e| e.value().clone()).collect();
        items.sort_by_key(|item| item.sequence);
        items
    }

    /// Create the item, or start a new activation if the existing item is
    /// terminal. A live item is left untouched.
    pub fn enqueue_item(&self, activity_id: &ActivityId, priority: i32) -> EnqueueOutcome {
        match self.queue.entry(activity_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let item = entry.get_mut();
                if !item.status.is_terminal() {
                    return EnqueueOutcome::AlreadyQueued;
                }
                let from = item.status;
                item.status = ExecutionStatus::Pending;
                item.activation += 1;
                item.reason = None;
                self.push_transition(item, Some(from));
                // Cleared under the entry lock so a concurrent enqueue cannot
                // mark an inbound connection that is then wiped.
                self.clear_activation_data(activity_id);
                EnqueueOutcome::Reactivated
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let item = entry.insert(QueueItem {
                    activity_id: activity_id.clone(),
                    status: ExecutionStatus::Pending,
                    activation: 0,
                    selected: false,
                    priority,
                    sequence: self.next_sequence(),
                    reason: None,
                });
                self.push_transition(&item, None);
                EnqueueOutcome::Created
            }
        }
    }

    /// Compare-and-set transition. Succeeds only when the current status is
    /// one of `expected`.
    pub fn transition(
        &self,
        activity_id: &ActivityId,
        expected: &[ExecutionStatus],
        to: ExecutionStatus,
        reason: Option<String>,
    ) -> bool {
        let Some(mut item) = self.queue.get_mut(activity_id) else {
            return false;
        };
        if !expected.contains(&item.status) {
            return false;
        }
        let from = item.status;
        item.reason = reason;
        if from == to {
            return true;
        }
        item.status = to;
        self.push_transition(&item, Some(from));
        true
    }

    /// Unconditional transition, used by the loop re-arm.
    pub fn force_status(&self, activity_id: &ActivityId, to: ExecutionStatus) -> bool {
        let Some(mut item) = self.queue.get_mut(activity_id) else {
            return false;
        };
        let from = item.status;
        item.status = to;
        item.reason = None;
        self.push_transition(&item, Some(from));
        true
    }

    pub fn set_selected(&self, activity_id: &ActivityId, selected: bool) -> bool {
        match self.queue.get_mut(activity_id) {
            Some(mut item) => {
                item.selected = selected;
                true
            }
            None => false,
        }
    }

    fn push_transition(&self, item: &QueueItem, from: Option<ExecutionStatus>) {
        tracing::debug!(
            activity = %item.activity_id,
            ?from,
            to = ?item.status,
            activation = item.activation,
            "queue transition"
        );
        let sequence = self.next_sequence();
        lock(&self.transitions).push(QueueTransition {
            activity_id: item.activity_id.clone(),
            activation: item.activation,
            from,
            to: item.status,
            sequence,
        });
    }

    pub fn transitions(&self) -> Vec<QueueTransition> {
        lock(&self.transitions).clone()
    }

    fn clear_activation_data(&self, activity_id: &ActivityId) {
        self.steps.retain(|(id, _), _| id != activity_id);
        self.approvals.retain(|(id, _), _| id != activity_id);
        self.inbound.remove(activity_id);
    }

    // Gate data

    pub fn step_status(&self, activity_id: &ActivityId, step: &str) -> Option<StepStatus> {
        self.steps
            .get(&(activity_id.clone(), step.to_string()))
            .map(|s| *s)
    }

    pub fn set_step_status(&self, activity_id: &ActivityId, step: &str, status: StepStatus) {
        self.steps.insert((activity_id.clone(), step.to_string()), status);
    }

    pub fn approval(&self, activity_id: &ActivityId, approval_id: &str) -> Option<ApprovalStatus> {
        self.approvals
            .get(&(activity_id.clone(), approval_id.to_string()))
            .map(|s| *s)
    }

    pub fn set_approval(&self, activity_id: &ActivityId, approval_id: &str, status: ApprovalStatus) {
        self.approvals
            .insert((activity_id.clone(), approval_id.to_string()), status);
    }

    pub fn mark_inbound(&self, target: &ActivityId, connection: &Connection) {
        self.inbound
            .entry(target.clone())
            .or_default()
            .insert(connection.clone());
    }

    pub fn inbound_fired(&self, target: &ActivityId) -> HashSet<Connection> {
        self.inbound
            .get(target)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    // History and logs

    pub fn record_connection(&self, connection: &Connection, data: &Value) -> u64 {
        let mut history = lock(&self.history);
        let sequence = self.next_sequence();
        history.push(ExecutedConnection {
            connection: connection.clone(),
            data: ValueStore::new().with("data", data.clone()),
            sequence,
            fired_at: Utc::now(),
        });
        sequence
    }

    pub fn executed_connections(&self) -> Vec<ExecutedConnection> {
        lock(&self.history).clone()
    }

    pub fn log(&self, activity_id: Option<&ActivityId>, level: LogLevel, message: impl Into<String>) {
        lock(&self.logs).push(LogEntry {
            activity_id: activity_id.cloned(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        lock(&self.logs).clone()
    }

    pub fn logs_for(&self, activity_id: &ActivityId) -> Vec<LogEntry> {
        lock(&self.logs)
            .iter()
            .filter(|entry| entry.activity_id.as_ref() == Some(activity_id))
            .cloned()
            .collect()
    }

    // Checkpointing

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            instance_id: self.instance_id,
            parameters: collect_map(&self.parameters),
            variables: collect_map(&self.variables),
            memory: self
                .memory
                .iter()
                .map(|e| MemoryRecord {
                    activity_id: e.key().0.clone(),
                    key: e.key().1.clone(),
                    value: e.value().clone(),
                })
                .collect(),
            queue: self.queue_items(),
            steps: self
                .steps
                .iter()
                .map(|e| StepRecord {
                    activity_id: e.key().0.clone(),
                    step: e.key().1.clone(),
                    status: *e.value(),
                })
                .collect(),
            approvals: self
                .approvals
                .iter()
                .map(|e| ApprovalRecord {
                    activity_id: e.key().0.clone(),
                    approval_id: e.key().1.clone(),
                    status: *e.value(),
                })
                .collect(),
            inbound: self
                .inbound
                .iter()
                .map(|e| (e.key().clone(), e.value().iter().cloned().collect()))
                .collect(),
            history: self.executed_connections(),
            logs: self.logs(),
            transitions: self.transitions(),
            sequence: self.sequence.load(Ordering::SeqCst),
        }
    }

    pub fn restore(snapshot: ExecutionSnapshot) -> Self {
        let mut state = Self::new(snapshot.instance_id);
        state.parameters.extend(snapshot.parameters);
        state.variables.extend(snapshot.variables);
        state.memory.extend(
            snapshot
                .memory
                .into_iter()
                .map(|m| ((m.activity_id, m.key), m.value)),
        );
        state.queue.extend(
            snapshot
                .queue
                .into_iter()
                .map(|item| (item.activity_id.clone(), item)),
        );
        state.steps.extend(
            snapshot
                .steps
                .into_iter()
                .map(|s| ((s.activity_id, s.step), s.status)),
        );
        state.approvals.extend(
            snapshot
                .approvals
                .into_iter()
                .map(|a| ((a.activity_id, a.approval_id), a.status)),
        );
        state.inbound.extend(
            snapshot
                .inbound
                .into_iter()
                .map(|(id, connections)| (id, connections.into_iter().collect())),
        );
        *lock(&state.history) = snapshot.history;
        *lock(&state.logs) = snapshot.logs;
        *lock(&state.transitions) = snapshot.transitions;
        state.sequence.store(snapshot.sequence, Ordering::SeqCst);
        state
    }
}

fn materialize(object: Option<&ValueObject>, name: &str) -> Option<Value> {
    let object = object?;
    match object.get() {
        Ok(value) => Some(value.clone()),
        Err(e) => {
            tracing::warn!("Failed to materialize '{}': {}", name, e);
            None
        }
    }
}

fn collect_map(map: &DashMap<String, ValueObject>) -> HashMap<String, ValueObject> {
    map.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub activity_id: ActivityId,
    pub key: String,
    pub value: ValueObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub activity_id: ActivityId,
    pub step: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub activity_id: ActivityId,
    pub approval_id: String,
    pub status: ApprovalStatus,
}

/// Serializable checkpoint of an `ExecutionState`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub instance_id: InstanceId,
    pub parameters: HashMap<String, ValueObject>,
    pub variables: HashMap<String, ValueObject>,
    pub memory: Vec<MemoryRecord>,
    pub queue: Vec<QueueItem>,
    pub steps: Vec<StepRecord>,
    pub approvals: Vec<ApprovalRecord>,
    pub inbound: Vec<(ActivityId, Vec<Connection>)>,
    pub history: Vec<ExecutedConnection>,
    pub logs: Vec<LogEntry>,
    pub transitions: Vec<QueueTransition>,
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn enqueue_is_idempotent_for_live_items() {
        let state = ExecutionState::new(Uuid::new_v4());
        let id = ActivityId::from("a");

        assert_eq!(state.enqueue_item(&id, 0), EnqueueOutcome::Created);
        assert_eq!(state.enqueue_item(&id, 0), EnqueueOutcome::AlreadyQueued);
        assert_eq!(state.queue_items().len(), 1);
    }

    #[test]
    fn terminal_items_start_a_new_activation() {
        let state = ExecutionState::new(Uuid::new_v4());
        let id = ActivityId::from("a");
        state.enqueue_item(&id, 0);
        state.set_step_status(&id, "wait", StepStatus::Completed);
        state.force_status(&id, ExecutionStatus::Completed);

        assert_eq!(state.enqueue_item(&id, 0), EnqueueOutcome::Reactivated);
        let item = state.queue_item(&id).unwrap();
        assert_eq!(item.status, ExecutionStatus::Pending);
        assert_eq!(item.activation, 1);
        assert_eq!(state.step_status(&id, "wait"), None);
    }

    #[test]
    fn transition_is_compare_and_set() {
        let state = ExecutionState::new(Uuid::new_v4());
        let id = ActivityId::from("a");
        state.enqueue_item(&id, 0);

        assert!(state.transition(&id, &[ExecutionStatus::Pending], ExecutionStatus::Ready, None));
        assert!(!state.transition(&id, &[ExecutionStatus::Pending], ExecutionStatus::Ready, None));
        assert_eq!(
            state
                .transitions()
                .iter()
                .filter(|t| t.to == ExecutionStatus::Ready)
                .count(),
            1
        );
    }

    #[test]
    fn snapshot_round_trips_buckets() {
        let state = ExecutionState::new(Uuid::new_v4());
        let id = ActivityId::from("loop");
        state.set_variable("total", Value::Number(3.0));
        state.set_memory(&id, "phase", Value::from("body_completed"));
        state.enqueue_item(&id, 2);
        state.set_approval(&id, "boss", ApprovalStatus::Approved);

        let json = serde_json::to_string(&state.snapshot()).unwrap();
        let restored = ExecutionState::restore(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.variable("total"), Some(Value::Number(3.0)));
        assert_eq!(restored.memory(&id, "phase"), Some(Value::from("body_completed")));
        assert_eq!(restored.queue_item(&id).unwrap().priority, 2);
        assert_eq!(restored.approval(&id, "boss"), Some(ApprovalStatus::Approved));
    }
}
