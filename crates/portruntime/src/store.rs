use async_trait::async_trait;
use portcore::{ExecutionMode, ExecutionSnapshot, FlowError, FlowId, InstanceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Checkpoint of one flow instance: which flow it runs, in which mode, and
/// its execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub flow_id: FlowId,
    pub mode: ExecutionMode,
    pub snapshot: ExecutionSnapshot,
}

impl InstanceRecord {
    pub fn instance_id(&self) -> InstanceId {
        self.snapshot.instance_id
    }
}

/// Persistence of instance checkpoints. The engine treats it as an opaque
/// document store.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, record: &InstanceRecord) -> Result<(), FlowError>;

    async fn load(&self, instance_id: InstanceId) -> Result<Option<InstanceRecord>, FlowError>;

    async fn delete(&self, instance_id: InstanceId) -> Result<bool, FlowError>;
}

/// Keeps checkpoints as JSON documents in memory
#[derive(Default)]
pub struct InMemoryStateStore {
    documents: RwLock<HashMap<InstanceId, String>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, record: &InstanceRecord) -> Result<(), FlowError> {
        let document = serde_json::to_string(record)?;
        self.documents
            .write()
            .await
            .insert(record.instance_id(), document);
        Ok(())
    }

    async fn load(&self, instance_id: InstanceId) -> Result<Option<InstanceRecord>, FlowError> {
        let documents = self.documents.read().await;
        match documents.get(&instance_id) {
            Some(document) => Ok(Some(serde_json::from_str(document)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, instance_id: InstanceId) -> Result<bool, FlowError> {
        Ok(self.documents.write().await.remove(&instance_id).is_some())
    }
}
