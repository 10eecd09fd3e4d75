use crate::engine::FlowScope;
use crate::graph::Flow;
use once_cell::sync::OnceCell;
use portcore::{
    ActivityId, Connection, ExecutedPort, FlowError, LogLevel, Value,
    LOOP_BODY_COMPLETED, LOOP_PHASE_KEY,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct ConnectionIndex {
    /// Keyed by `activityId:portName`
    outgoing: HashMap<String, Vec<Connection>>,
    incoming: HashMap<ActivityId, Vec<Connection>>,
}

fn port_key(activity: &ActivityId, port: &str) -> String {
    format!("{}:{}", activity, port)
}

/// Routes fired output ports to the activities they connect to.
///
/// The index is built on first use and read without locking afterwards.
pub struct ConnectionManager {
    flow: Arc<Flow>,
    index: OnceCell<ConnectionIndex>,
}

impl ConnectionManager {
    pub fn new(flow: Arc<Flow>) -> Self {
        Self {
            flow,
            index: OnceCell::new(),
        }
    }

    pub fn initialize(&self) {
        self.index();
    }

    fn index(&self) -> &ConnectionIndex {
        self.index.get_or_init(|| {
            let mut index = ConnectionIndex::default();
            for conn in &self.flow.connections {
                index
                    .outgoing
                    .entry(port_key(&conn.source, &conn.source_port))
                    .or_default()
                    .push(conn.clone());
                index
                    .incoming
                    .entry(conn.target.clone())
                    .or_default()
                    .push(conn.clone());
            }
            tracing::debug!(
                flow = %self.flow.name,
                connections = self.flow.connections.len(),
                "connection index built"
            );
            index
        })
    }

    pub fn outgoing(&self, activity: &ActivityId, port: &str) -> &[Connection] {
        self.index()
            .outgoing
            .get(&port_key(activity, port))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn incoming(&self, activity: &ActivityId) -> &[Connection] {
        self.index()
            .incoming
            .get(activity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Inbound connections that count towards the wait-for-connections gate
    pub fn required_inbound(&self, activity: &ActivityId) -> Vec<&Connection> {
        self.incoming(activity)
            .iter()
            .filter(|c| !Self::is_loop_back(c))
            .collect()
    }

    pub fn is_loop_back(connection: &Connection) -> bool {
        connection.is_loop_back()
    }

    /// Record and follow every connection leaving the fired ports, in
    /// firing order.
    pub async fn enqueue_connected_activities(
        &self,
        scope: &FlowScope,
        source: &ActivityId,
        ports: &[ExecutedPort],
    ) -> Result<(), FlowError> {
        for port in ports {
            for conn in self.outgoing(source, &port.name) {
                scope.state.record_connection(conn, &port.data);

                if Self::is_loop_back(conn) {
                    self.rearm_loop(scope, conn);
                } else {
                    scope.queue.enqueue(scope, &conn.target, Some(conn)).await?;
                }
            }
        }
        Ok(())
    }

    /// A finished loop body sends the loop straight back to Ready instead
    /// of enqueueing it again.
    fn rearm_loop(&self, scope: &FlowScope, conn: &Connection) {
        let state = &scope.state;
        if state.queue_item(&conn.target).is_none() {
            let message = format!("Loop re-arm dropped, '{}' is not queued ({})", conn.target, conn);
            tracing::warn!("{}", message);
            state.log(Some(&conn.target), LogLevel::Warning, message);
            return;
        }

        state.set_memory(&conn.target, LOOP_PHASE_KEY, Value::from(LOOP_BODY_COMPLETED));
        scope.queue.ready(state, &conn.target);
        tracing::debug!(activity = %conn.target, "loop re-armed");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("flow", &self.flow.name)
            .field("initialized", &self.index.get().is_some())
            .finish()
    }
}

