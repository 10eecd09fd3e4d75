use crate::{ActivityError, PortDescriptor, Value, ValueKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// A port slot for one execution of an activity.
///
/// The payload is held as `Option<Value>`, so a port reports `executed`
/// exactly when it carries data.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    name: String,
    direction: Direction,
    data_type: ValueKind,
    data: Option<Value>,
}

impl Port {
    pub fn new(name: impl Into<String>, direction: Direction, data_type: ValueKind) -> Self {
        Self {
            name: name.into(),
            direction,
            data_type,
            data: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn data_type(&self) -> ValueKind {
        self.data_type
    }

    pub fn executed(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Fire the port. Input ports and mistyped payloads are rejected.
    pub fn execute(&mut self, data: Value) -> Result<(), ActivityError> {
        if self.direction != Direction::Output {
            return Err(ActivityError::NotAnOutputPort(self.name.clone()));
        }
        if !self.data_type.accepts(&data) {
            return Err(ActivityError::PortTypeMismatch {
                port: self.name.clone(),
                expected: self.data_type.to_string(),
                actual: data.kind().to_string(),
            });
        }
        self.data = Some(data);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.data = None;
    }
}

/// A port that fired during an execution, with the data it carried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedPort {
    pub name: String,
    pub data: Value,
}

/// The ports of one activity execution, remembering firing order.
#[derive(Debug, Clone, Default)]
pub struct PortSet {
    ports: Vec<Port>,
    fired: Vec<usize>,
}

impl PortSet {
    pub fn from_descriptors(descriptors: &[PortDescriptor]) -> Self {
        Self {
            ports: descriptors
                .iter()
                .map(|d| Port::new(d.name.clone(), d.direction, d.data_type))
                .collect(),
            fired: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    pub fn fire(&mut self, name: &str, data: Value) -> Result<(), ActivityError> {
        let index = self
            .ports
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| ActivityError::UnknownPort(name.to_string()))?;
        let already_fired = self.ports[index].executed();
        self.ports[index].execute(data)?;
        if !already_fired {
            self.fired.push(index);
        }
        Ok(())
    }

    /// Executed output ports in the order they were first fired.
    pub fn executed(&self) -> Vec<ExecutedPort> {
        self.fired
            .iter()
            .filter_map(|&i| {
                let port = &self.ports[i];
                port.data().map(|data| ExecutedPort {
                    name: port.name.clone(),
                    data: data.clone(),
                })
            })
            .collect()
    }
}
