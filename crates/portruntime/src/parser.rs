//! Converts a serialized flow definition into the runnable graph.
//!
//! This is the only place where raw definitions become live activities;
//! everything structural is checked here so that an invalid flow never
//! starts running.

use crate::engine::Engine;
use crate::graph::{ActivityBody, ActivityInstance, CompositeActivity, Flow};
use crate::registry::{composite_descriptor, COMPOSITE_TYPE};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use portcore::{
    ActivityId, ActivitySpec, Descriptor, Direction, FlowDefinition, GraphError,
    ParameterDescriptor, Value, ValueKind,
};
use std::collections::HashMap;
use std::sync::Arc;

pub fn parse_flow(engine: &Engine, definition: &FlowDefinition) -> Result<Flow, GraphError> {
    let mut activities = HashMap::new();
    let mut order = Vec::new();

    for spec in &definition.activities {
        if activities.contains_key(&spec.id) {
            return Err(GraphError::DuplicateActivity(spec.id.to_string()));
        }

        let body = if spec.activity_type == COMPOSITE_TYPE {
            build_composite(engine, spec)?
        } else {
            engine.registry().create(spec)?
        };
        let descriptor = Arc::new(body.descriptor().clone());

        validate_parameters(engine, spec, &descriptor)?;
        for approval in &spec.approvals {
            let resolver = engine.approvals().get(&approval.resolver).ok_or_else(|| {
                GraphError::Invalid(format!(
                    "Activity '{}' uses unknown approval resolver '{}'",
                    spec.id, approval.resolver
                ))
            })?;
            resolver.validate(&approval.options).map_err(|reason| {
                GraphError::Invalid(format!(
                    "Approval '{}' of activity '{}': {}",
                    approval.id, spec.id, reason
                ))
            })?;
        }

        let instance = ActivityInstance {
            id: spec.id.clone(),
            name: spec.name.clone(),
            join: spec.join.unwrap_or(descriptor.join),
            descriptor,
            definitions: Arc::new(spec.parameters.clone()),
            approvals: spec.approvals.clone(),
            priority: spec.priority,
            body,
        };
        order.push(spec.id.clone());
        activities.insert(spec.id.clone(), Arc::new(instance));
    }

    for conn in &definition.connections {
        let source = activities
            .get(&conn.source)
            .ok_or_else(|| GraphError::ActivityNotFound(conn.source.to_string()))?;
        let target = activities
            .get(&conn.target)
            .ok_or_else(|| GraphError::ActivityNotFound(conn.target.to_string()))?;

        check_port(&source.descriptor, &conn.source_port, Direction::Output)
            .map_err(|reason| GraphError::InvalidConnection(format!("{}: {}", conn, reason)))?;
        check_port(&target.descriptor, &conn.target_port, Direction::Input)
            .map_err(|reason| GraphError::InvalidConnection(format!("{}: {}", conn, reason)))?;
    }

    check_cycles(&order, definition)?;

    Ok(Flow {
        id: definition.id,
        name: definition.name.clone(),
        settings: definition.settings.clone(),
        activities,
        order,
        connections: definition.connections.clone(),
        variables: definition
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v.clone())))
            .collect(),
    })
}

fn build_composite(engine: &Engine, spec: &ActivitySpec) -> Result<ActivityBody, GraphError> {
    let child = spec.flow.as_ref().ok_or_else(|| {
        GraphError::Invalid(format!("Composite activity '{}' has no child flow", spec.id))
    })?;
    let flow = parse_flow(engine, child)?;

    let mut descriptor = composite_descriptor();
    let mut names: Vec<&String> = spec.parameters.keys().collect();
    names.sort();
    for name in names {
        descriptor = descriptor.parameter(ParameterDescriptor {
            name: name.clone(),
            kind: ValueKind::Any,
            required: false,
            default: None,
            description: String::new(),
        });
    }

    Ok(ActivityBody::Composite(Arc::new(CompositeActivity {
        descriptor,
        flow: Arc::new(flow),
    })))
}

fn validate_parameters(
    engine: &Engine,
    spec: &ActivitySpec,
    descriptor: &Descriptor,
) -> Result<(), GraphError> {
    for (name, definition) in &spec.parameters {
        let declared = descriptor
            .find_parameter(name)
            .ok_or_else(|| GraphError::UnknownParameter {
                activity: spec.id.to_string(),
                parameter: name.clone(),
            })?;
        // Literals can be checked now; templates only when read.
        if !engine.templates().is_template(definition) {
            declared.kind.convert(definition).map_err(|e| {
                GraphError::Invalid(format!(
                    "Activity '{}' parameter '{}': {}",
                    spec.id, name, e
                ))
            })?;
        }
    }

    for declared in &descriptor.parameters {
        if declared.required
            && declared.default.is_none()
            && !spec.parameters.contains_key(&declared.name)
        {
            return Err(GraphError::MissingParameter {
                activity: spec.id.to_string(),
                parameter: declared.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_port(descriptor: &Descriptor, port: &str, direction: Direction) -> Result<(), String> {
    match descriptor.find_port(port) {
        None => Err(format!(
            "'{}' has no port named '{}'",
            descriptor.activity_type, port
        )),
        Some(p) if p.direction != direction => Err(format!(
            "port '{}' is not an {:?} port",
            port, direction
        )),
        Some(_) => Ok(()),
    }
}

/// Every cycle must pass through a loop-back connection.
fn check_cycles(order: &[ActivityId], definition: &FlowDefinition) -> Result<(), GraphError> {
    let mut graph = DiGraph::<&ActivityId, ()>::new();
    let mut index: HashMap<&ActivityId, NodeIndex> = HashMap::new();

    for id in order {
        index.insert(id, graph.add_node(id));
    }
    for conn in definition.connections.iter().filter(|c| !c.is_loop_back()) {
        if let (Some(&from), Some(&to)) = (index.get(&conn.source), index.get(&conn.target)) {
            graph.add_edge(from, to, ());
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| GraphError::UnbrokenCycle(graph[cycle.node_id()].to_string()))
}
