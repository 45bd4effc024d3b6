// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node behaviors and observers shared by the unit tests.

use crate::evaluation::{ConnectionChange, GraphEvent, NodeBehavior, NodeContext, NodeError};
use crate::graph::Graph;
use crate::link::Link;
use crate::listener::GraphListener;
use crate::node::{Node, NodeId};
use crate::port::PortDirection;
use crate::property::PropertyKind;
use crate::registry::{NodeRegistry, NodeType};
use crate::subgraph::BoundaryEvent;
use crate::Value;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use uuid::Uuid;

/// Outputs its `value` property; refuses negative values
#[derive(Debug, Default)]
pub struct ConstNode;

impl NodeBehavior for ConstNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let value = ctx.property("value").cloned().unwrap_or(Value::Null);
        ctx.set_output_data(0, value);
        Ok(())
    }

    fn on_property_changed(
        &mut self,
        _ctx: &mut NodeContext<'_>,
        name: &str,
        value: &Value,
        _previous: Option<&Value>,
    ) -> bool {
        !(name == "value" && value.as_f64().is_some_and(|v| v < 0.0))
    }
}

/// Writes twice its numeric input
#[derive(Debug, Default)]
pub struct DoubleNode;

impl NodeBehavior for DoubleNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        match ctx.input_number(0) {
            Some(value) => ctx.set_output_data(0, json!(value * 2.0)),
            None => ctx.clear_output_data(0),
        }
        Ok(())
    }
}

/// Outputs how many times it ran
#[derive(Debug, Default)]
pub struct CounterNode {
    count: u64,
}

impl NodeBehavior for CounterNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.count += 1;
        ctx.set_output_data(0, json!(self.count));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FailingNode;

impl NodeBehavior for FailingNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn on_execute(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Err(NodeError::Custom("boom".to_string()))
    }
}

/// Fires its event output every time it executes
#[derive(Debug, Default)]
struct EventNode;

impl NodeBehavior for EventNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        ctx.trigger(None, None);
        Ok(())
    }
}

/// Logs actions, connection changes and lifecycle events to its output
#[derive(Debug, Default)]
struct RecorderNode {
    log: Vec<String>,
}

impl RecorderNode {
    fn record(&mut self, ctx: &mut NodeContext<'_>, entry: String) {
        self.log.push(entry);
        ctx.set_output_data(0, json!(self.log));
    }
}

impl NodeBehavior for RecorderNode {
    fn has_action(&self) -> bool {
        true
    }

    fn on_action(
        &mut self,
        ctx: &mut NodeContext<'_>,
        action: &str,
        payload: Option<&Value>,
    ) -> Result<(), NodeError> {
        let payload = payload.map_or_else(|| "null".to_string(), Value::to_string);
        self.record(ctx, format!("action {action} {payload}"));
        Ok(())
    }

    fn on_connections_change(&mut self, ctx: &mut NodeContext<'_>, change: ConnectionChange) {
        let verb = if change.connected { "connect" } else { "disconnect" };
        let side = match change.direction {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        };
        self.record(ctx, format!("{verb} {side} {} {}", change.slot, change.link));
    }

    fn on_graph_event(&mut self, ctx: &mut NodeContext<'_>, event: GraphEvent) {
        self.record(ctx, format!("event {event:?}"));
    }
}

fn const_type() -> NodeType {
    NodeType::new("test/const", "Const", ConstNode::default)
        .with_output("value", "number")
        .with_property("value", json!(1.0), PropertyKind::Number)
}

fn double_type() -> NodeType {
    NodeType::new("test/double", "Double", DoubleNode::default)
        .with_input("value", "number")
        .with_output("doubled", "number")
}

fn counter_type() -> NodeType {
    NodeType::new("test/counter", "Counter", CounterNode::default).with_output("count", "number")
}

/// Register the const, double and counter types
pub fn register_test_types(registry: &mut NodeRegistry) {
    for node_type in [const_type(), double_type(), counter_type()] {
        registry
            .register(node_type)
            .expect("test types are well formed");
    }
}

/// Constant source with one `number` output
pub fn const_node(value: f64) -> Node {
    let mut node = const_type().instantiate();
    node.properties.insert("value".to_string(), json!(value));
    node
}

/// One `number` input, one `number` output
pub fn double_node() -> Node {
    double_type().instantiate()
}

/// Counts its own executions on output 0
pub fn counter_node() -> Node {
    counter_type().instantiate()
}

/// Always fails when executed
pub fn failing_node() -> Node {
    Node::new("test/fail", "Fail").with_behavior(Box::new(FailingNode))
}

/// One event output named `fired`
pub fn event_node() -> Node {
    let mut node = Node::new("test/event", "Event").with_behavior(Box::new(EventNode));
    node.add_output("fired", "event");
    node
}

/// One action input named `in` and a `log` output holding what it saw
pub fn recorder_node() -> Node {
    let mut node = Node::new("test/recorder", "Recorder")
        .with_behavior(Box::new(RecorderNode::default()));
    node.add_input("in", "action");
    node.add_output("log", "*");
    node
}

/// Entries recorded by a recorder node
pub fn recorder_log(graph: &Graph, node_id: NodeId) -> Vec<String> {
    graph
        .node_output_data(node_id, 0)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Listener writing one line per notification into a shared log
pub struct RecordingListener {
    log: Rc<RefCell<Vec<String>>>,
}

impl RecordingListener {
    /// Create a listener and a handle to its log
    pub fn new() -> (Self, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        (Self { log: Rc::clone(&log) }, log)
    }

    fn push(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

impl GraphListener for RecordingListener {
    fn on_node_added(&mut self, node: &Node) {
        self.push(format!("added {}", node.id()));
    }

    fn on_node_removed(&mut self, node_id: NodeId) {
        self.push(format!("removed {node_id}"));
    }

    fn on_connection_change(&mut self, link: &Link, connected: bool) {
        let verb = if connected { "connected" } else { "disconnected" };
        self.push(format!("{verb} {}", link.id));
    }

    fn on_property_changed(&mut self, node_id: NodeId, name: &str, _value: &Value) {
        self.push(format!("property {node_id} {name}"));
    }

    fn on_boundary_change(&mut self, event: &BoundaryEvent) {
        self.push(format!("boundary {event:?}"));
    }

    fn on_node_executed(&mut self, node_id: NodeId, _correlation: Uuid) {
        self.push(format!("executed {node_id}"));
    }

    fn on_step_executed(&mut self) {
        self.push("step".to_string());
    }

    fn on_after_execute(&mut self) {
        self.push("after".to_string());
    }

    fn on_play(&mut self) {
        self.push("play".to_string());
    }

    fn on_stop(&mut self) {
        self.push("stop".to_string());
    }

    fn on_configured(&mut self) {
        self.push("configured".to_string());
    }
}
