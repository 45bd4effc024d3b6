// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node types available to graphs run by the host.

use serde_json::{json, Map, Number};
use wireloom_graph::{
    register_subgraph_types, Graph, GraphEvent, NodeBehavior, NodeContext, NodeError,
    NodeRegistry, NodeType, PropertyKind, RegistryError, Value,
};

/// Type name of the watch node whose values the runner reports
pub const WATCH_TYPE: &str = "basic/watch";

/// Arithmetic operators understood by `math/operation`
pub const OPERATORS: [&str; 6] = ["+", "-", "*", "/", "max", "min"];

/// Outputs its `value` property
#[derive(Debug, Default)]
struct ConstNode;

impl NodeBehavior for ConstNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let value = ctx.property("value").cloned().unwrap_or(Value::Null);
        ctx.set_output_data(0, value);
        Ok(())
    }
}

/// `A <OP> B`, each operand taken from its input or else its property
#[derive(Debug, Default)]
struct OperationNode;

impl OperationNode {
    fn operand(ctx: &NodeContext<'_>, name: &str) -> Result<f64, NodeError> {
        match ctx.input_or_property(name) {
            Some(value) => value.as_f64().ok_or_else(|| NodeError::TypeMismatch {
                slot: name.to_string(),
                expected: "number".to_string(),
            }),
            None => Err(NodeError::MissingInput(name.to_string())),
        }
    }
}

impl NodeBehavior for OperationNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let a = Self::operand(ctx, "A")?;
        let b = Self::operand(ctx, "B")?;
        let op = ctx
            .property("OP")
            .and_then(Value::as_str)
            .unwrap_or("+")
            .to_string();

        let result = match op.as_str() {
            "+" => a + b,
            "-" => a - b,
            "*" => a * b,
            "/" => a / b,
            "max" => a.max(b),
            "min" => a.min(b),
            other => return Err(NodeError::Custom(format!("Unknown operator '{other}'"))),
        };
        // non-finite results become null
        let value = Number::from_f64(result).map_or(Value::Null, Value::Number);
        ctx.set_output_data(0, value);
        Ok(())
    }
}

/// Passes its input through so the host can read it
#[derive(Debug, Default)]
struct WatchNode;

impl NodeBehavior for WatchNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        match ctx.input_data(0).cloned() {
            Some(value) => ctx.set_output_data(0, value),
            None => ctx.clear_output_data(0),
        }
        Ok(())
    }
}

/// Logs every event it receives and counts them
#[derive(Debug, Default)]
struct LogEventNode {
    received: u64,
}

impl NodeBehavior for LogEventNode {
    fn has_action(&self) -> bool {
        true
    }

    fn on_action(
        &mut self,
        ctx: &mut NodeContext<'_>,
        action: &str,
        payload: Option<&Value>,
    ) -> Result<(), NodeError> {
        self.received += 1;
        tracing::info!(
            node = %ctx.node_id(),
            action,
            payload = %payload.unwrap_or(&wireloom_graph::Value::Null),
            "Event received"
        );
        ctx.set_output_data(0, json!(self.received));
        Ok(())
    }
}

/// Fires `on_tick` every `interval` milliseconds of graph time
#[derive(Debug, Default)]
struct TimerNode {
    last_fire: Option<f64>,
    ticks: u64,
}

impl NodeBehavior for TimerNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let interval_ms = ctx
            .property("interval")
            .and_then(Value::as_f64)
            .unwrap_or(1000.0)
            .max(0.0);
        let now = ctx.global_time();
        let last = *self.last_fire.get_or_insert(now);
        if (now - last) * 1000.0 < interval_ms {
            return Ok(());
        }

        self.last_fire = Some(now);
        self.ticks += 1;
        let event = ctx
            .property("event")
            .and_then(Value::as_str)
            .unwrap_or("on_tick")
            .to_string();
        ctx.trigger(Some(event.as_str()), Some(json!(self.ticks)));
        Ok(())
    }

    fn on_graph_event(&mut self, _ctx: &mut NodeContext<'_>, event: GraphEvent) {
        if event == GraphEvent::Start {
            self.last_fire = None;
        }
    }
}

/// Every built-in type, subgraph bridges excluded
pub fn builtin_types() -> Vec<NodeType> {
    vec![
        NodeType::new("basic/const", "Const", ConstNode::default)
            .with_description("Constant number")
            .with_output("value", "number")
            .with_property("value", json!(1.0), PropertyKind::Number),
        NodeType::new("math/operation", "Operation", OperationNode::default)
            .with_description("Binary arithmetic")
            .with_input("A", "number")
            .with_input("B", "number")
            .with_output("result", "number")
            .with_property("A", json!(1.0), PropertyKind::Number)
            .with_property("B", json!(1.0), PropertyKind::Number)
            .with_property(
                "OP",
                json!("+"),
                PropertyKind::Enum(OPERATORS.iter().map(ToString::to_string).collect()),
            ),
        NodeType::new(WATCH_TYPE, "Watch", WatchNode::default)
            .with_description("Shows the value of its input")
            .with_input("value", "*")
            .with_output("value", "*")
            .with_priority(10),
        NodeType::new("events/log", "Log Event", LogEventNode::default)
            .with_description("Logs incoming events")
            .with_input("event", "action")
            .with_output("count", "number"),
        NodeType::new("events/timer", "Timer", TimerNode::default)
            .with_description("Sends an event periodically")
            .with_output("on_tick", "event")
            .with_property("interval", json!(1000.0), PropertyKind::Number)
            .with_property("event", json!("on_tick"), PropertyKind::String),
    ]
}

/// Registry holding the built-in types and the subgraph bridges
pub fn registry() -> Result<NodeRegistry, RegistryError> {
    let mut registry = NodeRegistry::new();
    for node_type in builtin_types() {
        registry.register(node_type)?;
    }
    register_subgraph_types(&mut registry)?;
    Ok(registry)
}

/// Current value of every watch node, keyed by title
pub fn watched_values(graph: &Graph) -> Value {
    let mut values = Map::new();
    for node_id in graph.find_nodes_by_type(WATCH_TYPE) {
        let Some(node) = graph.node(node_id) else {
            continue;
        };
        let key = if values.contains_key(&node.title) {
            format!("{} {}", node.title, node_id)
        } else {
            node.title.clone()
        };
        let value = node.output_value(0).cloned().unwrap_or(Value::Null);
        values.insert(key, value);
    }
    Value::Object(values)
}
