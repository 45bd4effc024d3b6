// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node behaviors and the context they run in.
//!
//! A node's type-specific logic is a [`NodeBehavior`] produced by the registry.
//! While a hook runs, the behavior is detached from its node and receives a
//! [`NodeContext`], which gives mutable access to the whole graph.

use crate::graph::Graph;
use crate::link::LinkId;
use crate::node::{Node, NodeId, NodeMode};
use crate::port::PortDirection;
use crate::registry::NodeRegistry;
use crate::serialization::{SerializedGraph, SerializedNode};
use crate::Value;
use uuid::Uuid;

/// A change to one of a node's connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionChange {
    /// Which side of the node changed
    pub direction: PortDirection,
    /// Slot number on that side
    pub slot: usize,
    /// `true` for a new link, `false` for a removed one
    pub connected: bool,
    /// The link involved
    pub link: LinkId,
}

/// Lifecycle events broadcast to nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent {
    /// The graph started running
    Start,
    /// The graph stopped running
    Stop,
}

/// Type-specific node logic.
///
/// Every hook has a no-op default; `has_execute`/`has_action` advertise which
/// of the two execution hooks the scheduler may call.
pub trait NodeBehavior {
    /// Whether `on_execute` does anything
    fn has_execute(&self) -> bool {
        false
    }

    /// Whether `on_action` does anything
    fn has_action(&self) -> bool {
        false
    }

    /// Data-flow step
    fn on_execute(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    /// An event arrived at the action input named `action`
    fn on_action(
        &mut self,
        _ctx: &mut NodeContext<'_>,
        _action: &str,
        _payload: Option<&Value>,
    ) -> Result<(), NodeError> {
        Ok(())
    }

    /// The node was added to a graph
    fn on_added(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// The node is about to leave its graph; its links are already gone
    fn on_removed(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// Veto an incoming link before it is created
    fn on_connect_input(&mut self, _slot: usize, _output_type: &crate::port::SlotType) -> bool {
        true
    }

    /// Veto an outgoing link before it is created
    fn on_connect_output(&mut self, _slot: usize, _input_type: &crate::port::SlotType) -> bool {
        true
    }

    /// A link on this node was created or removed
    fn on_connections_change(&mut self, _ctx: &mut NodeContext<'_>, _change: ConnectionChange) {}

    /// A property changed; return `false` to revert it
    fn on_property_changed(
        &mut self,
        _ctx: &mut NodeContext<'_>,
        _name: &str,
        _value: &Value,
        _previous: Option<&Value>,
    ) -> bool {
        true
    }

    /// Graph lifecycle broadcast
    fn on_graph_event(&mut self, _ctx: &mut NodeContext<'_>, _event: GraphEvent) {}

    /// Add type-specific data to the node's serialized record
    fn on_serialize(&self, _record: &mut SerializedNode) {}

    /// Restore type-specific data after the common fields were applied
    fn on_configure(
        &mut self,
        _ctx: &mut NodeContext<'_>,
        _record: &SerializedNode,
        _registry: &NodeRegistry,
    ) -> Result<(), NodeError> {
        Ok(())
    }

    /// Inner graph, for subgraph-style nodes
    fn subgraph(&self) -> Option<&Graph> {
        None
    }

    /// Mutable inner graph, for subgraph-style nodes
    fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        None
    }
}

/// Behavior of a node whose type could not be resolved. It never runs, but
/// keeps any nested graph so the record survives a save.
#[derive(Debug, Default)]
pub struct MissingNode {
    pub(crate) subgraph: Option<Box<SerializedGraph>>,
}

impl NodeBehavior for MissingNode {
    fn on_serialize(&self, record: &mut SerializedNode) {
        record.subgraph = self.subgraph.clone();
    }
}

/// Access to the graph from inside a node hook
pub struct NodeContext<'g> {
    graph: &'g mut Graph,
    node_id: NodeId,
    correlation: Option<Uuid>,
}

impl<'g> NodeContext<'g> {
    pub(crate) fn new(graph: &'g mut Graph, node_id: NodeId, correlation: Option<Uuid>) -> Self {
        Self {
            graph,
            node_id,
            correlation,
        }
    }

    /// ID of the node whose hook is running
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Correlation ID of the current execution or action, if any
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation
    }

    /// The node itself (its behavior is detached while the hook runs).
    /// `None` only if the hook removed its own node.
    pub fn node(&self) -> Option<&Node> {
        self.graph.node(self.node_id)
    }

    /// Mutable node
    pub fn node_mut(&mut self) -> Option<&mut Node> {
        self.graph.node_mut(self.node_id)
    }

    /// The owning graph
    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    /// The owning graph, mutably
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut *self.graph
    }

    /// Execution mode of this node
    pub fn mode(&self) -> NodeMode {
        self.node().map(Node::mode).unwrap_or_default()
    }

    /// Value carried by the link into input `slot`; `None` when not connected
    pub fn input_data(&self, slot: usize) -> Option<&Value> {
        self.graph.node_input_data(self.node_id, slot)
    }

    /// Numeric view of `input_data`
    pub fn input_number(&self, slot: usize) -> Option<f64> {
        self.input_data(slot).and_then(Value::as_f64)
    }

    /// Input data by input name
    pub fn input_data_by_name(&self, name: &str) -> Option<&Value> {
        let slot = self.node()?.find_input_slot(name)?;
        self.input_data(slot)
    }

    /// Like `input_data`, but executes an ON_REQUEST origin node first
    pub fn pull_input_data(&mut self, slot: usize) -> Result<Option<Value>, NodeError> {
        self.graph.pull_input_data(self.node_id, slot)
    }

    /// Connected input with this name if present, otherwise the property
    pub fn input_or_property(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.input_data_by_name(name) {
            return Some(value.clone());
        }
        self.property(name).cloned()
    }

    /// Property value
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.node()?.property(name)
    }

    /// Write a value to output `slot` and every link leaving it
    pub fn set_output_data(&mut self, slot: usize, value: Value) {
        self.graph.set_node_output_data(self.node_id, slot, Some(value));
    }

    /// Clear output `slot` and every link leaving it
    pub fn clear_output_data(&mut self, slot: usize) {
        self.graph.set_node_output_data(self.node_id, slot, None);
    }

    /// Queue a trigger on every EVENT output (or the one named `event`)
    pub fn trigger(&mut self, event: Option<&str>, payload: Option<Value>) {
        let correlation = self.correlation;
        self.graph
            .queue_named_trigger(self.node_id, event, payload, correlation);
    }

    /// Queue a trigger on one output slot, optionally restricted to one link
    pub fn trigger_slot(&mut self, slot: usize, payload: Option<Value>, link: Option<LinkId>) {
        let correlation = self.correlation;
        self.graph
            .queue_trigger(self.node_id, slot, payload, link, correlation);
    }

    /// Seconds since the graph was created or last started
    pub fn global_time(&self) -> f64 {
        self.graph.global_time()
    }

    /// Deterministic clock advanced by `fixed_time_lapse` per step
    pub fn fixed_time(&self) -> f64 {
        self.graph.fixed_time()
    }
}

/// Error raised by a node hook
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// A required input was not connected
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// An input carried a value of the wrong kind
    #[error("Type mismatch on '{slot}': expected {expected}")]
    TypeMismatch {
        /// Input name
        slot: String,
        /// Expected kind
        expected: String,
    },

    /// An ON_REQUEST node feeding this one failed
    #[error("Upstream node failed: {0}")]
    Upstream(#[source] Box<StepError>),

    /// The inner graph of a subgraph node failed
    #[error("Subgraph step failed: {0}")]
    Subgraph(#[source] Box<StepError>),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

/// Error that aborted a step
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// A node hook failed
    #[error("Node {node_id} ({type_name}) failed: {source}")]
    Node {
        /// Failing node
        node_id: NodeId,
        /// Its type name
        type_name: String,
        /// Hook error
        #[source]
        source: NodeError,
    },
}

impl StepError {
    /// Node that faulted
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::Node { node_id, .. } => *node_id,
        }
    }
}
