// SPDX-License-Identifier: MIT OR Apache-2.0
//! Observer interface for hosts such as a canvas renderer or an inspector.

use crate::link::Link;
use crate::node::{Node, NodeId};
use crate::subgraph::BoundaryEvent;
use crate::Value;
use uuid::Uuid;

/// Receives notifications about a graph. All methods default to no-ops.
pub trait GraphListener {
    /// A node was added
    fn on_node_added(&mut self, _node: &Node) {}

    /// A node was removed; drop any selection or drag state that refers to it
    fn on_node_removed(&mut self, _node_id: NodeId) {}

    /// A link was created (`connected`) or destroyed
    fn on_connection_change(&mut self, _link: &Link, _connected: bool) {}

    /// A property changed on a node
    fn on_property_changed(&mut self, _node_id: NodeId, _name: &str, _value: &Value) {}

    /// A boundary input or output of this graph changed
    fn on_boundary_change(&mut self, _event: &BoundaryEvent) {}

    /// A node finished its execution or action hook
    fn on_node_executed(&mut self, _node_id: NodeId, _correlation: Uuid) {}

    /// One step iteration finished
    fn on_step_executed(&mut self) {}

    /// A `run_step` call finished all its iterations
    fn on_after_execute(&mut self) {}

    /// The graph started running
    fn on_play(&mut self) {}

    /// The graph stopped running
    fn on_stop(&mut self) {}

    /// `configure` finished
    fn on_configured(&mut self) {}

    /// Something visible changed; redraw
    fn on_dirty(&mut self) {}
}
