// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph boundaries and subgraph nodes.
//!
//! A graph exposes named boundary inputs and outputs. When the graph is the
//! body of a [`SubgraphNode`], changes to its boundary are queued as
//! [`BoundaryEvent`]s and replayed onto the subgraph node's ports by name.
//! The `graph/input` and `graph/output` bridge nodes connect the boundary to
//! the nodes inside.

use crate::evaluation::{GraphEvent, NodeBehavior, NodeContext, NodeError};
use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::port::{PortDirection, SlotType};
use crate::property::PropertyKind;
use crate::registry::{NodeRegistry, NodeType, RegistryError};
use crate::serialization::SerializedNode;
use crate::Value;
use indexmap::IndexMap;
use serde_json::json;

/// Type name of the boundary input bridge
pub const GRAPH_INPUT_TYPE: &str = "graph/input";
/// Type name of the boundary output bridge
pub const GRAPH_OUTPUT_TYPE: &str = "graph/output";
/// Type name of the subgraph node
pub const SUBGRAPH_TYPE: &str = "graph/subgraph";

/// A named value at the edge of a graph
#[derive(Debug, Clone, PartialEq)]
pub struct BoundarySlot {
    /// Boundary name
    pub name: String,
    /// Declared type
    pub slot_type: SlotType,
    /// Current value
    pub value: Option<Value>,
}

/// A structural change to a graph's boundary
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryEvent {
    /// A boundary input was added
    InputAdded {
        /// Input name
        name: String,
        /// Its type
        slot_type: SlotType,
    },
    /// A boundary input was renamed
    InputRenamed {
        /// Previous name
        old: String,
        /// New name
        new: String,
    },
    /// A boundary input changed type
    InputTypeChanged {
        /// Input name
        name: String,
        /// New type
        slot_type: SlotType,
    },
    /// A boundary input was removed
    InputRemoved {
        /// Input name
        name: String,
    },
    /// A boundary output was added
    OutputAdded {
        /// Output name
        name: String,
        /// Its type
        slot_type: SlotType,
    },
    /// A boundary output was renamed
    OutputRenamed {
        /// Previous name
        old: String,
        /// New name
        new: String,
    },
    /// A boundary output changed type
    OutputTypeChanged {
        /// Output name
        name: String,
        /// New type
        slot_type: SlotType,
    },
    /// A boundary output was removed
    OutputRemoved {
        /// Output name
        name: String,
    },
}

impl BoundaryEvent {
    fn added(direction: PortDirection, name: &str, slot_type: &SlotType) -> Self {
        let (name, slot_type) = (name.to_string(), slot_type.clone());
        match direction {
            PortDirection::Input => Self::InputAdded { name, slot_type },
            PortDirection::Output => Self::OutputAdded { name, slot_type },
        }
    }

    fn renamed(direction: PortDirection, old: &str, new: &str) -> Self {
        let (old, new) = (old.to_string(), new.to_string());
        match direction {
            PortDirection::Input => Self::InputRenamed { old, new },
            PortDirection::Output => Self::OutputRenamed { old, new },
        }
    }

    fn type_changed(direction: PortDirection, name: &str, slot_type: &SlotType) -> Self {
        let (name, slot_type) = (name.to_string(), slot_type.clone());
        match direction {
            PortDirection::Input => Self::InputTypeChanged { name, slot_type },
            PortDirection::Output => Self::OutputTypeChanged { name, slot_type },
        }
    }

    fn removed(direction: PortDirection, name: &str) -> Self {
        let name = name.to_string();
        match direction {
            PortDirection::Input => Self::InputRemoved { name },
            PortDirection::Output => Self::OutputRemoved { name },
        }
    }
}

impl Graph {
    // ------------------------------------------------------------------
    // Boundary inputs
    // ------------------------------------------------------------------

    /// Declare a boundary input. Returns `false` if the name is taken.
    pub fn add_input(
        &mut self,
        name: &str,
        slot_type: impl Into<SlotType>,
        value: Option<Value>,
    ) -> bool {
        self.add_boundary(PortDirection::Input, name, slot_type.into(), value)
    }

    /// Set a boundary input's value
    pub fn set_input_data(&mut self, name: &str, value: Option<Value>) -> bool {
        match self.inputs.get_mut(name) {
            Some(slot) => {
                slot.value = value;
                true
            }
            None => false,
        }
    }

    /// Current value of a boundary input
    pub fn input_data(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)?.value.as_ref()
    }

    /// Rename a boundary input, keeping its position
    pub fn rename_input(&mut self, old: &str, new: &str) -> bool {
        self.rename_boundary(PortDirection::Input, old, new)
    }

    /// Change a boundary input's type
    pub fn change_input_type(&mut self, name: &str, slot_type: impl Into<SlotType>) -> bool {
        self.retype_boundary(PortDirection::Input, name, slot_type.into())
    }

    /// Remove a boundary input
    pub fn remove_input(&mut self, name: &str) -> bool {
        self.remove_boundary(PortDirection::Input, name)
    }

    /// Boundary inputs in declaration order
    pub fn boundary_inputs(&self) -> impl Iterator<Item = &BoundarySlot> {
        self.inputs.values()
    }

    // ------------------------------------------------------------------
    // Boundary outputs
    // ------------------------------------------------------------------

    /// Declare a boundary output. Returns `false` if the name is taken.
    pub fn add_output(
        &mut self,
        name: &str,
        slot_type: impl Into<SlotType>,
        value: Option<Value>,
    ) -> bool {
        self.add_boundary(PortDirection::Output, name, slot_type.into(), value)
    }

    /// Set a boundary output's value
    pub fn set_output_data(&mut self, name: &str, value: Option<Value>) -> bool {
        match self.outputs.get_mut(name) {
            Some(slot) => {
                slot.value = value;
                true
            }
            None => false,
        }
    }

    /// Current value of a boundary output
    pub fn output_data(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)?.value.as_ref()
    }

    /// Rename a boundary output, keeping its position
    pub fn rename_output(&mut self, old: &str, new: &str) -> bool {
        self.rename_boundary(PortDirection::Output, old, new)
    }

    /// Change a boundary output's type
    pub fn change_output_type(&mut self, name: &str, slot_type: impl Into<SlotType>) -> bool {
        self.retype_boundary(PortDirection::Output, name, slot_type.into())
    }

    /// Remove a boundary output
    pub fn remove_output(&mut self, name: &str) -> bool {
        self.remove_boundary(PortDirection::Output, name)
    }

    /// Boundary outputs in declaration order
    pub fn boundary_outputs(&self) -> impl Iterator<Item = &BoundarySlot> {
        self.outputs.values()
    }

    // ------------------------------------------------------------------
    // Shared boundary plumbing
    // ------------------------------------------------------------------

    fn boundary_mut(&mut self, direction: PortDirection) -> &mut IndexMap<String, BoundarySlot> {
        match direction {
            PortDirection::Input => &mut self.inputs,
            PortDirection::Output => &mut self.outputs,
        }
    }

    fn add_boundary(
        &mut self,
        direction: PortDirection,
        name: &str,
        slot_type: SlotType,
        value: Option<Value>,
    ) -> bool {
        let map = self.boundary_mut(direction);
        if map.contains_key(name) {
            return false;
        }
        let event = BoundaryEvent::added(direction, name, &slot_type);
        map.insert(
            name.to_string(),
            BoundarySlot {
                name: name.to_string(),
                slot_type,
                value,
            },
        );
        self.emit_boundary(event);
        true
    }

    fn rename_boundary(&mut self, direction: PortDirection, old: &str, new: &str) -> bool {
        let map = self.boundary_mut(direction);
        if old == new {
            return map.contains_key(old);
        }
        if map.contains_key(new) {
            tracing::warn!("Boundary {:?} '{}' already exists", direction, new);
            return false;
        }
        let Some((index, _, mut slot)) = map.shift_remove_full(old) else {
            return false;
        };
        slot.name = new.to_string();
        map.shift_insert(index, new.to_string(), slot);
        self.emit_boundary(BoundaryEvent::renamed(direction, old, new));
        true
    }

    fn retype_boundary(
        &mut self,
        direction: PortDirection,
        name: &str,
        slot_type: SlotType,
    ) -> bool {
        let Some(slot) = self.boundary_mut(direction).get_mut(name) else {
            return false;
        };
        if slot.slot_type.same_label(&slot_type) {
            return true;
        }
        let event = BoundaryEvent::type_changed(direction, name, &slot_type);
        slot.slot_type = slot_type;
        self.emit_boundary(event);
        true
    }

    fn remove_boundary(&mut self, direction: PortDirection, name: &str) -> bool {
        if self.boundary_mut(direction).shift_remove(name).is_none() {
            return false;
        }
        self.emit_boundary(BoundaryEvent::removed(direction, name));
        true
    }

    fn emit_boundary(&mut self, event: BoundaryEvent) {
        tracing::debug!("Boundary change: {:?}", event);
        for listener in &mut self.listeners {
            listener.on_boundary_change(&event);
        }
        self.boundary_events.push(event);
        self.touch();
    }

    /// Drain queued boundary changes
    pub fn take_boundary_events(&mut self) -> Vec<BoundaryEvent> {
        std::mem::take(&mut self.boundary_events)
    }

    /// Events raised by event-typed `graph/output` nodes since the last call
    pub fn take_outer_triggers(&mut self) -> Vec<(String, Option<Value>)> {
        std::mem::take(&mut self.outer_triggers)
    }

    pub(crate) fn raise_outer_trigger(&mut self, name: &str, payload: Option<Value>) {
        self.outer_triggers.push((name.to_string(), payload));
    }

    /// Edit the inner graph of a subgraph node, then bring the node's ports
    /// in line with any boundary changes made.
    ///
    /// Returns `None` if the node has no inner graph.
    pub fn edit_subgraph<R>(
        &mut self,
        node_id: NodeId,
        f: impl FnOnce(&mut Graph) -> R,
    ) -> Option<R> {
        let inner = self
            .nodes
            .get_mut(&node_id)?
            .behavior
            .as_deref_mut()?
            .subgraph_mut()?;
        let result = f(inner);
        let events = inner.take_boundary_events();
        self.apply_boundary_events(node_id, &events);
        Some(result)
    }

    /// Replay boundary changes onto a node's ports, matching ports by name.
    ///
    /// Every event is idempotent: adding an existing port or renaming a missing
    /// one does nothing.
    pub fn apply_boundary_events(&mut self, node_id: NodeId, events: &[BoundaryEvent]) {
        for event in events {
            let Some(node) = self.nodes.get(&node_id) else {
                return;
            };
            match event {
                BoundaryEvent::InputAdded { name, slot_type } => {
                    if node.find_input_slot(name).is_none() {
                        self.add_node_input(node_id, name.clone(), slot_type.clone());
                    }
                }
                BoundaryEvent::InputRenamed { old, new } => {
                    if let Some(slot) = node.find_input_slot(old) {
                        self.rename_node_input(node_id, slot, new);
                    }
                }
                BoundaryEvent::InputTypeChanged { name, slot_type } => {
                    if let Some(slot) = node.find_input_slot(name) {
                        self.change_node_input_type(node_id, slot, slot_type.clone());
                    }
                }
                BoundaryEvent::InputRemoved { name } => {
                    if let Some(slot) = node.find_input_slot(name) {
                        self.remove_node_input(node_id, slot);
                    }
                }
                BoundaryEvent::OutputAdded { name, slot_type } => {
                    if node.find_output_slot(name).is_none() {
                        self.add_node_output(node_id, name.clone(), slot_type.clone());
                    }
                }
                BoundaryEvent::OutputRenamed { old, new } => {
                    if let Some(slot) = node.find_output_slot(old) {
                        self.rename_node_output(node_id, slot, new);
                    }
                }
                BoundaryEvent::OutputTypeChanged { name, slot_type } => {
                    if let Some(slot) = node.find_output_slot(name) {
                        self.change_node_output_type(node_id, slot, slot_type.clone());
                    }
                }
                BoundaryEvent::OutputRemoved { name } => {
                    if let Some(slot) = node.find_output_slot(name) {
                        self.remove_node_output(node_id, slot);
                    }
                }
            }
        }
    }

    /// One `*Added` event per current boundary slot
    fn boundary_snapshot(&self) -> Vec<BoundaryEvent> {
        let inputs = self
            .inputs
            .values()
            .map(|slot| BoundaryEvent::added(PortDirection::Input, &slot.name, &slot.slot_type));
        let outputs = self
            .outputs
            .values()
            .map(|slot| BoundaryEvent::added(PortDirection::Output, &slot.name, &slot.slot_type));
        inputs.chain(outputs).collect()
    }
}

// ----------------------------------------------------------------------
// Bridge nodes
// ----------------------------------------------------------------------

fn string_property(ctx: &NodeContext<'_>, name: &str) -> String {
    ctx.property(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bridge_slot(ctx: &NodeContext<'_>) -> (String, SlotType) {
    (
        string_property(ctx, "name"),
        SlotType::parse(string_property(ctx, "type")),
    )
}

/// Exposes a boundary input to the nodes of its graph
#[derive(Debug, Default)]
pub struct GraphInputNode;

impl GraphInputNode {
    fn register(ctx: &mut NodeContext<'_>) {
        let (name, slot_type) = bridge_slot(ctx);
        if name.is_empty() {
            return;
        }
        let node_id = ctx.node_id();
        let graph = ctx.graph_mut();
        graph.change_node_output_type(node_id, 0, slot_type.clone());
        if !graph.add_input(&name, slot_type.clone(), None) {
            graph.change_input_type(&name, slot_type);
        }
    }
}

impl NodeBehavior for GraphInputNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn has_action(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let (name, slot_type) = bridge_slot(ctx);
        if slot_type.is_trigger() {
            return Ok(());
        }
        let value = ctx
            .graph()
            .input_data(&name)
            .cloned()
            .or_else(|| ctx.property("value").filter(|v| !v.is_null()).cloned());
        match value {
            Some(value) => ctx.set_output_data(0, value),
            None => ctx.clear_output_data(0),
        }
        Ok(())
    }

    fn on_action(
        &mut self,
        ctx: &mut NodeContext<'_>,
        _action: &str,
        payload: Option<&Value>,
    ) -> Result<(), NodeError> {
        let (_, slot_type) = bridge_slot(ctx);
        if slot_type.is_event() {
            ctx.trigger_slot(0, payload.cloned(), None);
        }
        Ok(())
    }

    fn on_added(&mut self, ctx: &mut NodeContext<'_>) {
        Self::register(ctx);
    }

    fn on_removed(&mut self, ctx: &mut NodeContext<'_>) {
        let name = string_property(ctx, "name");
        if !name.is_empty() {
            ctx.graph_mut().remove_input(&name);
        }
    }

    fn on_property_changed(
        &mut self,
        ctx: &mut NodeContext<'_>,
        name: &str,
        value: &Value,
        previous: Option<&Value>,
    ) -> bool {
        match name {
            "name" => {
                let Some(new_name) = value.as_str().filter(|n| !n.is_empty()) else {
                    return false;
                };
                let old = previous.and_then(Value::as_str).unwrap_or_default();
                let slot_type = SlotType::parse(string_property(ctx, "type"));
                let graph = ctx.graph_mut();
                let accepted = if !old.is_empty() && graph.inputs.contains_key(old) {
                    graph.rename_input(old, new_name)
                } else {
                    graph.add_input(new_name, slot_type, None)
                };
                if accepted {
                    if let Some(node) = ctx.node_mut() {
                        node.title = new_name.to_string();
                    }
                }
                accepted
            }
            "type" => {
                let Some(label) = value.as_str() else {
                    return false;
                };
                let slot_type = SlotType::parse(label);
                let input_name = string_property(ctx, "name");
                let node_id = ctx.node_id();
                let graph = ctx.graph_mut();
                graph.change_node_output_type(node_id, 0, slot_type.clone());
                if !input_name.is_empty() {
                    graph.change_input_type(&input_name, slot_type);
                }
                true
            }
            _ => true,
        }
    }

    fn on_configure(
        &mut self,
        ctx: &mut NodeContext<'_>,
        _record: &SerializedNode,
        _registry: &NodeRegistry,
    ) -> Result<(), NodeError> {
        Self::register(ctx);
        Ok(())
    }
}

/// Publishes a value (or event) of its graph as a boundary output
#[derive(Debug, Default)]
pub struct GraphOutputNode;

impl GraphOutputNode {
    fn register(ctx: &mut NodeContext<'_>) {
        let (name, slot_type) = bridge_slot(ctx);
        if name.is_empty() {
            return;
        }
        let node_id = ctx.node_id();
        let graph = ctx.graph_mut();
        graph.change_node_input_type(node_id, 0, slot_type.clone());
        if !graph.add_output(&name, slot_type.clone(), None) {
            graph.change_output_type(&name, slot_type);
        }
    }
}

impl NodeBehavior for GraphOutputNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn has_action(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let (name, slot_type) = bridge_slot(ctx);
        if slot_type.is_trigger() {
            return Ok(());
        }
        let value = ctx.input_data(0).cloned();
        ctx.graph_mut().set_output_data(&name, value);
        Ok(())
    }

    fn on_action(
        &mut self,
        ctx: &mut NodeContext<'_>,
        _action: &str,
        payload: Option<&Value>,
    ) -> Result<(), NodeError> {
        let (name, slot_type) = bridge_slot(ctx);
        if slot_type.is_trigger() && !name.is_empty() {
            ctx.graph_mut().raise_outer_trigger(&name, payload.cloned());
        }
        Ok(())
    }

    fn on_added(&mut self, ctx: &mut NodeContext<'_>) {
        Self::register(ctx);
    }

    fn on_removed(&mut self, ctx: &mut NodeContext<'_>) {
        let name = string_property(ctx, "name");
        if !name.is_empty() {
            ctx.graph_mut().remove_output(&name);
        }
    }

    fn on_property_changed(
        &mut self,
        ctx: &mut NodeContext<'_>,
        name: &str,
        value: &Value,
        previous: Option<&Value>,
    ) -> bool {
        match name {
            "name" => {
                let Some(new_name) = value.as_str().filter(|n| !n.is_empty()) else {
                    return false;
                };
                let old = previous.and_then(Value::as_str).unwrap_or_default();
                let slot_type = SlotType::parse(string_property(ctx, "type"));
                let graph = ctx.graph_mut();
                let accepted = if !old.is_empty() && graph.outputs.contains_key(old) {
                    graph.rename_output(old, new_name)
                } else {
                    graph.add_output(new_name, slot_type, None)
                };
                if accepted {
                    if let Some(node) = ctx.node_mut() {
                        node.title = new_name.to_string();
                    }
                }
                accepted
            }
            "type" => {
                let Some(label) = value.as_str() else {
                    return false;
                };
                let slot_type = SlotType::parse(label);
                let output_name = string_property(ctx, "name");
                let node_id = ctx.node_id();
                let graph = ctx.graph_mut();
                graph.change_node_input_type(node_id, 0, slot_type.clone());
                if !output_name.is_empty() {
                    graph.change_output_type(&output_name, slot_type);
                }
                true
            }
            _ => true,
        }
    }

    fn on_configure(
        &mut self,
        ctx: &mut NodeContext<'_>,
        _record: &SerializedNode,
        _registry: &NodeRegistry,
    ) -> Result<(), NodeError> {
        Self::register(ctx);
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Subgraph node
// ----------------------------------------------------------------------

/// A node whose behavior is a whole inner graph
#[derive(Debug, Default)]
pub struct SubgraphNode {
    inner: Graph,
}

impl SubgraphNode {
    /// Wrap an existing graph
    pub fn new(inner: Graph) -> Self {
        Self { inner }
    }

    /// The inner graph
    pub fn inner(&self) -> &Graph {
        &self.inner
    }

    fn sync_ports(&mut self, ctx: &mut NodeContext<'_>) {
        let events = self.inner.take_boundary_events();
        if !events.is_empty() {
            let node_id = ctx.node_id();
            ctx.graph_mut().apply_boundary_events(node_id, &events);
        }
    }

    fn sync_all_ports(&mut self, ctx: &mut NodeContext<'_>) {
        let mut events = self.inner.take_boundary_events();
        events.extend(self.inner.boundary_snapshot());
        let node_id = ctx.node_id();
        ctx.graph_mut().apply_boundary_events(node_id, &events);
    }

    fn forward_outer_triggers(&mut self, ctx: &mut NodeContext<'_>) {
        for (name, payload) in self.inner.take_outer_triggers() {
            match ctx.node().and_then(|n| n.find_output_slot(&name)) {
                Some(slot) => ctx.trigger_slot(slot, payload, None),
                None => tracing::debug!("Subgraph event '{}' has no matching output", name),
            }
        }
    }
}

fn is_enabled(value: &Value) -> bool {
    match value {
        Value::Bool(enabled) => *enabled,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
        _ => true,
    }
}

impl NodeBehavior for SubgraphNode {
    fn has_execute(&self) -> bool {
        true
    }

    fn has_action(&self) -> bool {
        true
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if !ctx.input_or_property("enabled").map_or(true, |v| is_enabled(&v)) {
            return Ok(());
        }
        let Some(node) = ctx.node() else {
            return Ok(());
        };
        let inputs: Vec<(usize, String)> = node
            .inputs()
            .iter()
            .enumerate()
            .filter(|(_, input)| !input.slot_type.is_trigger())
            .map(|(slot, input)| (slot, input.name.clone()))
            .collect();
        let outputs: Vec<(usize, String)> = node
            .outputs()
            .iter()
            .enumerate()
            .filter(|(_, output)| !output.slot_type.is_trigger())
            .map(|(slot, output)| (slot, output.name.clone()))
            .collect();

        // an empty input clears the boundary value
        for (slot, name) in inputs {
            self.inner.set_input_data(&name, ctx.input_data(slot).cloned());
        }

        self.inner
            .try_run_step(1, None)
            .map_err(|err| NodeError::Subgraph(Box::new(err)))?;
        self.sync_ports(ctx);

        for (slot, name) in outputs {
            match self.inner.output_data(&name).cloned() {
                Some(value) => ctx.set_output_data(slot, value),
                None => ctx.clear_output_data(slot),
            }
        }
        self.forward_outer_triggers(ctx);
        Ok(())
    }

    fn on_action(
        &mut self,
        ctx: &mut NodeContext<'_>,
        action: &str,
        payload: Option<&Value>,
    ) -> Result<(), NodeError> {
        let bridge = self
            .inner
            .nodes()
            .find(|n| {
                n.type_name == GRAPH_INPUT_TYPE
                    && n.property("name").and_then(Value::as_str) == Some(action)
            })
            .map(Node::id);
        if let Some(bridge) = bridge {
            self.inner
                .action_do(bridge, action, payload.cloned(), ctx.correlation_id())
                .map_err(|err| NodeError::Subgraph(Box::new(err)))?;
        }
        self.sync_ports(ctx);
        self.forward_outer_triggers(ctx);
        Ok(())
    }

    fn on_added(&mut self, ctx: &mut NodeContext<'_>) {
        self.inner.subgraph_owner = Some(ctx.node_id());
        self.inner.set_settings(ctx.graph().settings().clone());
        self.sync_all_ports(ctx);
    }

    fn on_graph_event(&mut self, _ctx: &mut NodeContext<'_>, event: GraphEvent) {
        self.inner.broadcast_event(event);
    }

    fn on_serialize(&self, record: &mut SerializedNode) {
        record.subgraph = Some(Box::new(self.inner.serialize()));
    }

    fn on_configure(
        &mut self,
        ctx: &mut NodeContext<'_>,
        record: &SerializedNode,
        registry: &NodeRegistry,
    ) -> Result<(), NodeError> {
        if let Some(data) = &record.subgraph {
            self.inner
                .configure(data, registry)
                .map_err(|err| NodeError::Custom(format!("Failed to load subgraph: {err}")))?;
        }
        self.inner.subgraph_owner = Some(ctx.node_id());
        self.sync_all_ports(ctx);
        Ok(())
    }

    fn subgraph(&self) -> Option<&Graph> {
        Some(&self.inner)
    }

    fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        Some(&mut self.inner)
    }
}

// ----------------------------------------------------------------------
// Registration
// ----------------------------------------------------------------------

/// Definition of `graph/input`
pub fn graph_input_type() -> NodeType {
    NodeType::new(GRAPH_INPUT_TYPE, "Input", GraphInputNode::default)
        .with_description("Boundary input of the enclosing graph")
        .with_output("value", "number")
        .with_property("name", json!(""), PropertyKind::String)
        .with_property("type", json!("number"), PropertyKind::String)
        .with_property("value", Value::Null, PropertyKind::Any)
}

/// Definition of `graph/output`
pub fn graph_output_type() -> NodeType {
    NodeType::new(GRAPH_OUTPUT_TYPE, "Output", GraphOutputNode::default)
        .with_description("Boundary output of the enclosing graph")
        .with_input("value", "number")
        .with_property("name", json!(""), PropertyKind::String)
        .with_property("type", json!("number"), PropertyKind::String)
}

/// Definition of `graph/subgraph`
pub fn subgraph_type() -> NodeType {
    NodeType::new(SUBGRAPH_TYPE, "Subgraph", SubgraphNode::default)
        .with_description("Runs an inner graph as a single node")
        .with_property("enabled", json!(true), PropertyKind::Bool)
}

/// Register the three boundary node types
pub fn register_subgraph_types(registry: &mut NodeRegistry) -> Result<(), RegistryError> {
    registry.register(graph_input_type())?;
    registry.register(graph_output_type())?;
    registry.register(subgraph_type())
}

fn bridge_node(node_type: NodeType, name: &str, slot_type: &str) -> Node {
    let mut node = node_type.instantiate();
    node.title = name.to_string();
    node.properties.insert("name".to_string(), json!(name));
    node.properties.insert("type".to_string(), json!(slot_type));
    if let Some(output) = node.outputs.first_mut() {
        output.slot_type = SlotType::parse(slot_type);
    }
    if let Some(input) = node.inputs.first_mut() {
        input.slot_type = SlotType::parse(slot_type);
    }
    node
}

/// A detached `graph/input` node for boundary input `name`
pub fn graph_input_node(name: &str, slot_type: &str) -> Node {
    bridge_node(graph_input_type(), name, slot_type)
}

/// A detached `graph/output` node for boundary output `name`
pub fn graph_output_node(name: &str, slot_type: &str) -> Node {
    bridge_node(graph_output_type(), name, slot_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::StepError;
    use crate::execution::StepOutcome;
    use crate::testing::{
        const_node, double_node, event_node, failing_node, recorder_log, recorder_node,
        RecordingListener,
    };

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        register_subgraph_types(&mut registry).unwrap();
        registry
    }

    /// Outer graph with `const(3) -> subgraph[x -> double -> y]`
    fn doubling_subgraph() -> (Graph, NodeId, NodeId) {
        let mut graph = Graph::new();
        let source = graph.add_node(const_node(3.0)).unwrap();
        let sub = graph
            .add_node(registry().create_node(SUBGRAPH_TYPE).unwrap())
            .unwrap();
        graph
            .edit_subgraph(sub, |inner| {
                let x = inner.add_node(graph_input_node("x", "number")).unwrap();
                let d = inner.add_node(double_node()).unwrap();
                let y = inner.add_node(graph_output_node("y", "number")).unwrap();
                inner.connect(x, 0, d, 0).unwrap();
                inner.connect(d, 0, y, 0).unwrap();
            })
            .unwrap();
        graph.connect(source, 0, sub, "x").unwrap();
        (graph, source, sub)
    }

    #[test]
    fn test_boundary_changes_are_queued_once() {
        let mut graph = Graph::new();
        let (listener, log) = RecordingListener::new();
        graph.add_listener(Box::new(listener));

        assert!(graph.add_input("x", "number", None));
        assert!(!graph.add_input("x", "string", None));
        assert!(graph.change_input_type("x", "NUMBER"));
        assert!(graph.rename_input("x", "x"));
        assert!(graph.rename_input("x", "z"));
        assert!(!graph.rename_input("missing", "w"));
        assert!(graph.change_input_type("z", "string"));
        assert!(graph.remove_input("z"));
        assert!(!graph.remove_input("z"));

        let events = graph.take_boundary_events();
        assert_eq!(
            events,
            vec![
                BoundaryEvent::InputAdded {
                    name: "x".into(),
                    slot_type: SlotType::parse("number")
                },
                BoundaryEvent::InputRenamed {
                    old: "x".into(),
                    new: "z".into()
                },
                BoundaryEvent::InputTypeChanged {
                    name: "z".into(),
                    slot_type: SlotType::parse("string")
                },
                BoundaryEvent::InputRemoved { name: "z".into() },
            ]
        );
        assert!(graph.take_boundary_events().is_empty());
        assert_eq!(log.borrow().iter().filter(|e| e.starts_with("boundary")).count(), 4);
    }

    #[test]
    fn test_rename_keeps_position_and_rejects_clash() {
        let mut graph = Graph::new();
        graph.add_output("a", "number", None);
        graph.add_output("b", "number", None);
        assert!(!graph.rename_output("a", "b"));
        assert!(graph.rename_output("a", "c"));
        let names: Vec<&str> = graph.boundary_outputs().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[test]
    fn test_boundary_values() {
        let mut graph = Graph::new();
        graph.add_input("x", "number", Some(json!(1)));
        assert_eq!(graph.input_data("x"), Some(&json!(1)));
        assert!(graph.set_input_data("x", Some(json!(2))));
        assert_eq!(graph.input_data("x"), Some(&json!(2)));
        assert!(!graph.set_input_data("nope", None));
        assert_eq!(graph.output_data("nope"), None);
    }

    #[test]
    fn test_subgraph_doubles_input() {
        let (mut graph, _, sub) = doubling_subgraph();
        let node = graph.node(sub).unwrap();
        assert_eq!(node.inputs()[0].name, "x");
        assert_eq!(node.outputs()[0].name, "y");

        assert!(graph.run_step(1, None).is_completed());
        assert_eq!(graph.node_output_data(sub, 0), Some(&json!(6.0)));
    }

    #[test]
    fn test_disconnected_input_clears_inner_value() {
        let (mut graph, _, sub) = doubling_subgraph();
        graph.run_step(1, None);
        assert_eq!(graph.node_output_data(sub, 0), Some(&json!(6.0)));

        graph.disconnect_input(sub, 0).unwrap();
        graph.run_step(1, None);
        assert_eq!(graph.node_output_data(sub, 0), None);
        let inner = graph.node(sub).unwrap().behavior().unwrap().subgraph().unwrap();
        assert_eq!(inner.input_data("x"), None);
    }

    #[test]
    fn test_disabled_subgraph_is_skipped() {
        let (mut graph, _, sub) = doubling_subgraph();
        graph.set_property(sub, "enabled", json!(false)).unwrap();
        graph.run_step(1, None);
        assert_eq!(graph.node_output_data(sub, 0), None);
    }

    #[test]
    fn test_bridge_rename_round_trips_to_ports() {
        let (mut graph, source, sub) = doubling_subgraph();
        graph
            .edit_subgraph(sub, |inner| {
                let x = inner.find_nodes_by_type(GRAPH_INPUT_TYPE)[0];
                inner.set_property(x, "name", json!("z")).unwrap();
                // same value again: no further boundary change
                inner.set_property(x, "name", json!("z")).unwrap();
                assert!(inner.input_data("x").is_none());
            })
            .unwrap();

        let node = graph.node(sub).unwrap();
        assert_eq!(node.inputs().len(), 1);
        assert_eq!(node.inputs()[0].name, "z");
        // the outer link survives a rename
        let link = node.inputs()[0].link.unwrap();
        assert_eq!(graph.link(link).unwrap().origin_id, source);

        graph.run_step(1, None);
        assert_eq!(graph.node_output_data(sub, 0), Some(&json!(6.0)));
    }

    #[test]
    fn test_bridge_retype_drops_incompatible_outer_link() {
        let (mut graph, _, sub) = doubling_subgraph();
        graph
            .edit_subgraph(sub, |inner| {
                let x = inner.find_nodes_by_type(GRAPH_INPUT_TYPE)[0];
                inner.set_property(x, "type", json!("string")).unwrap();
            })
            .unwrap();
        let input = &graph.node(sub).unwrap().inputs()[0];
        assert_eq!(input.slot_type.label(), "string");
        assert!(input.link.is_none());
    }

    #[test]
    fn test_removing_bridge_removes_port_and_link() {
        let (mut graph, source, sub) = doubling_subgraph();
        graph
            .edit_subgraph(sub, |inner| {
                let x = inner.find_nodes_by_type(GRAPH_INPUT_TYPE)[0];
                inner.remove_node(x).unwrap();
            })
            .unwrap();
        assert!(graph.node(sub).unwrap().inputs().is_empty());
        assert_eq!(graph.link_count(), 0);
        assert!(graph.node(source).unwrap().outputs()[0].links.is_empty());
    }

    #[test]
    fn test_events_cross_the_boundary() {
        let mut graph = Graph::new();
        let emitter = graph.add_node(event_node()).unwrap();
        let sub = graph
            .add_node(registry().create_node(SUBGRAPH_TYPE).unwrap())
            .unwrap();
        let sink = graph.add_node(recorder_node()).unwrap();
        graph
            .edit_subgraph(sub, |inner| {
                let go = inner.add_node(graph_input_node("go", "event")).unwrap();
                let done = inner.add_node(graph_output_node("done", "event")).unwrap();
                inner.connect(go, 0, done, 0).unwrap();
            })
            .unwrap();
        graph.connect(emitter, 0, sub, "go").unwrap();
        graph.connect(sub, "done", sink, 0).unwrap();

        graph.trigger(emitter, None, Some(json!(5))).unwrap();
        assert_eq!(
            recorder_log(&graph, sink).last().map(String::as_str),
            Some("action in 5")
        );
    }

    #[test]
    fn test_inner_fault_surfaces_on_subgraph_node() {
        let mut graph = Graph::new();
        let sub = graph
            .add_node(registry().create_node(SUBGRAPH_TYPE).unwrap())
            .unwrap();
        graph
            .edit_subgraph(sub, |inner| {
                inner.add_node(failing_node()).unwrap();
            })
            .unwrap();
        graph.start(0);
        match graph.run_step(1, None) {
            StepOutcome::Faulted(StepError::Node { node_id, source, .. }) => {
                assert_eq!(node_id, sub);
                assert!(matches!(source, NodeError::Subgraph(_)));
            }
            StepOutcome::Completed => panic!("expected a fault"),
        }
        assert!(!graph.is_running());
    }

    #[test]
    fn test_owner_is_set() {
        let (mut graph, source, sub) = doubling_subgraph();
        let inner = graph.node(sub).unwrap().behavior().unwrap().subgraph().unwrap();
        assert_eq!(inner.subgraph_owner(), Some(sub));
        assert_eq!(inner.node_count(), 3);
        assert!(graph.edit_subgraph(source, |_| ()).is_none());
    }
}
