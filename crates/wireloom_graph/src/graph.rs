// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes, links and groups.

use crate::evaluation::{NodeBehavior, NodeContext};
use crate::events::PendingTrigger;
use crate::execution::{GraphStatus, RunSchedule};
use crate::geometry::Bounded;
use crate::group::Group;
use crate::link::{Link, LinkId};
use crate::listener::GraphListener;
use crate::node::{Node, NodeId, NodeMode};
use crate::port::SlotType;
use crate::property::PropertyError;
use crate::settings::{GraphConfig, GraphSettings};
use crate::subgraph::{BoundaryEvent, BoundarySlot};
use crate::Value;
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// A node graph
pub struct Graph {
    pub(crate) nodes: IndexMap<NodeId, Node>,
    pub(crate) links: IndexMap<LinkId, Link>,
    pub(crate) groups: Vec<Group>,
    pub(crate) inputs: IndexMap<String, BoundarySlot>,
    pub(crate) outputs: IndexMap<String, BoundarySlot>,
    pub(crate) last_node_id: i64,
    pub(crate) last_link_id: u64,
    /// Per-graph options
    pub config: GraphConfig,
    /// Host metadata, preserved verbatim
    pub extra: Value,
    pub(crate) settings: GraphSettings,
    pub(crate) nodes_in_order: Vec<NodeId>,
    pub(crate) nodes_executable: Option<Vec<NodeId>>,
    pub(crate) version: u64,
    pub(crate) status: GraphStatus,
    pub(crate) schedule: Option<RunSchedule>,
    pub(crate) run_generation: u64,
    pub(crate) iteration: u64,
    pub(crate) start_time: Instant,
    pub(crate) last_update_time: Instant,
    pub(crate) global_time: f64,
    pub(crate) fixed_time: f64,
    pub(crate) elapsed_time: f64,
    pub(crate) execution_time: f64,
    pub(crate) nodes_executing: IndexSet<NodeId>,
    pub(crate) nodes_actioning: IndexSet<NodeId>,
    pub(crate) pending_triggers: VecDeque<PendingTrigger>,
    pub(crate) dispatching: bool,
    pub(crate) boundary_events: Vec<BoundaryEvent>,
    pub(crate) outer_triggers: Vec<(String, Option<Value>)>,
    pub(crate) subgraph_owner: Option<NodeId>,
    pub(crate) listeners: Vec<Box<dyn GraphListener>>,
}

impl Graph {
    /// Create a new empty graph with default settings
    pub fn new() -> Self {
        Self::with_settings(GraphSettings::default())
    }

    /// Create a new empty graph
    pub fn with_settings(settings: GraphSettings) -> Self {
        let now = Instant::now();
        Self {
            nodes: IndexMap::new(),
            links: IndexMap::new(),
            groups: Vec::new(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            last_node_id: 0,
            last_link_id: 0,
            config: GraphConfig::default(),
            extra: Value::Object(Default::default()),
            settings,
            nodes_in_order: Vec::new(),
            nodes_executable: None,
            version: 0,
            status: GraphStatus::Stopped,
            schedule: None,
            run_generation: 0,
            iteration: 0,
            start_time: now,
            last_update_time: now,
            global_time: 0.0,
            fixed_time: 0.0,
            elapsed_time: 0.0,
            execution_time: 0.0,
            nodes_executing: IndexSet::new(),
            nodes_actioning: IndexSet::new(),
            pending_triggers: VecDeque::new(),
            dispatching: false,
            boundary_events: Vec::new(),
            outer_triggers: Vec::new(),
            subgraph_owner: None,
            listeners: Vec::new(),
        }
    }

    /// Engine settings
    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Replace the engine settings
    pub fn set_settings(&mut self, settings: GraphSettings) {
        self.settings = settings;
    }

    /// Register an observer
    pub fn add_listener(&mut self, listener: Box<dyn GraphListener>) {
        self.listeners.push(listener);
    }

    /// Structural change counter
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The subgraph node owning this graph, if it is a subgraph body
    pub fn subgraph_owner(&self) -> Option<NodeId> {
        self.subgraph_owner
    }

    /// Highest node ID handed out so far
    pub fn last_node_id(&self) -> i64 {
        self.last_node_id
    }

    /// Highest link ID handed out so far
    pub fn last_link_id(&self) -> u64 {
        self.last_link_id
    }

    pub(crate) fn touch(&mut self) {
        self.version += 1;
        self.mark_dirty();
    }

    pub(crate) fn mark_dirty(&mut self) {
        for listener in &mut self.listeners {
            listener.on_dirty();
        }
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Add a node and recompute the execution order
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        self.insert_node(node, false)
    }

    /// Add a node without recomputing the execution order. Call
    /// `update_execution_order` once the batch is complete.
    pub fn add_node_deferred(&mut self, node: Node) -> Result<NodeId, GraphError> {
        self.insert_node(node, true)
    }

    fn insert_node(
        &mut self,
        mut node: Node,
        skip_compute_order: bool,
    ) -> Result<NodeId, GraphError> {
        if self.nodes.len() >= self.settings.max_nodes {
            return Err(GraphError::TooManyNodes(self.settings.max_nodes));
        }

        if !node.id.is_assigned() {
            self.last_node_id += 1;
            node.id = NodeId(self.last_node_id);
        } else if self.nodes.contains_key(&node.id) {
            self.last_node_id += 1;
            tracing::warn!(
                "Node id {} already in use, reassigning to {}",
                node.id,
                NodeId(self.last_node_id)
            );
            node.id = NodeId(self.last_node_id);
        } else if node.id.0 > self.last_node_id {
            self.last_node_id = node.id.0;
        }

        if self.config.align_to_grid {
            node.align_to_grid(self.settings.grid_size);
        }

        let id = node.id;
        tracing::trace!("Adding node {} ({})", id, node.type_name);
        self.nodes.insert(id, node);
        self.with_behavior(id, None, |behavior, ctx| behavior.on_added(ctx));

        // deferred adds are drained by whoever finishes the batch
        if !skip_compute_order {
            self.update_execution_order();
            self.drain_hook_triggers();
        }

        self.touch();
        if let Some(node) = self.nodes.get(&id) {
            for listener in &mut self.listeners {
                listener.on_node_added(node);
            }
        }
        Ok(id)
    }

    /// Remove a node, severing all its links first.
    ///
    /// Returns the detached node, or `None` if it is unknown or not removable.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.get(&node_id)?;
        if !node.removable {
            return None;
        }
        let input_count = node.inputs.len();
        let output_count = node.outputs.len();

        for slot in 0..input_count {
            self.disconnect_input(node_id, slot);
        }
        for slot in 0..output_count {
            self.disconnect_output(node_id, slot, None);
        }

        self.with_behavior(node_id, None, |behavior, ctx| behavior.on_removed(ctx));

        let node = self.nodes.shift_remove(&node_id)?;
        for listener in &mut self.listeners {
            listener.on_node_removed(node_id);
        }
        self.nodes_executing.shift_remove(&node_id);
        self.nodes_actioning.shift_remove(&node_id);
        self.touch();
        self.update_execution_order();
        tracing::trace!("Removed node {}", node_id);
        Some(node)
    }

    /// Remove everything and stop the graph
    pub fn clear(&mut self) {
        self.stop();
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.with_behavior(id, None, |behavior, ctx| behavior.on_removed(ctx));
        }
        self.nodes.clear();
        self.links.clear();
        self.groups.clear();
        self.inputs.clear();
        self.outputs.clear();
        self.last_node_id = 0;
        self.last_link_id = 0;
        self.nodes_in_order.clear();
        self.nodes_executable = None;
        self.nodes_executing.clear();
        self.nodes_actioning.clear();
        self.pending_triggers.clear();
        self.boundary_events.clear();
        self.outer_triggers.clear();
        self.iteration = 0;
        self.global_time = 0.0;
        self.fixed_time = 0.0;
        self.extra = Value::Object(Default::default());
        self.touch();
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable node by ID
    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Whether the node belongs to this graph
    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get all nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes of a registered type
    pub fn find_nodes_by_type(&self, type_name: &str) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.type_name == type_name)
            .map(|n| n.id)
            .collect()
    }

    /// First node with this title
    pub fn find_node_by_title(&self, title: &str) -> Option<NodeId> {
        self.nodes.values().find(|n| n.title == title).map(|n| n.id)
    }

    /// All nodes with this title
    pub fn find_nodes_by_title(&self, title: &str) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.title == title)
            .map(|n| n.id)
            .collect()
    }

    /// Topmost node under a graph-space point
    pub fn node_at(&self, x: f32, y: f32) -> Option<NodeId> {
        self.nodes
            .values()
            .rev()
            .find(|n| n.contains_point(x, y))
            .map(|n| n.id)
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Get a link by ID
    pub fn link(&self, link_id: LinkId) -> Option<&Link> {
        self.links.get(&link_id)
    }

    /// Get all links
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// Get the number of links
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Links touching a node
    pub fn links_for_node(&self, node_id: NodeId) -> impl Iterator<Item = &Link> {
        self.links.values().filter(move |l| l.involves_node(node_id))
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    /// Value carried into input `slot`; `None` when the input is not connected
    pub fn node_input_data(&self, node_id: NodeId, slot: usize) -> Option<&Value> {
        let link_id = self.nodes.get(&node_id)?.inputs.get(slot)?.link?;
        self.links.get(&link_id)?.data.as_ref()
    }

    /// Last value written to output `slot`
    pub fn node_output_data(&self, node_id: NodeId, slot: usize) -> Option<&Value> {
        self.nodes.get(&node_id)?.output_value(slot)
    }

    /// Write output `slot` and propagate the value to its links
    pub fn set_node_output_data(&mut self, node_id: NodeId, slot: usize, value: Option<Value>) {
        let Some(output) = self
            .nodes
            .get_mut(&node_id)
            .and_then(|n| n.outputs.get_mut(slot))
        else {
            return;
        };
        output.value = value.clone();
        for link_id in &output.links {
            if let Some(link) = self.links.get_mut(link_id) {
                link.data = value.clone();
            }
        }
    }

    // ------------------------------------------------------------------
    // Properties and modes
    // ------------------------------------------------------------------

    /// Set a node property, validating it against the declared schema.
    ///
    /// Setting the current value again is a no-op. The node's behavior may veto
    /// the change, in which case the previous value is restored.
    pub fn set_property(
        &mut self,
        node_id: NodeId,
        name: &str,
        value: Value,
    ) -> Result<(), PropertyError> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(PropertyError::NodeNotFound(node_id))?;
        if let Some(spec) = node.property_specs.get(name) {
            spec.validate(&value)?;
        }
        if node.properties.get(name) == Some(&value) {
            return Ok(());
        }
        let previous = node.properties.insert(name.to_string(), value.clone());

        let accepted = self
            .with_behavior(node_id, None, |behavior, ctx| {
                behavior.on_property_changed(ctx, name, &value, previous.as_ref())
            })
            .unwrap_or(true);

        if !accepted {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                match previous {
                    Some(previous) => {
                        node.properties.insert(name.to_string(), previous);
                    }
                    None => {
                        node.properties.shift_remove(name);
                    }
                }
            }
            return Err(PropertyError::Rejected(name.to_string()));
        }

        self.touch();
        for listener in &mut self.listeners {
            listener.on_property_changed(node_id, name, &value);
        }
        Ok(())
    }

    /// Change a node's execution mode.
    ///
    /// Switching to ON_TRIGGER guarantees an `onTrigger` action input and, when
    /// `do_add_trigger_slots` is on, an `onExecuted` event output.
    pub fn change_mode(&mut self, node_id: NodeId, mode: NodeMode) -> bool {
        let add_executed = self.settings.do_add_trigger_slots;
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };
        let mut changed = node.mode != mode;
        if mode == NodeMode::OnTrigger {
            if node.find_input_slot(ON_TRIGGER_INPUT).is_none() {
                node.add_input(ON_TRIGGER_INPUT, SlotType::action());
                changed = true;
            }
            if add_executed && node.find_output_slot(ON_EXECUTED_OUTPUT).is_none() {
                node.add_output(ON_EXECUTED_OUTPUT, SlotType::event());
                changed = true;
            }
        }
        node.mode = mode;
        if changed {
            self.touch();
        }
        true
    }

    // ------------------------------------------------------------------
    // Behavior access
    // ------------------------------------------------------------------

    /// Run `f` with the node's behavior detached and a context over this graph.
    ///
    /// Returns `None` if the node is unknown or its behavior is already in use
    /// further up the call stack.
    pub(crate) fn with_behavior<R>(
        &mut self,
        node_id: NodeId,
        correlation: Option<Uuid>,
        f: impl FnOnce(&mut dyn NodeBehavior, &mut NodeContext<'_>) -> R,
    ) -> Option<R> {
        let mut behavior = self.nodes.get_mut(&node_id)?.behavior.take()?;
        let result = {
            let mut ctx = NodeContext::new(self, node_id, correlation);
            f(behavior.as_mut(), &mut ctx)
        };
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.behavior = Some(behavior);
        }
        Some(result)
    }
}

/// Name of the trigger input created by `change_mode(OnTrigger)`
pub const ON_TRIGGER_INPUT: &str = "onTrigger";
/// Name of the trigger output fired after a node executes
pub const ON_EXECUTED_OUTPUT: &str = "onExecuted";

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("links", &self.links.len())
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("status", &self.status)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Error from structural graph operations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The node ceiling was reached
    #[error("Graph already holds the maximum of {0} nodes")]
    TooManyNodes(usize),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// No registered type with this name
    #[error("Node type not registered: {0}")]
    UnknownType(String),
}
