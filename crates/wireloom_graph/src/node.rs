// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.

use crate::evaluation::NodeBehavior;
use crate::geometry::{Bounded, Rect};
use crate::port::{InputPort, OutputPort, SlotType};
use crate::property::{PropertyKind, PropertySpec};
use crate::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Height of the title bar, included in a node's bounding box
pub const NODE_TITLE_HEIGHT: f32 = 30.0;
/// Width of a collapsed node
pub const NODE_COLLAPSED_WIDTH: f32 = 80.0;
/// Size given to nodes whose type does not declare one
pub const DEFAULT_NODE_SIZE: [f32; 2] = [140.0, 60.0];

/// Identifier of a node, unique within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl NodeId {
    /// Marker for a node that was never added to a graph
    pub const UNASSIGNED: NodeId = NodeId(-1);

    /// Whether a graph has assigned this ID
    pub fn is_assigned(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// When a node runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMode {
    /// Every step
    #[default]
    Always,
    /// Only when an event reaches one of its action inputs
    OnEvent,
    /// Muted
    Never,
    /// Executes its data hook when triggered
    OnTrigger,
    /// Executes when a downstream node pulls its output
    OnRequest,
}

/// Editor flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFlags {
    /// Drawn as a title bar only
    pub collapsed: bool,
    /// Cannot be dragged
    pub pinned: bool,
}

/// A node instance
pub struct Node {
    pub(crate) id: NodeId,
    /// Registered type name
    pub type_name: String,
    /// Display title
    pub title: String,
    /// Position in graph space
    pub pos: [f32; 2],
    /// Size in graph space
    pub size: [f32; 2],
    pub(crate) mode: NodeMode,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    pub(crate) properties: IndexMap<String, Value>,
    pub(crate) property_specs: IndexMap<String, PropertySpec>,
    /// Editor flags
    pub flags: NodeFlags,
    pub(crate) order: usize,
    pub(crate) level: usize,
    /// Scheduling priority; lower runs first among otherwise unordered nodes
    pub priority: i32,
    /// Title color
    pub color: Option<String>,
    /// Body color
    pub bgcolor: Option<String>,
    /// Status box color
    pub boxcolor: Option<String>,
    /// Render shape name
    pub shape: Option<String>,
    /// Whether `Graph::remove_node` may remove it
    pub removable: bool,
    /// Set when the node could not be reconstructed
    pub has_errors: bool,
    /// Widget state kept for round-tripping
    pub widgets_values: Option<Vec<Value>>,
    pub(crate) last_execution_id: Option<Uuid>,
    pub(crate) last_action_id: Option<Uuid>,
    pub(crate) executes: bool,
    pub(crate) handles_actions: bool,
    pub(crate) behavior: Option<Box<dyn NodeBehavior>>,
}

impl Node {
    /// Create a detached node with no behavior
    pub fn new(type_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: NodeId::UNASSIGNED,
            type_name: type_name.into(),
            title: title.into(),
            pos: [0.0, 0.0],
            size: DEFAULT_NODE_SIZE,
            mode: NodeMode::Always,
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: IndexMap::new(),
            property_specs: IndexMap::new(),
            flags: NodeFlags::default(),
            order: 0,
            level: 0,
            priority: 0,
            color: None,
            bgcolor: None,
            boxcolor: None,
            shape: None,
            removable: true,
            has_errors: false,
            widgets_values: None,
            last_execution_id: None,
            last_action_id: None,
            executes: false,
            handles_actions: false,
            behavior: None,
        }
    }

    /// Attach a behavior, caching its capabilities
    pub fn with_behavior(mut self, behavior: Box<dyn NodeBehavior>) -> Self {
        self.set_behavior(behavior);
        self
    }

    pub(crate) fn set_behavior(&mut self, behavior: Box<dyn NodeBehavior>) {
        self.executes = behavior.has_execute();
        self.handles_actions = behavior.has_action();
        self.behavior = Some(behavior);
    }

    /// Preset the ID (honored by `Graph::add_node` unless it collides)
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.pos = [x, y];
        self
    }

    /// Set the execution mode of a detached node
    pub fn with_mode(mut self, mode: NodeMode) -> Self {
        self.mode = mode;
        self
    }

    /// ID assigned by the graph, or `NodeId::UNASSIGNED`
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Execution mode
    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    /// Position in the last computed execution order
    pub fn order(&self) -> usize {
        self.order
    }

    /// Longest-path depth from a source node, filled by layout
    pub fn level(&self) -> usize {
        self.level
    }

    /// Whether the node has a data-execution hook
    pub fn has_execute(&self) -> bool {
        self.executes
    }

    /// Whether the node has an action hook
    pub fn has_action(&self) -> bool {
        self.handles_actions
    }

    /// Correlation ID of the most recent execution
    pub fn last_execution_id(&self) -> Option<Uuid> {
        self.last_execution_id
    }

    /// Correlation ID of the most recent action
    pub fn last_action_id(&self) -> Option<Uuid> {
        self.last_action_id
    }

    /// Behavior object, if any
    pub fn behavior(&self) -> Option<&dyn NodeBehavior> {
        self.behavior.as_deref()
    }

    /// Input slots
    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    /// Output slots
    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    /// Get an input port by index
    pub fn input(&self, slot: usize) -> Option<&InputPort> {
        self.inputs.get(slot)
    }

    /// Get an output port by index
    pub fn output(&self, slot: usize) -> Option<&OutputPort> {
        self.outputs.get(slot)
    }

    /// Slot number of the input with this name
    pub fn find_input_slot(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name == name)
    }

    /// Slot number of the output with this name
    pub fn find_output_slot(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name == name)
    }

    /// First input accepting trigger actions
    pub fn find_action_input(&self) -> Option<usize> {
        self.inputs.iter().position(|p| p.slot_type.is_action())
    }

    /// Append an input. Adding never touches links, so detached and attached nodes
    /// may both use it; attached nodes should prefer `Graph::add_node_input`.
    pub fn add_input(&mut self, name: impl Into<String>, slot_type: impl Into<SlotType>) -> usize {
        self.inputs.push(InputPort::new(name, slot_type));
        self.inputs.len() - 1
    }

    /// Append an output
    pub fn add_output(&mut self, name: impl Into<String>, slot_type: impl Into<SlotType>) -> usize {
        self.outputs.push(OutputPort::new(name, slot_type));
        self.outputs.len() - 1
    }

    /// Declare a property and set it to its default
    pub fn add_property(&mut self, name: impl Into<String>, default: Value, kind: PropertyKind) {
        let spec = PropertySpec::new(name, kind, default);
        self.properties.insert(spec.name.clone(), spec.default.clone());
        self.property_specs.insert(spec.name.clone(), spec);
    }

    /// Property value
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// All properties in declaration order
    pub fn properties(&self) -> &IndexMap<String, Value> {
        &self.properties
    }

    /// Declared schema of a property
    pub fn property_spec(&self, name: &str) -> Option<&PropertySpec> {
        self.property_specs.get(name)
    }

    /// Last value written to an output
    pub fn output_value(&self, slot: usize) -> Option<&Value> {
        self.outputs.get(slot)?.value.as_ref()
    }

    /// Snap the position to a grid
    pub fn align_to_grid(&mut self, grid: f32) {
        if grid <= 0.0 {
            return;
        }
        self.pos[0] = (self.pos[0] / grid).round() * grid;
        self.pos[1] = (self.pos[1] / grid).round() * grid;
    }
}

impl Bounded for Node {
    fn bounding(&self) -> Rect {
        let width = if self.flags.collapsed {
            NODE_COLLAPSED_WIDTH
        } else {
            self.size[0]
        };
        let height = if self.flags.collapsed {
            NODE_TITLE_HEIGHT
        } else {
            self.size[1] + NODE_TITLE_HEIGHT
        };
        Rect::new(self.pos[0], self.pos[1] - NODE_TITLE_HEIGHT, width, height)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("title", &self.title)
            .field("mode", &self.mode)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("properties", &self.properties)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}
