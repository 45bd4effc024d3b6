// SPDX-License-Identifier: MIT OR Apache-2.0
//! Registry of node types: maps a type name to ports, properties and a
//! behavior factory.

use crate::evaluation::NodeBehavior;
use crate::node::{Node, NodeMode, DEFAULT_NODE_SIZE};
use crate::port::{InputPort, OutputPort, SlotType};
use crate::property::{PropertyKind, PropertySpec};
use crate::Value;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh behavior for one node instance
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn NodeBehavior> + Send + Sync>;

/// Node type definition
#[derive(Clone)]
pub struct NodeType {
    /// Unique type name, conventionally `category/name`
    pub id: String,
    /// Default title
    pub title: String,
    /// Category, derived from the type name prefix unless set
    pub category: String,
    /// Description
    pub description: String,
    /// Default input ports
    pub inputs: Vec<InputPort>,
    /// Default output ports
    pub outputs: Vec<OutputPort>,
    /// Declared properties
    pub properties: Vec<PropertySpec>,
    /// Scheduling priority given to every instance
    pub priority: i32,
    /// Initial mode
    pub mode: NodeMode,
    /// Initial size
    pub size: [f32; 2],
    factory: NodeFactory,
}

impl NodeType {
    /// Define a type with the given behavior factory
    pub fn new<F, B>(id: impl Into<String>, title: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: NodeBehavior + 'static,
    {
        let id = id.into();
        let category = id
            .rsplit_once('/')
            .map(|(category, _)| category.to_string())
            .unwrap_or_default();
        Self {
            id,
            title: title.into(),
            category,
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: Vec::new(),
            priority: 0,
            mode: NodeMode::Always,
            size: DEFAULT_NODE_SIZE,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn NodeBehavior>),
        }
    }

    /// Add a default input
    pub fn with_input(mut self, name: impl Into<String>, slot_type: impl Into<SlotType>) -> Self {
        self.inputs.push(InputPort::new(name, slot_type));
        self
    }

    /// Add a default output
    pub fn with_output(mut self, name: impl Into<String>, slot_type: impl Into<SlotType>) -> Self {
        self.outputs.push(OutputPort::new(name, slot_type));
        self
    }

    /// Declare a property
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        default: Value,
        kind: PropertyKind,
    ) -> Self {
        self.properties.push(PropertySpec::new(name, kind, default));
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the scheduling priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the initial mode
    pub fn with_mode(mut self, mode: NodeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the initial size
    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.size = [width, height];
        self
    }

    /// Instantiate a detached node of this type
    pub fn instantiate(&self) -> Node {
        let mut node = Node::new(self.id.clone(), self.title.clone()).with_mode(self.mode);
        node.inputs = self.inputs.clone();
        node.outputs = self.outputs.clone();
        node.priority = self.priority;
        node.size = self.size;
        for spec in &self.properties {
            node.add_property(spec.name.clone(), spec.default.clone(), spec.kind.clone());
        }
        node.set_behavior((self.factory)());
        node
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeType")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// Registry of available node types
#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    /// Registered node types by ID
    types: IndexMap<String, NodeType>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
        }
    }

    /// Register a node type, replacing any previous type with the same ID
    pub fn register(&mut self, node_type: NodeType) -> Result<(), RegistryError> {
        let id = node_type.id.trim();
        if id.is_empty() || id.ends_with('/') {
            return Err(RegistryError::InvalidTypeName(node_type.id.clone()));
        }
        if node_type.title.trim().is_empty() {
            return Err(RegistryError::MissingTitle(node_type.id.clone()));
        }
        if self.types.contains_key(&node_type.id) {
            tracing::debug!("Replacing node type {}", node_type.id);
        }
        self.types.insert(node_type.id.clone(), node_type);
        Ok(())
    }

    /// Remove a node type
    pub fn unregister(&mut self, id: &str) -> Option<NodeType> {
        self.types.shift_remove(id)
    }

    /// Get a node type by ID
    pub fn get(&self, id: &str) -> Option<&NodeType> {
        self.types.get(id)
    }

    /// Whether a type is registered
    pub fn contains(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a NodeType> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Distinct categories in registration order
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = Vec::new();
        for node_type in self.types.values() {
            if !categories.contains(&node_type.category.as_str()) {
                categories.push(&node_type.category);
            }
        }
        categories
    }

    /// Create a detached node from a type ID
    pub fn create_node(&self, type_id: &str) -> Option<Node> {
        self.get(type_id).map(NodeType::instantiate)
    }
}

/// Error when registering a node type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Empty or malformed type name
    #[error("Invalid node type name: '{0}'")]
    InvalidTypeName(String),

    /// The type has no title
    #[error("Node type '{0}' has no title")]
    MissingTitle(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ConstNode;
    use serde_json::json;

    fn const_type() -> NodeType {
        NodeType::new("basic/const", "Const", ConstNode::default)
            .with_output("value", "number")
            .with_property("value", json!(1.0), PropertyKind::Number)
            .with_priority(2)
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = NodeRegistry::new();
        registry.register(const_type()).unwrap();

        let node = registry.create_node("basic/const").unwrap();
        assert_eq!(node.type_name, "basic/const");
        assert_eq!(node.title, "Const");
        assert_eq!(node.outputs().len(), 1);
        assert_eq!(node.property("value"), Some(&json!(1.0)));
        assert_eq!(node.priority, 2);
        assert!(node.has_execute());
        assert!(registry.create_node("basic/missing").is_none());
    }

    #[test]
    fn test_invalid_registration() {
        let mut registry = NodeRegistry::new();
        let bad = NodeType::new("", "Nothing", ConstNode::default);
        assert_eq!(
            registry.register(bad),
            Err(RegistryError::InvalidTypeName(String::new()))
        );
        let untitled = NodeType::new("basic/untitled", " ", ConstNode::default);
        assert!(matches!(
            registry.register(untitled),
            Err(RegistryError::MissingTitle(_))
        ));
    }

    #[test]
    fn test_categories_and_unregister() {
        let mut registry = NodeRegistry::new();
        registry.register(const_type()).unwrap();
        registry
            .register(NodeType::new("math/double", "Double", ConstNode::default))
            .unwrap();
        assert_eq!(registry.categories(), vec!["basic", "math"]);
        assert_eq!(registry.types_in_category("math").count(), 1);

        assert!(registry.unregister("math/double").is_some());
        assert!(!registry.contains("math/double"));
    }
}
