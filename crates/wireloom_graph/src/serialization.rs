// SPDX-License-Identifier: MIT OR Apache-2.0
//! Saving and restoring graphs.
//!
//! The JSON form is the interchange format; RON is accepted for files with a
//! `.ron` extension.

use crate::evaluation::{ConnectionChange, MissingNode, NodeError};
use crate::graph::{Graph, GraphError};
use crate::group::Group;
use crate::link::{Link, LinkId, SerializedLink};
use crate::node::{Node, NodeFlags, NodeId, NodeMode};
use crate::port::{InputPort, OutputPort, PortDirection};
use crate::registry::NodeRegistry;
use crate::settings::{GraphConfig, GraphSettings};
use crate::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Format tag written into every saved graph
pub const FORMAT_VERSION: &str = "0.4";

fn format_version() -> String {
    FORMAT_VERSION.to_string()
}

/// A saved graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedGraph {
    /// Highest node ID handed out
    pub last_node_id: i64,
    /// Highest link ID handed out
    pub last_link_id: u64,
    /// Nodes in insertion order
    #[serde(default)]
    pub nodes: Vec<SerializedNode>,
    /// Links as fixed-order tuples
    #[serde(default)]
    pub links: Vec<SerializedLink>,
    /// Visual groups
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Per-graph options
    #[serde(default)]
    pub config: GraphConfig,
    /// Host metadata, kept verbatim
    #[serde(default)]
    pub extra: Value,
    /// Informational format tag
    #[serde(default = "format_version")]
    pub version: String,
}

/// A saved node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    /// Node ID
    pub id: NodeId,
    /// Registered type name
    #[serde(rename = "type")]
    pub type_name: String,
    /// Title
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Position
    #[serde(default)]
    pub pos: [f32; 2],
    /// Size
    #[serde(default)]
    pub size: [f32; 2],
    /// Position in the execution order when saved
    #[serde(default)]
    pub order: usize,
    /// Execution mode
    #[serde(default)]
    pub mode: NodeMode,
    /// Instance priority
    #[serde(default, skip_serializing_if = "is_zero")]
    pub priority: i32,
    /// Title color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Body color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgcolor: Option<String>,
    /// Status box color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boxcolor: Option<String>,
    /// Render shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    /// Editor flags
    #[serde(default)]
    pub flags: NodeFlags,
    /// Inputs with their link IDs
    #[serde(default)]
    pub inputs: Vec<InputPort>,
    /// Outputs with their link IDs
    #[serde(default)]
    pub outputs: Vec<OutputPort>,
    /// Property values
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
    /// Widget state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets_values: Option<Vec<Value>>,
    /// Inner graph of a subgraph node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgraph: Option<Box<SerializedGraph>>,
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

/// What `configure` could not restore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureReport {
    /// Type names with no registered type; placeholders were created
    pub missing_types: Vec<String>,
    /// Nodes whose own configure hook failed
    pub failed_nodes: Vec<NodeId>,
}

impl ConfigureReport {
    /// Whether everything was restored
    pub fn is_clean(&self) -> bool {
        self.missing_types.is_empty() && self.failed_nodes.is_empty()
    }
}

impl SerializedGraph {
    /// Encode as JSON
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON
    pub fn from_json(content: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Encode as RON
    pub fn to_ron(&self) -> Result<String, SerializationError> {
        let config = ron::ser::PrettyConfig::default();
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Decode from RON
    pub fn from_ron(content: &str) -> Result<Self, SerializationError> {
        Ok(ron::from_str(content)?)
    }

    /// Read a graph file; `.ron` files are RON, everything else JSON
    pub fn load(path: &Path) -> Result<Self, SerializationError> {
        let content = std::fs::read_to_string(path)?;
        if is_ron(path) {
            Self::from_ron(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// Write a graph file in the format its extension selects
    pub fn save(&self, path: &Path) -> Result<(), SerializationError> {
        let content = if is_ron(path) { self.to_ron()? } else { self.to_json()? };
        std::fs::write(path, content)?;
        tracing::debug!("Saved graph to {}", path.display());
        Ok(())
    }
}

fn is_ron(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ron"))
}

impl Graph {
    /// Snapshot the graph
    pub fn serialize(&self) -> SerializedGraph {
        SerializedGraph {
            last_node_id: self.last_node_id,
            last_link_id: self.last_link_id,
            nodes: self.nodes.values().map(serialize_node).collect(),
            links: self.links.values().map(Link::to_serialized).collect(),
            groups: self.groups.clone(),
            config: self.config.clone(),
            extra: self.extra.clone(),
            version: FORMAT_VERSION.to_string(),
        }
    }

    /// Snapshot one node
    pub fn serialize_node(&self, node_id: NodeId) -> Option<SerializedNode> {
        self.nodes.get(&node_id).map(serialize_node)
    }

    /// Replace the contents of this graph with `data`.
    ///
    /// Nodes of unknown types become error-marked placeholders that keep their
    /// record, so the rest of the graph stays usable and saves back intact.
    pub fn configure(
        &mut self,
        data: &SerializedGraph,
        registry: &NodeRegistry,
    ) -> Result<ConfigureReport, GraphError> {
        self.clear();
        self.config = data.config.clone();

        // links first so nodes can resolve them while configuring
        self.links = data
            .links
            .iter()
            .map(|record| (record.0, Link::from(record)))
            .collect();

        let mut report = ConfigureReport::default();
        let mut created = Vec::with_capacity(data.nodes.len());
        for record in &data.nodes {
            let node = match registry.create_node(&record.type_name) {
                Some(node) => node,
                None => {
                    tracing::warn!("Node type not found: {}", record.type_name);
                    if !report.missing_types.contains(&record.type_name) {
                        report.missing_types.push(record.type_name.clone());
                    }
                    let mut node = Node::new(record.type_name.clone(), record.title.clone())
                        .with_behavior(Box::new(MissingNode {
                            subgraph: record.subgraph.clone(),
                        }));
                    node.has_errors = true;
                    node
                }
            };
            let id = self.add_node_deferred(node.with_id(record.id))?;
            created.push((id, record));
        }

        for (id, record) in created {
            if let Err(err) = self.configure_node(id, record, registry) {
                tracing::warn!("Failed to configure node {}: {}", id, err);
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.has_errors = true;
                }
                report.failed_nodes.push(id);
            }
        }

        self.groups = data.groups.clone();
        self.last_node_id = self.last_node_id.max(data.last_node_id);
        let highest_link = self.links.keys().map(|id| id.0).max().unwrap_or(0);
        self.last_link_id = data.last_link_id.max(highest_link);
        self.update_execution_order();
        self.extra = data.extra.clone();
        self.drain_hook_triggers();
        self.touch();

        for listener in &mut self.listeners {
            listener.on_configured();
        }
        tracing::debug!(
            "Configured graph with {} nodes and {} links",
            self.nodes.len(),
            self.links.len()
        );
        Ok(report)
    }

    /// Apply a record's common fields, then the behavior's own `on_configure`
    fn configure_node(
        &mut self,
        node_id: NodeId,
        record: &SerializedNode,
        registry: &NodeRegistry,
    ) -> Result<(), NodeError> {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return Ok(());
        };
        if !record.title.is_empty() {
            node.title = record.title.clone();
        }
        node.pos = record.pos;
        node.size = record.size;
        node.order = record.order;
        node.mode = record.mode;
        node.priority = record.priority;
        node.color = record.color.clone();
        node.bgcolor = record.bgcolor.clone();
        node.boxcolor = record.boxcolor.clone();
        node.shape = record.shape.clone();
        node.flags = record.flags;
        node.widgets_values = record.widgets_values.clone();
        node.inputs = record.inputs.clone();
        node.outputs = record.outputs.clone();

        let links = &self.links;
        for input in &mut node.inputs {
            if input.link.is_some_and(|id| !links.contains_key(&id)) {
                tracing::warn!("Node {} input '{}' references a missing link", node_id, input.name);
                input.link = None;
            }
        }
        for output in &mut node.outputs {
            output.links.retain(|id| links.contains_key(id));
        }

        for (name, value) in &record.properties {
            if let Some(spec) = node.property_specs.get(name) {
                if let Err(err) = spec.validate(value) {
                    tracing::warn!("Node {}: {}", node_id, err);
                    continue;
                }
            }
            node.properties.insert(name.clone(), value.clone());
        }

        let changes: Vec<(PortDirection, usize, LinkId)> = node
            .inputs
            .iter()
            .enumerate()
            .filter_map(|(slot, input)| input.link.map(|link| (PortDirection::Input, slot, link)))
            .chain(node.outputs.iter().enumerate().flat_map(|(slot, output)| {
                output
                    .links
                    .iter()
                    .map(move |link| (PortDirection::Output, slot, *link))
            }))
            .collect();

        let result = self.with_behavior(node_id, None, |behavior, ctx| {
            for (direction, slot, link) in changes {
                behavior.on_connections_change(
                    ctx,
                    ConnectionChange {
                        direction,
                        slot,
                        connected: true,
                        link,
                    },
                );
            }
            behavior.on_configure(ctx, record, registry)
        });
        result.unwrap_or(Ok(()))
    }

    /// Duplicate a node into this graph, without its links.
    ///
    /// The copy is created from the registry and restored from the original's
    /// record, so subgraph nodes get a deep copy of their inner graph.
    pub fn clone_node(
        &mut self,
        node_id: NodeId,
        registry: &NodeRegistry,
    ) -> Result<NodeId, GraphError> {
        let mut record = self
            .serialize_node(node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        for input in &mut record.inputs {
            input.link = None;
        }
        for output in &mut record.outputs {
            output.links.clear();
        }
        record.pos = [record.pos[0] + 10.0, record.pos[1] + 10.0];

        let node = registry
            .create_node(&record.type_name)
            .ok_or_else(|| GraphError::UnknownType(record.type_name.clone()))?;
        let id = self.add_node(node)?;
        if let Err(err) = self.configure_node(id, &record, registry) {
            tracing::warn!("Failed to configure clone of {}: {}", node_id, err);
        }
        self.update_execution_order();
        Ok(id)
    }
}

fn serialize_node(node: &Node) -> SerializedNode {
    let mut record = SerializedNode {
        id: node.id,
        type_name: node.type_name.clone(),
        title: node.title.clone(),
        pos: node.pos,
        size: node.size,
        order: node.order,
        mode: node.mode,
        priority: node.priority,
        color: node.color.clone(),
        bgcolor: node.bgcolor.clone(),
        boxcolor: node.boxcolor.clone(),
        shape: node.shape.clone(),
        flags: node.flags,
        inputs: node.inputs.clone(),
        outputs: node
            .outputs
            .iter()
            .map(|output| OutputPort {
                value: None,
                ..output.clone()
            })
            .collect(),
        properties: node.properties.clone(),
        widgets_values: node.widgets_values.clone(),
        subgraph: None,
    };
    if let Some(behavior) = node.behavior.as_deref() {
        behavior.on_serialize(&mut record);
    }
    record
}

/// Error reading or writing a saved graph
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// File access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode or decode failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// RON text could not be parsed
    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),

    /// RON output could not be produced
    #[error("RON write error: {0}")]
    RonWrite(#[from] ron::Error),
}

/// Convenience: load a file and configure a fresh graph from it
pub fn load_graph(
    path: &Path,
    registry: &NodeRegistry,
    settings: GraphSettings,
) -> Result<(Graph, ConfigureReport), LoadError> {
    let data = SerializedGraph::load(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut graph = Graph::with_settings(settings);
    let report = graph.configure(&data, registry)?;
    Ok((graph, report))
}

/// Error from [`load_graph`]
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file could not be read or parsed
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Cause
        #[source]
        source: SerializationError,
    },

    /// The graph could not be rebuilt
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::subgraph::{
        graph_input_node, graph_output_node, register_subgraph_types, SUBGRAPH_TYPE,
    };
    use crate::testing::{const_node, register_test_types, RecordingListener};
    use serde_json::json;

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        register_test_types(&mut registry);
        register_subgraph_types(&mut registry).unwrap();
        registry
    }

    fn sample(registry: &NodeRegistry) -> Graph {
        let mut graph = Graph::new();
        let a = graph.add_node(registry.create_node("test/const").unwrap()).unwrap();
        let b = graph.add_node(registry.create_node("test/double").unwrap()).unwrap();
        let c = graph.add_node(registry.create_node("test/double").unwrap()).unwrap();
        graph.node_mut(b).unwrap().pos = [200.0, 40.0];
        graph.set_property(a, "value", json!(2.5)).unwrap();
        graph.connect(a, 0, b, 0).unwrap();
        graph.connect(b, 0, c, 0).unwrap();
        graph.add_group(Group::new("Area", Rect::new(0.0, 0.0, 400.0, 200.0)));
        graph.extra = json!({ "author": "test" });
        graph
    }

    #[test]
    fn test_round_trip_reproduces_graph() {
        let registry = registry();
        let original = sample(&registry);
        let data = original.serialize();

        let json = data.to_json().unwrap();
        let decoded = SerializedGraph::from_json(&json).unwrap();
        assert_eq!(decoded, data);

        let mut restored = Graph::new();
        let report = restored.configure(&decoded, &registry).unwrap();
        assert!(report.is_clean());

        assert_eq!(restored.node_count(), original.node_count());
        for node in original.nodes() {
            let copy = restored.node(node.id()).unwrap();
            assert_eq!(copy.type_name, node.type_name);
            assert_eq!(copy.properties(), node.properties());
            assert_eq!(copy.pos, node.pos);
        }
        let endpoints = |g: &Graph| {
            g.links()
                .map(|l| {
                    let slots = (l.origin_slot, l.target_slot);
                    (l.id, l.origin_id, l.target_id, slots, l.link_type.clone())
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(endpoints(&restored), endpoints(&original));
        assert_eq!(restored.groups(), original.groups());
        assert_eq!(restored.nodes_in_order(), original.nodes_in_order());
        assert_eq!(restored.extra, original.extra);
        assert_eq!(restored.serialize(), data);
    }

    #[test]
    fn test_ron_round_trip() {
        let registry = registry();
        let original = sample(&registry);
        let data = original.serialize();

        let ron = data.to_ron().unwrap();
        let decoded = SerializedGraph::from_ron(&ron).unwrap();
        assert_eq!(decoded, data);

        let mut restored = Graph::new();
        assert!(restored.configure(&decoded, &registry).unwrap().is_clean());
        assert_eq!(restored.serialize(), data);
        assert!(SerializedGraph::from_ron("(nodes: [").is_err());
    }

    #[test]
    fn test_ids_continue_after_load() {
        let registry = registry();
        let data = sample(&registry).serialize();
        let mut restored = Graph::new();
        restored.configure(&data, &registry).unwrap();
        let id = restored.add_node(const_node(1.0)).unwrap();
        assert_eq!(id, NodeId(data.last_node_id + 1));
        let link = restored.connect(id, 0, NodeId(3), 0).unwrap();
        assert_eq!(link.0, data.last_link_id + 1);
    }

    #[test]
    fn test_link_tuple_format() {
        let registry = registry();
        let json = sample(&registry).serialize().to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["links"][0], json!([1, 1, 0, 2, 0, "number"]));
        assert_eq!(value["nodes"][0]["type"], json!("test/const"));
        assert_eq!(value["version"], json!(FORMAT_VERSION));
    }

    #[test]
    fn test_unknown_type_becomes_placeholder() {
        let registry = registry();
        let mut data = sample(&registry).serialize();
        data.nodes[1].type_name = "plugin/unknown".to_string();

        let mut restored = Graph::new();
        let report = restored.configure(&data, &registry).unwrap();
        assert_eq!(report.missing_types, vec!["plugin/unknown".to_string()]);

        let placeholder = restored.node(NodeId(2)).unwrap();
        assert!(placeholder.has_errors);
        assert_eq!(placeholder.inputs().len(), 1);
        assert!(!placeholder.has_execute());
        // the rest of the graph still runs
        assert!(restored.run_step(1, None).is_completed());
        assert_eq!(restored.serialize().nodes[1], data.nodes[1]);
    }

    #[test]
    fn test_dangling_link_refs_are_dropped() {
        let registry = registry();
        let mut data = sample(&registry).serialize();
        data.links.retain(|l| l.0 != LinkId(2));
        let mut restored = Graph::new();
        restored.configure(&data, &registry).unwrap();
        assert!(restored.node(NodeId(3)).unwrap().inputs()[0].link.is_none());
        assert_eq!(restored.node(NodeId(2)).unwrap().outputs()[0].links.len(), 0);
    }

    #[test]
    fn test_configure_notifies() {
        let registry = registry();
        let data = sample(&registry).serialize();
        let mut restored = Graph::new();
        let (listener, log) = RecordingListener::new();
        restored.add_listener(Box::new(listener));
        restored.configure(&data, &registry).unwrap();
        assert_eq!(log.borrow().last().map(String::as_str), Some("configured"));
    }

    #[test]
    fn test_subgraph_round_trip() {
        let registry = registry();
        let mut graph = Graph::new();
        let source = graph.add_node(registry.create_node("test/const").unwrap()).unwrap();
        graph.set_property(source, "value", json!(3.0)).unwrap();
        let sub = graph.add_node(registry.create_node(SUBGRAPH_TYPE).unwrap()).unwrap();
        graph
            .edit_subgraph(sub, |inner| {
                let x = inner.add_node(graph_input_node("x", "number")).unwrap();
                let d = inner.add_node(registry.create_node("test/double").unwrap()).unwrap();
                let y = inner.add_node(graph_output_node("y", "number")).unwrap();
                inner.connect(x, 0, d, 0).unwrap();
                inner.connect(d, 0, y, 0).unwrap();
            })
            .unwrap();
        graph.connect(source, 0, sub, "x").unwrap();

        let data = graph.serialize();
        assert!(data.nodes[1].subgraph.is_some());

        let mut restored = Graph::new();
        let report = restored.configure(&data, &registry).unwrap();
        assert!(report.is_clean());
        let node = restored.node(sub).unwrap();
        assert_eq!(node.inputs().len(), 1);
        assert_eq!(node.outputs().len(), 1);

        restored.run_step(1, None);
        assert_eq!(restored.node_output_data(sub, 0), Some(&json!(6.0)));
    }

    #[test]
    fn test_clone_node() {
        let registry = registry();
        let mut graph = sample(&registry);
        let copy = graph.clone_node(NodeId(1), &registry).unwrap();
        let node = graph.node(copy).unwrap();
        assert_eq!(node.property("value"), Some(&json!(2.5)));
        assert!(node.outputs()[0].links.is_empty());
        assert_eq!(graph.link_count(), 2);
        assert!(matches!(
            graph.clone_node(NodeId(99), &registry),
            Err(GraphError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_load_and_save_files() {
        let registry = registry();
        let data = sample(&registry).serialize();
        let dir = std::env::temp_dir().join(format!("wireloom-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("graph.json");
        data.save(&path).unwrap();
        let (graph, report) = load_graph(&path, &registry, GraphSettings::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(graph.node_count(), 3);

        let ron_path = dir.join("graph.ron");
        data.save(&ron_path).unwrap();
        let content = std::fs::read_to_string(&ron_path).unwrap();
        assert!(SerializedGraph::from_json(&content).is_err());
        let (graph, report) = load_graph(&ron_path, &registry, GraphSettings::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(graph.serialize(), data);

        assert!(matches!(
            load_graph(&dir.join("missing.json"), &registry, GraphSettings::default()),
            Err(LoadError::Read { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
