// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph engine for Wireloom.
//!
//! This crate holds everything an editor or a headless host needs to build
//! and run a node graph:
//! - Typed input/output slots and the connection compatibility rule
//! - Nodes whose logic is a [`NodeBehavior`] created from a [`NodeRegistry`]
//! - Execution ordering and the step loop (data-flow plus event/action dispatch)
//! - Subgraphs exposing their boundary as ports on an outer node
//! - JSON/RON serialization of whole graphs
//!
//! ## Architecture
//!
//! A [`Graph`] owns its nodes and links in insertion-ordered tables. Node
//! hooks receive a [`NodeContext`] with mutable access to the graph; triggers
//! raised inside a hook are queued and delivered once the hook returns.
//! Observers such as a canvas implement [`GraphListener`].

pub mod connection;
pub mod evaluation;
pub mod events;
pub mod execution;
pub mod geometry;
pub mod graph;
pub mod group;
pub mod link;
pub mod listener;
pub mod node;
pub mod port;
pub mod property;
pub mod registry;
pub mod serialization;
pub mod settings;
pub mod subgraph;

#[cfg(test)]
pub(crate) mod testing;

/// Dynamic value carried by links, properties and boundary slots
pub type Value = serde_json::Value;

pub use connection::ConnectionError;
pub use evaluation::{
    ConnectionChange, GraphEvent, MissingNode, NodeBehavior, NodeContext, NodeError, StepError,
};
pub use execution::{GraphStatus, RunSchedule, StepOutcome};
pub use geometry::{Bounded, Rect};
pub use graph::{Graph, GraphError, ON_EXECUTED_OUTPUT, ON_TRIGGER_INPUT};
pub use group::Group;
pub use link::{Link, LinkId, SerializedLink};
pub use listener::GraphListener;
pub use node::{Node, NodeFlags, NodeId, NodeMode};
pub use port::{
    is_valid_connection, InputPort, OutputPort, PortDirection, SlotRef, SlotType, TypeAtom,
};
pub use property::{PropertyError, PropertyKind, PropertySpec};
pub use registry::{NodeRegistry, NodeType, RegistryError};
pub use serialization::{
    load_graph, ConfigureReport, LoadError, SerializationError, SerializedGraph, SerializedNode,
};
pub use settings::{GraphConfig, GraphSettings, SettingsError};
pub use subgraph::{
    register_subgraph_types, BoundaryEvent, BoundarySlot, GraphInputNode, GraphOutputNode,
    SubgraphNode,
};
