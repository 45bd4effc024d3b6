// SPDX-License-Identifier: MIT OR Apache-2.0
//! Link (edge) definitions for the graph.

use crate::node::NodeId;
use crate::port::SlotType;
use crate::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a link, unique within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed connection from one output slot to one input slot
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Unique link ID
    pub id: LinkId,
    /// Resolved connection type
    pub link_type: SlotType,
    /// Source node ID
    pub origin_id: NodeId,
    /// Source output slot
    pub origin_slot: usize,
    /// Target node ID
    pub target_id: NodeId,
    /// Target input slot
    pub target_slot: usize,
    /// Last value carried by this link
    pub data: Option<Value>,
    /// Graph time of the last trigger sent through this link
    pub last_triggered: Option<f64>,
}

impl Link {
    pub(crate) fn new(
        id: LinkId,
        link_type: SlotType,
        origin_id: NodeId,
        origin_slot: usize,
        target_id: NodeId,
        target_slot: usize,
    ) -> Self {
        Self {
            id,
            link_type,
            origin_id,
            origin_slot,
            target_id,
            target_slot,
            data: None,
            last_triggered: None,
        }
    }

    /// Check if this link involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.origin_id == node_id || self.target_id == node_id
    }

    /// Fixed-order tuple form used by the file format
    pub fn to_serialized(&self) -> SerializedLink {
        SerializedLink(
            self.id,
            self.origin_id,
            self.origin_slot,
            self.target_id,
            self.target_slot,
            self.link_type.clone(),
        )
    }
}

/// `[id, origin_id, origin_slot, target_id, target_slot, type]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedLink(
    pub LinkId,
    pub NodeId,
    pub usize,
    pub NodeId,
    pub usize,
    pub SlotType,
);

impl From<&SerializedLink> for Link {
    fn from(record: &SerializedLink) -> Self {
        let SerializedLink(id, origin_id, origin_slot, target_id, target_slot, link_type) = record;
        Link::new(
            *id,
            link_type.clone(),
            *origin_id,
            *origin_slot,
            *target_id,
            *target_slot,
        )
    }
}
