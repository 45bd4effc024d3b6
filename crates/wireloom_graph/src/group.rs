// SPDX-License-Identifier: MIT OR Apache-2.0
//! Visual groups: titled rectangles over nodes, without execution semantics.

use crate::geometry::{Bounded, Rect};
use crate::graph::Graph;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Default group title font size
pub const DEFAULT_GROUP_FONT_SIZE: f32 = 24.0;

/// A titled rectangle drawn behind nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Title
    pub title: String,
    /// Area covered, `[x, y, w, h]`
    pub bounding: Rect,
    /// Fill color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Title font size
    #[serde(rename = "font", default = "default_font_size")]
    pub font_size: f32,
}

fn default_font_size() -> f32 {
    DEFAULT_GROUP_FONT_SIZE
}

impl Group {
    /// Create a group
    pub fn new(title: impl Into<String>, bounding: Rect) -> Self {
        Self {
            title: title.into(),
            bounding,
            color: None,
            font_size: DEFAULT_GROUP_FONT_SIZE,
        }
    }
}

impl Bounded for Group {
    fn bounding(&self) -> Rect {
        self.bounding
    }
}

impl Graph {
    /// Add a group and return its index
    pub fn add_group(&mut self, group: Group) -> usize {
        self.groups.push(group);
        self.touch();
        self.groups.len() - 1
    }

    /// Remove a group by index
    pub fn remove_group(&mut self, index: usize) -> Option<Group> {
        if index >= self.groups.len() {
            return None;
        }
        let group = self.groups.remove(index);
        self.touch();
        Some(group)
    }

    /// Groups in drawing order
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Nodes whose bounding box overlaps the group
    pub fn nodes_in_group(&self, index: usize) -> Vec<NodeId> {
        let Some(group) = self.groups.get(index) else {
            return Vec::new();
        };
        self.nodes
            .values()
            .filter(|node| node.overlaps(&group.bounding))
            .map(|node| node.id)
            .collect()
    }

    /// Move a group, dragging the nodes inside it unless `ignore_nodes`
    pub fn move_group(&mut self, index: usize, dx: f32, dy: f32, ignore_nodes: bool) {
        let inside = if ignore_nodes {
            Vec::new()
        } else {
            self.nodes_in_group(index)
        };
        let Some(group) = self.groups.get_mut(index) else {
            return;
        };
        group.bounding.x += dx;
        group.bounding.y += dy;
        for id in inside {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.pos[0] += dx;
                node.pos[1] += dy;
            }
        }
        self.mark_dirty();
    }
}
