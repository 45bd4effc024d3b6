// SPDX-License-Identifier: MIT OR Apache-2.0
//! Creating and removing links, and editing the ports links attach to.

use crate::evaluation::ConnectionChange;
use crate::graph::{Graph, ON_EXECUTED_OUTPUT, ON_TRIGGER_INPUT};
use crate::link::{Link, LinkId};
use crate::node::{NodeId, NodeMode};
use crate::port::{is_valid_connection, PortDirection, SlotRef, SlotType};

impl Graph {
    /// Connect an output of `origin` to an input of `target`.
    ///
    /// An occupied input is disconnected first. Any failure leaves the graph
    /// unchanged.
    pub fn connect(
        &mut self,
        origin: NodeId,
        output: impl Into<SlotRef>,
        target: NodeId,
        input: impl Into<SlotRef>,
    ) -> Result<LinkId, ConnectionError> {
        let output = output.into();
        let input = input.into();

        if !self.nodes.contains_key(&origin) {
            return Err(ConnectionError::NodeNotFound(origin));
        }
        if !self.nodes.contains_key(&target) {
            return Err(ConnectionError::NodeNotFound(target));
        }
        if origin == target {
            return Err(ConnectionError::SelfLoop);
        }

        // nothing is created until every check has passed
        let planned_output = self.plan_output_slot(origin, &output)?;
        let planned_input = self.plan_input_slot(target, &input)?;
        let (origin_slot, target_slot) = (planned_output.index, planned_input.index);
        let output_type = planned_output.slot_type.clone();
        let input_type = planned_input.slot_type.clone();

        if !is_valid_connection(&output_type, &input_type) {
            self.mark_dirty();
            return Err(ConnectionError::IncompatibleTypes {
                output: output_type.to_string(),
                input: input_type.to_string(),
            });
        }

        let accepted_by_target = self
            .nodes
            .get_mut(&target)
            .and_then(|n| n.behavior.as_deref_mut())
            .map_or(true, |b| b.on_connect_input(target_slot, &output_type));
        let accepted_by_origin = self
            .nodes
            .get_mut(&origin)
            .and_then(|n| n.behavior.as_deref_mut())
            .map_or(true, |b| b.on_connect_output(origin_slot, &input_type));
        if !accepted_by_target || !accepted_by_origin {
            return Err(ConnectionError::Rejected);
        }

        if planned_output.create {
            self.add_node_output(origin, ON_EXECUTED_OUTPUT, SlotType::event());
        }
        if planned_input.create {
            self.change_mode(target, NodeMode::OnTrigger);
        }

        if self.nodes[&target].inputs[target_slot].link.is_some() {
            self.disconnect_input_without_reorder(target, target_slot);
        }
        if output_type.is_event()
            && !self.settings.allow_multi_output_for_events
            && !self.nodes[&origin].outputs[origin_slot].links.is_empty()
        {
            self.disconnect_output_without_reorder(origin, origin_slot, None);
        }

        self.last_link_id += 1;
        let link_id = LinkId(self.last_link_id);
        let link_type = if input_type.is_unspecified() {
            output_type
        } else {
            input_type
        };
        let link = Link::new(link_id, link_type, origin, origin_slot, target, target_slot);

        if let Some(node) = self.nodes.get_mut(&origin) {
            node.outputs[origin_slot].links.push(link_id);
        }
        if let Some(node) = self.nodes.get_mut(&target) {
            node.inputs[target_slot].link = Some(link_id);
        }
        self.links.insert(link_id, link);
        self.version += 1;

        self.notify_connection(origin, PortDirection::Output, origin_slot, link_id, true);
        self.notify_connection(target, PortDirection::Input, target_slot, link_id, true);
        if let Some(link) = self.links.get(&link_id) {
            for listener in &mut self.listeners {
                listener.on_connection_change(link, true);
            }
        }
        self.mark_dirty();
        self.update_execution_order();

        tracing::trace!(
            "Connected {}[{}] -> {}[{}] as link {}",
            origin,
            origin_slot,
            target,
            target_slot,
            link_id
        );
        Ok(link_id)
    }

    /// Remove the link feeding an input. Returns it, or `None` if there was none.
    pub fn disconnect_input(&mut self, node_id: NodeId, slot: impl Into<SlotRef>) -> Option<Link> {
        let slot = self.resolve_input_slot(node_id, &slot.into()).ok()?;
        let removed = self.disconnect_input_without_reorder(node_id, slot);
        if removed.is_some() {
            self.update_execution_order();
        }
        removed
    }

    /// Remove links leaving an output: only the first one reaching `target`
    /// when given, otherwise all of them.
    pub fn disconnect_output(
        &mut self,
        node_id: NodeId,
        slot: impl Into<SlotRef>,
        target: Option<NodeId>,
    ) -> Vec<Link> {
        let Ok(slot) = self.resolve_output_slot(node_id, &slot.into()) else {
            return Vec::new();
        };
        let removed = self.disconnect_output_without_reorder(node_id, slot, target);
        if !removed.is_empty() {
            self.update_execution_order();
        }
        removed
    }

    fn disconnect_input_without_reorder(&mut self, node_id: NodeId, slot: usize) -> Option<Link> {
        let input = self.nodes.get_mut(&node_id)?.inputs.get_mut(slot)?;
        let link_id = input.link?;
        if !self.links.contains_key(&link_id) {
            tracing::warn!("Input {}[{}] referenced missing link {}", node_id, slot, link_id);
            input.link = None;
            return None;
        }
        self.remove_link(link_id)
    }

    fn disconnect_output_without_reorder(
        &mut self,
        node_id: NodeId,
        slot: usize,
        target: Option<NodeId>,
    ) -> Vec<Link> {
        let Some(output) = self.nodes.get(&node_id).and_then(|n| n.outputs.get(slot)) else {
            return Vec::new();
        };
        let link_ids = output.links.clone();
        let mut removed = Vec::new();

        for link_id in link_ids {
            let Some(link) = self.links.get(&link_id) else {
                tracing::warn!("Output {}[{}] referenced missing link {}", node_id, slot, link_id);
                if let Some(output) = self
                    .nodes
                    .get_mut(&node_id)
                    .and_then(|n| n.outputs.get_mut(slot))
                {
                    output.links.retain(|id| *id != link_id);
                }
                continue;
            };
            if target.is_some_and(|t| t != link.target_id) {
                continue;
            }
            if let Some(link) = self.remove_link(link_id) {
                removed.push(link);
            }
            if target.is_some() {
                break;
            }
        }
        removed
    }

    /// Drop a link from the table and from both endpoints, tolerating missing ones
    fn remove_link(&mut self, link_id: LinkId) -> Option<Link> {
        let link = self.links.shift_remove(&link_id)?;

        if let Some(output) = self
            .nodes
            .get_mut(&link.origin_id)
            .and_then(|n| n.outputs.get_mut(link.origin_slot))
        {
            output.links.retain(|id| *id != link_id);
        }
        if let Some(input) = self
            .nodes
            .get_mut(&link.target_id)
            .and_then(|n| n.inputs.get_mut(link.target_slot))
        {
            if input.link == Some(link_id) {
                input.link = None;
            }
        }
        self.version += 1;

        self.notify_connection(
            link.origin_id,
            PortDirection::Output,
            link.origin_slot,
            link_id,
            false,
        );
        self.notify_connection(
            link.target_id,
            PortDirection::Input,
            link.target_slot,
            link_id,
            false,
        );
        for listener in &mut self.listeners {
            listener.on_connection_change(&link, false);
        }
        self.mark_dirty();
        Some(link)
    }

    fn notify_connection(
        &mut self,
        node_id: NodeId,
        direction: PortDirection,
        slot: usize,
        link: LinkId,
        connected: bool,
    ) {
        let change = ConnectionChange {
            direction,
            slot,
            connected,
            link,
        };
        self.with_behavior(node_id, None, |behavior, ctx| {
            behavior.on_connections_change(ctx, change)
        });
    }

    /// Resolve an output reference to an existing slot
    pub(crate) fn resolve_output_slot(
        &self,
        node_id: NodeId,
        slot: &SlotRef,
    ) -> Result<usize, ConnectionError> {
        self.plan_output_slot(node_id, slot)
            .map(|planned| (!planned.create).then_some(planned.index))?
            .ok_or_else(|| ConnectionError::SlotNotFound {
                node: node_id,
                slot: slot.clone(),
            })
    }

    /// Resolve an input reference to an existing slot
    pub(crate) fn resolve_input_slot(
        &self,
        node_id: NodeId,
        slot: &SlotRef,
    ) -> Result<usize, ConnectionError> {
        self.plan_input_slot(node_id, slot)
            .map(|planned| (!planned.create).then_some(planned.index))?
            .ok_or_else(|| ConnectionError::SlotNotFound {
                node: node_id,
                slot: slot.clone(),
            })
    }

    fn plan_output_slot(
        &self,
        node_id: NodeId,
        slot: &SlotRef,
    ) -> Result<PlannedSlot, ConnectionError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(ConnectionError::NodeNotFound(node_id))?;
        let existing = match slot {
            SlotRef::Index(index) => (*index < node.outputs.len()).then_some(*index),
            SlotRef::Name(name) => node.find_output_slot(name),
            SlotRef::Event => node.find_output_slot(ON_EXECUTED_OUTPUT),
            SlotRef::Action => None,
        };
        let planned = match existing {
            Some(index) => Some(PlannedSlot::existing(index, &node.outputs[index].slot_type)),
            None if matches!(slot, SlotRef::Event) && self.settings.do_add_trigger_slots => {
                Some(PlannedSlot {
                    index: node.outputs.len(),
                    slot_type: SlotType::event(),
                    create: true,
                })
            }
            None => None,
        };
        planned.ok_or_else(|| ConnectionError::SlotNotFound {
            node: node_id,
            slot: slot.clone(),
        })
    }

    fn plan_input_slot(
        &self,
        node_id: NodeId,
        slot: &SlotRef,
    ) -> Result<PlannedSlot, ConnectionError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(ConnectionError::NodeNotFound(node_id))?;
        let existing = match slot {
            SlotRef::Index(index) => (*index < node.inputs.len()).then_some(*index),
            SlotRef::Name(name) => node.find_input_slot(name),
            SlotRef::Action => node.find_action_input(),
            SlotRef::Event => None,
        };
        let planned = match existing {
            Some(index) => Some(PlannedSlot::existing(index, &node.inputs[index].slot_type)),
            // switching to ON_TRIGGER reuses an `onTrigger` input or appends one
            None if matches!(slot, SlotRef::Action) && self.settings.do_add_trigger_slots => {
                let planned = match node.find_input_slot(ON_TRIGGER_INPUT) {
                    Some(index) => PlannedSlot {
                        create: true,
                        ..PlannedSlot::existing(index, &node.inputs[index].slot_type)
                    },
                    None => PlannedSlot {
                        index: node.inputs.len(),
                        slot_type: SlotType::action(),
                        create: true,
                    },
                };
                Some(planned)
            }
            None => None,
        };
        planned.ok_or_else(|| ConnectionError::SlotNotFound {
            node: node_id,
            slot: slot.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Port editing on attached nodes
    // ------------------------------------------------------------------

    /// Append an input to an attached node
    pub fn add_node_input(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        slot_type: impl Into<SlotType>,
    ) -> Option<usize> {
        let slot = self.nodes.get_mut(&node_id)?.add_input(name, slot_type);
        self.touch();
        Some(slot)
    }

    /// Append an output to an attached node
    pub fn add_node_output(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        slot_type: impl Into<SlotType>,
    ) -> Option<usize> {
        let slot = self.nodes.get_mut(&node_id)?.add_output(name, slot_type);
        self.touch();
        Some(slot)
    }

    /// Remove an input, severing its link and renumbering later slots
    pub fn remove_node_input(&mut self, node_id: NodeId, slot: usize) -> bool {
        if self.nodes.get(&node_id).and_then(|n| n.inputs.get(slot)).is_none() {
            return false;
        }
        self.disconnect_input_without_reorder(node_id, slot);
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };
        node.inputs.remove(slot);
        for input in &node.inputs[slot..] {
            if let Some(link) = input.link.and_then(|id| self.links.get_mut(&id)) {
                link.target_slot -= 1;
            }
        }
        self.touch();
        self.update_execution_order();
        true
    }

    /// Remove an output, severing its links and renumbering later slots
    pub fn remove_node_output(&mut self, node_id: NodeId, slot: usize) -> bool {
        if self.nodes.get(&node_id).and_then(|n| n.outputs.get(slot)).is_none() {
            return false;
        }
        self.disconnect_output_without_reorder(node_id, slot, None);
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };
        node.outputs.remove(slot);
        for output in &node.outputs[slot..] {
            for link_id in &output.links {
                if let Some(link) = self.links.get_mut(link_id) {
                    link.origin_slot -= 1;
                }
            }
        }
        self.touch();
        self.update_execution_order();
        true
    }

    /// Rename an input; a no-op when the name already matches
    pub fn rename_node_input(&mut self, node_id: NodeId, slot: usize, name: &str) -> bool {
        let Some(input) = self.nodes.get_mut(&node_id).and_then(|n| n.inputs.get_mut(slot)) else {
            return false;
        };
        if input.name != name {
            input.name = name.to_string();
            input.label = None;
            self.touch();
        }
        true
    }

    /// Rename an output; a no-op when the name already matches
    pub fn rename_node_output(&mut self, node_id: NodeId, slot: usize, name: &str) -> bool {
        let Some(output) = self.nodes.get_mut(&node_id).and_then(|n| n.outputs.get_mut(slot)) else {
            return false;
        };
        if output.name != name {
            output.name = name.to_string();
            output.label = None;
            self.touch();
        }
        true
    }

    /// Retype an input, dropping its link if it no longer type-checks
    pub fn change_node_input_type(
        &mut self,
        node_id: NodeId,
        slot: usize,
        slot_type: SlotType,
    ) -> bool {
        let Some(input) = self.nodes.get(&node_id).and_then(|n| n.inputs.get(slot)) else {
            return false;
        };
        if input.slot_type.same_label(&slot_type) {
            return true;
        }
        let stale = input
            .link
            .and_then(|id| self.links.get(&id))
            .and_then(|link| {
                let output = self.nodes.get(&link.origin_id)?.outputs.get(link.origin_slot)?;
                Some(!is_valid_connection(&output.slot_type, &slot_type))
            })
            .unwrap_or(false);
        if stale {
            self.disconnect_input(node_id, slot);
        }
        if let Some(input) = self.nodes.get_mut(&node_id).and_then(|n| n.inputs.get_mut(slot)) {
            input.slot_type = slot_type;
        }
        self.touch();
        true
    }

    /// Retype an output, dropping links that no longer type-check
    pub fn change_node_output_type(
        &mut self,
        node_id: NodeId,
        slot: usize,
        slot_type: SlotType,
    ) -> bool {
        let Some(output) = self.nodes.get(&node_id).and_then(|n| n.outputs.get(slot)) else {
            return false;
        };
        if output.slot_type.same_label(&slot_type) {
            return true;
        }
        // by link id, since one target may hold several links from this output
        let stale: Vec<LinkId> = output
            .links
            .iter()
            .filter_map(|id| self.links.get(id))
            .filter(|link| {
                self.nodes
                    .get(&link.target_id)
                    .and_then(|n| n.inputs.get(link.target_slot))
                    .is_some_and(|input| !is_valid_connection(&slot_type, &input.slot_type))
            })
            .map(|link| link.id)
            .collect();
        let removed = stale
            .into_iter()
            .filter_map(|link_id| self.remove_link(link_id))
            .count();
        if removed > 0 {
            self.update_execution_order();
        }
        if let Some(output) = self.nodes.get_mut(&node_id).and_then(|n| n.outputs.get_mut(slot)) {
            output.slot_type = slot_type;
        }
        self.touch();
        true
    }
}

/// Where a slot reference lands when connecting
#[derive(Debug, Clone)]
struct PlannedSlot {
    index: usize,
    slot_type: SlotType,
    /// The trigger slot has to be created before linking
    create: bool,
}

impl PlannedSlot {
    fn existing(index: usize, slot_type: &SlotType) -> Self {
        Self {
            index,
            slot_type: slot_type.clone(),
            create: false,
        }
    }
}

/// Error when creating a connection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// Node not found in this graph
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Slot could not be resolved
    #[error("Slot {slot:?} not found on node {node}")]
    SlotNotFound {
        /// Node searched
        node: NodeId,
        /// Requested slot
        slot: SlotRef,
    },

    /// Incompatible port types
    #[error("Incompatible port types: {output} -> {input}")]
    IncompatibleTypes {
        /// Output type label
        output: String,
        /// Input type label
        input: String,
    },

    /// A node hook refused the link
    #[error("Connection rejected by node")]
    Rejected,

    /// Self-loop not allowed
    #[error("Self-loop not allowed")]
    SelfLoop,
}
