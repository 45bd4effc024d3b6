// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs and the slot type rule.

use crate::link::LinkId;
use crate::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

/// One member of a slot type set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeAtom {
    /// Accepts anything (`""` or `"*"`)
    Any,
    /// Trigger-style output
    Event,
    /// Trigger-style input
    Action,
    /// A named data type, stored lowercase
    Named(String),
}

impl TypeAtom {
    fn parse(piece: &str) -> Self {
        let piece = piece.trim().to_lowercase();
        match piece.as_str() {
            "" | "*" => Self::Any,
            SlotType::EVENT_LABEL => Self::Event,
            SlotType::ACTION_LABEL => Self::Action,
            _ => Self::Named(piece),
        }
    }

    fn matches(&self, input: &TypeAtom) -> bool {
        match (self, input) {
            (Self::Any, _) | (_, Self::Any) | (Self::Event, Self::Action) => true,
            (a, b) => a == b,
        }
    }
}

/// Type of a slot: the label as written plus the parsed set of accepted atoms.
///
/// A label such as `"number,string"` is split once here so comparisons never
/// re-parse strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SlotType {
    label: String,
    atoms: Vec<TypeAtom>,
}

impl SlotType {
    /// Reserved label for trigger outputs
    pub const EVENT_LABEL: &'static str = "event";
    /// Reserved label for trigger inputs
    pub const ACTION_LABEL: &'static str = "action";

    /// Parse a free-form type label
    pub fn parse(label: impl Into<String>) -> Self {
        let label = label.into();
        let atoms = label.split(',').map(TypeAtom::parse).collect();
        Self { label, atoms }
    }

    /// Wildcard type
    pub fn any() -> Self {
        Self::parse("*")
    }

    /// Trigger output type
    pub fn event() -> Self {
        Self::parse(Self::EVENT_LABEL)
    }

    /// Trigger input type
    pub fn action() -> Self {
        Self::parse(Self::ACTION_LABEL)
    }

    /// The label this type was created from
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Parsed members
    pub fn atoms(&self) -> &[TypeAtom] {
        &self.atoms
    }

    /// True if the label was left empty
    pub fn is_unspecified(&self) -> bool {
        self.label.trim().is_empty()
    }

    /// True if any member is a wildcard
    pub fn is_any(&self) -> bool {
        self.atoms.contains(&TypeAtom::Any)
    }

    /// True if this is exactly the EVENT sentinel
    pub fn is_event(&self) -> bool {
        self.atoms == [TypeAtom::Event]
    }

    /// True if this is exactly the ACTION sentinel
    pub fn is_action(&self) -> bool {
        self.atoms == [TypeAtom::Action]
    }

    /// True for either trigger sentinel
    pub fn is_trigger(&self) -> bool {
        self.is_event() || self.is_action()
    }

    /// Case-insensitive label comparison, used to make retype calls idempotent
    pub fn same_label(&self, other: &SlotType) -> bool {
        self.label.eq_ignore_ascii_case(&other.label)
    }
}

impl Default for SlotType {
    fn default() -> Self {
        Self::parse("")
    }
}

impl PartialEq for SlotType {
    fn eq(&self, other: &Self) -> bool {
        self.atoms == other.atoms
    }
}

impl Eq for SlotType {}

impl From<String> for SlotType {
    fn from(label: String) -> Self {
        Self::parse(label)
    }
}

impl From<&str> for SlotType {
    fn from(label: &str) -> Self {
        Self::parse(label)
    }
}

impl From<SlotType> for String {
    fn from(slot_type: SlotType) -> Self {
        slot_type.label
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&self.label)
        }
    }
}

/// Whether a link from an output of type `output` may feed an input of type `input`.
///
/// Wildcards accept anything, EVENT drives ACTION (not the other way round) and
/// multi-type slots match when any pair of members matches.
pub fn is_valid_connection(output: &SlotType, input: &SlotType) -> bool {
    output
        .atoms
        .iter()
        .any(|a| input.atoms.iter().any(|b| a.matches(b)))
}

/// How a caller names a slot on a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRef {
    /// Positional slot number
    Index(usize),
    /// Slot looked up by name
    Name(String),
    /// The node's trigger output (`onExecuted`), created on demand when allowed
    Event,
    /// The node's trigger input (`onTrigger`), created on demand when allowed
    Action,
}

impl From<usize> for SlotRef {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for SlotRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for SlotRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// An input slot: at most one incoming link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPort {
    /// Port name
    pub name: String,
    /// Accepted type
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    /// Incoming link
    #[serde(default)]
    pub link: Option<LinkId>,
    /// Display label, defaults to the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl InputPort {
    /// Create an unconnected input
    pub fn new(name: impl Into<String>, slot_type: impl Into<SlotType>) -> Self {
        Self {
            name: name.into(),
            slot_type: slot_type.into(),
            link: None,
            label: None,
        }
    }

    /// Whether an incoming link is attached
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}

/// An output slot: any number of outgoing links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPort {
    /// Port name
    pub name: String,
    /// Produced type
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    /// Outgoing links, in connection order
    #[serde(default)]
    pub links: Vec<LinkId>,
    /// Display label, defaults to the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Last value written to this output
    #[serde(skip)]
    pub value: Option<Value>,
}

impl OutputPort {
    /// Create an unconnected output
    pub fn new(name: impl Into<String>, slot_type: impl Into<SlotType>) -> Self {
        Self {
            name: name.into(),
            slot_type: slot_type.into(),
            links: Vec::new(),
            label: None,
            value: None,
        }
    }

    /// Whether any outgoing link is attached
    pub fn is_connected(&self) -> bool {
        !self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(a: &str, b: &str) -> bool {
        is_valid_connection(&SlotType::parse(a), &SlotType::parse(b))
    }

    #[test]
    fn test_wildcards_accept_everything() {
        for other in ["", "*", "number", "string,boolean", "event", "action"] {
            assert!(valid("", other));
            assert!(valid(other, ""));
            assert!(valid("*", other));
            assert!(valid(other, "*"));
        }
    }

    #[test]
    fn test_named_types() {
        assert!(valid("number", "number"));
        assert!(valid("Number", "NUMBER"));
        assert!(!valid("number", "string"));
    }

    #[test]
    fn test_event_action_is_directional() {
        assert!(valid("event", "action"));
        assert!(!valid("action", "event"));
        assert!(valid("event", "event"));
    }

    #[test]
    fn test_multi_type_slots() {
        assert!(valid("number,string", "string"));
        assert!(valid("string", "boolean, string"));
        assert!(!valid("number,string", "boolean,vec2"));
        assert!(valid("number,event", "action"));
        assert!(valid("vec2,*", "texture"));
    }

    #[test]
    fn test_slot_type_serializes_as_label() {
        let slot_type = SlotType::parse("number,string");
        let json = serde_json::to_string(&slot_type).unwrap();
        assert_eq!(json, "\"number,string\"");
        let back: SlotType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, slot_type);
        assert_eq!(back.atoms().len(), 2);
    }

    #[test]
    fn test_sentinels() {
        assert!(SlotType::event().is_event());
        assert!(SlotType::action().is_action());
        assert!(!SlotType::parse("event,number").is_event());
        assert!(SlotType::default().is_unspecified());
        assert!(SlotType::default().is_any());
    }
}
