// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node property schema and validation.

use crate::Value;
use serde::{Deserialize, Serialize};

/// Kind of value a property accepts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// No validation
    #[default]
    Any,
    /// `true` / `false`
    Bool,
    /// Any JSON number
    Number,
    /// Whole numbers only
    Integer,
    /// Text
    String,
    /// Text restricted to the listed choices
    Enum(Vec<String>),
}

impl PropertyKind {
    /// Whether `value` fits this kind. `null` always fits (unset property).
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            Self::Any => true,
            Self::Bool => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Enum(choices) => value
                .as_str()
                .is_some_and(|v| choices.iter().any(|c| c == v)),
        }
    }
}

/// Declared property of a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Property name
    pub name: String,
    /// Accepted kind
    pub kind: PropertyKind,
    /// Initial value
    pub default: Value,
}

impl PropertySpec {
    /// Create a property declaration
    pub fn new(name: impl Into<String>, kind: PropertyKind, default: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
        }
    }

    /// Check a candidate value
    pub fn validate(&self, value: &Value) -> Result<(), PropertyError> {
        if self.kind.accepts(value) {
            Ok(())
        } else {
            Err(PropertyError::InvalidValue {
                name: self.name.clone(),
                kind: self.kind.clone(),
            })
        }
    }
}

/// Error when setting a property
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    /// Value does not fit the declared kind
    #[error("Invalid value for property '{name}' (expected {kind:?})")]
    InvalidValue {
        /// Property name
        name: String,
        /// Declared kind
        kind: PropertyKind,
    },

    /// The node's behavior vetoed the change
    #[error("Property '{0}' change rejected by node")]
    Rejected(String),

    /// No such node
    #[error("Node not found: {0}")]
    NodeNotFound(crate::node::NodeId),
}
