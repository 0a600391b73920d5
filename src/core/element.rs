//! Board elements.
//!
//! An element is a typed record with an open set of named fields. The merge
//! layer treats every field symmetrically; helpers here only interpret the
//! handful of topology fields the session layer needs for grouping and
//! z-ordering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::identity::ElementId;

/// Element type classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Sticky,
    Shape,
    Connector,
    Text,
    Image,
    Frame,
    Group,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sticky => "sticky",
            Self::Shape => "shape",
            Self::Connector => "connector",
            Self::Text => "text",
            Self::Image => "image",
            Self::Frame => "frame",
            Self::Group => "group",
        }
    }
}

/// Scalar field value.
///
/// Structured payloads (waypoint lists, rich-text spans) travel as
/// JSON-encoded text; the merge layer never looks inside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Encode a structured value as JSON text.
    pub fn encoded(value: &serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }

    /// Decode a JSON-encoded structured value, if this is one.
    pub fn decode(&self) -> Option<serde_json::Value> {
        match self {
            Self::Text(s) => serde_json::from_str(s).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Field names that describe where an element sits in the board graph.
///
/// These are the scope of Move undo entries: parent reference, position,
/// stacking order, and connector endpoint bindings.
pub const TOPOLOGY_FIELDS: &[&str] = &[
    "parent_id",
    "x",
    "y",
    "z_index",
    "start_binding",
    "end_binding",
    "waypoints",
];

pub fn is_topology_field(name: &str) -> bool {
    TOPOLOGY_FIELDS.contains(&name)
}

/// A shared board element: stable id, type tag, open field map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub kind: ElementKind,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Element {
    pub fn new(id: ElementId, kind: ElementKind) -> Self {
        Self {
            id,
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_fields(
        id: ElementId,
        kind: ElementKind,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self { id, kind, fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Parent element, if any. A Null or absent parent_id means top-level.
    pub fn parent_id(&self) -> Option<ElementId> {
        self.fields
            .get("parent_id")
            .and_then(FieldValue::as_str)
            .and_then(|s| ElementId::parse(s).ok())
    }

    pub fn z_index(&self) -> f64 {
        self.fields
            .get("z_index")
            .and_then(FieldValue::as_number)
            .unwrap_or(0.0)
    }
}
