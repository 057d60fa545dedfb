//! Node Data Structures
//!
//! This module defines the managed `Node` record and the `NodeHandle` used to
//! refer to it inside an object manager's identity map.
//!
//! # Architecture
//!
//! - **Arena handles**: Nodes never point at each other directly. Parent and
//!   root references are `NodeHandle`s, indices into the object manager that
//!   owns every node of the current unit of work.
//! - **JSON properties**: Scalar fields (path, level, hash, lock time, path
//!   source) live in a `serde_json` map, so any entity shape can be managed
//!   without code generation.
//! - **Associations**: Reference fields (parent, association roots) live in a
//!   separate map of optional handles.
//!
//! # Examples
//!
//! ```rust
//! use treepath_core::models::{Node, NodeHandle};
//! use serde_json::json;
//!
//! let root = Node::new("Category", json!({ "title": "Food" }));
//! let child = Node::new("Category", json!({ "title": "Fruit" }))
//!     .with_association("parent", Some(NodeHandle::new(0)));
//!
//! assert!(root.association("parent").is_none());
//! assert_eq!(child.association("parent"), Some(NodeHandle::new(0)));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Index of a node in the object manager's identity map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle(usize);

impl NodeHandle {
    /// Create a handle from an arena index
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Arena index behind this handle
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value of a single mapped field
///
/// Scalars are plain JSON values; references are handles (or `None` for a
/// null association).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    Scalar(Value),
    Reference(Option<NodeHandle>),
}

impl FieldValue {
    /// String content of a scalar value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(value) => value.as_str(),
            FieldValue::Reference(_) => None,
        }
    }

    /// Handle of a reference value
    pub fn as_reference(&self) -> Option<NodeHandle> {
        match self {
            FieldValue::Reference(handle) => *handle,
            FieldValue::Scalar(_) => None,
        }
    }

    /// Whether this is a null scalar or a null reference
    pub fn is_null(&self) -> bool {
        match self {
            FieldValue::Scalar(value) => value.is_null(),
            FieldValue::Reference(handle) => handle.is_none(),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Scalar(value)
    }
}

impl From<Option<NodeHandle>> for FieldValue {
    fn from(handle: Option<NodeHandle>) -> Self {
        FieldValue::Reference(handle)
    }
}

/// Managed tree node record
///
/// # Fields
///
/// - `class`: Mapped class name, used to look up metadata and tree configuration
/// - `id`: Identifier, `None` until the host mapper assigns it on insert
/// - `properties`: Scalar fields
/// - `associations`: Reference fields (parent, association root)
/// - `loaded`: `false` for a reference whose fields have not been fetched yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub class: String,

    #[serde(default)]
    pub id: Option<Value>,

    #[serde(default)]
    pub properties: Map<String, Value>,

    #[serde(default)]
    pub associations: BTreeMap<String, Option<NodeHandle>>,

    #[serde(default = "default_loaded")]
    pub loaded: bool,
}

fn default_loaded() -> bool {
    true
}

impl Node {
    /// Create a new, fully loaded node without identifier
    ///
    /// Non-object `properties` are ignored.
    pub fn new(class: impl Into<String>, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Self {
            class: class.into(),
            id: None,
            properties,
            associations: BTreeMap::new(),
            loaded: true,
        }
    }

    /// Create an unloaded reference to an existing record
    pub fn reference(class: impl Into<String>, id: Value) -> Self {
        Self {
            class: class.into(),
            id: Some(id),
            properties: Map::new(),
            associations: BTreeMap::new(),
            loaded: false,
        }
    }

    /// Set the identifier
    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set an association
    pub fn with_association(mut self, field: impl Into<String>, target: Option<NodeHandle>) -> Self {
        self.associations.insert(field.into(), target);
        self
    }

    /// Scalar property value
    pub fn property(&self, field: &str) -> Option<&Value> {
        self.properties.get(field)
    }

    /// Set a scalar property value
    pub fn set_property(&mut self, field: impl Into<String>, value: Value) {
        self.properties.insert(field.into(), value);
    }

    /// Association target, `None` when unset or null
    pub fn association(&self, field: &str) -> Option<NodeHandle> {
        self.associations.get(field).copied().flatten()
    }

    /// Set an association target
    pub fn set_association(&mut self, field: impl Into<String>, target: Option<NodeHandle>) {
        self.associations.insert(field.into(), target);
    }

    /// Value of a mapped field, looking at associations first
    pub fn field(&self, field: &str) -> FieldValue {
        match self.associations.get(field) {
            Some(target) => FieldValue::Reference(*target),
            None => FieldValue::Scalar(self.properties.get(field).cloned().unwrap_or(Value::Null)),
        }
    }

    /// Identifier rendered for paths and messages
    ///
    /// Strings render without quotes; `None` when the identifier is missing.
    pub fn id_string(&self) -> Option<String> {
        self.id.as_ref().and_then(render_scalar)
    }
}

/// Render a scalar JSON value the way it appears inside a path segment
///
/// Strings render raw, numbers and booleans in their JSON form. Null, arrays
/// and objects have no segment representation.
pub fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_ignores_non_object_properties() {
        let node = Node::new("Category", json!("oops"));
        assert!(node.properties.is_empty());
        assert!(node.loaded);
        assert!(node.id.is_none());
    }

    #[test]
    fn test_reference_is_unloaded() {
        let node = Node::reference("Category", json!(5));
        assert!(!node.loaded);
        assert_eq!(node.id_string().as_deref(), Some("5"));
    }

    #[test]
    fn test_field_prefers_associations() {
        let node = Node::new("Category", json!({ "parent": "shadowed", "title": "Fruit" }))
            .with_association("parent", Some(NodeHandle::new(3)));

        assert_eq!(
            node.field("parent"),
            FieldValue::Reference(Some(NodeHandle::new(3)))
        );
        assert_eq!(node.field("title").as_str(), Some("Fruit"));
        assert!(node.field("missing").is_null());
    }

    #[test]
    fn test_render_scalar() {
        assert_eq!(render_scalar(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(render_scalar(&json!(12)).as_deref(), Some("12"));
        assert_eq!(render_scalar(&json!(1.5)).as_deref(), Some("1.5"));
        assert_eq!(render_scalar(&json!(null)), None);
        assert_eq!(render_scalar(&json!([1])), None);
    }
}
