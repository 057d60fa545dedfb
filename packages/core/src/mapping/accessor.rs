//! Field Accessor
//!
//! Typed getters and setters for the structural roles of a tree class. The
//! closures are bound once, when the class mapping is built, so engine code
//! reads "the path" or "the parent" without knowing which field plays that
//! role.
//!
//! Binding decisions made here:
//!
//! - A path source that is the identifier field reads `Node::id`.
//! - A root field declared as an association is written as a reference;
//!   otherwise it is written as the raw first path segment.
//! - Lock times read from RFC 3339 strings or epoch seconds and are written
//!   as RFC 3339 strings.

use crate::mapping::{ClassMetadata, TreeConfig};
use crate::models::{FieldValue, Node, NodeHandle};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

type ScalarGetter = Box<dyn Fn(&Node) -> Option<&Value> + Send + Sync>;
type ScalarSetter = Box<dyn Fn(&mut Node, Value) + Send + Sync>;
type ReferenceGetter = Box<dyn Fn(&Node) -> Option<NodeHandle> + Send + Sync>;
type ReferenceSetter = Box<dyn Fn(&mut Node, Option<NodeHandle>) + Send + Sync>;

struct ScalarField {
    name: String,
    get: ScalarGetter,
    set: ScalarSetter,
}

impl ScalarField {
    fn property(name: &str) -> Self {
        let read = name.to_string();
        let write = name.to_string();
        Self {
            name: name.to_string(),
            get: Box::new(move |node| node.property(&read)),
            set: Box::new(move |node, value| node.set_property(write.clone(), value)),
        }
    }

    fn identifier(name: &str) -> Self {
        Self {
            name: name.to_string(),
            get: Box::new(|node| node.id.as_ref()),
            set: Box::new(|node, value| node.id = Some(value)),
        }
    }
}

struct ReferenceField {
    name: String,
    get: ReferenceGetter,
    set: ReferenceSetter,
}

impl ReferenceField {
    fn association(name: &str) -> Self {
        let read = name.to_string();
        let write = name.to_string();
        Self {
            name: name.to_string(),
            get: Box::new(move |node| node.association(&read)),
            set: Box::new(move |node, target| node.set_association(write.clone(), target)),
        }
    }
}

/// How the root role is stored
enum RootBinding {
    Scalar(ScalarField),
    Reference {
        field: ReferenceField,
        target_class: String,
    },
}

/// Root value computed for a node
#[derive(Debug, Clone, PartialEq)]
pub enum RootValue {
    /// Raw first path segment
    Segment(String),
    /// Managed reference to the root record
    Reference(NodeHandle),
}

impl From<RootValue> for FieldValue {
    fn from(value: RootValue) -> Self {
        match value {
            RootValue::Segment(segment) => FieldValue::Scalar(Value::String(segment)),
            RootValue::Reference(handle) => FieldValue::Reference(Some(handle)),
        }
    }
}

/// Structural field accessors bound for one tree class
pub struct FieldAccessor {
    parent: ReferenceField,
    path: ScalarField,
    path_source: ScalarField,
    path_hash: Option<ScalarField>,
    level: Option<ScalarField>,
    root: Option<RootBinding>,
    root_identifier: Option<ScalarField>,
    lock_time: Option<ScalarField>,
}

impl FieldAccessor {
    /// Bind accessors for `config` on the class described by `metadata`
    pub fn new(config: &TreeConfig, metadata: &ClassMetadata) -> Self {
        let path_source = if metadata.is_identifier(&config.path_source_field) {
            ScalarField::identifier(&config.path_source_field)
        } else {
            ScalarField::property(&config.path_source_field)
        };

        let root = config.root_field.as_deref().map(|field| {
            match metadata.association_target(field) {
                Some(target) => RootBinding::Reference {
                    field: ReferenceField::association(field),
                    target_class: target.to_string(),
                },
                None => RootBinding::Scalar(ScalarField::property(field)),
            }
        });

        Self {
            parent: ReferenceField::association(&config.parent_field),
            path: ScalarField::property(&config.path_field),
            path_source,
            path_hash: config.path_hash_field.as_deref().map(ScalarField::property),
            level: config.level_field.as_deref().map(ScalarField::property),
            root,
            root_identifier: config
                .root_identifier_method
                .as_deref()
                .map(ScalarField::property),
            lock_time: config.lock_time_field.as_deref().map(ScalarField::property),
        }
    }

    pub fn parent(&self, node: &Node) -> Option<NodeHandle> {
        (self.parent.get)(node)
    }

    pub fn set_parent(&self, node: &mut Node, parent: Option<NodeHandle>) {
        (self.parent.set)(node, parent)
    }

    pub fn parent_field(&self) -> &str {
        &self.parent.name
    }

    /// Current path, `None` when unset or not a string
    pub fn path<'n>(&self, node: &'n Node) -> Option<&'n str> {
        (self.path.get)(node).and_then(Value::as_str)
    }

    pub fn set_path(&self, node: &mut Node, path: &str) {
        (self.path.set)(node, Value::String(path.to_string()))
    }

    pub fn path_field(&self) -> &str {
        &self.path.name
    }

    pub fn path_source<'n>(&self, node: &'n Node) -> Option<&'n Value> {
        (self.path_source.get)(node)
    }

    pub fn path_source_field(&self) -> &str {
        &self.path_source.name
    }

    pub fn has_path_hash(&self) -> bool {
        self.path_hash.is_some()
    }

    pub fn path_hash_field(&self) -> Option<&str> {
        self.path_hash.as_ref().map(|f| f.name.as_str())
    }

    /// Write the path hash; no-op when the class has no hash field
    pub fn set_path_hash(&self, node: &mut Node, hash: &str) {
        if let Some(field) = &self.path_hash {
            (field.set)(node, Value::String(hash.to_string()))
        }
    }

    pub fn level_field(&self) -> Option<&str> {
        self.level.as_ref().map(|f| f.name.as_str())
    }

    pub fn level(&self, node: &Node) -> Option<i64> {
        self.level
            .as_ref()
            .and_then(|field| (field.get)(node))
            .and_then(Value::as_i64)
    }

    /// Write the level; no-op when the class has no level field
    pub fn set_level(&self, node: &mut Node, level: i64) {
        if let Some(field) = &self.level {
            (field.set)(node, Value::from(level))
        }
    }

    pub fn root_field(&self) -> Option<&str> {
        match &self.root {
            Some(RootBinding::Scalar(field)) => Some(&field.name),
            Some(RootBinding::Reference { field, .. }) => Some(&field.name),
            None => None,
        }
    }

    /// Target class when the root role is an association
    pub fn root_target_class(&self) -> Option<&str> {
        match &self.root {
            Some(RootBinding::Reference { target_class, .. }) => Some(target_class),
            _ => None,
        }
    }

    /// Write the root; mismatched value kinds are ignored
    pub fn set_root(&self, node: &mut Node, value: RootValue) {
        match (&self.root, value) {
            (Some(RootBinding::Scalar(field)), RootValue::Segment(segment)) => {
                (field.set)(node, Value::String(segment))
            }
            (Some(RootBinding::Reference { field, .. }), RootValue::Reference(handle)) => {
                (field.set)(node, Some(handle))
            }
            _ => {}
        }
    }

    /// Current scalar root value
    pub fn root_segment<'n>(&self, node: &'n Node) -> Option<&'n str> {
        match &self.root {
            Some(RootBinding::Scalar(field)) => (field.get)(node).and_then(Value::as_str),
            _ => None,
        }
    }

    /// Current root reference
    pub fn root_reference(&self, node: &Node) -> Option<NodeHandle> {
        match &self.root {
            Some(RootBinding::Reference { field, .. }) => (field.get)(node),
            _ => None,
        }
    }

    /// Identifier of a root node for lock messages
    pub fn root_identifier(&self, node: &Node) -> String {
        self.root_identifier
            .as_ref()
            .and_then(|field| (field.get)(node))
            .and_then(crate::models::render_scalar)
            .or_else(|| node.id_string())
            .unwrap_or_default()
    }

    pub fn lock_time_field(&self) -> Option<&str> {
        self.lock_time.as_ref().map(|f| f.name.as_str())
    }

    /// Lock timestamp stored on a root node
    pub fn lock_time(&self, node: &Node) -> Option<DateTime<Utc>> {
        let value = (self.lock_time.as_ref()?.get)(node)?;
        match value {
            Value::String(raw) => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Value::Number(secs) => secs
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            _ => None,
        }
    }

    /// Write or clear the lock timestamp; no-op without a lock time field
    pub fn set_lock_time(&self, node: &mut Node, at: Option<DateTime<Utc>>) {
        if let Some(field) = &self.lock_time {
            let value = at.map_or(Value::Null, |at| Value::String(at.to_rfc3339()));
            (field.set)(node, value)
        }
    }

    /// Put back a raw lock time value read with [`Self::lock_time_value`]
    pub fn restore_lock_time_value(&self, node: &mut Node, value: Value) {
        if let Some(field) = &self.lock_time {
            (field.set)(node, value)
        }
    }

    /// Current value of the lock time field, for change sets
    pub fn lock_time_value(&self, node: &Node) -> Value {
        self.lock_time
            .as_ref()
            .and_then(|field| (field.get)(node))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

impl fmt::Debug for FieldAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAccessor")
            .field("parent", &self.parent.name)
            .field("path", &self.path.name)
            .field("path_source", &self.path_source.name)
            .field("path_hash", &self.path_hash_field())
            .field("level", &self.level_field())
            .field("root", &self.root_field())
            .field("lock_time", &self.lock_time_field())
            .finish()
    }
}
