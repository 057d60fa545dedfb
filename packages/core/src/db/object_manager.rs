//! Object Manager Abstraction
//!
//! The tree behavior never talks to storage directly. It goes through the
//! host mapper's object manager and unit of work, described here as two
//! traits so any persistence layer can host the engine.
//!
//! # Architecture
//!
//! ```text
//! TreeSubscriber / MaterializedPath
//!         ↓ (uses)
//! dyn ObjectManager (identity map + queries)
//!         ↓ (extends)
//! dyn UnitOfWork (change sets + scheduling)
//!         ↓ (implemented by)
//! MemoryObjectManager, or a host adapter
//! ```
//!
//! Methods that may reach storage (`find_by_path`, `get_reference`,
//! `initialize_object`) are async; identity-map accessors are not.

use crate::error::{Result, TreeError};
use crate::mapping::ClassMetadata;
use crate::models::{ChangeSet, FieldValue, Node, NodeHandle};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Change tracking and write scheduling of the current flush cycle
pub trait UnitOfWork: Send {
    /// Change set computed for `handle`, empty when nothing changed
    fn object_change_set(&self, handle: NodeHandle) -> ChangeSet;

    fn scheduled_insertions(&self) -> Vec<NodeHandle>;

    fn scheduled_updates(&self) -> Vec<NodeHandle>;

    fn scheduled_deletions(&self) -> Vec<NodeHandle>;

    fn is_scheduled_for_update(&self, handle: NodeHandle) -> bool;

    fn is_scheduled_for_delete(&self, handle: NodeHandle) -> bool;

    /// Schedule a managed node for deletion in the current flush
    fn schedule_for_delete(&mut self, handle: NodeHandle);

    /// Write `changes` after the regular inserts and updates have run
    fn schedule_extra_update(&mut self, handle: NodeHandle, changes: ChangeSet);

    /// Overwrite the last-synchronized value of one field
    fn set_original_object_property(&mut self, handle: NodeHandle, field: &str, value: FieldValue);

    /// Recompute the change set of one node after the flush started
    fn recompute_single_object_change_set(&mut self, handle: NodeHandle);
}

/// Host mapper entry point
#[async_trait]
pub trait ObjectManager: UnitOfWork {
    fn class_metadata(&self, class: &str) -> Option<Arc<ClassMetadata>>;

    fn node(&self, handle: NodeHandle) -> Option<&Node>;

    fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node>;

    /// Nodes of `query.class` whose stored path matches, ordered by path
    async fn find_by_path(&mut self, query: &PathQuery) -> Result<Vec<NodeHandle>>;

    /// Managed reference to a record, loading nothing yet
    async fn get_reference(&mut self, class: &str, id: Value) -> Result<NodeHandle>;

    /// Load the fields of a partially loaded reference; no-op when loaded
    async fn initialize_object(&mut self, handle: NodeHandle) -> Result<()>;

    /// Like [`ObjectManager::node`] but failing with `NodeNotFound`
    fn require_node(&self, handle: NodeHandle) -> Result<&Node> {
        self.node(handle).ok_or_else(|| TreeError::node_not_found(handle))
    }

    fn require_node_mut(&mut self, handle: NodeHandle) -> Result<&mut Node> {
        self.node_mut(handle)
            .ok_or_else(|| TreeError::node_not_found(handle))
    }
}

/// Backend-specific prefix match on the path field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// SQL `LIKE` pattern using `\` as escape character
    Like(String),
    /// Anchored regular expression
    Regex(String),
}

/// Descendant lookup by path prefix
///
/// Results are always ordered ascending by path, so parents are returned
/// before their own descendants.
#[derive(Debug, Clone, PartialEq)]
pub struct PathQuery {
    pub class: String,
    pub path_field: String,
    pub pattern: PathPattern,
    /// Stored path to leave out of the results
    pub exclude_path: Option<String>,
    pub level_field: Option<String>,
    /// Only match nodes whose level is strictly greater
    pub min_level_exclusive: Option<i64>,
}

impl PathQuery {
    pub fn new(class: impl Into<String>, path_field: impl Into<String>, pattern: PathPattern) -> Self {
        Self {
            class: class.into(),
            path_field: path_field.into(),
            pattern,
            exclude_path: None,
            level_field: None,
            min_level_exclusive: None,
        }
    }

    pub fn excluding(mut self, path: impl Into<String>) -> Self {
        self.exclude_path = Some(path.into());
        self
    }

    pub fn deeper_than(mut self, level_field: impl Into<String>, level: i64) -> Self {
        self.level_field = Some(level_field.into());
        self.min_level_exclusive = Some(level);
        self
    }
}
