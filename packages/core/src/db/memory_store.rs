//! In-Memory Object Manager
//!
//! A small host mapper that keeps records in a `BTreeMap` and implements
//! [`ObjectManager`] with just enough unit-of-work semantics to drive the tree
//! behavior end to end: identity map, change-set computation, insert/update/
//! delete scheduling, extra updates and lazy references.
//!
//! # Flush pipeline
//!
//! 1. Change sets are computed; changed managed nodes become scheduled
//!    updates and receive `PreUpdate`
//! 2. `OnFlush` is dispatched
//! 3. Insertions run in commit order (parents first), each assigning an
//!    identifier and firing `PostPersist`
//! 4. Updates are written, each firing `PostUpdate`
//! 5. Extra updates and recomputed nodes are written
//! 6. Deletions run, each firing `PostRemove`
//! 7. Extra updates staged by post-remove listeners are written
//!
//! `PrePersist` and `PreRemove` fire from [`MemoryObjectManager::persist`]
//! and [`MemoryObjectManager::remove`]. A failed flush rolls stored rows,
//! managed nodes and scheduled work back to where they were before the
//! flush started, then fires `FlushAborted`. Nodes loaded during the failed
//! flush become unloaded references again.
//!
//! # Examples
//!
//! ```rust
//! use treepath_core::db::{MemoryObjectManager, ObjectManager};
//! use treepath_core::mapping::{ClassMetadata, FieldType};
//! use treepath_core::models::Node;
//! use serde_json::json;
//!
//! let mut om = MemoryObjectManager::relational();
//! om.register_class(
//!     ClassMetadata::new("Category", "id")
//!         .with_field("title", FieldType::String)
//!         .with_association("parent", "Category"),
//! );
//! let root = om.insert_loaded(Node::new("Category", json!({ "title": "Food" })));
//! assert_eq!(om.node(root).unwrap().id, Some(json!(1)));
//! ```

use crate::db::{ObjectManager, PathPattern, PathQuery, UnitOfWork};
use crate::error::{Result, TreeError};
use crate::events::{
    DocumentAdapter, EventAdapter, EventListener, LifecycleEvent, LifecycleEventArgs, RelationalAdapter,
};
use crate::mapping::ClassMetadata;
use crate::models::{render_scalar, ChangeSet, FieldChange, FieldValue, Node, NodeHandle};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Identifier generation for inserted nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdStrategy {
    /// Sequential integers starting at 1
    #[default]
    AutoIncrement,
    /// Random UUID v4 strings
    Uuid,
}

/// A record as it sits in storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRow {
    pub class: String,
    pub id: Value,
    pub properties: Map<String, Value>,
    /// Association field → identifier of the target record
    pub associations: BTreeMap<String, Option<Value>>,
}

impl StoredRow {
    pub fn property(&self, field: &str) -> Option<&Value> {
        self.properties.get(field)
    }

    /// String property, `None` when unset or not a string
    pub fn text(&self, field: &str) -> Option<&str> {
        self.property(field).and_then(Value::as_str)
    }

    pub fn association(&self, field: &str) -> Option<&Value> {
        self.associations.get(field).and_then(Option::as_ref)
    }
}

type RowKey = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    New,
    Managed,
    Removed,
    Detached,
}

#[derive(Debug, Clone)]
struct Entry {
    node: Node,
    original: Option<Node>,
    state: EntryState,
}

pub struct MemoryObjectManager {
    adapter: Arc<dyn EventAdapter>,
    id_strategy: IdStrategy,
    next_id: i64,
    metadata: HashMap<String, Arc<ClassMetadata>>,
    entries: Vec<Entry>,
    identity: HashMap<RowKey, NodeHandle>,
    rows: BTreeMap<RowKey, StoredRow>,
    insertions: Vec<NodeHandle>,
    updates: Vec<NodeHandle>,
    deletions: Vec<NodeHandle>,
    change_sets: HashMap<NodeHandle, ChangeSet>,
    extra_updates: BTreeMap<NodeHandle, ChangeSet>,
    dirty: BTreeSet<NodeHandle>,
}

/// Unit-of-work state captured when a flush starts
struct FlushSnapshot {
    rows: BTreeMap<RowKey, StoredRow>,
    entries: Vec<Entry>,
    identity: HashMap<RowKey, NodeHandle>,
    insertions: Vec<NodeHandle>,
    deletions: Vec<NodeHandle>,
    next_id: i64,
}

fn identity_key(class: &str, id: &Value) -> Option<RowKey> {
    render_scalar(id).map(|id| (class.to_string(), id))
}

impl MemoryObjectManager {
    pub fn new(adapter: Arc<dyn EventAdapter>) -> Self {
        Self {
            adapter,
            id_strategy: IdStrategy::default(),
            next_id: 1,
            metadata: HashMap::new(),
            entries: Vec::new(),
            identity: HashMap::new(),
            rows: BTreeMap::new(),
            insertions: Vec::new(),
            updates: Vec::new(),
            deletions: Vec::new(),
            change_sets: HashMap::new(),
            extra_updates: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Object manager staging structural writes the relational way
    pub fn relational() -> Self {
        Self::new(Arc::new(RelationalAdapter))
    }

    /// Object manager staging structural writes the document way
    pub fn document() -> Self {
        Self::new(Arc::new(DocumentAdapter))
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn adapter(&self) -> Arc<dyn EventAdapter> {
        Arc::clone(&self.adapter)
    }

    pub fn register_class(&mut self, metadata: ClassMetadata) {
        self.metadata.insert(metadata.name.clone(), Arc::new(metadata));
    }

    /// Write a record straight to storage without managing it
    ///
    /// Associations must point at managed nodes that have an identifier.
    pub fn seed(&mut self, node: Node) -> Result<()> {
        let id = node
            .id
            .clone()
            .ok_or_else(|| TreeError::store(format!("Seeded {} record has no identifier", node.class)))?;
        self.bump_next_id(&id);
        let row = self.row_from_node(&node, id);
        self.store_row(row)
    }

    /// Store a record and manage it as already synchronized
    ///
    /// An identifier is generated when the node has none.
    pub fn insert_loaded(&mut self, mut node: Node) -> NodeHandle {
        let id = match node.id.clone() {
            Some(id) => {
                self.bump_next_id(&id);
                id
            }
            None => self.generate_id(),
        };
        node.id = Some(id.clone());
        node.loaded = true;

        let handle = self.push_entry(node.clone(), Some(node.clone()), EntryState::Managed);
        if let Some(key) = identity_key(&node.class, &id) {
            self.identity.insert(key, handle);
        }
        let row = self.row_from_node(&node, id);
        if let Err(e) = self.store_row(row) {
            tracing::warn!(error = %e, "Failed to store loaded node");
        }
        handle
    }

    /// Manage a new node and schedule it for insertion
    ///
    /// Fires `PrePersist`; when a listener rejects it the node is left
    /// detached and nothing is scheduled.
    pub async fn persist(&mut self, node: Node, listener: &mut dyn EventListener) -> Result<NodeHandle> {
        let handle = self.push_entry(node, None, EntryState::New);
        if let Err(e) = self.dispatch(listener, LifecycleEvent::PrePersist(handle)).await {
            self.entry_mut(handle)?.state = EntryState::Detached;
            return Err(e);
        }
        self.insertions.push(handle);
        Ok(handle)
    }

    /// Schedule a managed node for deletion, firing `PreRemove`
    pub async fn remove(&mut self, handle: NodeHandle, listener: &mut dyn EventListener) -> Result<()> {
        self.require_node(handle)?;
        self.dispatch(listener, LifecycleEvent::PreRemove(handle)).await?;
        self.schedule_for_delete(handle);
        Ok(())
    }

    /// Turn a managed node back into an unloaded reference
    pub fn unload(&mut self, handle: NodeHandle) {
        if let Some(entry) = self.entries.get_mut(handle.index()) {
            entry.node.properties.clear();
            entry.node.associations.clear();
            entry.node.loaded = false;
            entry.original = None;
        }
    }

    /// Managed handle of a record, if it is in the identity map
    pub fn handle_of(&self, class: &str, id: &Value) -> Option<NodeHandle> {
        identity_key(class, id).and_then(|key| self.identity.get(&key).copied())
    }

    /// Stored record of `class` with identifier `id`
    pub fn stored(&self, class: &str, id: &Value) -> Option<&StoredRow> {
        identity_key(class, id).and_then(|key| self.rows.get(&key))
    }

    /// Every stored record of `class`
    pub fn stored_rows<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a StoredRow> + 'a {
        self.rows.values().filter(move |row| row.class == class)
    }

    /// Run the flush pipeline, dispatching lifecycle events to `listener`
    pub async fn flush(&mut self, listener: &mut dyn EventListener) -> Result<()> {
        let snapshot = self.snapshot();
        let result = self.run_flush(listener).await;
        self.clear_flush_state();

        match result {
            Ok(()) => {
                self.insertions.clear();
                self.deletions.clear();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Flush failed, rolling back unit of work");
                self.rollback(snapshot);
                if let Err(abort_err) = self.dispatch(listener, LifecycleEvent::FlushAborted).await {
                    tracing::warn!(error = %abort_err, "Listener failed to handle aborted flush");
                }
                self.clear_flush_state();
                Err(e)
            }
        }
    }

    fn snapshot(&self) -> FlushSnapshot {
        FlushSnapshot {
            rows: self.rows.clone(),
            entries: self.entries.clone(),
            identity: self.identity.clone(),
            insertions: self.insertions.clone(),
            deletions: self.deletions.clone(),
            next_id: self.next_id,
        }
    }

    fn rollback(&mut self, snapshot: FlushSnapshot) {
        let known = snapshot.entries.len();
        self.rows = snapshot.rows;
        self.identity = snapshot.identity;
        self.insertions = snapshot.insertions;
        self.deletions = snapshot.deletions;
        self.next_id = snapshot.next_id;

        // references created during the flush keep their handles
        for index in known..self.entries.len() {
            let handle = NodeHandle::new(index);
            self.unload(handle);
            let key = self
                .node(handle)
                .and_then(|node| node.id.as_ref().and_then(|id| identity_key(&node.class, id)));
            if let Some(key) = key {
                self.identity.entry(key).or_insert(handle);
            }
        }
        for (slot, entry) in self.entries.iter_mut().zip(snapshot.entries) {
            *slot = entry;
        }
    }

    fn clear_flush_state(&mut self) {
        self.updates.clear();
        self.change_sets.clear();
        self.extra_updates.clear();
        self.dirty.clear();
    }

    async fn run_flush(&mut self, listener: &mut dyn EventListener) -> Result<()> {
        self.compute_change_sets();
        tracing::debug!(
            adapter = self.adapter.name(),
            insertions = self.insertions.len(),
            updates = self.updates.len(),
            deletions = self.deletions.len(),
            "Flushing unit of work"
        );

        for handle in self.updates.clone() {
            self.dispatch(listener, LifecycleEvent::PreUpdate(handle)).await?;
        }

        self.dispatch(listener, LifecycleEvent::OnFlush).await?;

        for handle in self.commit_order() {
            if self.entry(handle)?.state != EntryState::New {
                continue;
            }
            self.execute_insert(handle)?;
            self.dispatch(listener, LifecycleEvent::PostPersist(handle)).await?;
        }

        for handle in self.updates.clone() {
            if self.entry(handle)?.state != EntryState::Managed {
                continue;
            }
            self.write_full(handle)?;
            self.dispatch(listener, LifecycleEvent::PostUpdate(handle)).await?;
        }

        self.execute_extra_updates()?;

        let mut index = 0;
        while index < self.deletions.len() {
            let handle = self.deletions[index];
            index += 1;
            self.execute_delete(handle)?;
            self.dispatch(listener, LifecycleEvent::PostRemove(handle)).await?;
        }

        self.execute_extra_updates()
    }

    async fn dispatch(&mut self, listener: &mut dyn EventListener, event: LifecycleEvent) -> Result<()> {
        if !listener.subscribed_events().contains(&event.kind()) {
            return Ok(());
        }
        let adapter = Arc::clone(&self.adapter);
        let mut args = LifecycleEventArgs::new(adapter.as_ref(), self);
        listener.handle(event, &mut args).await
    }

    fn entry(&self, handle: NodeHandle) -> Result<&Entry> {
        self.entries
            .get(handle.index())
            .ok_or_else(|| TreeError::node_not_found(handle))
    }

    fn entry_mut(&mut self, handle: NodeHandle) -> Result<&mut Entry> {
        self.entries
            .get_mut(handle.index())
            .ok_or_else(|| TreeError::node_not_found(handle))
    }

    fn push_entry(&mut self, node: Node, original: Option<Node>, state: EntryState) -> NodeHandle {
        let handle = NodeHandle::new(self.entries.len());
        self.entries.push(Entry { node, original, state });
        handle
    }

    fn generate_id(&mut self) -> Value {
        match self.id_strategy {
            IdStrategy::AutoIncrement => {
                let id = self.next_id;
                self.next_id += 1;
                Value::from(id)
            }
            IdStrategy::Uuid => Value::String(Uuid::new_v4().to_string()),
        }
    }

    fn bump_next_id(&mut self, id: &Value) {
        if let Some(n) = id.as_i64() {
            self.next_id = self.next_id.max(n + 1);
        }
    }

    fn target_class(&self, class: &str, field: &str) -> String {
        self.metadata
            .get(class)
            .and_then(|meta| meta.association_target(field))
            .unwrap_or(class)
            .to_string()
    }

    fn node_id(&self, handle: NodeHandle) -> Option<Value> {
        self.entries.get(handle.index()).and_then(|e| e.node.id.clone())
    }

    fn row_from_node(&self, node: &Node, id: Value) -> StoredRow {
        let associations = node
            .associations
            .iter()
            .map(|(field, target)| (field.clone(), target.and_then(|h| self.node_id(h))))
            .collect();

        StoredRow {
            class: node.class.clone(),
            id,
            properties: node.properties.clone(),
            associations,
        }
    }

    fn store_row(&mut self, row: StoredRow) -> Result<()> {
        let key = identity_key(&row.class, &row.id)
            .ok_or_else(|| TreeError::store(format!("Unsupported identifier {} for {}", row.id, row.class)))?;
        self.rows.insert(key, row);
        Ok(())
    }

    fn diff(&self, handle: NodeHandle) -> ChangeSet {
        let mut changes = ChangeSet::new();
        let Some(entry) = self.entries.get(handle.index()) else {
            return changes;
        };
        let node = &entry.node;
        if !node.loaded {
            return changes;
        }

        let empty = Node::new(node.class.clone(), Value::Null);
        let original = entry.original.as_ref().unwrap_or(&empty);

        let fields: BTreeSet<&String> = node.properties.keys().chain(original.properties.keys()).collect();
        for field in fields {
            let old = original.property(field).cloned().unwrap_or(Value::Null);
            let new = node.property(field).cloned().unwrap_or(Value::Null);
            if old != new {
                changes.insert(field.clone(), FieldChange::new(old, new));
            }
        }

        let associations: BTreeSet<&String> = node
            .associations
            .keys()
            .chain(original.associations.keys())
            .collect();
        for field in associations {
            let old = original.association(field);
            let new = node.association(field);
            if old != new {
                changes.insert(field.clone(), FieldChange::new(old, new));
            }
        }

        changes
    }

    fn compute_change_sets(&mut self) {
        for index in 0..self.entries.len() {
            let handle = NodeHandle::new(index);
            let state = self.entries[index].state;
            let synced = self.entries[index].original.is_some();
            match state {
                EntryState::New if self.insertions.contains(&handle) => {
                    let changes = self.diff(handle);
                    self.change_sets.insert(handle, changes);
                }
                EntryState::Managed if synced => {
                    let changes = self.diff(handle);
                    if !changes.is_empty() {
                        self.change_sets.insert(handle, changes);
                        self.updates.push(handle);
                    }
                }
                _ => {}
            }
        }
    }

    /// Scheduled insertions with every pending association target first
    fn commit_order(&self) -> Vec<NodeHandle> {
        let pending: HashSet<NodeHandle> = self.insertions.iter().copied().collect();
        let mut remaining = self.insertions.clone();
        let mut placed = HashSet::new();
        let mut ordered = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|handle| {
                let ready = self.entries.get(handle.index()).map_or(true, |entry| {
                    entry
                        .node
                        .associations
                        .values()
                        .flatten()
                        .all(|target| target == handle || placed.contains(target) || !pending.contains(target))
                });
                if ready {
                    ordered.push(*handle);
                    placed.insert(*handle);
                }
                !ready
            });
            if remaining.len() == before {
                ordered.append(&mut remaining);
            }
        }
        ordered
    }

    fn execute_insert(&mut self, handle: NodeHandle) -> Result<()> {
        let (existing, class) = {
            let node = &self.entry(handle)?.node;
            (node.id.clone(), node.class.clone())
        };
        let id = match existing {
            Some(id) => id,
            None => self.generate_id(),
        };
        if let Some(key) = identity_key(&class, &id) {
            self.identity.insert(key, handle);
        }

        let entry = self.entry_mut(handle)?;
        entry.node.id = Some(id.clone());
        entry.state = EntryState::Managed;
        entry.original = Some(entry.node.clone());

        let row = self.row_from_node(&self.entry(handle)?.node, id);
        self.store_row(row)
    }

    fn write_full(&mut self, handle: NodeHandle) -> Result<()> {
        let node = &self.entry(handle)?.node;
        let id = node.id.clone().ok_or_else(|| TreeError::missing_identifier(handle))?;
        let row = self.row_from_node(node, id);
        self.store_row(row)?;

        let entry = self.entry_mut(handle)?;
        entry.original = Some(entry.node.clone());
        Ok(())
    }

    fn execute_extra_updates(&mut self) -> Result<()> {
        loop {
            let extras = std::mem::take(&mut self.extra_updates);
            let dirty = std::mem::take(&mut self.dirty);
            if extras.is_empty() && dirty.is_empty() {
                return Ok(());
            }

            for (handle, changes) in extras {
                let Some(entry) = self.entries.get(handle.index()) else {
                    continue;
                };
                if entry.state != EntryState::Managed {
                    continue;
                }
                let node = &entry.node;
                let Some(key) = node.id.as_ref().and_then(|id| identity_key(&node.class, id)) else {
                    continue;
                };
                let resolved: Vec<(String, FieldValue, Option<Value>)> = changes
                    .iter()
                    .map(|(field, change)| {
                        let target_id = change.new.as_reference().and_then(|h| self.node_id(h));
                        (field.clone(), change.new.clone(), target_id)
                    })
                    .collect();

                let Some(row) = self.rows.get_mut(&key) else {
                    continue;
                };
                for (field, value, target_id) in &resolved {
                    match value {
                        FieldValue::Scalar(v) => {
                            row.properties.insert(field.clone(), v.clone());
                        }
                        FieldValue::Reference(_) => {
                            row.associations.insert(field.clone(), target_id.clone());
                        }
                    }
                }

                if let Some(original) = self.entry_mut(handle)?.original.as_mut() {
                    for (field, value, _) in resolved {
                        match value {
                            FieldValue::Scalar(v) => original.set_property(field, v),
                            FieldValue::Reference(h) => original.set_association(field, h),
                        }
                    }
                }
            }

            for handle in dirty {
                if self.entry(handle)?.state == EntryState::Managed {
                    self.write_full(handle)?;
                }
            }
        }
    }

    fn execute_delete(&mut self, handle: NodeHandle) -> Result<()> {
        let entry = self.entry_mut(handle)?;
        entry.state = EntryState::Removed;
        let node = &entry.node;
        if let Some(key) = node.id.as_ref().and_then(|id| identity_key(&node.class, id)) {
            self.rows.remove(&key);
            self.identity.remove(&key);
        }
        tracing::debug!(node = %handle, "Deleted record");
        Ok(())
    }

    fn reference_handle(&mut self, class: &str, id: Value) -> NodeHandle {
        if let Some(handle) = self.handle_of(class, &id) {
            return handle;
        }
        let key = identity_key(class, &id);
        let handle = self.push_entry(Node::reference(class, id), None, EntryState::Managed);
        if let Some(key) = key {
            self.identity.insert(key, handle);
        }
        handle
    }

    fn load_row(&mut self, handle: NodeHandle, row: StoredRow) {
        let mut associations = BTreeMap::new();
        for (field, target) in row.associations {
            let target = target.map(|id| {
                let class = self.target_class(&row.class, &field);
                self.reference_handle(&class, id)
            });
            associations.insert(field, target);
        }

        let Some(entry) = self.entries.get_mut(handle.index()) else {
            return;
        };
        entry.node.properties = row.properties;
        entry.node.associations = associations;
        entry.node.loaded = true;
        entry.original = Some(entry.node.clone());
    }

    fn hydrate(&mut self, row: StoredRow) -> NodeHandle {
        let handle = self.reference_handle(&row.class, row.id.clone());
        if self.node(handle).is_some_and(|node| !node.loaded) {
            self.load_row(handle, row);
        }
        handle
    }
}

impl UnitOfWork for MemoryObjectManager {
    fn object_change_set(&self, handle: NodeHandle) -> ChangeSet {
        self.change_sets.get(&handle).cloned().unwrap_or_default()
    }

    fn scheduled_insertions(&self) -> Vec<NodeHandle> {
        self.insertions.clone()
    }

    fn scheduled_updates(&self) -> Vec<NodeHandle> {
        self.updates.clone()
    }

    fn scheduled_deletions(&self) -> Vec<NodeHandle> {
        self.deletions.clone()
    }

    fn is_scheduled_for_update(&self, handle: NodeHandle) -> bool {
        self.updates.contains(&handle)
    }

    fn is_scheduled_for_delete(&self, handle: NodeHandle) -> bool {
        self.deletions.contains(&handle)
    }

    fn schedule_for_delete(&mut self, handle: NodeHandle) {
        let Some(entry) = self.entries.get_mut(handle.index()) else {
            return;
        };
        match entry.state {
            EntryState::New => {
                entry.state = EntryState::Detached;
                self.insertions.retain(|h| *h != handle);
            }
            EntryState::Managed => {
                entry.state = EntryState::Removed;
                self.updates.retain(|h| *h != handle);
                if !self.deletions.contains(&handle) {
                    self.deletions.push(handle);
                }
            }
            EntryState::Removed | EntryState::Detached => {}
        }
    }

    fn schedule_extra_update(&mut self, handle: NodeHandle, changes: ChangeSet) {
        self.extra_updates.entry(handle).or_default().merge(changes);
    }

    fn set_original_object_property(&mut self, handle: NodeHandle, field: &str, value: FieldValue) {
        let Some(original) = self
            .entries
            .get_mut(handle.index())
            .and_then(|entry| entry.original.as_mut())
        else {
            return;
        };
        match value {
            FieldValue::Scalar(v) => original.set_property(field, v),
            FieldValue::Reference(h) => original.set_association(field, h),
        }
    }

    fn recompute_single_object_change_set(&mut self, handle: NodeHandle) {
        let Some(state) = self.entries.get(handle.index()).map(|e| e.state) else {
            return;
        };
        let changes = self.diff(handle);
        if changes.is_empty() {
            return;
        }
        self.change_sets.entry(handle).or_default().merge(changes);
        if state == EntryState::Managed {
            self.dirty.insert(handle);
        }
    }
}

#[async_trait]
impl ObjectManager for MemoryObjectManager {
    fn class_metadata(&self, class: &str) -> Option<Arc<ClassMetadata>> {
        self.metadata.get(class).cloned()
    }

    fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.entries.get(handle.index()).map(|e| &e.node)
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.entries.get_mut(handle.index()).map(|e| &mut e.node)
    }

    async fn find_by_path(&mut self, query: &PathQuery) -> Result<Vec<NodeHandle>> {
        let matcher = match &query.pattern {
            PathPattern::Like(pattern) => like_to_regex(pattern)?,
            PathPattern::Regex(pattern) => {
                Regex::new(pattern).map_err(|e| TreeError::store(format!("Invalid path pattern: {}", e)))?
            }
        };

        let mut matches: Vec<(String, StoredRow)> = self
            .rows
            .values()
            .filter(|row| row.class == query.class)
            .filter_map(|row| {
                let path = row.text(&query.path_field)?;
                if !matcher.is_match(path) || query.exclude_path.as_deref() == Some(path) {
                    return None;
                }
                if let (Some(field), Some(min)) = (&query.level_field, query.min_level_exclusive) {
                    if row.property(field).and_then(Value::as_i64).map_or(true, |lvl| lvl <= min) {
                        return None;
                    }
                }
                Some((path.to_string(), row.clone()))
            })
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));

        tracing::debug!(class = %query.class, pattern = ?query.pattern, found = matches.len(), "Path query");
        Ok(matches.into_iter().map(|(_, row)| self.hydrate(row)).collect())
    }

    async fn get_reference(&mut self, class: &str, id: Value) -> Result<NodeHandle> {
        if identity_key(class, &id).is_none() {
            return Err(TreeError::store(format!("Unsupported identifier {} for {}", id, class)));
        }
        Ok(self.reference_handle(class, id))
    }

    async fn initialize_object(&mut self, handle: NodeHandle) -> Result<()> {
        let node = self.require_node(handle)?;
        if node.loaded {
            return Ok(());
        }
        let id = node.id.clone().ok_or_else(|| TreeError::missing_identifier(handle))?;
        let row = self
            .stored(&node.class, &id)
            .cloned()
            .ok_or_else(|| TreeError::store(format!("No stored {} with identifier {}", node.class, id)))?;
        self.load_row(handle, row);
        tracing::debug!(node = %handle, "Initialized reference");
        Ok(())
    }
}

/// Translate a `LIKE` pattern with `\` escapes into an anchored regex
fn like_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| TreeError::store(format!("Invalid LIKE pattern: {}", e)))
}
