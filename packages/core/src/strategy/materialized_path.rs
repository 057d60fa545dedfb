//! Materialized Path Engine
//!
//! Keeps the structural fields of tree nodes (path, path hash, level, root)
//! consistent with their parent chain while the host mapper flushes.
//!
//! # Responsibilities
//!
//! - **update_node**: recompute one node from its own path source and its
//!   parent's current path, refreshing a stale parent first so paths are
//!   always built top-down
//! - **update_children**: fan a node's change out to every stored descendant
//!   of its previous path, shallowest first
//! - **remove_node**: schedule every descendant of a deleted node for deletion
//! - **Pending insertions**: nodes whose path needs an identifier that does
//!   not exist yet are buffered and computed together, in buffering order,
//!   once every buffered node received its identifier
//! - **Locking**: pre-* and post-* events are forwarded to the
//!   [`LockCoordinator`]
//!
//! # Per-cycle context
//!
//! The buffer, the set of nodes already refreshed in this flush and the
//! previous path of every moved node only make sense inside one flush. They
//! are reset by [`MaterializedPath::begin_flush`] and, when the flush fails,
//! by [`MaterializedPath::abort_flush`]. Lock registrations outlive the
//! flush: pre-persist happens before it starts.

use crate::db::{ObjectManager, PathQuery};
use crate::error::{Result, TreeError};
use crate::events::EventAdapter;
use crate::mapping::{ConfigurationProvider, RootValue, TreeMapping};
use crate::models::{render_scalar, ChangeSet, FieldChange, FieldValue, NodeHandle};
use crate::strategy::locking::{Action, Clock, LockCoordinator};
use crate::strategy::path_builder::{
    build_path, descendant_prefix, level_of, path_hash, root_segment, validate_segment,
};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A node waiting for identifiers before its path can be computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingPath {
    /// Newly inserted node
    Insert(NodeHandle),
    /// Moved or renamed node below a node that has no identifier yet
    Update {
        node: NodeHandle,
        original_path: Option<String>,
    },
}

impl PendingPath {
    pub fn node(&self) -> NodeHandle {
        match self {
            PendingPath::Insert(node) | PendingPath::Update { node, .. } => *node,
        }
    }
}

/// Buffer of path computations deferred until identifiers are assigned
#[derive(Debug, Default)]
pub struct PendingInsertions {
    order: Vec<PendingPath>,
    awaiting: BTreeSet<NodeHandle>,
}

impl PendingInsertions {
    pub fn buffer_insert(&mut self, node: NodeHandle) {
        if self.awaiting.insert(node) {
            self.order.push(PendingPath::Insert(node));
        }
    }

    pub fn buffer_update(&mut self, node: NodeHandle, original_path: Option<String>) {
        self.order.push(PendingPath::Update { node, original_path });
    }

    pub fn contains(&self, node: NodeHandle) -> bool {
        self.order.iter().any(|p| p.node() == node)
    }

    /// Mark `node` as identified; returns the whole buffer once nothing is
    /// awaiting an identifier anymore
    pub fn identifier_assigned(&mut self, node: NodeHandle) -> Option<Vec<PendingPath>> {
        if !self.awaiting.remove(&node) || !self.awaiting.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.order))
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.awaiting.clear();
    }
}

/// Materialized path strategy
pub struct MaterializedPath {
    provider: Arc<dyn ConfigurationProvider>,
    pending: PendingInsertions,
    locks: LockCoordinator,
    refreshed: HashSet<NodeHandle>,
    updating: HashSet<NodeHandle>,
    original_paths: HashMap<NodeHandle, String>,
}

impl MaterializedPath {
    pub fn new(provider: Arc<dyn ConfigurationProvider>) -> Self {
        Self {
            provider,
            pending: PendingInsertions::default(),
            locks: LockCoordinator::default(),
            refreshed: HashSet::new(),
            updating: HashSet::new(),
            original_paths: HashMap::new(),
        }
    }

    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.locks.set_clock(clock);
    }

    pub fn provider(&self) -> &Arc<dyn ConfigurationProvider> {
        &self.provider
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub fn pending(&self) -> &PendingInsertions {
        &self.pending
    }

    /// Tree mapping of the class of `node`, `None` for non-tree classes
    pub fn mapping_for(&self, om: &dyn ObjectManager, node: NodeHandle) -> Result<Option<Arc<TreeMapping>>> {
        let class = om.require_node(node)?.class.clone();
        self.provider.configuration(om, &class)
    }

    /// Reset the per-cycle context at the start of a flush
    pub fn begin_flush(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(stale = self.pending.len(), "Discarding path computations left from a previous flush");
        }
        self.reset_cycle();
    }

    /// Drop the context of a failed flush and undo its lock writes
    ///
    /// Must run after the host rolled back its unit of work: registrations
    /// are kept only for insertions and deletions still scheduled there.
    pub fn abort_flush(&mut self, om: &mut dyn ObjectManager) {
        if !self.pending.is_empty() {
            tracing::debug!(dropped = self.pending.len(), "Dropping buffered paths of aborted flush");
        }
        self.reset_cycle();
        self.locks.on_flush_aborted(om);
    }

    /// Reset everything, lock registrations included
    pub fn clear(&mut self) {
        self.reset_cycle();
        self.locks.clear();
    }

    fn reset_cycle(&mut self) {
        self.pending.clear();
        self.refreshed.clear();
        self.updating.clear();
        self.original_paths.clear();
    }

    pub async fn process_pre_persist(
        &mut self,
        om: &mut dyn ObjectManager,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<()> {
        self.locks.before_mutation(om, mapping, node, Action::Insert).await
    }

    pub async fn process_pre_update(
        &mut self,
        om: &mut dyn ObjectManager,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<()> {
        self.locks.before_mutation(om, mapping, node, Action::Update).await
    }

    pub async fn process_pre_remove(
        &mut self,
        om: &mut dyn ObjectManager,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<()> {
        self.locks.before_mutation(om, mapping, node, Action::Remove).await
    }

    /// Compute the path of a new node now, or buffer it until identifiers
    /// exist
    pub async fn process_scheduled_insertion(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<()> {
        if mapping.requires_identifier() || self.awaits_identifier_above(om, node, mapping)? {
            validate_source(om, node, mapping)?;
            tracing::debug!(node = %node, "Buffered insertion until identifiers are assigned");
            self.pending.buffer_insert(node);
            return Ok(());
        }
        self.update_node(om, adapter, node, Arc::clone(mapping)).await
    }

    /// Recompute a moved or renamed node and its whole subtree
    pub async fn process_scheduled_update(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<()> {
        let changes = adapter.object_change_set(om, node);
        let accessor = &mapping.accessor;
        if !changes.contains(accessor.parent_field()) && !changes.contains(accessor.path_source_field()) {
            return Ok(());
        }

        let original_path = match changes.get(accessor.path_field()) {
            Some(change) => change.old.as_str().map(str::to_string),
            None => match self.original_paths.get(&node) {
                Some(path) => Some(path.clone()),
                None => accessor.path(om.require_node(node)?).map(str::to_string),
            },
        };

        if self.awaits_identifier_above(om, node, mapping)? {
            validate_source(om, node, mapping)?;
            tracing::debug!(node = %node, "Deferred update until identifiers are assigned");
            self.pending.buffer_update(node, original_path);
            return Ok(());
        }

        self.update_node(om, adapter, node, Arc::clone(mapping)).await?;
        if let Some(original_path) = original_path.filter(|p| !p.is_empty()) {
            self.update_children(om, adapter, node, mapping, &original_path).await?;
        }
        Ok(())
    }

    pub async fn process_scheduled_delete(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<()> {
        self.remove_node(om, adapter, node, mapping).await
    }

    /// Promote a buffered node and drain the buffer once complete
    pub async fn process_post_persist(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<()> {
        if let Some(batch) = self.pending.identifier_assigned(node) {
            tracing::debug!(count = batch.len(), "Computing buffered paths");
            for pending in batch {
                let handle = pending.node();
                let pending_mapping = self
                    .mapping_for(om, handle)?
                    .unwrap_or_else(|| Arc::clone(mapping));
                self.update_node(om, adapter, handle, Arc::clone(&pending_mapping))
                    .await?;
                if let PendingPath::Update {
                    original_path: Some(original_path),
                    ..
                } = pending
                {
                    if !original_path.is_empty() {
                        self.update_children(om, adapter, handle, &pending_mapping, &original_path)
                            .await?;
                    }
                }
            }
        }
        self.locks.after_mutation(om, adapter, node, Action::Insert)
    }

    pub fn process_post_update(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        node: NodeHandle,
    ) -> Result<()> {
        self.locks.after_mutation(om, adapter, node, Action::Update)
    }

    pub fn process_post_remove(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        node: NodeHandle,
    ) -> Result<()> {
        self.locks.after_mutation(om, adapter, node, Action::Remove)
    }

    pub fn on_flush_end(&mut self, om: &mut dyn ObjectManager, adapter: &dyn EventAdapter) -> Result<()> {
        self.locks.on_flush_end(om, adapter)
    }

    /// Whether an ancestor of `node` still waits for the identifier its own
    /// path segment needs
    fn awaits_identifier_above(
        &self,
        om: &dyn ObjectManager,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<bool> {
        let mut visited = HashSet::from([node]);
        let mut current = mapping.accessor.parent(om.require_node(node)?);

        while let Some(ancestor) = current {
            if !visited.insert(ancestor) {
                break;
            }
            let ancestor_node = om.require_node(ancestor)?;
            let ancestor_mapping = self
                .provider
                .configuration(om, &ancestor_node.class)?
                .unwrap_or_else(|| Arc::clone(mapping));
            if ancestor_node.id.is_none() && ancestor_mapping.requires_identifier() {
                return Ok(true);
            }
            current = ancestor_mapping.accessor.parent(ancestor_node);
        }
        Ok(false)
    }

    /// Whether the parent's path must be recomputed before a child reads it
    fn parent_is_stale(
        &self,
        om: &dyn ObjectManager,
        adapter: &dyn EventAdapter,
        parent: NodeHandle,
        mapping: &TreeMapping,
    ) -> Result<bool> {
        if self.updating.contains(&parent) || self.refreshed.contains(&parent) {
            return Ok(false);
        }
        let parent_node = om.require_node(parent)?;
        if mapping.accessor.path(parent_node).map_or(true, str::is_empty) {
            return Ok(true);
        }
        if !om.is_scheduled_for_update(parent) {
            return Ok(false);
        }
        let changes = adapter.object_change_set(om, parent);
        let accessor = &mapping.accessor;
        Ok(changes.contains(accessor.path_source_field())
            || changes.contains(accessor.path_field())
            || changes.contains(accessor.parent_field()))
    }

    /// Recompute path, hash, level and root of one node
    ///
    /// # Errors
    ///
    /// - `TreeError::InvalidPathSource` if the path source contains the
    ///   separator; the node is left untouched
    /// - `TreeError::MissingIdentifier` if the identifier must be appended
    ///   but is not assigned yet
    pub fn update_node<'a>(
        &'a mut self,
        om: &'a mut dyn ObjectManager,
        adapter: &'a dyn EventAdapter,
        node: NodeHandle,
        mapping: Arc<TreeMapping>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let accessor = &mapping.accessor;
            let policy = *mapping.policy();

            let (source, identifier, parent) = {
                let current = om.require_node(node)?;
                let source = accessor
                    .path_source(current)
                    .and_then(render_scalar)
                    .unwrap_or_default();
                validate_segment(&source, policy.separator)?;

                let identifier = if mapping.append_identifier() {
                    Some(
                        current
                            .id_string()
                            .ok_or_else(|| TreeError::missing_identifier(node))?,
                    )
                } else {
                    None
                };
                (source, identifier, accessor.parent(current))
            };

            self.updating.insert(node);
            let parent_path = match parent {
                Some(parent) => {
                    let refreshed = self.refresh_parent(om, adapter, parent, &mapping).await;
                    match refreshed {
                        Ok(path) => path,
                        Err(e) => {
                            self.updating.remove(&node);
                            return Err(e);
                        }
                    }
                }
                None => None,
            };
            self.updating.remove(&node);

            let path = build_path(&source, identifier.as_deref(), parent_path.as_deref(), &policy)?;
            let hash = accessor.has_path_hash().then(|| path_hash(&path));
            let level = accessor.level_field().map(|_| level_of(&path, &policy));
            let root = match (accessor.root_field(), root_segment(&path, &policy)) {
                (Some(_), Some(segment)) => match accessor.root_target_class() {
                    Some(class) => Some(RootValue::Reference(
                        om.get_reference(class, Value::String(segment)).await?,
                    )),
                    None => Some(RootValue::Segment(segment)),
                },
                _ => None,
            };

            let target = om.require_node_mut(node)?;
            let mut changes = ChangeSet::new();

            let old_path = target.field(accessor.path_field());
            accessor.set_path(target, &path);
            record(&mut changes, accessor.path_field(), old_path, target.field(accessor.path_field()));

            if let (Some(field), Some(hash)) = (accessor.path_hash_field(), hash.as_deref()) {
                let old = target.field(field);
                accessor.set_path_hash(target, hash);
                record(&mut changes, field, old, target.field(field));
            }
            if let (Some(field), Some(level)) = (accessor.level_field(), level) {
                let old = target.field(field);
                accessor.set_level(target, level);
                record(&mut changes, field, old, target.field(field));
            }
            if let (Some(field), Some(root)) = (accessor.root_field(), root) {
                let old = target.field(field);
                accessor.set_root(target, root);
                record(&mut changes, field, old, target.field(field));
            }

            self.refreshed.insert(node);
            if changes.is_empty() {
                return Ok(());
            }

            if let Some(previous) = changes
                .get(accessor.path_field())
                .and_then(|change| change.old.as_str())
                .filter(|p| !p.is_empty())
            {
                self.original_paths
                    .entry(node)
                    .or_insert_with(|| previous.to_string());
            }

            tracing::debug!(node = %node, path = %path, level = ?level, "Recomputed node path");
            adapter.stage_structural_update(om, node, changes, &mapping);
            Ok(())
        })
    }

    /// Load the parent, recompute it when stale and return its path
    async fn refresh_parent(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        parent: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<Option<String>> {
        om.initialize_object(parent).await?;
        let parent_mapping = self
            .mapping_for(om, parent)?
            .unwrap_or_else(|| Arc::clone(mapping));

        if self.parent_is_stale(om, adapter, parent, &parent_mapping)? {
            self.update_node(om, adapter, parent, Arc::clone(&parent_mapping))
                .await?;
        }

        Ok(parent_mapping
            .accessor
            .path(om.require_node(parent)?)
            .map(str::to_string))
    }

    /// Recompute every stored descendant of `original_path`
    pub async fn update_children(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
        original_path: &str,
    ) -> Result<()> {
        let prefix = descendant_prefix(original_path, mapping.policy());
        let query = PathQuery::new(
            mapping.class(),
            mapping.accessor.path_field(),
            adapter.path_prefix_pattern(&prefix),
        )
        .excluding(original_path);

        let children = om.find_by_path(&query).await?;
        tracing::debug!(node = %node, original_path, count = children.len(), "Updating descendants");

        for child in children {
            if child == node || om.is_scheduled_for_delete(child) {
                continue;
            }
            let child_mapping = self
                .mapping_for(om, child)?
                .unwrap_or_else(|| Arc::clone(mapping));
            self.update_node(om, adapter, child, child_mapping).await?;
        }
        Ok(())
    }

    /// Schedule every descendant of `node` for deletion
    ///
    /// With level tracking only strictly deeper nodes match, so a sibling
    /// sharing the prefix string can never be caught.
    pub async fn remove_node(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        node: NodeHandle,
        mapping: &Arc<TreeMapping>,
    ) -> Result<()> {
        let accessor = &mapping.accessor;
        let (path, level) = {
            let current = om.require_node(node)?;
            (accessor.path(current).map(str::to_string), accessor.level(current))
        };
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            return Ok(());
        };

        let prefix = descendant_prefix(&path, mapping.policy());
        let mut query = PathQuery::new(mapping.class(), accessor.path_field(), adapter.path_prefix_pattern(&prefix));
        match (accessor.level_field(), level) {
            (Some(field), Some(level)) if level > 0 => query = query.deeper_than(field, level),
            _ => query = query.excluding(path.as_str()),
        }

        let descendants = om.find_by_path(&query).await?;
        let mut scheduled = 0usize;
        for descendant in descendants {
            if descendant != node && !om.is_scheduled_for_delete(descendant) {
                om.schedule_for_delete(descendant);
                scheduled += 1;
            }
        }
        if scheduled > 0 {
            tracing::info!(node = %node, path = %path, count = scheduled, "Cascading delete to descendants");
        }
        Ok(())
    }
}

/// Reject a path source containing the separator before anything is written
fn validate_source(om: &dyn ObjectManager, node: NodeHandle, mapping: &TreeMapping) -> Result<()> {
    let source = mapping
        .accessor
        .path_source(om.require_node(node)?)
        .and_then(render_scalar)
        .unwrap_or_default();
    validate_segment(&source, mapping.policy().separator)
}

fn record(changes: &mut ChangeSet, field: &str, old: FieldValue, new: FieldValue) {
    if old != new {
        changes.insert(field, FieldChange { old, new });
    }
}
