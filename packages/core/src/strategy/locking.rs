//! Tree Lock Coordinator
//!
//! Cooperative, timestamp-based mutual exclusion per tree root. Every pre-*
//! event on a node of a locking-enabled class walks up to the root of its
//! tree and refuses to proceed while another writer holds an unexpired lock
//! there. Accepted nodes are recorded as pending against their root.
//!
//! # Lifecycle of a root
//!
//! ```text
//! UNLOCKED --pre-* accepted--> REGISTERED --flush end, work pending--> LOCKED(t)
//!    ^                             |                                      |
//!    +------ pending set empty ----+-------- pending set empty ----------+
//!                                  ^                                      |
//!                                  +----------- flush aborted ------------+
//! ```
//!
//! An aborted flush puts the previous lock time field value back in memory
//! and keeps only the registrations of work the host still has scheduled,
//! so the next flush locks the root again.
//!
//! The lock is advisory: it only protects against other clients honoring
//! the same lock time field. A lock older than the configured timeout is
//! treated as abandoned.
//!
//! Locks acquired by this coordinator do not block its own later pre-*
//! checks in the same cycle.

use crate::db::ObjectManager;
use crate::error::{Result, TreeError};
use crate::events::EventAdapter;
use crate::mapping::TreeMapping;
use crate::models::{ChangeSet, FieldChange, FieldValue, NodeHandle};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Kind of mutation a pending node is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Insert,
    Update,
    Remove,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Remove => "remove",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(Action::Insert),
            "update" => Ok(Action::Update),
            "remove" => Ok(Action::Remove),
            other => Err(TreeError::unsupported_action(other)),
        }
    }
}

/// Source of the current time for lock checks
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock with second precision
#[derive(Debug)]
pub struct FixedClock {
    secs: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            secs: AtomicI64::new(at.timestamp()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.secs.store(at.timestamp(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.secs.load(Ordering::SeqCst), 0).unwrap_or_default()
    }
}

#[derive(Debug)]
struct RootEntry {
    mapping: Arc<TreeMapping>,
    pending: BTreeMap<Action, BTreeSet<NodeHandle>>,
    locked_at: Option<DateTime<Utc>>,
    /// Lock time field value before this coordinator locked the root
    previous_lock: Value,
}

impl RootEntry {
    fn new(mapping: Arc<TreeMapping>) -> Self {
        Self {
            mapping,
            pending: BTreeMap::new(),
            locked_at: None,
            previous_lock: Value::Null,
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.values().all(BTreeSet::is_empty)
    }
}

/// Root lock registry of one subscriber
#[derive(Debug)]
pub struct LockCoordinator {
    clock: Arc<dyn Clock>,
    roots: BTreeMap<NodeHandle, RootEntry>,
    node_roots: HashMap<(Action, NodeHandle), NodeHandle>,
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl LockCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            roots: BTreeMap::new(),
            node_roots: HashMap::new(),
        }
    }

    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Roots currently registered, with whether this coordinator locked them
    pub fn registered_roots(&self) -> impl Iterator<Item = (NodeHandle, bool)> + '_ {
        self.roots
            .iter()
            .map(|(root, entry)| (*root, entry.locked_at.is_some()))
    }

    /// Number of nodes still pending under `root`
    pub fn pending_count(&self, root: NodeHandle) -> usize {
        self.roots
            .get(&root)
            .map_or(0, |entry| entry.pending.values().map(BTreeSet::len).sum())
    }

    /// Walk parent references up to the top-most ancestor, loading partial
    /// references on the way
    pub async fn find_root(
        om: &mut dyn ObjectManager,
        mapping: &TreeMapping,
        node: NodeHandle,
    ) -> Result<NodeHandle> {
        let mut current = node;
        let mut visited = HashSet::new();
        loop {
            if !om.require_node(current)?.loaded {
                om.initialize_object(current).await?;
            }
            if !visited.insert(current) {
                tracing::warn!(node = %node, at = %current, "Parent chain loops, stopping root walk");
                return Ok(current);
            }
            match mapping.accessor.parent(om.require_node(current)?) {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
    }

    /// Check the tree of `node` is not locked and record `node` as pending
    ///
    /// # Errors
    ///
    /// Returns `TreeError::TreeLocked` when another writer holds an
    /// unexpired lock on the root. Nothing is recorded in that case.
    pub async fn before_mutation(
        &mut self,
        om: &mut dyn ObjectManager,
        mapping: &Arc<TreeMapping>,
        node: NodeHandle,
        action: Action,
    ) -> Result<()> {
        if !mapping.locking_enabled() {
            return Ok(());
        }

        let root = Self::find_root(om, mapping, node).await?;
        let held_by_us = self
            .roots
            .get(&root)
            .is_some_and(|entry| entry.locked_at.is_some());

        if !held_by_us {
            let root_node = om.require_node(root)?;
            if let Some(locked_at) = mapping.accessor.lock_time(root_node) {
                let elapsed = self.clock.now().signed_duration_since(locked_at);
                let timeout_ms = i64::try_from(mapping.config.locking_timeout)
                    .unwrap_or(i64::MAX / 1000)
                    .saturating_mul(1000);
                if elapsed.num_milliseconds() < timeout_ms {
                    let root_id = mapping.accessor.root_identifier(root_node);
                    tracing::warn!(
                        root_id = %root_id,
                        action = %action,
                        locked_at = %locked_at,
                        "Rejected mutation of locked tree"
                    );
                    return Err(TreeError::tree_locked(root_id));
                }
            }
        }

        self.roots
            .entry(root)
            .or_insert_with(|| RootEntry::new(Arc::clone(mapping)))
            .pending
            .entry(action)
            .or_default()
            .insert(node);
        self.node_roots.insert((action, node), root);

        tracing::debug!(node = %node, root = %root, action = %action, "Registered pending tree mutation");
        Ok(())
    }

    /// Remove `node` from its root's pending set, releasing the root once
    /// nothing is pending there anymore
    pub fn after_mutation(
        &mut self,
        om: &mut dyn ObjectManager,
        adapter: &dyn EventAdapter,
        node: NodeHandle,
        action: Action,
    ) -> Result<()> {
        let Some(root) = self.node_roots.remove(&(action, node)) else {
            return Ok(());
        };

        let idle = match self.roots.get_mut(&root) {
            Some(entry) => {
                if let Some(set) = entry.pending.get_mut(&action) {
                    set.remove(&node);
                }
                entry.is_idle()
            }
            None => false,
        };

        if idle {
            self.release(om, adapter, root)?;
        }
        Ok(())
    }

    /// Lock every registered root with pending work and forget idle ones
    pub fn on_flush_end(&mut self, om: &mut dyn ObjectManager, adapter: &dyn EventAdapter) -> Result<()> {
        let idle: Vec<NodeHandle> = self
            .roots
            .iter()
            .filter(|(_, entry)| entry.is_idle())
            .map(|(root, _)| *root)
            .collect();
        for root in idle {
            self.release(om, adapter, root)?;
        }

        let now = self.clock.now();
        for (root, entry) in self.roots.iter_mut() {
            if entry.locked_at.is_some() {
                continue;
            }
            let mapping = Arc::clone(&entry.mapping);
            entry.previous_lock = mapping.accessor.lock_time_value(om.require_node(*root)?);
            write_lock_time(om, adapter, &mapping, *root, Some(now))?;
            entry.locked_at = Some(now);
            let pending: usize = entry.pending.values().map(BTreeSet::len).sum();
            tracing::info!(root = %root, pending, "Locked tree");
        }
        Ok(())
    }

    fn release(&mut self, om: &mut dyn ObjectManager, adapter: &dyn EventAdapter, root: NodeHandle) -> Result<()> {
        let Some(entry) = self.roots.remove(&root) else {
            return Ok(());
        };
        self.node_roots.retain(|_, r| *r != root);

        if entry.locked_at.is_some() {
            if om.is_scheduled_for_delete(root) {
                tracing::debug!(root = %root, "Tree root deleted, dropping its lock");
            } else {
                write_lock_time(om, adapter, &entry.mapping, root, None)?;
                tracing::info!(root = %root, "Released tree lock");
            }
        }
        Ok(())
    }

    /// Undo the in-memory lock writes of a failed flush
    ///
    /// Insert and remove registrations survive while the host still has the
    /// node scheduled; update registrations are dropped because the next
    /// flush raises `PreUpdate` again for nodes that are still changed.
    pub fn on_flush_aborted(&mut self, om: &mut dyn ObjectManager) {
        let insertions: HashSet<NodeHandle> = om.scheduled_insertions().into_iter().collect();
        self.node_roots.retain(|(action, node), _| match action {
            Action::Insert => insertions.contains(node),
            Action::Remove => om.is_scheduled_for_delete(*node),
            Action::Update => false,
        });

        let node_roots = &self.node_roots;
        for (root, entry) in self.roots.iter_mut() {
            for (action, nodes) in entry.pending.iter_mut() {
                nodes.retain(|node| node_roots.get(&(*action, *node)) == Some(root));
            }
            if entry.locked_at.take().is_none() {
                continue;
            }
            let previous = std::mem::take(&mut entry.previous_lock);
            if let (Some(field), Some(node)) = (entry.mapping.accessor.lock_time_field(), om.node_mut(*root)) {
                entry.mapping.accessor.restore_lock_time_value(node, previous.clone());
                om.set_original_object_property(*root, field, FieldValue::Scalar(previous));
            }
            tracing::info!(root = %root, "Dropped tree lock of aborted flush");
        }

        self.roots.retain(|_, entry| !entry.is_idle());
    }

    /// Forget every registration without touching storage
    pub fn clear(&mut self) {
        self.roots.clear();
        self.node_roots.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn write_lock_time(
    om: &mut dyn ObjectManager,
    adapter: &dyn EventAdapter,
    mapping: &TreeMapping,
    root: NodeHandle,
    at: Option<DateTime<Utc>>,
) -> Result<()> {
    let Some(field) = mapping.accessor.lock_time_field() else {
        return Ok(());
    };

    let node = om.require_node_mut(root)?;
    let old = mapping.accessor.lock_time_value(node);
    mapping.accessor.set_lock_time(node, at);
    let new = mapping.accessor.lock_time_value(node);

    let changes = ChangeSet::new().with(field, FieldChange::new(old, new));
    adapter.stage_structural_update(om, root, changes, mapping);
    Ok(())
}
