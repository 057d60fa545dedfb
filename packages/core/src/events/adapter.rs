//! Event Adapters
//!
//! Uniform view over the two storage families the tree behavior supports.
//! The engine only needs two backend-specific decisions:
//!
//! - **Staging**: how a structural change made after the change sets were
//!   computed reaches storage. Relational mappers take an extra update and
//!   must be told the new path is already the original value; document
//!   mappers simply recompute the object's change set.
//! - **Prefix matching**: relational stores match paths with an escaped
//!   `LIKE` pattern, document stores with an anchored regular expression.

use crate::db::{ObjectManager, PathPattern};
use crate::mapping::TreeMapping;
use crate::models::{ChangeSet, NodeHandle};

pub trait EventAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn object_change_set(&self, om: &dyn ObjectManager, handle: NodeHandle) -> ChangeSet {
        om.object_change_set(handle)
    }

    fn scheduled_insertions(&self, om: &dyn ObjectManager) -> Vec<NodeHandle> {
        om.scheduled_insertions()
    }

    fn scheduled_updates(&self, om: &dyn ObjectManager) -> Vec<NodeHandle> {
        om.scheduled_updates()
    }

    fn scheduled_deletions(&self, om: &dyn ObjectManager) -> Vec<NodeHandle> {
        om.scheduled_deletions()
    }

    /// Make structural field changes reach storage in the current flush
    fn stage_structural_update(
        &self,
        om: &mut dyn ObjectManager,
        handle: NodeHandle,
        changes: ChangeSet,
        mapping: &TreeMapping,
    );

    /// Pattern matching every stored path that starts with `prefix`
    fn path_prefix_pattern(&self, prefix: &str) -> PathPattern;
}

/// Adapter for relational mappers
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationalAdapter;

impl EventAdapter for RelationalAdapter {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn stage_structural_update(
        &self,
        om: &mut dyn ObjectManager,
        handle: NodeHandle,
        changes: ChangeSet,
        mapping: &TreeMapping,
    ) {
        let accessor = &mapping.accessor;
        let synced = [Some(accessor.path_field()), accessor.path_hash_field()];
        for field in synced.into_iter().flatten() {
            if let Some(change) = changes.get(field) {
                om.set_original_object_property(handle, field, change.new.clone());
            }
        }
        om.schedule_extra_update(handle, changes);
    }

    fn path_prefix_pattern(&self, prefix: &str) -> PathPattern {
        let mut pattern = String::with_capacity(prefix.len() + 1);
        for c in prefix.chars() {
            if matches!(c, '\\' | '%' | '_') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        PathPattern::Like(pattern)
    }
}

/// Adapter for document mappers
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAdapter;

impl EventAdapter for DocumentAdapter {
    fn name(&self) -> &'static str {
        "document"
    }

    fn stage_structural_update(
        &self,
        om: &mut dyn ObjectManager,
        handle: NodeHandle,
        _changes: ChangeSet,
        _mapping: &TreeMapping,
    ) {
        om.recompute_single_object_change_set(handle);
    }

    fn path_prefix_pattern(&self, prefix: &str) -> PathPattern {
        PathPattern::Regex(format!("^{}", regex::escape(prefix)))
    }
}
