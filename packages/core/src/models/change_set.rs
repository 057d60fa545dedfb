//! Change Sets
//!
//! A change set lists the fields of one object whose current value differs
//! from the value last synchronized with storage. Host mappers compute them;
//! the tree behavior reads them to decide whether a scheduled update moved a
//! node, and writes them when it stages structural changes of its own.

use crate::models::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Old and new value of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: FieldValue,
    pub new: FieldValue,
}

impl FieldChange {
    pub fn new(old: impl Into<FieldValue>, new: impl Into<FieldValue>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }
}

/// Field name → change, ordered by field name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: BTreeMap<String, FieldChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change, replacing any previous change of the same field
    pub fn insert(&mut self, field: impl Into<String>, change: FieldChange) {
        self.changes.insert(field.into(), change);
    }

    /// Builder form of [`ChangeSet::insert`]
    pub fn with(mut self, field: impl Into<String>, change: FieldChange) -> Self {
        self.insert(field, change);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changes.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.changes.iter()
    }

    /// Fold `other` into this change set
    ///
    /// The oldest `old` value wins so the merged set still describes the
    /// transition from the stored state.
    pub fn merge(&mut self, other: ChangeSet) {
        for (field, change) in other.changes {
            match self.changes.get_mut(&field) {
                Some(existing) => existing.new = change.new,
                None => {
                    self.changes.insert(field, change);
                }
            }
        }
    }
}
