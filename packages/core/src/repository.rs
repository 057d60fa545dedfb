//! Tree Repository
//!
//! Read helpers over a materialized path tree, expressed through the same
//! path queries the engine uses:
//!
//! - `root_nodes` - nodes without a parent
//! - `children` - descendants of a node (or of every root), optionally only
//!   the direct ones
//! - `path_to` - ancestor chain from the root down to a node
//! - `build_tree` - nested, serializable hierarchy of a set of nodes

use crate::db::{ObjectManager, PathQuery};
use crate::error::{Result, TreeError};
use crate::events::EventAdapter;
use crate::mapping::TreeMapping;
use crate::models::NodeHandle;
use crate::strategy::path_builder::{descendant_prefix, level_of};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// One node of a built tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeItem {
    pub id: Value,
    pub path: String,
    pub level: i64,
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeItem>,
}

pub struct TreeRepository<'a> {
    om: &'a mut dyn ObjectManager,
    adapter: &'a dyn EventAdapter,
    mapping: Arc<TreeMapping>,
}

impl<'a> TreeRepository<'a> {
    pub fn new(om: &'a mut dyn ObjectManager, adapter: &'a dyn EventAdapter, mapping: Arc<TreeMapping>) -> Self {
        Self { om, adapter, mapping }
    }

    fn path_of(&self, node: NodeHandle) -> Result<String> {
        Ok(self
            .mapping
            .accessor
            .path(self.om.require_node(node)?)
            .unwrap_or_default()
            .to_string())
    }

    async fn find_prefixed(&mut self, prefix: &str) -> Result<Vec<NodeHandle>> {
        let query = PathQuery::new(
            self.mapping.class(),
            self.mapping.accessor.path_field(),
            self.adapter.path_prefix_pattern(prefix),
        );
        self.om.find_by_path(&query).await
    }

    /// Every stored node without a parent, ordered by path
    pub async fn root_nodes(&mut self) -> Result<Vec<NodeHandle>> {
        let all = self.find_prefixed("").await?;
        let accessor = &self.mapping.accessor;
        Ok(all
            .into_iter()
            .filter(|h| {
                self.om
                    .node(*h)
                    .is_some_and(|node| accessor.parent(node).is_none())
            })
            .collect())
    }

    /// Descendants of `node`, or of every root when `node` is `None`
    ///
    /// With `direct` only the next level is returned: children whose level
    /// is one more than the node's, or whose parent is the node when no
    /// level field is mapped.
    pub async fn children(&mut self, node: Option<NodeHandle>, direct: bool) -> Result<Vec<NodeHandle>> {
        let Some(node) = node else {
            return if direct {
                self.root_nodes().await
            } else {
                self.find_prefixed("").await
            };
        };

        self.om.initialize_object(node).await?;
        let path = self.path_of(node)?;
        if path.is_empty() {
            return Ok(Vec::new());
        }
        let policy = *self.mapping.policy();
        let found = self.find_prefixed(&descendant_prefix(&path, &policy)).await?;
        let own_level = level_of(&path, &policy);

        let accessor = &self.mapping.accessor;
        let om = &*self.om;
        Ok(found
            .into_iter()
            .filter(|h| *h != node)
            .filter(|h| {
                if !direct {
                    return true;
                }
                let Some(child) = om.node(*h) else {
                    return false;
                };
                match accessor.path(child) {
                    Some(child_path) if accessor.level_field().is_some() => {
                        level_of(child_path, &policy) == own_level + 1
                    }
                    _ => accessor.parent(child) == Some(node),
                }
            })
            .collect())
    }

    /// Ancestors of `node` from the root down, `node` included
    pub async fn path_to(&mut self, node: NodeHandle) -> Result<Vec<NodeHandle>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(node);

        while let Some(handle) = current {
            if !seen.insert(handle) {
                return Err(TreeError::store(format!("Parent chain of {} loops at {}", node, handle)));
            }
            self.om.initialize_object(handle).await?;
            chain.push(handle);
            current = self.mapping.accessor.parent(self.om.require_node(handle)?);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Nest `nodes` by path; nodes whose ancestors are missing from the set
    /// become top-level items
    pub fn build_tree(&self, nodes: &[NodeHandle]) -> Result<Vec<TreeItem>> {
        let policy = *self.mapping.policy();
        let mut flat = Vec::with_capacity(nodes.len());
        for handle in nodes {
            let node = self.om.require_node(*handle)?;
            let path = self.mapping.accessor.path(node).unwrap_or_default().to_string();
            flat.push(TreeItem {
                id: node.id.clone().unwrap_or(Value::Null),
                level: level_of(&path, &policy),
                path,
                properties: node.properties.clone(),
                children: Vec::new(),
            });
        }
        flat.sort_by(|a, b| a.path.cmp(&b.path));

        // stack of open ancestors, each waiting for its children
        let mut roots: Vec<TreeItem> = Vec::new();
        let mut stack: Vec<TreeItem> = Vec::new();
        for item in flat {
            while let Some(top) = stack.last() {
                if item.path.starts_with(&descendant_prefix(&top.path, &policy)) {
                    break;
                }
                close(&mut stack, &mut roots);
            }
            stack.push(item);
        }
        while !stack.is_empty() {
            close(&mut stack, &mut roots);
        }
        Ok(roots)
    }
}

fn close(stack: &mut Vec<TreeItem>, roots: &mut Vec<TreeItem>) {
    if let Some(done) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(done),
            None => roots.push(done),
        }
    }
}
