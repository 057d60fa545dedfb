//! Integration tests for the materialized path engine
//!
//! Tests cover:
//! - Path, level, root and hash of inserted nodes
//! - Moving a subtree under a new parent
//! - Cascading deletes bounded by the separator
//! - Separator rejection leaving nodes untouched
//! - Retrying a flush that failed
//! - Every start/end separator policy through a full flush

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use treepath_core::{
    db::{MemoryObjectManager, ObjectManager},
    mapping::{AppendIdPolicy, ClassMetadata, ConfigurationRegistry, FieldType, TreeConfig, TreeConfigBuilder},
    models::{Node, NodeHandle},
    strategy::path_builder::path_hash,
    TreeError, TreeSubscriber,
};

/// Test helper: Category metadata with every structural field
fn category_metadata() -> ClassMetadata {
    ClassMetadata::new("Category", "id")
        .with_field("title", FieldType::String)
        .with_field("path", FieldType::String)
        .with_field("pathHash", FieldType::String)
        .with_field("level", FieldType::Integer)
        .with_field("root", FieldType::String)
        .with_association("parent", "Category")
}

fn builder() -> TreeConfigBuilder {
    TreeConfig::builder("parent", "path", "title")
        .separator('/')
        .hash_field("pathHash")
        .level_field("level")
        .root_field("root")
}

/// Test helper: Create an object manager and subscriber for one config
fn create_test_env(config: TreeConfig) -> Result<(MemoryObjectManager, TreeSubscriber)> {
    let mut om = MemoryObjectManager::relational();
    om.register_class(category_metadata());
    let registry = ConfigurationRegistry::new().with("Category", config)?;
    Ok((om, TreeSubscriber::new(Arc::new(registry))))
}

fn category(title: &str, parent: Option<NodeHandle>) -> Node {
    Node::new("Category", json!({ "title": title })).with_association("parent", parent)
}

fn text<'a>(om: &'a MemoryObjectManager, node: NodeHandle, field: &str) -> Option<&'a str> {
    om.node(node)?.property(field)?.as_str()
}

fn stored_text(om: &MemoryObjectManager, id: i64, field: &str) -> Option<String> {
    om.stored("Category", &json!(id))?
        .text(field)
        .map(str::to_string)
}

/// Test helper: A-1 > B-2 > C-3 and a second root D-4, flushed
async fn build_tree(
    om: &mut MemoryObjectManager,
    subscriber: &mut TreeSubscriber,
) -> Result<[NodeHandle; 4]> {
    let a = om.persist(category("A", None), subscriber).await?;
    let b = om.persist(category("B", Some(a)), subscriber).await?;
    let c = om.persist(category("C", Some(b)), subscriber).await?;
    let d = om.persist(category("D", None), subscriber).await?;
    om.flush(subscriber).await?;
    Ok([a, b, c, d])
}

// =========================================================================
// Insert Tests
// =========================================================================

#[tokio::test]
async fn test_child_path_level_root_and_hash() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;

    let a = om.persist(category("A", None), &mut subscriber).await?;
    om.flush(&mut subscriber).await?;
    assert_eq!(text(&om, a, "path"), Some("A-1/"));

    let b = om.persist(category("B", Some(a)), &mut subscriber).await?;
    om.flush(&mut subscriber).await?;

    let node = om.node(b).unwrap();
    assert_eq!(node.property("path"), Some(&json!("A-1/B-2/")));
    assert_eq!(node.property("level"), Some(&json!(2)));
    assert_eq!(node.property("root"), Some(&json!("A-1")));
    assert_eq!(node.property("pathHash"), Some(&json!(path_hash("A-1/B-2/"))));

    // structural fields reached storage
    assert_eq!(stored_text(&om, 2, "path").as_deref(), Some("A-1/B-2/"));
    assert_eq!(stored_text(&om, 2, "root").as_deref(), Some("A-1"));
    assert_eq!(
        om.stored("Category", &json!(2)).unwrap().property("level"),
        Some(&json!(2))
    );
    Ok(())
}

#[tokio::test]
async fn test_whole_chain_in_one_flush() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;
    let [a, b, c, d] = build_tree(&mut om, &mut subscriber).await?;

    assert_eq!(text(&om, a, "path"), Some("A-1/"));
    assert_eq!(text(&om, b, "path"), Some("A-1/B-2/"));
    assert_eq!(text(&om, c, "path"), Some("A-1/B-2/C-3/"));
    assert_eq!(text(&om, d, "path"), Some("D-4/"));
    assert_eq!(stored_text(&om, 3, "path").as_deref(), Some("A-1/B-2/C-3/"));
    assert!(subscriber.engine().pending().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_child_persisted_before_its_parent() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;

    let c = om.persist(category("C", None), &mut subscriber).await?;
    let p = om.persist(category("P", None), &mut subscriber).await?;
    om.node_mut(c).unwrap().set_association("parent", Some(p));
    om.flush(&mut subscriber).await?;

    // the parent is written first, so it receives the first identifier
    assert_eq!(text(&om, p, "path"), Some("P-1/"));
    assert_eq!(text(&om, c, "path"), Some("P-1/C-2/"));
    assert_eq!(om.node(c).unwrap().property("level"), Some(&json!(2)));
    assert_eq!(stored_text(&om, 2, "path").as_deref(), Some("P-1/C-2/"));
    assert!(subscriber.engine().pending().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_no_identifier_when_append_disabled() -> Result<()> {
    let config = builder().append_id(AppendIdPolicy::Never).build()?;
    let (mut om, mut subscriber) = create_test_env(config)?;

    let food = om.persist(category("Food", None), &mut subscriber).await?;
    let fruit = om.persist(category("Fruit", Some(food)), &mut subscriber).await?;
    om.flush(&mut subscriber).await?;

    assert_eq!(text(&om, fruit, "path"), Some("Food/Fruit/"));
    assert_eq!(text(&om, fruit, "root"), Some("Food"));
    Ok(())
}

#[tokio::test]
async fn test_second_flush_changes_nothing() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;
    let [_, _, c, _] = build_tree(&mut om, &mut subscriber).await?;

    let before = om.node(c).unwrap().clone();
    om.flush(&mut subscriber).await?;

    assert_eq!(om.node(c).unwrap(), &before);
    assert_eq!(stored_text(&om, 3, "path").as_deref(), Some("A-1/B-2/C-3/"));
    Ok(())
}

// =========================================================================
// Move Tests
// =========================================================================

#[tokio::test]
async fn test_move_subtree_under_new_parent() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;
    let [a, b, c, d] = build_tree(&mut om, &mut subscriber).await?;

    om.node_mut(b).unwrap().set_association("parent", Some(d));
    om.flush(&mut subscriber).await?;

    assert_eq!(text(&om, b, "path"), Some("D-4/B-2/"));
    assert_eq!(text(&om, b, "root"), Some("D-4"));
    assert_eq!(text(&om, c, "path"), Some("D-4/B-2/C-3/"));
    assert_eq!(om.node(c).unwrap().property("level"), Some(&json!(3)));
    assert_eq!(text(&om, c, "root"), Some("D-4"));

    assert_eq!(stored_text(&om, 2, "path").as_deref(), Some("D-4/B-2/"));
    assert_eq!(stored_text(&om, 3, "path").as_deref(), Some("D-4/B-2/C-3/"));
    assert_eq!(stored_text(&om, 3, "pathHash"), Some(path_hash("D-4/B-2/C-3/")));

    // nodes outside the moved subtree are untouched
    assert_eq!(text(&om, a, "path"), Some("A-1/"));
    assert_eq!(text(&om, d, "path"), Some("D-4/"));
    Ok(())
}

#[tokio::test]
async fn test_rename_reaches_unloaded_descendants() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;
    let [_, b, c, _] = build_tree(&mut om, &mut subscriber).await?;

    om.unload(c);
    om.node_mut(b).unwrap().set_property("title", json!("Bee"));
    om.flush(&mut subscriber).await?;

    assert_eq!(text(&om, b, "path"), Some("A-1/Bee-2/"));
    assert_eq!(stored_text(&om, 3, "path").as_deref(), Some("A-1/Bee-2/C-3/"));
    Ok(())
}

#[tokio::test]
async fn test_move_to_root() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;
    let [_, b, c, _] = build_tree(&mut om, &mut subscriber).await?;

    om.node_mut(b).unwrap().set_association("parent", None);
    om.flush(&mut subscriber).await?;

    assert_eq!(text(&om, b, "path"), Some("B-2/"));
    assert_eq!(om.node(b).unwrap().property("level"), Some(&json!(1)));
    assert_eq!(text(&om, c, "path"), Some("B-2/C-3/"));
    assert_eq!(text(&om, c, "root"), Some("B-2"));
    Ok(())
}

// =========================================================================
// Delete Tests
// =========================================================================

/// Test helper: A-1 > {B-2 > C-3, B-20}, already stored and managed
fn seeded_tree(om: &mut MemoryObjectManager) -> [NodeHandle; 4] {
    let row = |title: &str, path: &str, level: i64, id: i64| {
        Node::new("Category", json!({ "title": title, "path": path, "level": level, "root": "A-1" })).with_id(id)
    };
    let a = om.insert_loaded(row("A", "A-1/", 1, 1));
    let b = om.insert_loaded(row("B", "A-1/B-2/", 2, 2).with_association("parent", Some(a)));
    let c = om.insert_loaded(row("C", "A-1/B-2/C-3/", 3, 3).with_association("parent", Some(b)));
    let sibling = om.insert_loaded(row("B", "A-1/B-20/", 2, 20).with_association("parent", Some(a)));
    [a, b, c, sibling]
}

#[tokio::test]
async fn test_delete_spares_prefix_sibling() -> Result<()> {
    for config in [builder().build()?, TreeConfig::builder("parent", "path", "title").separator('/').build()?] {
        let (mut om, mut subscriber) = create_test_env(config)?;
        let [_, b, _, _] = seeded_tree(&mut om);

        om.remove(b, &mut subscriber).await?;
        om.flush(&mut subscriber).await?;

        let remaining: Vec<Value> = om.stored_rows("Category").map(|row| row.id.clone()).collect();
        assert_eq!(remaining, vec![json!(1), json!(20)]);
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_root_removes_whole_tree() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;
    let [a, _, _, _] = seeded_tree(&mut om);
    om.seed(Node::new("Category", json!({ "title": "Z", "path": "Z-9/", "level": 1 })).with_id(9))?;

    om.remove(a, &mut subscriber).await?;
    om.flush(&mut subscriber).await?;

    let remaining: Vec<Value> = om.stored_rows("Category").map(|row| row.id.clone()).collect();
    assert_eq!(remaining, vec![json!(9)]);
    Ok(())
}

// =========================================================================
// Separator Rejection Tests
// =========================================================================

#[tokio::test]
async fn test_separator_in_new_node_is_rejected() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;

    let bad = om.persist(category("A/B", None), &mut subscriber).await?;
    let err = om.flush(&mut subscriber).await.unwrap_err();

    assert_eq!(err, TreeError::invalid_path_source('/', "A/B"));
    assert!(om.node(bad).unwrap().property("path").is_none());
    assert!(om.node(bad).unwrap().property("level").is_none());
    assert_eq!(om.stored_rows("Category").count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_separator_in_rename_leaves_tree_untouched() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;
    let [_, b, c, _] = build_tree(&mut om, &mut subscriber).await?;

    om.node_mut(b).unwrap().set_property("title", json!("B/x"));
    let err = om.flush(&mut subscriber).await.unwrap_err();

    assert!(matches!(err, TreeError::InvalidPathSource { separator: '/', .. }));
    assert_eq!(text(&om, b, "path"), Some("A-1/B-2/"));
    assert_eq!(text(&om, c, "path"), Some("A-1/B-2/C-3/"));
    assert_eq!(stored_text(&om, 2, "title").as_deref(), Some("B"));
    Ok(())
}

#[tokio::test]
async fn test_failed_flush_leaves_nothing_behind() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(builder().build()?)?;
    let a = om.persist(category("A", None), &mut subscriber).await?;
    om.flush(&mut subscriber).await?;

    let good = om.persist(category("C", Some(a)), &mut subscriber).await?;
    let bad = om.persist(category("B/x", Some(a)), &mut subscriber).await?;
    assert!(om.flush(&mut subscriber).await.is_err());

    assert!(om.node(good).unwrap().id.is_none());
    assert!(om.node(bad).unwrap().property("path").is_none());
    assert_eq!(om.stored_rows("Category").count(), 1);
    assert!(subscriber.engine().pending().is_empty());

    om.node_mut(bad).unwrap().set_property("title", json!("Bx"));
    om.flush(&mut subscriber).await?;

    assert_eq!(text(&om, good, "path"), Some("A-1/C-2/"));
    assert_eq!(text(&om, bad, "path"), Some("A-1/Bx-3/"));
    assert_eq!(stored_text(&om, 3, "path").as_deref(), Some("A-1/Bx-3/"));
    assert!(subscriber.engine().pending().is_empty());
    Ok(())
}

// =========================================================================
// Separator Policy Tests
// =========================================================================

#[tokio::test]
async fn test_level_and_root_under_every_policy() -> Result<()> {
    let cases = [
        (false, true, "A-1/B-2/"),
        (false, false, "A-1/B-2"),
        (true, true, "/A-1/B-2/"),
        (true, false, "/A-1/B-2"),
    ];

    for (starts, ends, expected) in cases {
        let config = builder()
            .starts_with_separator(starts)
            .ends_with_separator(ends)
            .build()?;
        let (mut om, mut subscriber) = create_test_env(config)?;

        let a = om.persist(category("A", None), &mut subscriber).await?;
        let b = om.persist(category("B", Some(a)), &mut subscriber).await?;
        om.flush(&mut subscriber).await?;

        let node = om.node(b).unwrap();
        assert_eq!(node.property("path"), Some(&json!(expected)), "starts={starts} ends={ends}");
        assert_eq!(node.property("level"), Some(&json!(2)), "starts={starts} ends={ends}");
        assert_eq!(node.property("root"), Some(&json!("A-1")), "starts={starts} ends={ends}");
        assert_eq!(om.node(a).unwrap().property("level"), Some(&json!(1)));
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_without_trailing_separator() -> Result<()> {
    let config = builder().ends_with_separator(false).build()?;
    let (mut om, mut subscriber) = create_test_env(config)?;

    let a = om.insert_loaded(Node::new("Category", json!({ "title": "A", "path": "A-1", "level": 1 })).with_id(1));
    let b = om.insert_loaded(
        Node::new("Category", json!({ "title": "B", "path": "A-1/B-2", "level": 2 }))
            .with_id(2)
            .with_association("parent", Some(a)),
    );
    om.insert_loaded(
        Node::new("Category", json!({ "title": "C", "path": "A-1/B-2/C-3", "level": 3 }))
            .with_id(3)
            .with_association("parent", Some(b)),
    );
    om.insert_loaded(
        Node::new("Category", json!({ "title": "B", "path": "A-1/B-20", "level": 2 }))
            .with_id(20)
            .with_association("parent", Some(a)),
    );

    om.remove(b, &mut subscriber).await?;
    om.flush(&mut subscriber).await?;

    let remaining: Vec<Value> = om.stored_rows("Category").map(|row| row.id.clone()).collect();
    assert_eq!(remaining, vec![json!(1), json!(20)]);
    Ok(())
}
