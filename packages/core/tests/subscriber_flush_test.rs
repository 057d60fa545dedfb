//! Integration tests for full flush cycles
//!
//! Tests cover:
//! - Document adapter with UUID identifiers
//! - Configuration loaded from JSON
//! - Classes without tree configuration passing through untouched
//! - Association roots resolved to managed references
//! - Repository helpers over flushed data

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use treepath_core::{
    db::{IdStrategy, MemoryObjectManager, ObjectManager},
    mapping::{ClassMetadata, ConfigurationProvider, ConfigurationRegistry, FieldType},
    models::{Node, NodeHandle},
    TreeRepository, TreeSubscriber,
};

const CONFIG_JSON: &str = r#"{
    "Category": {
        "parent_field": "parent",
        "path_field": "path",
        "path_source_field": "title",
        "level_field": "level",
        "path_separator": "|"
    },
    "Folder": {
        "parent_field": "parent",
        "path_field": "path",
        "path_source_field": "name",
        "root_field": "root",
        "path_separator": "/",
        "path_append_id": "never"
    }
}"#;

fn register_classes(om: &mut MemoryObjectManager) {
    om.register_class(
        ClassMetadata::new("Category", "id")
            .with_field("title", FieldType::String)
            .with_field("path", FieldType::String)
            .with_field("level", FieldType::Integer)
            .with_association("parent", "Category"),
    );
    om.register_class(
        ClassMetadata::new("Folder", "id")
            .with_field("name", FieldType::String)
            .with_field("path", FieldType::String)
            .with_association("parent", "Folder")
            .with_association("root", "Folder"),
    );
    om.register_class(ClassMetadata::new("Tag", "id").with_field("label", FieldType::String));
}

/// Test helper: Create an environment configured from JSON
fn create_test_env(om: MemoryObjectManager) -> Result<(MemoryObjectManager, TreeSubscriber)> {
    let mut om = om;
    register_classes(&mut om);
    let registry = ConfigurationRegistry::from_json(CONFIG_JSON)?;
    Ok((om, TreeSubscriber::new(Arc::new(registry))))
}

fn path(om: &MemoryObjectManager, node: NodeHandle) -> Option<String> {
    om.node(node)?.property("path")?.as_str().map(str::to_string)
}

fn id(om: &MemoryObjectManager, node: NodeHandle) -> String {
    om.node(node).unwrap().id_string().unwrap()
}

// =========================================================================
// Document Adapter Tests
// =========================================================================

#[tokio::test]
async fn test_document_store_with_uuid_identifiers() -> Result<()> {
    let om = MemoryObjectManager::document().with_id_strategy(IdStrategy::Uuid);
    let (mut om, mut subscriber) = create_test_env(om)?;

    let food = om.persist(Node::new("Category", json!({ "title": "Food" })), &mut subscriber).await?;
    let fruit = om
        .persist(
            Node::new("Category", json!({ "title": "Fruit" })).with_association("parent", Some(food)),
            &mut subscriber,
        )
        .await?;
    om.flush(&mut subscriber).await?;

    let expected = format!("Food-{}|Fruit-{}|", id(&om, food), id(&om, fruit));
    assert_eq!(path(&om, fruit), Some(expected.clone()));
    assert_eq!(om.node(fruit).unwrap().property("level"), Some(&json!(2)));

    let stored = om.stored("Category", &json!(id(&om, fruit))).unwrap();
    assert_eq!(stored.text("path"), Some(expected.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_document_store_move() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(MemoryObjectManager::document())?;

    let a = om.persist(Node::new("Category", json!({ "title": "A" })), &mut subscriber).await?;
    let b = om
        .persist(
            Node::new("Category", json!({ "title": "B" })).with_association("parent", Some(a)),
            &mut subscriber,
        )
        .await?;
    let c = om
        .persist(
            Node::new("Category", json!({ "title": "C" })).with_association("parent", Some(b)),
            &mut subscriber,
        )
        .await?;
    let d = om.persist(Node::new("Category", json!({ "title": "D" })), &mut subscriber).await?;
    om.flush(&mut subscriber).await?;

    om.node_mut(b).unwrap().set_association("parent", Some(d));
    om.flush(&mut subscriber).await?;

    assert_eq!(path(&om, c).as_deref(), Some("D-4|B-2|C-3|"));
    assert_eq!(
        om.stored("Category", &json!(3)).unwrap().text("path"),
        Some("D-4|B-2|C-3|")
    );
    Ok(())
}

// =========================================================================
// Configuration Tests
// =========================================================================

#[tokio::test]
async fn test_unconfigured_class_is_ignored() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(MemoryObjectManager::relational())?;

    let tag = om.persist(Node::new("Tag", json!({ "label": "red" })), &mut subscriber).await?;
    om.flush(&mut subscriber).await?;

    assert!(om.node(tag).unwrap().property("path").is_none());
    assert!(om.stored("Tag", &json!(1)).is_some());
    assert!(subscriber.engine().locks().is_empty());
    Ok(())
}

#[test]
fn test_registry_rejects_locking_without_field() {
    let json = r#"{ "Category": {
        "parent_field": "parent", "path_field": "path", "path_source_field": "title",
        "activate_locking": true
    } }"#;
    assert!(ConfigurationRegistry::from_json(json).is_err());
}

#[test]
fn test_registry_requires_class_metadata() -> Result<()> {
    let registry = ConfigurationRegistry::from_json(CONFIG_JSON)?;
    let om = MemoryObjectManager::relational();

    assert!(registry.configuration(&om, "Category").is_err());
    assert!(registry.configuration(&om, "Tag")?.is_none());
    Ok(())
}

// =========================================================================
// Association Root Tests
// =========================================================================

#[tokio::test]
async fn test_root_association_resolves_to_reference() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(MemoryObjectManager::relational())?;

    om.seed(Node::new("Folder", json!({ "name": "docs", "path": "docs/" })).with_id("docs"))?;
    let docs = om.get_reference("Folder", json!("docs")).await?;
    let guides = om
        .persist(
            Node::new("Folder", json!({ "name": "guides" })).with_association("parent", Some(docs)),
            &mut subscriber,
        )
        .await?;
    om.flush(&mut subscriber).await?;

    let node = om.node(guides).unwrap();
    assert_eq!(node.property("path"), Some(&json!("docs/guides/")));
    assert_eq!(node.association("root"), Some(docs));
    assert!(om.node(docs).unwrap().loaded);

    let stored = om.stored("Folder", node.id.as_ref().unwrap()).unwrap();
    assert_eq!(stored.association("root"), Some(&json!("docs")));
    Ok(())
}

// =========================================================================
// Repository Tests
// =========================================================================

#[tokio::test]
async fn test_repository_over_flushed_tree() -> Result<()> {
    let (mut om, mut subscriber) = create_test_env(MemoryObjectManager::relational())?;

    let a = om.persist(Node::new("Category", json!({ "title": "A" })), &mut subscriber).await?;
    let b = om
        .persist(
            Node::new("Category", json!({ "title": "B" })).with_association("parent", Some(a)),
            &mut subscriber,
        )
        .await?;
    let c = om
        .persist(
            Node::new("Category", json!({ "title": "C" })).with_association("parent", Some(b)),
            &mut subscriber,
        )
        .await?;
    om.flush(&mut subscriber).await?;

    let registry = ConfigurationRegistry::from_json(CONFIG_JSON)?;
    let mapping = registry.configuration(&om, "Category")?.unwrap();
    let adapter = om.adapter();
    let mut repo = TreeRepository::new(&mut om, adapter.as_ref(), mapping);

    assert_eq!(repo.root_nodes().await?, vec![a]);
    assert_eq!(repo.children(Some(a), true).await?, vec![b]);
    assert_eq!(repo.children(Some(a), false).await?, vec![b, c]);
    assert_eq!(repo.path_to(c).await?, vec![a, b, c]);

    let tree = repo.build_tree(&[c, a, b])?;
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].path, "A-1|");
    assert_eq!(tree[0].children[0].children[0].path, "A-1|B-2|C-3|");
    Ok(())
}
