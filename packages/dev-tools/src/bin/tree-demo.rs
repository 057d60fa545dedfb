//! In-Memory Tree Demo Binary
//!
//! Walks through the lifecycle of a small category tree on the in-memory
//! object manager and prints the structural columns after every flush.
//!
//! # Usage
//!
//! ```bash
//! # Default logging
//! cargo run --bin tree-demo
//!
//! # See every recomputed path and lock decision
//! RUST_LOG=treepath_core=debug cargo run --bin tree-demo
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")
//! - `TREE_DEMO_SEPARATOR`: Path separator (default: `/`)

use std::env;
use std::sync::Arc;

use serde_json::json;
use treepath_core::db::{MemoryObjectManager, ObjectManager};
use treepath_core::mapping::{ClassMetadata, ConfigurationProvider, ConfigurationRegistry, FieldType, TreeConfig};
use treepath_core::{Node, TreeRepository, TreeSubscriber};

const CLASS: &str = "Category";

fn print_rows(title: &str, om: &MemoryObjectManager) {
    println!("\n== {} ==", title);
    println!("{:>4}  {:<12} {:<28} {:>5}  {}", "id", "title", "path", "level", "root");
    let mut rows: Vec<_> = om.stored_rows(CLASS).collect();
    rows.sort_by(|a, b| a.text("path").cmp(&b.text("path")));
    for row in rows {
        println!(
            "{:>4}  {:<12} {:<28} {:>5}  {}",
            row.id,
            row.text("title").unwrap_or("-"),
            row.text("path").unwrap_or("-"),
            row.property("level").map(ToString::to_string).unwrap_or_default(),
            row.text("root").unwrap_or("-"),
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let separator = env::var("TREE_DEMO_SEPARATOR")
        .ok()
        .and_then(|s| s.chars().next())
        .unwrap_or('/');
    tracing::info!("Tree demo (separator {:?})", separator);

    let mut om = MemoryObjectManager::relational();
    om.register_class(
        ClassMetadata::new(CLASS, "id")
            .with_field("title", FieldType::String)
            .with_field("path", FieldType::String)
            .with_field("pathHash", FieldType::String)
            .with_field("level", FieldType::Integer)
            .with_field("root", FieldType::String)
            .with_association("parent", CLASS),
    );

    let config = TreeConfig::builder("parent", "path", "title")
        .separator(separator)
        .hash_field("pathHash")
        .level_field("level")
        .root_field("root")
        .build()?;
    let registry = Arc::new(ConfigurationRegistry::new().with(CLASS, config)?);
    let mut subscriber = TreeSubscriber::new(registry.clone());

    // Build: Food > {Fruit > Apple, Vegetables > Carrot}, Drinks
    let food = om.persist(Node::new(CLASS, json!({ "title": "Food" })), &mut subscriber).await?;
    let fruit = om
        .persist(Node::new(CLASS, json!({ "title": "Fruit" })).with_association("parent", Some(food)), &mut subscriber)
        .await?;
    om.persist(Node::new(CLASS, json!({ "title": "Apple" })).with_association("parent", Some(fruit)), &mut subscriber)
        .await?;
    let vegetables = om
        .persist(
            Node::new(CLASS, json!({ "title": "Vegetables" })).with_association("parent", Some(food)),
            &mut subscriber,
        )
        .await?;
    om.persist(
        Node::new(CLASS, json!({ "title": "Carrot" })).with_association("parent", Some(vegetables)),
        &mut subscriber,
    )
    .await?;
    let drinks = om.persist(Node::new(CLASS, json!({ "title": "Drinks" })), &mut subscriber).await?;
    om.flush(&mut subscriber).await?;
    print_rows("initial tree", &om);

    // Move Fruit (and Apple with it) under Drinks
    om.node_mut(fruit)
        .ok_or_else(|| anyhow::anyhow!("Fruit is not managed"))?
        .set_association("parent", Some(drinks));
    om.flush(&mut subscriber).await?;
    print_rows("after moving Fruit under Drinks", &om);

    // Delete Vegetables, cascading to Carrot
    om.remove(vegetables, &mut subscriber).await?;
    om.flush(&mut subscriber).await?;
    print_rows("after deleting Vegetables", &om);

    // Nested view of what is left
    let mapping = registry
        .configuration(&om, CLASS)?
        .ok_or_else(|| anyhow::anyhow!("{} has no tree configuration", CLASS))?;
    let adapter = om.adapter();
    let mut repo = TreeRepository::new(&mut om, adapter.as_ref(), mapping);
    let nodes = repo.children(None, false).await?;
    let tree = repo.build_tree(&nodes)?;
    println!("\n== nested ==\n{}", serde_json::to_string_pretty(&tree)?);

    Ok(())
}
