//! Performance benchmarks for treepath core operations
//!
//! Run with: `cargo bench -p treepath-core`
//!
//! These benchmarks measure critical path performance:
//! - Path building for a deep parent path
//! - Subtree move fan-out (one moved node, many descendants)
//! - Cascading delete of a wide subtree

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use treepath_core::db::{MemoryObjectManager, ObjectManager};
use treepath_core::mapping::{ClassMetadata, ConfigurationRegistry, FieldType, TreeConfig};
use treepath_core::strategy::path_builder::build_path;
use treepath_core::strategy::PathPolicy;
use treepath_core::{Node, NodeHandle, TreeSubscriber};

/// Setup an object manager and subscriber for the Category class
fn setup() -> (MemoryObjectManager, TreeSubscriber) {
    let mut om = MemoryObjectManager::relational();
    om.register_class(
        ClassMetadata::new("Category", "id")
            .with_field("title", FieldType::String)
            .with_field("path", FieldType::String)
            .with_field("pathHash", FieldType::String)
            .with_field("level", FieldType::Integer)
            .with_association("parent", "Category"),
    );
    let config = TreeConfig::builder("parent", "path", "title")
        .separator('/')
        .hash_field("pathHash")
        .level_field("level")
        .build()
        .unwrap();
    let registry = ConfigurationRegistry::new().with("Category", config).unwrap();
    (om, TreeSubscriber::new(Arc::new(registry)))
}

/// Build two roots and `width` x `depth` descendants under the first one
async fn seed_tree(
    om: &mut MemoryObjectManager,
    subscriber: &mut TreeSubscriber,
    width: usize,
    depth: usize,
) -> (NodeHandle, NodeHandle, NodeHandle) {
    let source = om
        .persist(Node::new("Category", json!({ "title": "Source" })), subscriber)
        .await
        .unwrap();
    let target = om
        .persist(Node::new("Category", json!({ "title": "Target" })), subscriber)
        .await
        .unwrap();
    let branch = om
        .persist(
            Node::new("Category", json!({ "title": "Branch" })).with_association("parent", Some(source)),
            subscriber,
        )
        .await
        .unwrap();

    for w in 0..width {
        let mut parent = branch;
        for d in 0..depth {
            parent = om
                .persist(
                    Node::new("Category", json!({ "title": format!("N{}x{}", w, d) }))
                        .with_association("parent", Some(parent)),
                    subscriber,
                )
                .await
                .unwrap();
        }
    }
    om.flush(subscriber).await.unwrap();
    (source, target, branch)
}

fn bench_build_path(c: &mut Criterion) {
    let policy = PathPolicy::new('/');
    let parent: String = (1..=32).map(|i| format!("Segment-{}/", i)).collect();

    c.bench_function("build_path_depth_32", |b| {
        b.iter(|| {
            build_path(
                black_box("Leaf"),
                black_box(Some("33")),
                black_box(Some(parent.as_str())),
                &policy,
            )
            .unwrap()
        })
    });
}

fn bench_subtree_move(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("subtree_move");
    group.sample_size(20);
    group.bench_function("200_descendants", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let (mut om, mut subscriber) = setup();
                let (source, target, branch) = seed_tree(&mut om, &mut subscriber, 20, 10).await;

                let mut total = Duration::ZERO;
                for i in 0..iters {
                    let parent = if i % 2 == 0 { target } else { source };
                    om.node_mut(branch).unwrap().set_association("parent", Some(parent));

                    let start = Instant::now();
                    om.flush(&mut subscriber).await.unwrap();
                    total += start.elapsed();
                }
                total
            })
        })
    });
    group.finish();
}

fn bench_cascade_delete(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("cascade_delete");
    group.sample_size(20);
    group.bench_function("200_descendants", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let (mut om, mut subscriber) = setup();
                    let (_, _, branch) = seed_tree(&mut om, &mut subscriber, 20, 10).await;

                    let start = Instant::now();
                    om.remove(branch, &mut subscriber).await.unwrap();
                    om.flush(&mut subscriber).await.unwrap();
                    total += start.elapsed();
                }
                total
            })
        })
    });
    group.finish();
}

criterion_group!(benches, bench_build_path, bench_subtree_move, bench_cascade_delete);
criterion_main!(benches);
