//! Tree Subscriber
//!
//! Entry point hooked into the host mapper. Every lifecycle event is routed
//! through one dispatch table to the materialized path engine; objects whose
//! class has no tree configuration are ignored.
//!
//! | event             | handler                                   |
//! |-------------------|-------------------------------------------|
//! | `PrePersist`      | lock check, pending insert                |
//! | `PreUpdate`       | lock check, pending update                |
//! | `PreRemove`       | lock check, pending remove                |
//! | `OnFlush`         | fan out into the three scheduled events   |
//! | `ScheduledInsert` | compute path or buffer                    |
//! | `ScheduledUpdate` | recompute node and descendants            |
//! | `ScheduledDelete` | cascade delete to descendants             |
//! | `FlushEnd`        | lock roots with pending work              |
//! | `PostPersist`     | drain buffer, release lock when done      |
//! | `PostUpdate`      | release lock when done                    |
//! | `PostRemove`      | release lock when done                    |
//! | `FlushAborted`    | undo lock writes, reset the flush context |
//!
//! # Examples
//!
//! ```rust
//! use treepath_core::db::{MemoryObjectManager, ObjectManager};
//! use treepath_core::mapping::{ClassMetadata, ConfigurationRegistry, FieldType, TreeConfig};
//! use treepath_core::models::Node;
//! use treepath_core::subscriber::TreeSubscriber;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let mut om = MemoryObjectManager::relational();
//! om.register_class(
//!     ClassMetadata::new("Category", "id")
//!         .with_field("title", FieldType::String)
//!         .with_field("path", FieldType::String)
//!         .with_association("parent", "Category"),
//! );
//! let registry = ConfigurationRegistry::new()
//!     .with("Category", TreeConfig::builder("parent", "path", "title").separator('/').build()?)?;
//! let mut subscriber = TreeSubscriber::new(Arc::new(registry));
//!
//! let food = om.persist(Node::new("Category", json!({ "title": "Food" })), &mut subscriber).await?;
//! om.flush(&mut subscriber).await?;
//!
//! assert_eq!(om.node(food).unwrap().property("path"), Some(&json!("Food-1/")));
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::events::{EventKind, EventListener, LifecycleEvent, LifecycleEventArgs};
use crate::mapping::ConfigurationProvider;
use crate::strategy::{Clock, MaterializedPath};
use async_trait::async_trait;
use std::sync::Arc;

const SUBSCRIBED_EVENTS: &[EventKind] = &[
    EventKind::PrePersist,
    EventKind::PreRemove,
    EventKind::PreUpdate,
    EventKind::OnFlush,
    EventKind::PostPersist,
    EventKind::PostUpdate,
    EventKind::PostRemove,
    EventKind::FlushAborted,
];

pub struct TreeSubscriber {
    engine: MaterializedPath,
}

impl TreeSubscriber {
    pub fn new(provider: Arc<dyn ConfigurationProvider>) -> Self {
        Self {
            engine: MaterializedPath::new(provider),
        }
    }

    /// Use `clock` for lock timestamps and expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.engine.set_clock(clock);
        self
    }

    pub fn engine(&self) -> &MaterializedPath {
        &self.engine
    }

    /// Forget all per-cycle state and lock registrations
    pub fn clear(&mut self) {
        self.engine.clear();
    }

    async fn on_flush(&mut self, args: &mut LifecycleEventArgs<'_>) -> Result<()> {
        self.engine.begin_flush();
        let (adapter, om) = args.split();

        let insertions = adapter.scheduled_insertions(om);
        let updates = adapter.scheduled_updates(om);
        let deletions = adapter.scheduled_deletions(om);
        let mut used = false;

        for node in insertions {
            used |= self.route(LifecycleEvent::ScheduledInsert(node), args).await?;
        }
        for node in updates {
            used |= self.route(LifecycleEvent::ScheduledUpdate(node), args).await?;
        }
        for node in deletions {
            used |= self.route(LifecycleEvent::ScheduledDelete(node), args).await?;
        }

        if used {
            self.route(LifecycleEvent::FlushEnd, args).await?;
        }
        Ok(())
    }

    /// Handle one event; returns whether a tree class was involved
    async fn route(&mut self, event: LifecycleEvent, args: &mut LifecycleEventArgs<'_>) -> Result<bool> {
        let (adapter, om) = args.split();

        let Some(node) = event.node() else {
            match event {
                LifecycleEvent::FlushEnd => self.engine.on_flush_end(om, adapter)?,
                LifecycleEvent::FlushAborted => self.engine.abort_flush(om),
                _ => {}
            }
            return Ok(true);
        };
        let Some(mapping) = self.engine.mapping_for(om, node)? else {
            return Ok(false);
        };

        match event {
            LifecycleEvent::PrePersist(_) => self.engine.process_pre_persist(om, node, &mapping).await?,
            LifecycleEvent::PreUpdate(_) => self.engine.process_pre_update(om, node, &mapping).await?,
            LifecycleEvent::PreRemove(_) => self.engine.process_pre_remove(om, node, &mapping).await?,
            LifecycleEvent::ScheduledInsert(_) => {
                self.engine
                    .process_scheduled_insertion(om, adapter, node, &mapping)
                    .await?;
                om.recompute_single_object_change_set(node);
            }
            LifecycleEvent::ScheduledUpdate(_) => {
                self.engine
                    .process_scheduled_update(om, adapter, node, &mapping)
                    .await?
            }
            LifecycleEvent::ScheduledDelete(_) => {
                self.engine
                    .process_scheduled_delete(om, adapter, node, &mapping)
                    .await?
            }
            LifecycleEvent::PostPersist(_) => {
                self.engine
                    .process_post_persist(om, adapter, node, &mapping)
                    .await?
            }
            LifecycleEvent::PostUpdate(_) => self.engine.process_post_update(om, adapter, node)?,
            LifecycleEvent::PostRemove(_) => self.engine.process_post_remove(om, adapter, node)?,
            LifecycleEvent::FlushEnd | LifecycleEvent::OnFlush | LifecycleEvent::FlushAborted => {}
        }
        Ok(true)
    }
}

#[async_trait]
impl EventListener for TreeSubscriber {
    fn subscribed_events(&self) -> &[EventKind] {
        SUBSCRIBED_EVENTS
    }

    async fn handle(&mut self, event: LifecycleEvent, args: &mut LifecycleEventArgs<'_>) -> Result<()> {
        tracing::trace!(event = %event.kind(), node = ?event.node(), "Tree event");
        match event {
            LifecycleEvent::OnFlush => self.on_flush(args).await,
            other => self.route(other, args).await.map(|_| ()),
        }
    }
}
