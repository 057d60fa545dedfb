//! Lifecycle Events
//!
//! The closed set of mapper lifecycle events the tree behavior reacts to.
//! Host mappers translate their own callbacks into [`LifecycleEvent`] values
//! and hand them, together with a [`LifecycleEventArgs`], to an
//! [`EventListener`].
//!
//! # Event Flow
//!
//! 1. `PrePersist` / `PreRemove` fire when the application persists or
//!    removes a node, `PreUpdate` when the flush finds a changed node
//! 2. `OnFlush` fires once the change sets are known
//! 3. The listener fans `OnFlush` out into `ScheduledInsert`,
//!    `ScheduledUpdate`, `ScheduledDelete` and finally `FlushEnd`
//! 4. `PostPersist` / `PostUpdate` / `PostRemove` fire as each write lands
//! 5. `FlushAborted` fires instead of the remaining events when the flush
//!    fails, after the host rolled back its unit of work

use crate::db::ObjectManager;
use crate::error::Result;
use crate::events::EventAdapter;
use crate::models::NodeHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    PrePersist,
    PreUpdate,
    PreRemove,
    ScheduledInsert,
    ScheduledUpdate,
    ScheduledDelete,
    PostPersist,
    PostUpdate,
    PostRemove,
    FlushEnd,
    OnFlush,
    FlushAborted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PrePersist => "prePersist",
            EventKind::PreUpdate => "preUpdate",
            EventKind::PreRemove => "preRemove",
            EventKind::ScheduledInsert => "scheduledInsert",
            EventKind::ScheduledUpdate => "scheduledUpdate",
            EventKind::ScheduledDelete => "scheduledDelete",
            EventKind::PostPersist => "postPersist",
            EventKind::PostUpdate => "postUpdate",
            EventKind::PostRemove => "postRemove",
            EventKind::FlushEnd => "flushEnd",
            EventKind::OnFlush => "onFlush",
            EventKind::FlushAborted => "flushAborted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event with the node it concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    PrePersist(NodeHandle),
    PreUpdate(NodeHandle),
    PreRemove(NodeHandle),
    ScheduledInsert(NodeHandle),
    ScheduledUpdate(NodeHandle),
    ScheduledDelete(NodeHandle),
    PostPersist(NodeHandle),
    PostUpdate(NodeHandle),
    PostRemove(NodeHandle),
    FlushEnd,
    OnFlush,
    FlushAborted,
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::PrePersist(_) => EventKind::PrePersist,
            LifecycleEvent::PreUpdate(_) => EventKind::PreUpdate,
            LifecycleEvent::PreRemove(_) => EventKind::PreRemove,
            LifecycleEvent::ScheduledInsert(_) => EventKind::ScheduledInsert,
            LifecycleEvent::ScheduledUpdate(_) => EventKind::ScheduledUpdate,
            LifecycleEvent::ScheduledDelete(_) => EventKind::ScheduledDelete,
            LifecycleEvent::PostPersist(_) => EventKind::PostPersist,
            LifecycleEvent::PostUpdate(_) => EventKind::PostUpdate,
            LifecycleEvent::PostRemove(_) => EventKind::PostRemove,
            LifecycleEvent::FlushEnd => EventKind::FlushEnd,
            LifecycleEvent::OnFlush => EventKind::OnFlush,
            LifecycleEvent::FlushAborted => EventKind::FlushAborted,
        }
    }

    /// Node the event concerns, `None` for flush-wide events
    pub fn node(&self) -> Option<NodeHandle> {
        match *self {
            LifecycleEvent::PrePersist(h)
            | LifecycleEvent::PreUpdate(h)
            | LifecycleEvent::PreRemove(h)
            | LifecycleEvent::ScheduledInsert(h)
            | LifecycleEvent::ScheduledUpdate(h)
            | LifecycleEvent::ScheduledDelete(h)
            | LifecycleEvent::PostPersist(h)
            | LifecycleEvent::PostUpdate(h)
            | LifecycleEvent::PostRemove(h) => Some(h),
            LifecycleEvent::FlushEnd | LifecycleEvent::OnFlush | LifecycleEvent::FlushAborted => None,
        }
    }
}

/// Adapter and object manager handed to listeners with every event
pub struct LifecycleEventArgs<'a> {
    adapter: &'a dyn EventAdapter,
    om: &'a mut dyn ObjectManager,
}

impl<'a> LifecycleEventArgs<'a> {
    pub fn new(adapter: &'a dyn EventAdapter, om: &'a mut dyn ObjectManager) -> Self {
        Self { adapter, om }
    }

    pub fn adapter(&self) -> &'a dyn EventAdapter {
        self.adapter
    }

    pub fn object_manager(&mut self) -> &mut dyn ObjectManager {
        &mut *self.om
    }

    /// Borrow adapter and object manager at the same time
    pub fn split(&mut self) -> (&'a dyn EventAdapter, &mut dyn ObjectManager) {
        (self.adapter, &mut *self.om)
    }
}

/// Receiver of lifecycle events
#[async_trait]
pub trait EventListener: Send {
    /// Event kinds this listener wants to receive
    fn subscribed_events(&self) -> &[EventKind];

    async fn handle(&mut self, event: LifecycleEvent, args: &mut LifecycleEventArgs<'_>) -> Result<()>;
}
