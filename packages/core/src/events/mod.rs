//! Lifecycle events and the storage-family adapters that normalize them.

mod adapter;
mod lifecycle;

pub use adapter::{DocumentAdapter, EventAdapter, RelationalAdapter};
pub use lifecycle::{EventKind, EventListener, LifecycleEvent, LifecycleEventArgs};
