//! Persistence Layer
//!
//! The tree behavior is hosted by an object mapper it does not own. This
//! module describes that host through two traits and ships one in-memory
//! implementation:
//!
//! - `UnitOfWork` - change sets, scheduled writes, extra updates
//! - `ObjectManager` - identity map, class metadata, path queries, references
//! - `MemoryObjectManager` - a complete host used by tests, benches and the
//!   demo binary
//!
//! # Architecture
//!
//! Nodes never hold pointers to each other. Every node lives in the object
//! manager's identity map and is addressed by a `NodeHandle`; associations
//! store handles, storage rows store identifiers.

mod memory_store;
mod object_manager;

pub use memory_store::{IdStrategy, MemoryObjectManager, StoredRow};
pub use object_manager::{ObjectManager, PathPattern, PathQuery, UnitOfWork};
