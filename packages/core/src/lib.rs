//! Treepath Core
//!
//! Materialized-path tree maintenance driven by an object mapper's lifecycle
//! events. Each node of a configured class stores its full ancestry as a
//! delimited string (`Food-1/Fruit-2/`), kept consistent while nodes are
//! inserted, moved, renamed and deleted.
//!
//! # Architecture
//!
//! - **Host mapper abstraction**: The engine never touches storage itself; it
//!   works through the `ObjectManager`/`UnitOfWork` traits and an
//!   `EventAdapter` per storage family (relational or document).
//! - **Arena handles**: Nodes reference each other with `NodeHandle`s into the
//!   object manager's identity map, never with pointers.
//! - **Per-root locking**: Optional timestamp locks on root nodes reject
//!   concurrent modification of the same tree.
//!
//! # Modules
//!
//! - [`models`] - Node records, handles and change sets
//! - [`mapping`] - Tree configuration, class metadata and field accessors
//! - [`events`] - Lifecycle events, listener trait and storage adapters
//! - [`strategy`] - Path rules, the mutation engine and the lock coordinator
//! - [`subscriber`] - Event dispatch into the engine
//! - [`repository`] - Read helpers (roots, children, ancestors, nested trees)
//! - [`db`] - Host mapper traits and the in-memory object manager
//! - [`error`] - Error type shared by every module

pub mod db;
pub mod error;
pub mod events;
pub mod mapping;
pub mod models;
pub mod repository;
pub mod strategy;
pub mod subscriber;

// Re-export commonly used types
pub use error::{Result, TreeError};
pub use mapping::{ConfigurationRegistry, TreeConfig};
pub use models::{Node, NodeHandle};
pub use repository::{TreeItem, TreeRepository};
pub use subscriber::TreeSubscriber;
