//! Tree Strategies
//!
//! - `path_builder` - pure path formatting rules
//! - `materialized_path` - the mutation engine and its pending buffer
//! - `locking` - the per-root lock coordinator and its clock

pub mod locking;
pub mod materialized_path;
pub mod path_builder;

pub use locking::{Action, Clock, FixedClock, LockCoordinator, SystemClock};
pub use materialized_path::{MaterializedPath, PendingInsertions, PendingPath};
pub use path_builder::PathPolicy;
