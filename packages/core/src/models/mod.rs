//! Data Models
//!
//! This module contains the data structures shared by every layer:
//!
//! - `Node` - Managed record with scalar properties and reference associations
//! - `NodeHandle` - Arena index identifying a node inside an object manager
//! - `ChangeSet` - Field changes computed by the host mapper

mod change_set;
mod node;

pub use change_set::{ChangeSet, FieldChange};
pub use node::{render_scalar, FieldValue, Node, NodeHandle};
