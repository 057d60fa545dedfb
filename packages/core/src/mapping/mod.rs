//! Tree Mapping
//!
//! Everything the engine needs to know about a mapped class:
//!
//! - `ClassMetadata` - identifier, field types and associations from the host
//! - `TreeConfig` - which field plays which structural role
//! - `FieldAccessor` - getter/setter closures bound once per class
//! - `TreeMapping` - the validated combination of the three
//! - `ConfigurationRegistry` - class name lookup with a shared mapping cache

mod accessor;
mod config;
mod metadata;
mod registry;
mod tree_mapping;

pub use accessor::{FieldAccessor, RootValue};
pub use config::{
    AppendIdPolicy, TreeConfig, TreeConfigBuilder, DEFAULT_LOCKING_TIMEOUT, DEFAULT_SEPARATOR,
};
pub use metadata::{ClassMetadata, FieldType};
pub use registry::{ConfigurationProvider, ConfigurationRegistry};
pub use tree_mapping::TreeMapping;
