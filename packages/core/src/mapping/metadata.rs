//! Class Metadata
//!
//! Minimal description of a mapped class as seen by the tree behavior: its
//! identifier field, the declared type of each scalar field, and the target
//! class of each association. Host mappers produce it; the core only reads
//! it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared storage type of a scalar field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Text,
    Integer,
    SmallInt,
    BigInt,
    Float,
    Boolean,
    Guid,
    DateTime,
}

impl FieldType {
    /// Textual types get the identifier appended to their path segment
    /// unless the configuration says otherwise
    pub fn is_textual(self) -> bool {
        matches!(self, FieldType::String | FieldType::Text)
    }
}

/// Mapped class description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMetadata {
    /// Class name
    pub name: String,

    /// Name of the single identifier field
    pub identifier: String,

    /// Scalar field name → declared type
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,

    /// Association field name → target class
    #[serde(default)]
    pub associations: BTreeMap<String, String>,
}

impl ClassMetadata {
    /// Create metadata with the given identifier field typed as integer
    pub fn new(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let mut fields = BTreeMap::new();
        fields.insert(identifier.clone(), FieldType::Integer);

        Self {
            name: name.into(),
            identifier,
            fields,
            associations: BTreeMap::new(),
        }
    }

    /// Declare a scalar field
    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Declare an association
    pub fn with_association(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.associations.insert(name.into(), target.into());
        self
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    pub fn is_identifier(&self, name: &str) -> bool {
        self.identifier == name
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn has_association(&self, name: &str) -> bool {
        self.associations.contains_key(name)
    }

    pub fn association_target(&self, name: &str) -> Option<&str> {
        self.associations.get(name).map(String::as_str)
    }
}
