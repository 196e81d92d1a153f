//! Documents, field values and the document store collaborator
//!
//! The store is external to this crate: rule evaluation only ever calls
//! [`DocumentStore::get`]. [`MemoryStore`] is an in-process implementation
//! for fixtures, tests and the `docgate-check` tool.

use crate::core::validation::normalize_path;
use crate::error::{GateError, Result, StoreError};
use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field value stored in a document
///
/// In JSON a reference is written as `{"$ref": "/chats/C1"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    /// Path of another document
    Reference(DocRef),
    Map(BTreeMap<String, Value>),
}

/// `{"$ref": path}`; a map with any other key is a plain map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocRef {
    #[serde(rename = "$ref")]
    pub path: String,
}

impl Value {
    /// Reference to the document at `path`
    pub fn reference(path: impl Into<String>) -> Self {
        Value::Reference(DocRef { path: path.into() })
    }

    /// Short name of the variant, used in type-mismatch diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Reference(_) => "reference",
            Value::Map(_) => "map",
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

/// A record at a concrete path: field name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insert
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Look up a field; dotted names walk into nested maps (`owner.id`)
    pub fn get(&self, field: &str) -> Option<&Value> {
        let mut parts = field.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            match current {
                Value::Map(map) => current = map.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }
}

/// Read-only view of the external document store
///
/// `Ok(None)` means the document does not exist; `Err` means the store could
/// not answer. Implementations may block.
pub trait DocumentStore: Send + Sync {
    fn get(&self, path: &str) -> std::result::Result<Option<Document>, StoreError>;
}

/// In-memory document store keyed by canonical path
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<AHashMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fixture of the form `{ "/chats/C1": { "participants": [42, 7] } }`
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, Document> = serde_json::from_str(json)?;
        let store = MemoryStore::new();
        for (path, document) in raw {
            store.insert(&path, document)?;
        }
        Ok(store)
    }

    /// Insert or replace the document at `path`
    pub fn insert(&self, path: &str, document: Document) -> Result<()> {
        let key = normalize_path(path)?;
        self.documents.write().insert(key, document);
        Ok(())
    }

    pub fn remove(&self, path: &str) -> Result<Option<Document>> {
        let key = normalize_path(path)?;
        Ok(self.documents.write().remove(&key))
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &str) -> std::result::Result<Option<Document>, StoreError> {
        let key = normalize_path(path).map_err(|e: GateError| StoreError::new(e.to_string()))?;
        Ok(self.documents.read().get(&key).cloned())
    }
}
