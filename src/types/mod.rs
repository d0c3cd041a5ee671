//! Shared value types: documents, on-disk locations, and namespace helpers.

mod options;

pub use options::CollectionOptions;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Physical location of a record: which numbered extent file it lives in and
/// the byte offset of its header within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiskLoc {
    pub file_index: u32,
    pub offset: u64,
}

impl DiskLoc {
    #[must_use]
    pub const fn new(file_index: u32, offset: u64) -> Self {
        Self { file_index, offset }
    }

    #[must_use]
    pub const fn null() -> Self {
        Self {
            file_index: u32::MAX,
            offset: u64::MAX,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.file_index == u32::MAX && self.offset == u64::MAX
    }
}

/// A stored document: an ordered JSON object.
///
/// Serialized form on disk is canonical `serde_json` bytes; field order is
/// preserved so documents round-trip byte-for-byte through a copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(pub serde_json::Map<String, Value>);

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self(serde_json::Map::new())
    }

    /// Wrap a JSON value, returning `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get_object(&self, key: &str) -> Option<&serde_json::Map<String, Value>> {
        self.0.get(key).and_then(Value::as_object)
    }

    pub fn insert<K: Into<String>>(&mut self, key: K, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<serde_json::Map<String, Value>> for Document {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Strip any collection qualifier from a namespace: `"app.people"` -> `"app"`.
#[must_use]
pub fn ns_to_database(ns: &str) -> &str {
    match ns.find('.') {
        Some(dot) => &ns[..dot],
        None => ns,
    }
}

/// Collection part of a fully-qualified namespace, empty when unqualified.
#[must_use]
pub fn ns_collection(ns: &str) -> &str {
    match ns.find('.') {
        Some(dot) => &ns[dot + 1..],
        None => "",
    }
}

/// Whether the namespace names an engine metadata collection.
#[must_use]
pub fn is_system_namespace(ns: &str) -> bool {
    ns_collection(ns).starts_with("system.")
}

/// Whether the namespace is addressable by ordinary operations. Virtual
/// namespaces carry a `$` and are never copied or created directly.
#[must_use]
pub fn is_normal_namespace(ns: &str) -> bool {
    !ns.contains('$')
}
