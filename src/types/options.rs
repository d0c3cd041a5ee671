//! Collection creation options parsed from namespace catalog entries.

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::types::Document;

/// Options a collection was created with.
///
/// Parsing is strict about the types of recognized fields and tolerant of
/// unrecognized ones; anything it does not understand is carried in `extra`
/// so that re-creating a collection from a catalog entry reproduces the
/// original options document.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOptions {
    pub capped: bool,
    /// Byte budget for a capped collection.
    pub size: Option<u64>,
    /// Document-count budget for a capped collection.
    pub max: Option<u64>,
    pub auto_index_id: bool,
    /// Unrecognized fields, preserved verbatim.
    pub extra: serde_json::Map<String, Value>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            capped: false,
            size: None,
            max: None,
            auto_index_id: true,
            extra: serde_json::Map::new(),
        }
    }
}

impl CollectionOptions {
    /// Parse an `options` sub-document from a catalog entry.
    pub fn parse(raw: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in raw {
            match key.as_str() {
                "capped" => {
                    options.capped = value
                        .as_bool()
                        .ok_or_else(|| invalid(key, "expected a boolean"))?;
                }
                "size" => {
                    options.size = Some(
                        value
                            .as_u64()
                            .ok_or_else(|| invalid(key, "expected a non-negative integer"))?,
                    );
                }
                "max" => {
                    options.max = Some(
                        value
                            .as_u64()
                            .ok_or_else(|| invalid(key, "expected a non-negative integer"))?,
                    );
                }
                "autoIndexId" => {
                    options.auto_index_id = value
                        .as_bool()
                        .ok_or_else(|| invalid(key, "expected a boolean"))?;
                }
                _ => {
                    options.extra.insert(key.clone(), value.clone());
                }
            }
        }
        if options.capped && options.size.is_none() && options.max.is_none() {
            return Err(invalid("capped", "capped collection requires a size or max"));
        }
        Ok(options)
    }

    /// Options document for a catalog entry. Defaults are omitted so the
    /// emitted document resembles what was originally supplied.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        if self.capped {
            doc.insert("capped", Value::Bool(true));
        }
        if let Some(size) = self.size {
            doc.insert("size", Value::from(size));
        }
        if let Some(max) = self.max {
            doc.insert("max", Value::from(max));
        }
        if !self.auto_index_id {
            doc.insert("autoIndexId", Value::Bool(false));
        }
        for (key, value) in &self.extra {
            doc.insert(key.clone(), value.clone());
        }
        doc
    }
}

fn invalid(field: &str, reason: &str) -> StoreError {
    StoreError::InvalidOptions {
        reason: format!("{field}: {reason}"),
    }
}
