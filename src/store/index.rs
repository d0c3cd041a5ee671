//! Index specifications, per-collection index state, and the single-pass
//! multi-index builder used by bulk rebuilds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::types::{DiskLoc, Document};

/// Declarative description of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    /// Fully-qualified namespace of the indexed collection.
    pub ns: String,
    /// Indexed fields in order, each with a direction of 1 or -1.
    pub key: Vec<(String, i32)>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new<N: Into<String>, S: Into<String>>(name: N, ns: S, key: Vec<(String, i32)>) -> Self {
        Self {
            name: name.into(),
            ns: ns.into(),
            key,
            unique: false,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// The spec document stored in `system.indexes`.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut key_doc = serde_json::Map::new();
        for (field, direction) in &self.key {
            key_doc.insert(field.clone(), Value::from(*direction));
        }
        let mut doc = Document::new();
        doc.insert("name", Value::String(self.name.clone()));
        doc.insert("ns", Value::String(self.ns.clone()));
        doc.insert("key", Value::Object(key_doc));
        if self.unique {
            doc.insert("unique", Value::Bool(true));
        }
        doc
    }

    /// Canonical key for `doc` under this spec. Missing fields index as null,
    /// matching lookup behaviour.
    pub(crate) fn key_for(&self, doc: &Document) -> String {
        let values: Vec<&Value> = self
            .key
            .iter()
            .map(|(field, _)| doc.get(field).unwrap_or(&Value::Null))
            .collect();
        serde_json::to_string(&values).unwrap_or_default()
    }
}

pub(crate) fn validate_spec(spec: &IndexSpec) -> Result<()> {
    let fail = |reason: &str| StoreError::IndexBuild {
        ns: spec.ns.clone(),
        reason: format!("index {:?}: {reason}", spec.name),
    };
    if spec.name.is_empty() {
        return Err(fail("name must not be empty"));
    }
    if spec.key.is_empty() {
        return Err(fail("key must name at least one field"));
    }
    for (field, direction) in &spec.key {
        if field.is_empty() {
            return Err(fail("key field name must not be empty"));
        }
        if *direction != 1 && *direction != -1 {
            return Err(fail("key direction must be 1 or -1"));
        }
    }
    Ok(())
}

/// One built index: its spec plus the key-to-locations map.
#[derive(Debug, Clone)]
pub(crate) struct IndexState {
    spec: IndexSpec,
    entries: BTreeMap<String, Vec<DiskLoc>>,
}

impl IndexState {
    pub(crate) fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub(crate) fn insert(&mut self, doc: &Document, loc: DiskLoc) -> Result<()> {
        let key = self.spec.key_for(doc);
        let slot = self.entries.entry(key).or_default();
        if self.spec.unique && !slot.is_empty() {
            return Err(StoreError::DuplicateKey {
                ns: self.spec.ns.clone(),
                index: self.spec.name.clone(),
            });
        }
        slot.push(loc);
        Ok(())
    }

    fn remove_loc(&mut self, loc: DiskLoc) {
        for slot in self.entries.values_mut() {
            slot.retain(|entry| *entry != loc);
        }
        self.entries.retain(|_, slot| !slot.is_empty());
    }
}

/// Ordered set of indexes on one collection.
#[derive(Debug, Clone, Default)]
pub struct IndexCatalog {
    indexes: Vec<IndexState>,
}

impl IndexCatalog {
    pub fn specs(&self) -> impl Iterator<Item = &IndexSpec> {
        self.indexes.iter().map(IndexState::spec)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    #[must_use]
    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|index| index.spec.name == name)
    }

    /// Locations whose indexed fields match `key_doc` under the named index.
    #[must_use]
    pub fn lookup(&self, index_name: &str, key_doc: &Document) -> Option<&[DiskLoc]> {
        let index = self
            .indexes
            .iter()
            .find(|index| index.spec.name == index_name)?;
        let key = index.spec.key_for(key_doc);
        index.entries.get(&key).map(Vec::as_slice)
    }

    pub(crate) fn install(&mut self, state: IndexState) {
        self.indexes.push(state);
    }

    pub(crate) fn index_document(&mut self, doc: &Document, loc: DiskLoc) -> Result<()> {
        for index in &mut self.indexes {
            index.insert(doc, loc)?;
        }
        Ok(())
    }

    pub(crate) fn remove_loc(&mut self, loc: DiskLoc) {
        for index in &mut self.indexes {
            index.remove_loc(loc);
        }
    }
}

/// Builds every index of a target collection in one pass over its documents.
///
/// `init` with the full spec set, feed each inserted document through
/// `insert` so all indexes observe the same order, then hand the builder to
/// [`crate::store::database::Database::finish_index_build`] to install the
/// results.
#[derive(Debug)]
pub struct MultiIndexBuilder {
    ns: String,
    building: Vec<IndexState>,
    initialized: bool,
}

impl MultiIndexBuilder {
    pub fn new<S: Into<String>>(ns: S) -> Self {
        Self {
            ns: ns.into(),
            building: Vec::new(),
            initialized: false,
        }
    }

    #[must_use]
    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn init(&mut self, specs: Vec<IndexSpec>) -> Result<()> {
        let mut building = Vec::with_capacity(specs.len());
        for mut spec in specs {
            spec.ns = self.ns.clone();
            validate_spec(&spec)?;
            building.push(IndexState::new(spec));
        }
        self.building = building;
        self.initialized = true;
        Ok(())
    }

    pub fn insert(&mut self, doc: &Document, loc: DiskLoc) -> Result<()> {
        for index in &mut self.building {
            index.insert(doc, loc)?;
        }
        Ok(())
    }

    pub(crate) fn into_states(self) -> Result<Vec<IndexState>> {
        if !self.initialized {
            return Err(StoreError::IndexBuild {
                ns: self.ns,
                reason: "multi-index builder was never initialized".into(),
            });
        }
        Ok(self.building)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).expect("object")
    }

    #[test]
    fn builder_feeds_every_index_in_order() {
        let mut builder = MultiIndexBuilder::new("app.people");
        builder
            .init(vec![
                IndexSpec::new("_id_", "app.people", vec![("_id".into(), 1)]),
                IndexSpec::new("name_1", "app.people", vec![("name".into(), 1)]),
            ])
            .expect("init");

        for i in 0..3 {
            builder
                .insert(
                    &doc(json!({"_id": i, "name": format!("user-{i}")})),
                    DiskLoc::new(0, i * 64),
                )
                .expect("insert");
        }

        let mut catalog = IndexCatalog::default();
        for state in builder.into_states().expect("states") {
            catalog.install(state);
        }
        assert_eq!(catalog.len(), 2);
        let hits = catalog
            .lookup("name_1", &doc(json!({"name": "user-1"})))
            .expect("hit");
        assert_eq!(hits, &[DiskLoc::new(0, 64)]);
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let mut builder = MultiIndexBuilder::new("app.people");
        builder
            .init(vec![IndexSpec::new(
                "email_1",
                "app.people",
                vec![("email".into(), 1)],
            )
            .unique()])
            .expect("init");

        builder
            .insert(&doc(json!({"email": "a@b"})), DiskLoc::new(0, 0))
            .expect("first");
        let err = builder
            .insert(&doc(json!({"email": "a@b"})), DiskLoc::new(0, 64))
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn init_validates_specs() {
        let mut builder = MultiIndexBuilder::new("app.people");
        let err = builder
            .init(vec![IndexSpec::new("bad", "app.people", vec![("f".into(), 2)])])
            .expect_err("direction");
        assert!(matches!(err, StoreError::IndexBuild { .. }));

        let mut builder = MultiIndexBuilder::new("app.people");
        assert!(builder.init(vec![IndexSpec::new("", "app.people", vec![])]).is_err());
    }

    #[test]
    fn uninitialized_builder_cannot_commit() {
        let builder = MultiIndexBuilder::new("app.people");
        assert!(matches!(
            builder.into_states(),
            Err(StoreError::IndexBuild { .. })
        ));
    }

    #[test]
    fn missing_fields_index_as_null() {
        let spec = IndexSpec::new("age_1", "app.people", vec![("age".into(), 1)]);
        let with = spec.key_for(&doc(json!({"age": 30})));
        let without = spec.key_for(&doc(json!({"name": "no age"})));
        assert_ne!(with, without);
        assert_eq!(without, spec.key_for(&doc(json!({"age": null}))));
    }

    #[test]
    fn spec_document_shape() {
        let spec = IndexSpec::new("name_1", "app.people", vec![("name".into(), 1)]).unique();
        let doc = spec.to_document();
        assert_eq!(doc.get_str("name"), Some("name_1"));
        assert_eq!(doc.get_str("ns"), Some("app.people"));
        assert_eq!(doc.get("key"), Some(&json!({"name": 1})));
        assert_eq!(doc.get("unique"), Some(&json!(true)));
    }
}
