//! One open logical database: the namespace catalog, its collections, and
//! the extent store holding their records.
//!
//! Responsibilities:
//! - Load and persist the `<db>.ns` catalog file.
//! - Maintain the `system.namespaces` / `system.indexes` metadata collections
//!   as a side effect of collection and index creation.
//! - Route document inserts through the journal, the extent store, and the
//!   relevant index catalog or multi-index builder.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec_config;
use crate::config::StorageConfig;
use crate::error::{Result, StoreError};
use crate::io::allocator::FileAllocator;
use crate::io::extent::ExtentStore;
use crate::io::journal::DurabilityManager;
use crate::store::collection::Collection;
use crate::store::index::{validate_spec, IndexSpec, IndexState, MultiIndexBuilder};
use crate::types::{ns_to_database, CollectionOptions, DiskLoc, Document};

const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    entries: Vec<CatalogEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogEntry {
    ns: String,
    /// Options document as canonical JSON; parsed back on load.
    options_json: String,
    index_specs: Vec<IndexSpec>,
    docs: Vec<DiskLoc>,
}

#[derive(Debug)]
pub struct Database {
    name: String,
    root: PathBuf,
    ns_path: PathBuf,
    collections: BTreeMap<String, Collection>,
    extents: ExtentStore,
    durability: Arc<DurabilityManager>,
    dirty: bool,
}

impl Database {
    /// Open the database named `name` rooted at `root`, creating an empty
    /// catalog file when none exists. Returns whether it was just created.
    pub(crate) fn open(
        name: &str,
        root: &Path,
        config: &StorageConfig,
        durability: Arc<DurabilityManager>,
        allocator: Arc<FileAllocator>,
    ) -> Result<(Self, bool)> {
        let dir = config.database_dir(root, name);
        std::fs::create_dir_all(&dir)?;
        let ns_path = dir.join(format!("{name}.ns"));
        let just_created = !ns_path.exists();

        let extents = ExtentStore::open(name, &dir, config.extent_size, allocator)?;
        let mut db = Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            ns_path,
            collections: BTreeMap::new(),
            extents,
            durability,
            dirty: false,
        };

        if just_created {
            db.dirty = true;
            db.flush(false)?;
            tracing::debug!(db = %db.name, root = %db.root.display(), "created database");
        } else {
            db.load_catalog()?;
            tracing::debug!(
                db = %db.name,
                root = %db.root.display(),
                collections = db.collections.len(),
                "opened database"
            );
        }
        Ok((db, just_created))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root path this handle was opened at (data path or a reserved repair
    /// directory).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn collection(&self, ns: &str) -> Option<&Collection> {
        self.collections.get(ns)
    }

    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Snapshot of a collection's document locations in forward order.
    #[must_use]
    pub fn collection_locs(&self, ns: &str) -> Option<Vec<DiskLoc>> {
        self.collections.get(ns).map(|coll| coll.locs().collect())
    }

    /// Create an empty collection.
    ///
    /// `allocate` warms the extent store; `create_default_indexes` adds the
    /// default `_id` index. Bulk rebuilds pass `false` for the latter and
    /// build every index through a [`MultiIndexBuilder`] instead.
    pub fn create_collection(
        &mut self,
        ns: &str,
        options: CollectionOptions,
        allocate: bool,
        create_default_indexes: bool,
    ) -> Result<()> {
        if ns_to_database(ns) != self.name {
            return Err(StoreError::InvalidCatalog {
                reason: format!("namespace {ns} does not belong to database {}", self.name),
            });
        }
        if self.collections.contains_key(ns) {
            return Err(StoreError::CollectionExists(ns.to_string()));
        }
        if allocate {
            self.extents.warm()?;
        }

        self.collections
            .insert(ns.to_string(), Collection::new(ns, options.clone()));
        self.note_namespace(ns, &options)?;

        if create_default_indexes {
            let spec = IndexSpec::new("_id_", ns, vec![("_id".into(), 1)]);
            self.create_index(ns, spec)?;
        }

        self.dirty = true;
        Ok(())
    }

    /// Build an index over a collection's current documents and register it.
    pub fn create_index(&mut self, ns: &str, mut spec: IndexSpec) -> Result<()> {
        let Some(coll) = self.collections.get(ns) else {
            return Err(StoreError::NamespaceNotFound(ns.to_string()));
        };
        spec.ns = ns.to_string();
        validate_spec(&spec)?;
        if coll.index_catalog().has_index(&spec.name) {
            return Err(StoreError::IndexBuild {
                ns: ns.to_string(),
                reason: format!("index {:?} already exists", spec.name),
            });
        }

        let locs: Vec<DiskLoc> = coll.locs().collect();
        let mut state = IndexState::new(spec.clone());
        for loc in locs {
            let payload = self.extents.read_record(loc)?;
            let doc = Document::from_bytes(&payload)?;
            state.insert(&doc, loc)?;
        }

        if let Some(coll) = self.collections.get_mut(ns) {
            coll.index_catalog_mut().install(state);
        }
        self.note_index(&spec)?;
        self.dirty = true;
        Ok(())
    }

    /// Insert a document. With a builder, index maintenance flows through it
    /// so every index under construction observes inserts in lockstep;
    /// otherwise the collection's own index catalog is updated.
    pub fn insert_document(
        &mut self,
        ns: &str,
        doc: Document,
        builder: Option<&mut MultiIndexBuilder>,
    ) -> Result<DiskLoc> {
        if !self.collections.contains_key(ns) {
            return Err(StoreError::NamespaceNotFound(ns.to_string()));
        }

        let payload = doc.to_bytes()?;
        self.durability.log_write(&payload)?;
        let loc = self.extents.append_record(&payload)?;

        match builder {
            Some(builder) => builder.insert(&doc, loc)?,
            None => {
                if let Some(coll) = self.collections.get_mut(ns) {
                    coll.index_catalog_mut().index_document(&doc, loc)?;
                }
            }
        }
        if let Some(coll) = self.collections.get_mut(ns) {
            coll.push_loc(loc);
        }
        self.dirty = true;
        Ok(loc)
    }

    /// Read the document at `loc`.
    pub fn doc_for(&mut self, loc: DiskLoc) -> Result<Document> {
        let payload = self.extents.read_record(loc)?;
        Document::from_bytes(&payload)
    }

    /// Install the indexes accumulated by `builder` onto its target
    /// collection and register their specs in `system.indexes`.
    pub fn finish_index_build(&mut self, builder: MultiIndexBuilder) -> Result<()> {
        let ns = builder.ns().to_string();
        if !self.collections.contains_key(&ns) {
            return Err(StoreError::NamespaceNotFound(ns));
        }
        let states = builder.into_states()?;
        let specs: Vec<IndexSpec> = states.iter().map(|state| state.spec().clone()).collect();
        if let Some(coll) = self.collections.get_mut(&ns) {
            for state in states {
                coll.index_catalog_mut().install(state);
            }
        }
        for spec in &specs {
            self.note_index(spec)?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Persist the catalog when dirty and optionally fsync every file.
    pub fn flush(&mut self, sync: bool) -> Result<()> {
        if self.dirty {
            let catalog = CatalogFile {
                version: CATALOG_VERSION,
                entries: self
                    .collections
                    .iter()
                    .map(|(ns, coll)| {
                        let options_doc = Value::Object(coll.options().to_document().0);
                        Ok(CatalogEntry {
                            ns: ns.clone(),
                            options_json: serde_json::to_string(&options_doc)?,
                            index_specs: coll.index_catalog().specs().cloned().collect(),
                            docs: coll.locs().collect(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            };
            let bytes = bincode::serde::encode_to_vec(&catalog, codec_config())?;

            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.ns_path)?;
            file.write_all(&bytes)?;
            if sync {
                file.sync_all()?;
            }
            self.dirty = false;
        }
        self.extents.flush(sync)?;
        Ok(())
    }

    fn load_catalog(&mut self) -> Result<()> {
        let bytes = std::fs::read(&self.ns_path)?;
        let (catalog, _): (CatalogFile, usize) =
            bincode::serde::decode_from_slice(&bytes, codec_config())?;
        if catalog.version != CATALOG_VERSION {
            return Err(StoreError::InvalidCatalog {
                reason: format!("unsupported catalog version {}", catalog.version),
            });
        }

        for entry in catalog.entries {
            let raw: Value = serde_json::from_str(&entry.options_json)?;
            let Some(map) = raw.as_object() else {
                return Err(StoreError::InvalidCatalog {
                    reason: format!("options for {} are not an object", entry.ns),
                });
            };
            let options = CollectionOptions::parse(map)?;

            let mut coll = Collection::new(&entry.ns, options);
            for loc in &entry.docs {
                coll.push_loc_unchecked(*loc);
            }
            // Index entry data is not persisted; rebuild it from the records.
            for spec in entry.index_specs {
                let mut state = IndexState::new(spec);
                for loc in &entry.docs {
                    let payload = self.extents.read_record(*loc)?;
                    let doc = Document::from_bytes(&payload)?;
                    state.insert(&doc, *loc)?;
                }
                coll.index_catalog_mut().install(state);
            }
            self.collections.insert(entry.ns.clone(), coll);
        }
        Ok(())
    }

    fn meta_ns(&self, coll: &str) -> String {
        format!("{}.{coll}", self.name)
    }

    /// Record `ns` in `system.namespaces`, creating the catalog collection on
    /// first use (which also lists itself).
    fn note_namespace(&mut self, ns: &str, options: &CollectionOptions) -> Result<()> {
        let catalog_ns = self.meta_ns("system.namespaces");
        if !self.collections.contains_key(&catalog_ns) {
            self.collections.insert(
                catalog_ns.clone(),
                Collection::new(&catalog_ns, CollectionOptions::default()),
            );
            let mut own = Document::new();
            own.insert("name", Value::String(catalog_ns.clone()));
            self.insert_document(&catalog_ns, own, None)?;
        }

        let mut doc = Document::new();
        doc.insert("name", Value::String(ns.to_string()));
        if *options != CollectionOptions::default() {
            doc.insert("options", Value::Object(options.to_document().0));
        }
        self.insert_document(&catalog_ns, doc, None)?;
        Ok(())
    }

    /// Record an index spec in `system.indexes`, creating the collection on
    /// first use.
    fn note_index(&mut self, spec: &IndexSpec) -> Result<()> {
        let indexes_ns = self.meta_ns("system.indexes");
        if !self.collections.contains_key(&indexes_ns) {
            self.collections.insert(
                indexes_ns.clone(),
                Collection::new(&indexes_ns, CollectionOptions::default()),
            );
            self.note_namespace(&indexes_ns, &CollectionOptions::default())?;
        }
        self.insert_document(&indexes_ns, spec.to_document(), None)?;
        Ok(())
    }
}
