//! End-to-end repair scenarios: every path through the repair state machine
//! must leave the right files on disk, whether it succeeds or fails.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use serde_json::json;
use tempfile::TempDir;

use lodestore::{
    CollectionOptions, Document, Engine, IndexSpec, OperationContext, RepairOptions,
    StorageConfig, StoreError,
};

// Repair enforces at-most-one run per process, so these tests take turns.
static SERIAL: Mutex<()> = Mutex::new(());

fn run_serial<T>(f: impl FnOnce() -> T) -> T {
    let _guard = SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f()
}

fn test_engine(root: &Path) -> Engine {
    let config = StorageConfig::new(root.join("data"))
        .with_repairpath(root.join("repair"))
        .with_extent_size(32 * 1024);
    Engine::new(config).expect("engine")
}

fn test_engine_per_db(root: &Path) -> Engine {
    let config = StorageConfig::new(root.join("data"))
        .with_repairpath(root.join("repair"))
        .with_directory_per_db(true)
        .with_extent_size(32 * 1024);
    Engine::new(config).expect("engine")
}

fn doc(value: serde_json::Value) -> Document {
    Document::from_value(value).expect("object")
}

/// Create `db` with a `people` collection (1 secondary index) and a small
/// `notes` collection, then close it so the files are settled on disk.
fn seed_database(engine: &Engine, db: &str, people: usize) {
    let dbpath = engine.config().dbpath.clone();
    let (handle, created) = engine.holder().get_or_create(db, &dbpath).expect("create db");
    assert!(created);
    {
        let mut database = handle.lock().expect("lock");
        let people_ns = format!("{db}.people");
        database
            .create_collection(&people_ns, CollectionOptions::default(), true, true)
            .expect("create people");
        for i in 0..people {
            database
                .insert_document(
                    &people_ns,
                    doc(json!({"_id": i, "name": format!("user-{i}"), "grade": i % 7})),
                    None,
                )
                .expect("insert person");
        }
        database
            .create_index(
                &people_ns,
                IndexSpec::new("name_1", &people_ns, vec![("name".into(), 1)]),
            )
            .expect("create index");

        let notes_ns = format!("{db}.notes");
        database
            .create_collection(&notes_ns, CollectionOptions::default(), true, true)
            .expect("create notes");
        for i in 0..5 {
            database
                .insert_document(&notes_ns, doc(json!({"_id": i, "text": "note"})), None)
                .expect("insert note");
        }

        let events_ns = format!("{db}.events");
        let capped = CollectionOptions {
            capped: true,
            size: Some(4096),
            max: Some(3),
            ..CollectionOptions::default()
        };
        database
            .create_collection(&events_ns, capped, true, false)
            .expect("create events");
        for i in 0..5 {
            database
                .insert_document(&events_ns, doc(json!({"seq": i})), None)
                .expect("insert event");
        }
    }
    engine.holder().close(db, &dbpath).expect("close");
    engine.file_allocator().wait_until_finished();
}

/// Bytes of every `<db>.ns` / `<db>.<i>` file under the database directory.
fn db_files(engine: &Engine, db: &str) -> BTreeMap<String, Vec<u8>> {
    let dir = engine.config().database_dir(&engine.config().dbpath, db);
    let mut files = BTreeMap::new();
    if !dir.exists() {
        return files;
    }
    for entry in std::fs::read_dir(&dir).expect("read dir") {
        let entry = entry.expect("entry");
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_db_file(db, &name) {
            continue;
        }
        files.insert(name, std::fs::read(entry.path()).expect("read file"));
    }
    files
}

fn is_db_file(db: &str, name: &str) -> bool {
    let Some(rest) = name.strip_prefix(&format!("{db}.")) else {
        return false;
    };
    rest == "ns" || rest.parse::<u32>().is_ok()
}

fn reserved_dirs(engine: &Engine) -> Vec<String> {
    std::fs::read_dir(&engine.config().repairpath)
        .expect("read repairpath")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains("_repairDatabase_"))
        .collect()
}

fn collection_docs(engine: &Engine, db: &str, ns: &str) -> Vec<Document> {
    let handle = engine
        .holder()
        .get(db, &engine.config().dbpath)
        .expect("get")
        .expect("database exists");
    let mut database = handle.lock().expect("lock");
    let locs = database.collection_locs(ns).expect("collection");
    locs.into_iter()
        .map(|loc| database.doc_for(loc).expect("doc"))
        .collect()
}

#[test]
fn repair_empty_database_rebuilds_catalog_file() {
    run_serial(|| {
        let root = TempDir::new().expect("tmp");
        let engine = test_engine(root.path());
        let dbpath = engine.config().dbpath.clone();

        engine.holder().get_or_create("empty", &dbpath).expect("create");
        engine.holder().close("empty", &dbpath).expect("close");

        let ctx = OperationContext::new("empty", &dbpath);
        engine
            .repair_database(&ctx, "empty", RepairOptions::default())
            .expect("repair");

        let files = db_files(&engine, "empty");
        assert_eq!(files.len(), 1, "files: {:?}", files.keys());
        assert!(files.contains_key("empty.ns"));
        assert!(reserved_dirs(&engine).is_empty());
    });
}

#[test]
fn repair_preserves_documents_indexes_and_order() {
    run_serial(|| {
        let root = TempDir::new().expect("tmp");
        let engine = test_engine(root.path());
        let dbpath = engine.config().dbpath.clone();
        seed_database(&engine, "app", 1000);

        let people_before = collection_docs(&engine, "app", "app.people");
        let notes_before = collection_docs(&engine, "app", "app.notes");
        let events_before = collection_docs(&engine, "app", "app.events");
        let size_before = engine.database_size("app");
        engine.holder().close("app", &dbpath).expect("close");

        let ctx = OperationContext::new("app", &dbpath);
        engine
            .repair_database(&ctx, "app", RepairOptions::default())
            .expect("repair");

        let people_after = collection_docs(&engine, "app", "app.people");
        assert_eq!(people_after, people_before);
        let notes_after = collection_docs(&engine, "app", "app.notes");
        assert_eq!(notes_after, notes_before);

        // Capped options round-trip: the rebuilt collection keeps its budget
        // and the trimmed document set.
        let events_after = collection_docs(&engine, "app", "app.events");
        assert_eq!(events_after, events_before);
        assert_eq!(events_after.len(), 3);

        let handle = engine
            .holder()
            .get("app", &dbpath)
            .expect("get")
            .expect("exists");
        let database = handle.lock().expect("lock");
        let people = database.collection("app.people").expect("people");
        let specs: Vec<IndexSpec> = people.index_catalog().specs().cloned().collect();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "_id_");
        assert_eq!(specs[1].name, "name_1");
        let hits = people
            .index_catalog()
            .lookup("name_1", &doc(json!({"name": "user-42"})))
            .expect("indexed");
        assert_eq!(hits.len(), 1);

        let events = database.collection("app.events").expect("events");
        assert!(events.options().capped);
        assert_eq!(events.options().size, Some(4096));
        assert_eq!(events.options().max, Some(3));

        // The rebuilt catalog lists the copied collections; the metadata
        // collections themselves were reconstructed, not copied.
        let listed = database.collection_names();
        assert!(listed.contains(&"app.people".to_string()));
        assert!(listed.contains(&"app.notes".to_string()));
        assert!(listed.contains(&"app.system.namespaces".to_string()));
        assert!(listed.contains(&"app.system.indexes".to_string()));
        assert!(
            !database
                .collection_locs("app.system.namespaces")
                .expect("catalog")
                .is_empty()
        );
        drop(database);

        assert!(engine.database_size("app") <= size_before);
        assert!(reserved_dirs(&engine).is_empty());
    });
}

#[test]
fn failed_options_parse_unwinds_and_preserves_originals() {
    run_serial(|| {
        let root = TempDir::new().expect("tmp");
        let engine = test_engine(root.path());
        let dbpath = engine.config().dbpath.clone();
        seed_database(&engine, "app", 20);

        // Poison the catalog with an entry whose options cannot parse.
        {
            let handle = engine
                .holder()
                .get("app", &dbpath)
                .expect("get")
                .expect("exists");
            handle
                .lock()
                .expect("lock")
                .insert_document(
                    "app.system.namespaces",
                    doc(json!({"name": "app.broken", "options": {"capped": "yes"}})),
                    None,
                )
                .expect("insert poison");
        }
        engine.holder().close("app", &dbpath).expect("close");
        engine.file_allocator().wait_until_finished();
        let before = db_files(&engine, "app");

        let ctx = OperationContext::new("app", &dbpath);
        let err = engine
            .repair_database(&ctx, "app", RepairOptions::default())
            .expect_err("parse failure");
        assert!(matches!(err, StoreError::InvalidOptions { .. }), "{err:?}");

        assert_eq!(db_files(&engine, "app"), before, "originals must be untouched");
        assert!(reserved_dirs(&engine).is_empty(), "reserved dir must be removed");
    });
}

#[test]
fn preserve_cloned_files_on_failure_retains_reserved_dir() {
    run_serial(|| {
        let root = TempDir::new().expect("tmp");
        let engine = test_engine(root.path());
        let dbpath = engine.config().dbpath.clone();
        seed_database(&engine, "app", 10);

        {
            let handle = engine
                .holder()
                .get("app", &dbpath)
                .expect("get")
                .expect("exists");
            handle
                .lock()
                .expect("lock")
                .insert_document(
                    "app.system.namespaces",
                    doc(json!({"name": "app.broken", "options": {"size": -1}})),
                    None,
                )
                .expect("insert poison");
        }
        engine.holder().close("app", &dbpath).expect("close");
        engine.file_allocator().wait_until_finished();
        let before = db_files(&engine, "app");

        let ctx = OperationContext::new("app", &dbpath);
        let err = engine
            .repair_database(
                &ctx,
                "app",
                RepairOptions {
                    preserve_cloned_files_on_failure: true,
                    backup_original_files: false,
                },
            )
            .expect_err("parse failure");
        assert!(matches!(err, StoreError::InvalidOptions { .. }));

        assert_eq!(db_files(&engine, "app"), before);
        let retained = reserved_dirs(&engine);
        assert_eq!(retained.len(), 1, "reserved dir kept for inspection");
        assert!(retained[0].starts_with("backup_repairDatabase_"));
        // The partially built clone is inside it.
        let reserved = engine.config().repairpath.join(&retained[0]);
        assert!(reserved.join("app.ns").exists());
    });
}

#[test]
fn interrupted_repair_leaves_originals_intact() {
    run_serial(|| {
        let root = TempDir::new().expect("tmp");
        let engine = test_engine(root.path());
        let dbpath = engine.config().dbpath.clone();
        seed_database(&engine, "app", 50);
        let before = db_files(&engine, "app");

        let ctx = OperationContext::new("app", &dbpath);
        ctx.interrupt_handle().store(true, Ordering::SeqCst);

        let err = engine
            .repair_database(&ctx, "app", RepairOptions::default())
            .expect_err("interrupted");
        assert!(matches!(err, StoreError::Interrupted), "{err:?}");

        assert_eq!(db_files(&engine, "app"), before);
        assert!(reserved_dirs(&engine).is_empty());
    });
}

#[test]
fn backup_mode_retains_bak_copies_of_originals() {
    run_serial(|| {
        let root = TempDir::new().expect("tmp");
        let engine = test_engine(root.path());
        let dbpath = engine.config().dbpath.clone();
        seed_database(&engine, "app", 100);
        let before = db_files(&engine, "app");
        let people_before = collection_docs(&engine, "app", "app.people");
        engine.holder().close("app", &dbpath).expect("close");

        let ctx = OperationContext::new("app", &dbpath);
        engine
            .repair_database(
                &ctx,
                "app",
                RepairOptions {
                    preserve_cloned_files_on_failure: false,
                    backup_original_files: true,
                },
            )
            .expect("repair");

        let retained = reserved_dirs(&engine);
        assert_eq!(retained.len(), 1);
        assert!(retained[0].starts_with("backup_repairDatabase_"));
        let reserved = engine.config().repairpath.join(&retained[0]);

        // One .bak per original file, byte-identical.
        for (name, bytes) in &before {
            let backup = reserved.join(format!("{name}.bak"));
            assert!(backup.exists(), "missing backup for {name}");
            assert_eq!(&std::fs::read(&backup).expect("read backup"), bytes);
        }

        // The rebuilt database is live at the data path.
        let people_after = collection_docs(&engine, "app", "app.people");
        assert_eq!(people_after, people_before);
    });
}

#[test]
fn missing_database_reports_namespace_not_found() {
    run_serial(|| {
        let root = TempDir::new().expect("tmp");
        let engine = test_engine(root.path());
        let dbpath = engine.config().dbpath.clone();

        let ctx = OperationContext::new("ghost", &dbpath);
        let err = engine
            .repair_database(&ctx, "ghost", RepairOptions::default())
            .expect_err("missing db");
        assert!(matches!(err, StoreError::NamespaceNotFound(_)), "{err:?}");
        assert!(reserved_dirs(&engine).is_empty());
    });
}

#[test]
fn repair_works_with_directory_per_db_layout() {
    run_serial(|| {
        let root = TempDir::new().expect("tmp");
        let engine = test_engine_per_db(root.path());
        let dbpath = engine.config().dbpath.clone();
        seed_database(&engine, "app", 200);

        let people_before = collection_docs(&engine, "app", "app.people");
        engine.holder().close("app", &dbpath).expect("close");

        let ctx = OperationContext::new("app", &dbpath);
        engine
            .repair_database(&ctx, "app", RepairOptions::default())
            .expect("repair");

        assert!(dbpath.join("app").join("app.ns").exists());
        let people_after = collection_docs(&engine, "app", "app.people");
        assert_eq!(people_after, people_before);
        assert!(reserved_dirs(&engine).is_empty());
    });
}

#[test]
fn database_name_is_normalized_before_repair() {
    run_serial(|| {
        let root = TempDir::new().expect("tmp");
        let engine = test_engine(root.path());
        let dbpath = engine.config().dbpath.clone();
        seed_database(&engine, "app", 10);
        engine.holder().close("app", &dbpath).expect("close");

        // A fully-qualified namespace is accepted; the collection qualifier
        // is stripped before use.
        let ctx = OperationContext::new("app", &dbpath);
        engine
            .repair_database(&ctx, "app.people", RepairOptions::default())
            .expect("repair");
        assert!(db_files(&engine, "app").contains_key("app.ns"));
    });
}
