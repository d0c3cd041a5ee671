//! Database repair: rebuild every collection and index of one database into
//! a reserved working directory, then swap the rebuilt files into place.
//!
//! The happy path is short; the point of this module is what remains on disk
//! when any phase fails. Before the commit point every failure unwinds
//! through [`RepairFileGuard`] and leaves the original files authoritative.
//! After it, the reserved directory holds the rebuilt files (plus `.bak`
//! copies of the originals in backup mode) and is the operator's recovery
//! path. Failures inside cleanup itself abort the process: disk state is no
//! longer knowable.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::{EXTENT_SCAN_SLACK, MAX_EXTENT_FILES};
use crate::error::{Result, StoreError};
use crate::opctx::OperationContext;
use crate::store::background;
use crate::store::engine::Engine;
use crate::store::holder::lock_db;
use crate::store::index::{IndexSpec, MultiIndexBuilder};
use crate::types::{is_normal_namespace, ns_collection, ns_to_database, CollectionOptions, Document};

/// Behaviour switches for [`Engine::repair_database`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RepairOptions {
    /// Keep the reserved directory (and whatever was rebuilt into it) when
    /// the repair fails, for forensic inspection.
    pub preserve_cloned_files_on_failure: bool,
    /// Move the original files into the reserved directory with a `.bak`
    /// suffix instead of deleting them.
    pub backup_original_files: bool,
}

// Stable diagnostic codes for unrecoverable failures.
const FATAL_FILE_OP: u32 = 4010;
const FATAL_RESERVED_DIR: u32 = 4011;
const FATAL_GUARD_CLEANUP: u32 = 4012;
const FATAL_RECREATE_DIR: u32 = 4013;
const FATAL_FINAL_CLEANUP: u32 = 4014;

fn fatal(code: u32, context: &str) -> ! {
    tracing::error!(code, context, "unrecoverable repair failure, aborting");
    std::process::abort();
}

static REPAIR_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Scope marker enforcing at most one repair per process.
struct RepairInProgress;

impl RepairInProgress {
    fn mark() -> Self {
        let already = REPAIR_IN_PROGRESS
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err();
        assert!(!already, "a database repair is already in progress in this process");
        Self
    }
}

impl Drop for RepairInProgress {
    fn drop(&mut self) {
        REPAIR_IN_PROGRESS.store(false, Ordering::SeqCst);
    }
}

/// An action applied to each file of a database by [`apply_to_db_files`].
///
/// `apply` reports whether the file existed and was handled; errors are
/// converted by the enumerator into a fatal assertion naming the file.
trait FileOp {
    fn apply(&mut self, path: &Path) -> io::Result<bool>;
    fn describe(&self) -> &'static str;
}

struct FileRemover;

impl FileOp for FileRemover {
    fn apply(&mut self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn describe(&self) -> &'static str {
        "remove"
    }
}

/// Moves each file into `target_dir`, appending `suffix` to its name.
struct FileRenamer {
    target_dir: PathBuf,
    suffix: &'static str,
}

impl FileOp for FileRenamer {
    fn apply(&mut self, path: &Path) -> io::Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "file name is not valid unicode")
            })?;
        let target = self.target_dir.join(format!("{name}{}", self.suffix));
        rename_with_fallback(path, &target)?;
        Ok(true)
    }

    fn describe(&self) -> &'static str {
        "rename"
    }
}

#[derive(Default)]
struct SizeAccumulator {
    total_bytes: u64,
}

impl FileOp for SizeAccumulator {
    fn apply(&mut self, path: &Path) -> io::Result<bool> {
        match fs::metadata(path) {
            Ok(meta) => {
                self.total_bytes += meta.len();
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn describe(&self) -> &'static str {
        "measure"
    }
}

/// Rename, falling back to copy-then-delete. The repair root is frequently
/// on a different filesystem than the data root, where a plain rename fails.
fn rename_with_fallback(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                error = %err,
                "rename failed, copying across filesystems"
            );
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Apply `op` to the namespace catalog file and every numbered extent file
/// of `db` under `root`.
///
/// With `after_allocator`, blocks until the background allocator is idle so
/// no file appears mid-scan. Missing extent numbers are tolerated up to
/// [`EXTENT_SCAN_SLACK`] in a row; a handled file resets the allowance and a
/// crossed gap is logged. Errors from `op` are fatal.
fn apply_to_db_files(
    engine: &Engine,
    db: &str,
    root: &Path,
    after_allocator: bool,
    op: &mut dyn FileOp,
) {
    if after_allocator {
        engine.file_allocator().wait_until_finished();
    }
    let dir = engine.config().database_dir(root, db);

    fn run(op: &mut dyn FileOp, path: &Path) -> bool {
        op.apply(path).unwrap_or_else(|err| {
            fatal(
                FATAL_FILE_OP,
                &format!("{} {}: {err}", op.describe(), path.display()),
            )
        })
    }

    let ns_path = dir.join(format!("{db}.ns"));
    if run(&mut *op, &ns_path) {
        tracing::debug!(op = op.describe(), file = %ns_path.display(), "applied file op");
    }

    let mut slack = EXTENT_SCAN_SLACK;
    let mut index: u32 = 0;
    loop {
        assert!(
            index <= MAX_EXTENT_FILES,
            "extent scan for {db} exceeded MAX_EXTENT_FILES"
        );
        let path = dir.join(format!("{db}.{index}"));
        if run(&mut *op, &path) {
            if slack != EXTENT_SCAN_SLACK {
                tracing::warn!(
                    op = op.describe(),
                    file = %path.display(),
                    missing = EXTENT_SCAN_SLACK - slack,
                    "crossed a gap in extent numbering"
                );
                slack = EXTENT_SCAN_SLACK;
            }
            tracing::debug!(op = op.describe(), file = %path.display(), "applied file op");
        } else {
            slack -= 1;
            if slack == 0 {
                break;
            }
        }
        index += 1;
    }
}

/// Total size of the catalog and extent files of `db` under the data path.
pub(crate) fn db_file_size(engine: &Engine, db: &str) -> u64 {
    let mut accumulator = SizeAccumulator::default();
    apply_to_db_files(
        engine,
        db,
        &engine.config().dbpath,
        false,
        &mut accumulator,
    );
    accumulator.total_bytes
}

/// Delete the data files of `db`. With directory-per-database the whole
/// subdirectory goes at once; the allocator is quiesced first either way.
fn delete_data_files(engine: &Engine, db: &str) {
    if engine.config().directory_per_db {
        engine.file_allocator().wait_until_finished();
        let dir = engine.config().dbpath.join(db);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => fatal(
                FATAL_FILE_OP,
                &format!("removing database directory {}: {err}", dir.display()),
            ),
        }
        return;
    }
    apply_to_db_files(engine, db, &engine.config().dbpath, true, &mut FileRemover);
}

/// Move the original files of `db` into the reserved directory, appending
/// `.bak` to each name.
fn rename_for_backup(engine: &Engine, db: &str, reserved: &Path) {
    let mut target_dir = reserved.to_path_buf();
    if engine.config().directory_per_db {
        target_dir.push(db);
    }
    let mut renamer = FileRenamer {
        target_dir,
        suffix: ".bak",
    };
    apply_to_db_files(engine, db, &engine.config().dbpath, true, &mut renamer);
}

/// Move the rebuilt files of `db` from the reserved directory into place at
/// the data path.
fn replace_with_recovered(engine: &Engine, db: &str, reserved: &Path) {
    let mut target_dir = engine.config().dbpath.clone();
    if engine.config().directory_per_db {
        target_dir.push(db);
    }
    let mut renamer = FileRenamer {
        target_dir,
        suffix: "",
    };
    apply_to_db_files(engine, db, reserved, true, &mut renamer);
}

/// Smallest-numbered reserved directory name that does not exist yet.
fn unique_reserved_path(repair_root: &Path, prefix: &str) -> PathBuf {
    let mut index = 0u32;
    loop {
        let candidate = repair_root.join(format!("{prefix}_repairDatabase_{index}"));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

fn capacity_check(db: &str, total_bytes: u64, free_bytes: Option<u64>) -> Result<()> {
    match free_bytes {
        Some(free) if free < total_bytes => Err(StoreError::OutOfDiskSpace {
            db: db.to_string(),
            total_bytes,
            free_bytes: free,
        }),
        _ => Ok(()),
    }
}

/// Cleans up a failed repair on drop: fence the journal, flush, close the
/// database handle rooted at the reserved path, and delete the reserved
/// directory. `commit` disarms it once the rebuild is authoritative.
struct RepairFileGuard<'a> {
    engine: &'a Engine,
    db: String,
    reserved: PathBuf,
    armed: bool,
}

impl<'a> RepairFileGuard<'a> {
    fn new(engine: &'a Engine, db: &str, reserved: &Path) -> Self {
        Self {
            engine,
            db: db.to_string(),
            reserved: reserved.to_path_buf(),
            armed: true,
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for RepairFileGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            db = %self.db,
            path = %self.reserved.display(),
            "cleaning up failed repair"
        );
        let outcome = (|| -> Result<()> {
            self.engine.sync_and_truncate_journal()?;
            // Both fences: journaling may be disabled.
            self.engine.flush_all_files(true)?;
            self.engine.holder().close(&self.db, &self.reserved)?;
            fs::remove_dir_all(&self.reserved)?;
            Ok(())
        })();
        if let Err(err) = outcome {
            tracing::error!(error = %err, "repair cleanup failed");
            fatal(
                FATAL_GUARD_CLEANUP,
                &format!("cleaning up failed repair of {}: {err}", self.db),
            );
        }
    }
}

/// Rebuild `db_name` into a reserved directory and swap the result into
/// place. On any non-OK return the original files are untouched.
pub(crate) fn repair_database(
    engine: &Engine,
    ctx: &OperationContext,
    db_name: &str,
    options: RepairOptions,
) -> Result<()> {
    let _marker = RepairInProgress::mark();
    let db = ns_to_database(db_name).to_string();

    tracing::info!(
        db = %db,
        preserve_cloned_files_on_failure = options.preserve_cloned_files_on_failure,
        backup_original_files = options.backup_original_files,
        "repairing database"
    );

    assert_eq!(
        ctx.db_name(),
        db,
        "operation context is bound to a different database"
    );
    assert_eq!(
        ctx.root(),
        engine.config().dbpath.as_path(),
        "operation context is rooted outside the data path"
    );
    background::assert_no_bg_op_in_prog(&db);

    // Repair must neither see nor leave uncommitted journal entries.
    engine.sync_and_truncate_journal()?;

    let total_bytes = db_file_size(engine, &db);
    let free_bytes = fs2::available_space(&engine.config().repairpath).ok();
    capacity_check(&db, total_bytes, free_bytes)?;

    ctx.check_for_interrupt()?;

    let prefix = if options.preserve_cloned_files_on_failure || options.backup_original_files {
        "backup"
    } else {
        "_tmp"
    };
    let reserved = unique_reserved_path(&engine.config().repairpath, prefix);
    if let Err(err) = fs::create_dir(&reserved) {
        fatal(
            FATAL_RESERVED_DIR,
            &format!("creating reserved directory {}: {err}", reserved.display()),
        );
    }
    tracing::debug!(reserved = %reserved.display(), "allocated reserved repair directory");

    let guard = if options.preserve_cloned_files_on_failure {
        None
    } else {
        Some(RepairFileGuard::new(engine, &db, &reserved))
    };

    {
        let Some(original) = engine.holder().get(&db, &engine.config().dbpath)? else {
            return Err(StoreError::NamespaceNotFound(db));
        };
        let (temp, just_created) = engine.holder().get_or_create(&db, &reserved)?;
        assert!(just_created, "reserved path already contained a database");

        let mut namespaces: BTreeMap<String, CollectionOptions> = BTreeMap::new();
        {
            let catalog_ns = format!("{db}.system.namespaces");
            let locs = lock_db(&original).collection_locs(&catalog_ns);
            if let Some(locs) = locs {
                for loc in locs {
                    let doc = lock_db(&original).doc_for(loc)?;
                    let Some(name) = doc.get_str("name") else {
                        return Err(StoreError::InvalidCatalog {
                            reason: format!("entry without a name in {catalog_ns}"),
                        });
                    };
                    let collection = ns_collection(name);
                    if collection == "system.namespaces" || collection == "system.indexes" {
                        continue;
                    }
                    if !is_normal_namespace(name) {
                        continue;
                    }
                    let mut collection_options = CollectionOptions::default();
                    if let Some(raw) = doc.get_object("options") {
                        collection_options = CollectionOptions::parse(raw)?;
                    }
                    namespaces.insert(name.to_string(), collection_options);
                }
            }
        }

        for (ns, collection_options) in &namespaces {
            tracing::debug!(ns = %ns, "rebuilding collection");
            lock_db(&temp).create_collection(ns, collection_options.clone(), true, false)?;

            let specs: Vec<IndexSpec> = {
                let source = lock_db(&original);
                let Some(coll) = source.collection(ns) else {
                    return Err(StoreError::InvalidCatalog {
                        reason: format!("{ns} is listed in the catalog but has no collection"),
                    });
                };
                coll.index_catalog().specs().cloned().collect()
            };
            let mut builder = MultiIndexBuilder::new(ns.clone());
            builder.init(specs)?;

            let locs = lock_db(&original).collection_locs(ns).unwrap_or_default();
            for loc in locs {
                assert!(!loc.is_null(), "collection scan yielded a null location");
                let doc: Document = lock_db(&original).doc_for(loc)?;
                lock_db(&temp).insert_document(ns, doc, Some(&mut builder))?;
                engine.commit_if_needed()?;
                ctx.check_for_interrupt()?;
            }

            lock_db(&temp).finish_index_build(builder)?;
        }

        // Second fence: everything rebuilt must be durable before any file
        // of the original is touched.
        engine.sync_and_truncate_journal()?;
        engine.flush_all_files(true)?;
        engine.holder().close(&db, &reserved)?;
    }

    engine.holder().close(&db, &engine.config().dbpath)?;

    if options.backup_original_files {
        rename_for_backup(engine, &db, &reserved);
    } else {
        delete_data_files(engine, &db);
        if engine.config().directory_per_db {
            let dir = engine.config().dbpath.join(&db);
            if let Err(err) = fs::create_dir(&dir) {
                fatal(
                    FATAL_RECREATE_DIR,
                    &format!("recreating database directory {}: {err}", dir.display()),
                );
            }
        }
    }

    if let Some(guard) = guard {
        guard.commit();
    }

    replace_with_recovered(engine, &db, &reserved);

    if !options.backup_original_files {
        if let Err(err) = fs::remove_dir_all(&reserved) {
            fatal(
                FATAL_FINAL_CLEANUP,
                &format!("removing reserved directory {}: {err}", reserved.display()),
            );
        }
    }

    tracing::info!(db = %db, "database repair complete");
    Ok(())
}
