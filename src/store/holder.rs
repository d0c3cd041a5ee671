//! Registry of open databases keyed by name and root path.
//!
//! The same database name can be open at two roots at once; that is exactly
//! what repair does with its reserved working directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::StorageConfig;
use crate::error::Result;
use crate::io::allocator::FileAllocator;
use crate::io::journal::DurabilityManager;
use crate::lock_mutex;
use crate::store::database::Database;

pub type DbHandle = Arc<Mutex<Database>>;

/// Lock a database handle, recovering from a poisoned mutex.
pub(crate) fn lock_db(handle: &DbHandle) -> MutexGuard<'_, Database> {
    match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug)]
pub struct DbHolder {
    config: StorageConfig,
    durability: Arc<DurabilityManager>,
    allocator: Arc<FileAllocator>,
    open: Mutex<HashMap<(String, PathBuf), DbHandle>>,
}

impl DbHolder {
    pub(crate) fn new(
        config: StorageConfig,
        durability: Arc<DurabilityManager>,
        allocator: Arc<FileAllocator>,
    ) -> Self {
        Self {
            config,
            durability,
            allocator,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to `name` rooted at `root`. Opens from disk when the catalog
    /// file exists; `None` when the database does not exist there.
    pub fn get(&self, name: &str, root: &Path) -> Result<Option<DbHandle>> {
        let key = (name.to_string(), root.to_path_buf());
        {
            let open = lock_mutex(&self.open);
            if let Some(handle) = open.get(&key) {
                return Ok(Some(Arc::clone(handle)));
            }
        }

        let ns_path = self
            .config
            .database_dir(root, name)
            .join(format!("{name}.ns"));
        if !ns_path.exists() {
            return Ok(None);
        }

        let (db, _) = Database::open(
            name,
            root,
            &self.config,
            Arc::clone(&self.durability),
            Arc::clone(&self.allocator),
        )?;
        let handle: DbHandle = Arc::new(Mutex::new(db));
        let mut open = lock_mutex(&self.open);
        let entry = open.entry(key).or_insert_with(|| Arc::clone(&handle));
        Ok(Some(Arc::clone(entry)))
    }

    /// Handle to `name` rooted at `root`, creating the database when absent.
    /// The boolean reports whether it was just created.
    pub fn get_or_create(&self, name: &str, root: &Path) -> Result<(DbHandle, bool)> {
        let key = (name.to_string(), root.to_path_buf());
        {
            let open = lock_mutex(&self.open);
            if let Some(handle) = open.get(&key) {
                return Ok((Arc::clone(handle), false));
            }
        }

        let (db, just_created) = Database::open(
            name,
            root,
            &self.config,
            Arc::clone(&self.durability),
            Arc::clone(&self.allocator),
        )?;
        let handle: DbHandle = Arc::new(Mutex::new(db));
        let mut open = lock_mutex(&self.open);
        let entry = open.entry(key).or_insert_with(|| Arc::clone(&handle));
        Ok((Arc::clone(entry), just_created))
    }

    #[must_use]
    pub fn is_open(&self, name: &str, root: &Path) -> bool {
        let open = lock_mutex(&self.open);
        open.contains_key(&(name.to_string(), root.to_path_buf()))
    }

    /// Flush and drop the handle for `name` at `root`. Closing a database
    /// that is not open is not an error.
    pub fn close(&self, name: &str, root: &Path) -> Result<()> {
        let handle = {
            let mut open = lock_mutex(&self.open);
            open.remove(&(name.to_string(), root.to_path_buf()))
        };
        if let Some(handle) = handle {
            lock_db(&handle).flush(true)?;
            tracing::debug!(db = name, root = %root.display(), "closed database");
        }
        Ok(())
    }

    /// Flush every open database.
    pub fn flush_all(&self, sync: bool) -> Result<()> {
        let handles: Vec<DbHandle> = {
            let open = lock_mutex(&self.open);
            open.values().map(Arc::clone).collect()
        };
        for handle in handles {
            lock_db(&handle).flush(sync)?;
        }
        Ok(())
    }
}
