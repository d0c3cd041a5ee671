//! Storage configuration shared by every subsystem.

use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_EXTENT_SIZE;

/// Where the engine keeps its files and how it lays them out.
///
/// `repairpath` may point at a different filesystem than `dbpath`; the repair
/// file swap copes with cross-partition renames for exactly that reason.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for database files.
    pub dbpath: PathBuf,
    /// Root directory under which repair working directories are reserved.
    pub repairpath: PathBuf,
    /// When set, each database owns a subdirectory named after it.
    pub directory_per_db: bool,
    /// When cleared, the write-ahead journal is a no-op.
    pub journal: bool,
    /// Rollover threshold for numbered extent files.
    pub extent_size: u64,
}

impl StorageConfig {
    pub fn new<P: Into<PathBuf>>(dbpath: P) -> Self {
        let dbpath = dbpath.into();
        Self {
            repairpath: dbpath.clone(),
            dbpath,
            directory_per_db: false,
            journal: true,
            extent_size: DEFAULT_EXTENT_SIZE,
        }
    }

    #[must_use]
    pub fn with_repairpath<P: Into<PathBuf>>(mut self, repairpath: P) -> Self {
        self.repairpath = repairpath.into();
        self
    }

    #[must_use]
    pub fn with_directory_per_db(mut self, enabled: bool) -> Self {
        self.directory_per_db = enabled;
        self
    }

    #[must_use]
    pub fn with_journal(mut self, enabled: bool) -> Self {
        self.journal = enabled;
        self
    }

    #[must_use]
    pub fn with_extent_size(mut self, extent_size: u64) -> Self {
        self.extent_size = extent_size;
        self
    }

    /// Directory holding the files of `db` when the database is rooted at
    /// `root` (either the data path or a reserved repair directory).
    #[must_use]
    pub fn database_dir(&self, root: &Path, db: &str) -> PathBuf {
        if self.directory_per_db {
            root.join(db)
        } else {
            root.to_path_buf()
        }
    }
}
