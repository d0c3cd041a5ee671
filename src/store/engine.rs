//! Top-level engine handle: configuration, the open-database registry, the
//! durability manager, and the background file allocator.

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::io::allocator::FileAllocator;
use crate::io::journal::DurabilityManager;
use crate::opctx::OperationContext;
use crate::store::holder::DbHolder;
use crate::store::repair::{self, RepairOptions};

#[derive(Debug)]
pub struct Engine {
    config: StorageConfig,
    holder: DbHolder,
    durability: Arc<DurabilityManager>,
    allocator: Arc<FileAllocator>,
}

impl Engine {
    pub fn new(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dbpath)?;
        std::fs::create_dir_all(&config.repairpath)?;

        let durability = Arc::new(DurabilityManager::open(&config.dbpath, config.journal)?);
        let allocator = Arc::new(FileAllocator::new());
        let holder = DbHolder::new(
            config.clone(),
            Arc::clone(&durability),
            Arc::clone(&allocator),
        );

        tracing::info!(
            dbpath = %config.dbpath.display(),
            repairpath = %config.repairpath.display(),
            directory_per_db = config.directory_per_db,
            journal = config.journal,
            "storage engine started"
        );
        Ok(Self {
            config,
            holder,
            durability,
            allocator,
        })
    }

    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    #[must_use]
    pub fn holder(&self) -> &DbHolder {
        &self.holder
    }

    #[must_use]
    pub fn file_allocator(&self) -> &FileAllocator {
        &self.allocator
    }

    #[must_use]
    pub fn durability(&self) -> &DurabilityManager {
        &self.durability
    }

    /// Durability fence: make every open database durable, then drop the
    /// journaled history that predates it.
    pub fn sync_and_truncate_journal(&self) -> Result<()> {
        self.holder.flush_all(true)?;
        self.durability.truncate()
    }

    /// Group commit when enough journal has accumulated. Cheap to call
    /// between documents.
    pub fn commit_if_needed(&self) -> Result<()> {
        if self.durability.needs_commit() {
            tracing::debug!("journal threshold reached, committing");
            self.sync_and_truncate_journal()?;
        }
        Ok(())
    }

    /// Flush every open database; with `sync`, fsync their files too.
    pub fn flush_all_files(&self, sync: bool) -> Result<()> {
        self.holder.flush_all(sync)
    }

    /// Total on-disk size of a database's catalog and extent files.
    #[must_use]
    pub fn database_size(&self, db: &str) -> u64 {
        repair::db_file_size(self, db)
    }

    /// Rebuild `db` from its own records and swap the rebuilt files into
    /// place. See [`RepairOptions`] for backup and retention behaviour.
    pub fn repair_database(
        &self,
        ctx: &OperationContext,
        db: &str,
        options: RepairOptions,
    ) -> Result<()> {
        repair::repair_database(self, ctx, db, options)
    }
}
