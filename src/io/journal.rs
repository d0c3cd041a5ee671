//! Write-ahead journal backing the durability fences.
//!
//! Writes are noted here before they reach the extent files; a fence flushes
//! the data files and truncates the journal. Records use the same framing as
//! extent records. When journaling is disabled every call is a no-op, which
//! is why fence points always pair a journal truncate with a full file flush.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::constants::{JOURNAL_COMMIT_THRESHOLD, JOURNAL_FILE_NAME};
use crate::error::Result;
use crate::io::extent::RECORD_HEADER_SIZE;
use crate::lock_mutex;

#[derive(Debug)]
struct JournalState {
    file: File,
    pending_bytes: u64,
}

/// Process-wide journal rooted at the data path.
#[derive(Debug)]
pub struct DurabilityManager {
    enabled: bool,
    path: PathBuf,
    state: Option<Mutex<JournalState>>,
}

impl DurabilityManager {
    pub(crate) fn open(dbpath: &Path, enabled: bool) -> Result<Self> {
        let path = dbpath.join(JOURNAL_FILE_NAME);
        let state = if enabled {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            let pending_bytes = file.metadata()?.len();
            Some(Mutex::new(JournalState {
                file,
                pending_bytes,
            }))
        } else {
            None
        };
        Ok(Self {
            enabled,
            path,
            state,
        })
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Note a write that is about to land in the extent files.
    pub(crate) fn log_write(&self, payload: &[u8]) -> Result<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        let mut state = lock_mutex(state);

        let digest = blake3::hash(payload);
        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&[0u8; 4]);
        record.extend_from_slice(digest.as_bytes());
        record.extend_from_slice(payload);

        state.file.seek(SeekFrom::End(0))?;
        state.file.write_all(&record)?;
        state.pending_bytes += record.len() as u64;
        Ok(())
    }

    /// Whether enough has accumulated to warrant a group commit.
    #[must_use]
    pub fn needs_commit(&self) -> bool {
        self.pending_bytes() >= JOURNAL_COMMIT_THRESHOLD
    }

    #[must_use]
    pub fn pending_bytes(&self) -> u64 {
        match &self.state {
            Some(state) => lock_mutex(state).pending_bytes,
            None => 0,
        }
    }

    /// Drop journaled history. The caller must have made the data files
    /// durable first.
    pub(crate) fn truncate(&self) -> Result<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        let mut state = lock_mutex(state);
        state.file.set_len(0)?;
        state.file.seek(SeekFrom::Start(0))?;
        state.file.sync_all()?;
        state.pending_bytes = 0;
        tracing::debug!(path = %self.path.display(), "journal truncated");
        Ok(())
    }
}
