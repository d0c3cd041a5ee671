//! Numbered extent files and the record framing used inside them.
//!
//! Each database owns a contiguous run of `<db>.0`, `<db>.1`, ... files.
//! Records are framed as `[len: u32][pad: 4][blake3: 32][payload]`; the
//! checksum covers the payload. A zeroed header marks the end of valid
//! records inside a pre-allocated file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::constants::MAX_RECORD_BYTES;
use crate::error::{Result, StoreError};
use crate::io::allocator::FileAllocator;
use crate::types::DiskLoc;

// [len: u32][pad: 4 bytes][checksum: 32 bytes]
pub(crate) const RECORD_HEADER_SIZE: usize = 40;

/// Append-only record storage across the numbered files of one database.
#[derive(Debug)]
pub(crate) struct ExtentStore {
    db: String,
    dir: PathBuf,
    extent_size: u64,
    allocator: Arc<FileAllocator>,
    files: Vec<File>,
    tail: DiskLoc,
}

impl ExtentStore {
    /// Open the existing extent run under `dir`, scanning the last file for
    /// the append position. Creates nothing; extents appear on first write.
    pub(crate) fn open(
        db: &str,
        dir: &Path,
        extent_size: u64,
        allocator: Arc<FileAllocator>,
    ) -> Result<Self> {
        let mut store = Self {
            db: db.to_string(),
            dir: dir.to_path_buf(),
            extent_size,
            allocator,
            files: Vec::new(),
            tail: DiskLoc::new(0, 0),
        };

        let mut index = 0u32;
        loop {
            let path = store.file_path(index);
            if !path.exists() {
                break;
            }
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            store.files.push(file);
            index += 1;
        }

        if let Some(last) = store.files.last_mut() {
            let offset = scan_tail(last)?;
            store.tail = DiskLoc::new(store.files.len() as u32 - 1, offset);
        }

        Ok(store)
    }

    pub(crate) fn file_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("{}.{index}", self.db))
    }

    /// Make sure at least one extent exists and queue pre-allocation of the
    /// next one. Called when a collection is created with `allocate = true`.
    pub(crate) fn warm(&mut self) -> Result<()> {
        if self.files.is_empty() {
            self.ensure_extent(0)?;
            self.request_preallocation(1);
        }
        Ok(())
    }

    pub(crate) fn append_record(&mut self, payload: &[u8]) -> Result<DiskLoc> {
        if payload.len() as u64 > MAX_RECORD_BYTES {
            return Err(StoreError::Decode(format!(
                "record of {} bytes exceeds the {MAX_RECORD_BYTES} byte limit",
                payload.len()
            )));
        }
        let record_len = RECORD_HEADER_SIZE as u64 + payload.len() as u64;

        if self.files.is_empty() {
            self.warm()?;
        } else if self.tail.offset > 0 && self.tail.offset + record_len > self.extent_size {
            // The next extent may still be sitting in the allocator queue;
            // drain it before touching the file ourselves.
            self.allocator.wait_until_finished();
            self.tail = DiskLoc::new(self.tail.file_index + 1, 0);
            self.ensure_extent(self.tail.file_index)?;
            self.request_preallocation(self.tail.file_index + 1);
        }
        self.ensure_extent(self.tail.file_index)?;

        let digest = blake3::hash(payload);
        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&[0u8; 4]);
        record.extend_from_slice(digest.as_bytes());
        record.extend_from_slice(payload);

        let loc = self.tail;
        let file = self.file_at(loc.file_index)?;
        file.seek(SeekFrom::Start(loc.offset))?;
        file.write_all(&record)?;

        self.tail = DiskLoc::new(loc.file_index, loc.offset + record_len);
        Ok(loc)
    }

    pub(crate) fn read_record(&mut self, loc: DiskLoc) -> Result<Vec<u8>> {
        let file_name = format!("{}.{}", self.db, loc.file_index);
        let corrupt = |offset: u64, reason: String| StoreError::RecordCorruption {
            file: file_name.clone(),
            offset,
            reason,
        };

        if loc.file_index as usize >= self.files.len() {
            return Err(corrupt(loc.offset, "extent file does not exist".into()));
        }
        let file = self.file_at(loc.file_index)?;

        file.seek(SeekFrom::Start(loc.offset))?;
        let mut header = [0u8; RECORD_HEADER_SIZE];
        file.read_exact(&mut header)
            .map_err(|err| corrupt(loc.offset, format!("short record header: {err}")))?;

        let len_bytes: [u8; 4] = header[..4]
            .try_into()
            .map_err(|_| corrupt(loc.offset, "unreadable length header".into()))?;
        let payload_len = u64::from(u32::from_le_bytes(len_bytes));
        if payload_len == 0 || payload_len > MAX_RECORD_BYTES {
            return Err(corrupt(
                loc.offset,
                format!("record length {payload_len} out of range"),
            ));
        }

        let mut payload = vec![0u8; payload_len as usize];
        file.read_exact(&mut payload)
            .map_err(|err| corrupt(loc.offset, format!("short record payload: {err}")))?;

        let expected = blake3::hash(&payload);
        if expected.as_bytes() != &header[8..RECORD_HEADER_SIZE] {
            return Err(corrupt(loc.offset, "record checksum mismatch".into()));
        }

        Ok(payload)
    }

    pub(crate) fn flush(&mut self, sync: bool) -> Result<()> {
        if sync {
            for file in &self.files {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    fn ensure_extent(&mut self, index: u32) -> Result<()> {
        while self.files.len() <= index as usize {
            let path = self.file_path(self.files.len() as u32);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            self.files.push(file);
        }
        Ok(())
    }

    fn request_preallocation(&self, index: u32) {
        self.allocator
            .request(self.file_path(index), self.extent_size);
    }

    fn file_at(&mut self, index: u32) -> Result<&mut File> {
        let file_name = format!("{}.{index}", self.db);
        self.files
            .get_mut(index as usize)
            .ok_or(StoreError::RecordCorruption {
                file: file_name,
                offset: 0,
                reason: "extent file is not open".into(),
            })
    }
}

/// Walk the records of an extent file and return the offset just past the
/// last valid one. A zeroed or truncated header ends the walk.
fn scan_tail(file: &mut File) -> Result<u64> {
    let len = file.metadata()?.len();
    let mut offset = 0u64;
    let mut header = [0u8; RECORD_HEADER_SIZE];
    while offset + RECORD_HEADER_SIZE as u64 <= len {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut header)?;
        let len_bytes: [u8; 4] = match header[..4].try_into() {
            Ok(bytes) => bytes,
            Err(_) => break,
        };
        let payload_len = u64::from(u32::from_le_bytes(len_bytes));
        if payload_len == 0 {
            break;
        }
        let next = offset + RECORD_HEADER_SIZE as u64 + payload_len;
        if payload_len > MAX_RECORD_BYTES || next > len {
            break;
        }
        offset = next;
    }
    Ok(offset)
}
