//! Background pre-allocation of data files.
//!
//! Extent growth is latency-sensitive: the allocator thread creates and
//! sizes the next numbered file ahead of time so the write path rarely has
//! to. Anything that walks a database's files must quiesce the allocator
//! first, otherwise a file can appear mid-scan.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::lock_mutex;

#[derive(Debug, Default)]
struct AllocatorQueue {
    requests: VecDeque<(PathBuf, u64)>,
    busy: bool,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct AllocatorShared {
    queue: Mutex<AllocatorQueue>,
    cv: Condvar,
}

/// Worker thread that pre-allocates files on request.
#[derive(Debug)]
pub struct FileAllocator {
    shared: Arc<AllocatorShared>,
    worker: Option<JoinHandle<()>>,
}

impl FileAllocator {
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(AllocatorShared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("file-allocator".into())
            .spawn(move || run(&worker_shared))
            .ok();
        if worker.is_none() {
            tracing::warn!("file allocator thread failed to start; allocating inline");
        }
        Self { shared, worker }
    }

    /// Queue creation of `path` sized to `len` bytes. Existing files are
    /// never truncated. When the worker thread is unavailable the request
    /// runs inline.
    pub fn request(&self, path: PathBuf, len: u64) {
        if self.worker.is_none() {
            if let Err(err) = preallocate(&path, len) {
                tracing::warn!(path = %path.display(), error = %err, "file pre-allocation failed");
            }
            return;
        }
        let mut queue = lock_mutex(&self.shared.queue);
        queue.requests.push_back((path, len));
        drop(queue);
        self.shared.cv.notify_all();
    }

    /// Block until every queued request has been handled and the worker is
    /// idle.
    pub fn wait_until_finished(&self) {
        let mut queue = lock_mutex(&self.shared.queue);
        while !queue.requests.is_empty() || queue.busy {
            queue = match self.shared.cv.wait(queue) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl Default for FileAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FileAllocator {
    fn drop(&mut self) {
        {
            let mut queue = lock_mutex(&self.shared.queue);
            queue.shutdown = true;
        }
        self.shared.cv.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(shared: &AllocatorShared) {
    loop {
        let job = {
            let mut queue = lock_mutex(&shared.queue);
            loop {
                if let Some(job) = queue.requests.pop_front() {
                    queue.busy = true;
                    break Some(job);
                }
                if queue.shutdown {
                    break None;
                }
                queue = match shared.cv.wait(queue) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };
        let Some((path, len)) = job else {
            return;
        };

        if let Err(err) = preallocate(&path, len) {
            tracing::warn!(path = %path.display(), error = %err, "file pre-allocation failed");
        } else {
            tracing::debug!(path = %path.display(), len, "pre-allocated file");
        }

        {
            let mut queue = lock_mutex(&shared.queue);
            queue.busy = false;
        }
        shared.cv.notify_all();
    }
}

fn preallocate(path: &std::path::Path, len: u64) -> io::Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    if file.metadata()?.len() < len {
        file.set_len(len)?;
    }
    Ok(())
}
