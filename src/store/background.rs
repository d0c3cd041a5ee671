//! Process-wide registry of background maintenance operations.
//!
//! Long operations (index builds, compactions) register themselves per
//! database; destructive maintenance such as repair refuses to start while
//! one is in flight.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::lock_mutex;

static BACKGROUND_OPS: Lazy<Mutex<HashMap<String, usize>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Scope marker for one background operation on one database.
#[derive(Debug)]
pub struct BackgroundOperation {
    db: String,
}

impl BackgroundOperation {
    pub fn register<S: Into<String>>(db: S) -> Self {
        let db = db.into();
        let mut ops = lock_mutex(&BACKGROUND_OPS);
        *ops.entry(db.clone()).or_insert(0) += 1;
        Self { db }
    }
}

impl Drop for BackgroundOperation {
    fn drop(&mut self) {
        let mut ops = lock_mutex(&BACKGROUND_OPS);
        if let Some(count) = ops.get_mut(&self.db) {
            *count -= 1;
            if *count == 0 {
                ops.remove(&self.db);
            }
        }
    }
}

#[must_use]
pub fn in_prog_for_db(db: &str) -> bool {
    lock_mutex(&BACKGROUND_OPS).contains_key(db)
}

/// Precondition check for destructive maintenance. Panics when a background
/// operation is running against `db`.
pub fn assert_no_bg_op_in_prog(db: &str) {
    assert!(
        !in_prog_for_db(db),
        "cannot run maintenance on {db}: a background operation is in progress"
    );
}
