#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions)]
//
// Casts in this crate are bounded by on-disk limits (extent sizes, record
// lengths) checked before the cast.
#![allow(clippy::cast_possible_truncation)]
//
// Many small accessors read better without per-function error docs.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

/// The lodestore crate version (matches `Cargo.toml`).
pub const LODESTORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod opctx;
pub mod store;
pub mod types;

pub use config::StorageConfig;
pub use error::{Result, StoreError};
pub use io::allocator::FileAllocator;
pub use io::journal::DurabilityManager;
pub use opctx::OperationContext;
pub use store::background::{assert_no_bg_op_in_prog, BackgroundOperation};
pub use store::collection::Collection;
pub use store::database::Database;
pub use store::engine::Engine;
pub use store::holder::{DbHandle, DbHolder};
pub use store::index::{IndexCatalog, IndexSpec, MultiIndexBuilder};
pub use store::repair::RepairOptions;
pub use types::{
    is_normal_namespace, is_system_namespace, ns_collection, ns_to_database, CollectionOptions,
    DiskLoc, Document,
};

/// Codec settings shared by the catalog and journal framing.
pub(crate) fn codec_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

/// Lock a mutex, recovering the guard when a panicking holder poisoned it.
pub(crate) fn lock_mutex<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
