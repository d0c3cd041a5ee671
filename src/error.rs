//! Error surface for the engine.

use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// All failure modes surfaced by the engine.
///
/// Variants carry enough context to diagnose which file or namespace was
/// involved; callers match on the variant, operators read the message.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "cannot repair database {db} having size: {total_bytes} (bytes) \
         because free disk space is: {free_bytes} (bytes)"
    )]
    OutOfDiskSpace {
        db: String,
        total_bytes: u64,
        free_bytes: u64,
    },

    #[error("database does not exist to repair: {0}")]
    NamespaceNotFound(String),

    #[error("invalid collection options: {reason}")]
    InvalidOptions { reason: String },

    #[error("operation interrupted")]
    Interrupted,

    #[error("invalid namespace catalog: {reason}")]
    InvalidCatalog { reason: String },

    #[error("record corruption in {file} at offset {offset}: {reason}")]
    RecordCorruption {
        file: String,
        offset: u64,
        reason: String,
    },

    #[error("journal corruption at offset {offset}: {reason}")]
    JournalCorruption { offset: u64, reason: String },

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("index build failed on {ns}: {reason}")]
    IndexBuild { ns: String, reason: String },

    #[error("duplicate key for index {index} on {ns}")]
    DuplicateKey { ns: String, index: String },

    #[error("decode failure: {0}")]
    Decode(String),
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        StoreError::Decode(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        StoreError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}
