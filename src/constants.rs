//! Crate-wide tunables and on-disk limits.

/// Hard upper bound on the number of numbered extent files a single database
/// may own. Exceeding this during a file scan is an engine invariant failure.
pub const MAX_EXTENT_FILES: u32 = 16_000;

/// Consecutive missing extent numbers tolerated before a file scan stops.
/// Gaps in the middle of the sequence have been observed on real deployments;
/// they are warned about, not fatal.
pub const EXTENT_SCAN_SLACK: u32 = 10;

/// Size at which the extent store rolls over to the next numbered file.
pub const DEFAULT_EXTENT_SIZE: u64 = 4 * 1024 * 1024;

/// Upper bound on a single record payload. A length header beyond this is
/// treated as corruption rather than an allocation request.
pub const MAX_RECORD_BYTES: u64 = 16 * 1024 * 1024;

/// Name of the write-ahead journal file under the data root.
pub const JOURNAL_FILE_NAME: &str = "journal.bin";

/// Pending journal bytes that trigger a group commit on the next
/// `commit_if_needed` call.
pub const JOURNAL_COMMIT_THRESHOLD: u64 = 256 * 1024;
