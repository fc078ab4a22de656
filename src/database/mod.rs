mod sqlite;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::result::Result;

pub use sqlite::Sqlite;

/// What a composed segment was made of, remembered so that cache hits can
/// report the same tokens as the composition that produced the file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub tokens: Vec<String>,
    pub missing: Vec<String>,
}

/// A trait for saving segment data between multiple executions.
///
/// The segment files are the source of truth: a record without its file is
/// meaningless, and a file without a record is still a valid cache hit.
pub trait SegmentDb
where
    Self: Sized + Sync,
{
    /// Read the database file at the given path or create it if it does not exist.
    ///
    /// If the file does exist but does not correspond to a valid database file,
    /// an error **should** be returned.
    fn read_or_create(p: &Path) -> Result<Self>;

    /// A database that lives as long as the process
    #[cfg(test)]
    fn in_memory() -> Result<Self>;

    /// Store the record of a segment key, replacing any previous one
    fn record(&self, key: &str, record: &SegmentRecord) -> Result<()>;

    /// Get back the record of a segment key, if any
    fn lookup(&self, key: &str) -> Result<Option<SegmentRecord>>;

    /// Delete the record of a segment key. Deleting an unknown key is not an error.
    fn forget(&self, key: &str) -> Result<()>;

    /// Count the number of recorded segments
    fn count(&self) -> Result<usize>;
}
