//! The backend abstraction the versioning core runs against.
//!
//! [`RecordStore`] is a row-level interface over named physical tables. Two
//! kinds of tables exist: stage tables keyed by record id, and `_Versions`
//! history tables keyed by `(RecordID, Version)`. The trait carries separate
//! operations for each; `rows` scans either kind, which is what the query
//! interpreter uses.
//!
//! Three backends ship with the crate: [`MemoryStore`] (always available),
//! [`RedbStore`](redb_store::RedbStore) (transactional, feature `redb`) and
//! [`SledStore`](sled_store::SledStore) (non-transactional apply, feature
//! `sled`).

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;
#[cfg(feature = "sled")]
pub mod sled_store;

pub use memory::MemoryStore;
#[cfg(feature = "redb")]
pub use redb_store::RedbStore;
#[cfg(feature = "sled")]
pub use sled_store::SledStore;

use crate::error::StagebaseResult;
use crate::record::{MemberId, Record, RecordId};
use crate::write::WritePlan;

/// Row-level store interface over named physical tables.
pub trait RecordStore {
    /// Get a stage row by id, `None` if absent.
    fn get(&self, table: &str, id: RecordId) -> StagebaseResult<Option<Record>>;

    /// Scan every row of a table (stage or history).
    fn rows(&self, table: &str) -> StagebaseResult<Vec<Record>>;

    /// Write a stage row directly, outside the versioned write path. Used
    /// for non-versioning maintenance writes (disown-unlinking, changeset
    /// persistence).
    fn upsert(&self, table: &str, record: &Record) -> StagebaseResult<()>;

    /// Delete a stage row, returns whether it existed.
    fn delete(&self, table: &str, id: RecordId) -> StagebaseResult<bool>;

    /// Highest version recorded for `record_id` in a history table.
    fn max_version(&self, table: &str, record_id: RecordId) -> StagebaseResult<Option<u64>>;

    /// Get one history row by `(RecordID, Version)`.
    fn get_version(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
    ) -> StagebaseResult<Option<Record>>;

    /// All history rows for a record, version ascending.
    fn versions_of(&self, table: &str, record_id: RecordId) -> StagebaseResult<Vec<Record>>;

    /// Delete one history row. Orphan cleanup only.
    fn delete_version(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
    ) -> StagebaseResult<bool>;

    /// Stamp an existing history row as published. This is a direct update —
    /// the row already exists and must not travel through the versioned
    /// write path again.
    fn stamp_version_published(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
        publisher: Option<MemberId>,
    ) -> StagebaseResult<bool>;

    /// Apply a write plan, atomically where the backend supports it.
    fn apply(&self, plan: &WritePlan) -> StagebaseResult<()>;

    /// Whether [`apply`](RecordStore::apply) is atomic. Callers that need
    /// atomicity check this defensively and proceed non-atomically when the
    /// backend cannot provide it.
    fn supports_transactions(&self) -> bool;

    /// Allocate a fresh row id for a table whose rows have no natural key
    /// (changesets, changeset items).
    fn next_row_id(&self, table: &str) -> StagebaseResult<RecordId>;

    /// Pre-create physical tables. Backends with cheap implicit table
    /// creation may no-op.
    fn ensure_tables(&self, _tables: &[String]) -> StagebaseResult<()> {
        Ok(())
    }
}
