//! In-memory store, always available.
//!
//! Backed by mutex-guarded maps; the single mutex makes `apply` atomic with
//! respect to readers, so this backend reports transaction support. Used by
//! the test suite and as the reference implementation the on-disk backends
//! are checked against.

use crate::error::{StagebaseError, StagebaseResult};
use crate::record::{MemberId, Record, RecordId, Value, columns};
use crate::schema::is_versions_table;
use crate::store::RecordStore;
use crate::write::{WriteOp, WritePlan};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    /// Stage tables keyed by record id.
    stage: HashMap<String, BTreeMap<RecordId, Record>>,
    /// History tables keyed by `(RecordID, Version)`.
    versions: HashMap<String, BTreeMap<(RecordId, u64), Record>>,
    /// Row-id allocator per table.
    next_id: HashMap<String, u64>,
}

/// Mutex-guarded in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> StagebaseResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StagebaseError::Other("memory store mutex poisoned".to_string()))
    }

    fn apply_locked(tables: &mut Tables, plan: &WritePlan) -> StagebaseResult<()> {
        for op in &plan.ops {
            match op {
                WriteOp::Upsert { table, record, .. } => {
                    tables
                        .stage
                        .entry(table.clone())
                        .or_default()
                        .insert(record.id, record.clone());
                }
                WriteOp::InsertVersion { table, record } => {
                    let record_id = record.record_id();
                    let version = record.version().ok_or_else(|| {
                        StagebaseError::Other(format!(
                            "history insert into '{table}' without a version number"
                        ))
                    })?;
                    tables
                        .versions
                        .entry(table.clone())
                        .or_default()
                        .insert((record_id, version), record.clone());
                }
                WriteOp::Delete { table, id } => {
                    if let Some(rows) = tables.stage.get_mut(table) {
                        rows.remove(id);
                    }
                }
                WriteOp::DeleteVersion {
                    table,
                    record_id,
                    version,
                } => {
                    if let Some(rows) = tables.versions.get_mut(table) {
                        rows.remove(&(*record_id, *version));
                    }
                }
            }
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, table: &str, id: RecordId) -> StagebaseResult<Option<Record>> {
        let tables = self.lock()?;
        Ok(tables.stage.get(table).and_then(|rows| rows.get(&id)).cloned())
    }

    fn rows(&self, table: &str) -> StagebaseResult<Vec<Record>> {
        let tables = self.lock()?;
        if is_versions_table(table) {
            Ok(tables
                .versions
                .get(table)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default())
        } else {
            Ok(tables
                .stage
                .get(table)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default())
        }
    }

    fn upsert(&self, table: &str, record: &Record) -> StagebaseResult<()> {
        let mut tables = self.lock()?;
        tables
            .stage
            .entry(table.to_string())
            .or_default()
            .insert(record.id, record.clone());
        Ok(())
    }

    fn delete(&self, table: &str, id: RecordId) -> StagebaseResult<bool> {
        let mut tables = self.lock()?;
        Ok(tables
            .stage
            .get_mut(table)
            .map(|rows| rows.remove(&id).is_some())
            .unwrap_or(false))
    }

    fn max_version(&self, table: &str, record_id: RecordId) -> StagebaseResult<Option<u64>> {
        let tables = self.lock()?;
        Ok(tables.versions.get(table).and_then(|rows| {
            rows.range((record_id, 0)..=(record_id, u64::MAX))
                .next_back()
                .map(|((_, version), _)| *version)
        }))
    }

    fn get_version(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
    ) -> StagebaseResult<Option<Record>> {
        let tables = self.lock()?;
        Ok(tables
            .versions
            .get(table)
            .and_then(|rows| rows.get(&(record_id, version)))
            .cloned())
    }

    fn versions_of(&self, table: &str, record_id: RecordId) -> StagebaseResult<Vec<Record>> {
        let tables = self.lock()?;
        Ok(tables
            .versions
            .get(table)
            .map(|rows| {
                rows.range((record_id, 0)..=(record_id, u64::MAX))
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn delete_version(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
    ) -> StagebaseResult<bool> {
        let mut tables = self.lock()?;
        Ok(tables
            .versions
            .get_mut(table)
            .map(|rows| rows.remove(&(record_id, version)).is_some())
            .unwrap_or(false))
    }

    fn stamp_version_published(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
        publisher: Option<MemberId>,
    ) -> StagebaseResult<bool> {
        let mut tables = self.lock()?;
        let Some(record) = tables
            .versions
            .get_mut(table)
            .and_then(|rows| rows.get_mut(&(record_id, version)))
        else {
            return Ok(false);
        };
        record.set(columns::WAS_PUBLISHED, Value::Bool(true));
        if let Some(publisher) = publisher {
            record.set(columns::PUBLISHER_ID, Value::Id(RecordId(publisher.0)));
        }
        Ok(true)
    }

    fn apply(&self, plan: &WritePlan) -> StagebaseResult<()> {
        let mut tables = self.lock()?;
        Self::apply_locked(&mut tables, plan)
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn next_row_id(&self, table: &str) -> StagebaseResult<RecordId> {
        let mut tables = self.lock()?;
        let next = tables.next_id.entry(table.to_string()).or_insert(0);
        *next += 1;
        Ok(RecordId(*next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Fields;

    fn record(id: u64) -> Record {
        Record::with_fields(RecordId(id), Fields::new())
    }

    #[test]
    fn stage_rows_round_trip() {
        let store = MemoryStore::new();
        store.upsert("Page", &record(1)).unwrap();
        assert!(store.get("Page", RecordId(1)).unwrap().is_some());
        assert_eq!(store.rows("Page").unwrap().len(), 1);
        assert!(store.delete("Page", RecordId(1)).unwrap());
        assert!(store.get("Page", RecordId(1)).unwrap().is_none());
    }

    #[test]
    fn version_rows_are_keyed_by_record_and_version() {
        let store = MemoryStore::new();
        let mut plan = WritePlan::new();
        for version in [1u64, 2, 5] {
            let mut row = record(100 + version);
            row.set(columns::RECORD_ID, RecordId(7));
            row.set(columns::VERSION, version);
            plan.push(WriteOp::InsertVersion {
                table: "Page_Versions".to_string(),
                record: row,
            });
        }
        store.apply(&plan).unwrap();

        assert_eq!(store.max_version("Page_Versions", RecordId(7)).unwrap(), Some(5));
        assert_eq!(store.versions_of("Page_Versions", RecordId(7)).unwrap().len(), 3);
        assert!(
            store
                .get_version("Page_Versions", RecordId(7), 2)
                .unwrap()
                .is_some()
        );
        assert!(store.max_version("Page_Versions", RecordId(8)).unwrap().is_none());
    }

    #[test]
    fn stamping_marks_only_the_requested_row() {
        let store = MemoryStore::new();
        let mut plan = WritePlan::new();
        for version in [1u64, 2] {
            let mut row = record(version);
            row.set(columns::RECORD_ID, RecordId(1));
            row.set(columns::VERSION, version);
            plan.push(WriteOp::InsertVersion {
                table: "Page_Versions".to_string(),
                record: row,
            });
        }
        store.apply(&plan).unwrap();

        assert!(
            store
                .stamp_version_published("Page_Versions", RecordId(1), 2, Some(MemberId(9)))
                .unwrap()
        );
        let stamped = store.get_version("Page_Versions", RecordId(1), 2).unwrap().unwrap();
        assert!(stamped.was_published());
        let untouched = store.get_version("Page_Versions", RecordId(1), 1).unwrap().unwrap();
        assert!(!untouched.was_published());
    }
}
