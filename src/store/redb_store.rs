//! Redb-backed store.
//!
//! One redb table per physical table: stage tables keyed by record id,
//! history tables keyed by `(RecordID, Version)`. Rows are bincode-encoded
//! through serde. Write plans apply inside a single redb write transaction,
//! so this backend reports transaction support.

use crate::error::StagebaseResult;
use crate::record::{MemberId, Record, RecordId, Value, columns};
use crate::schema::is_versions_table;
use crate::store::RecordStore;
use crate::write::{WriteOp, WritePlan};
use redb::{ReadableDatabase, ReadableTable, TableDefinition, TableError};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, OnceLock, PoisonError};

/// Allocator table for synthetic row ids, keyed by table name.
const ROW_IDS: TableDefinition<'static, &str, u64> = TableDefinition::new("__stagebase_row_ids");

/// redb table definitions need a `'static` name, but physical table names
/// arrive borrowed. Intern each name once; the set is finite (the schema
/// registry's physical tables plus the changeset tables).
fn interned(name: &str) -> &'static str {
    static NAMES: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();
    let mut names = NAMES
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    match names.get(name) {
        Some(existing) => existing,
        None => {
            let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
            names.insert(leaked);
            leaked
        }
    }
}

fn stage_def(name: &str) -> TableDefinition<'static, u64, &'static [u8]> {
    TableDefinition::new(interned(name))
}

fn versions_def(name: &str) -> TableDefinition<'static, (u64, u64), &'static [u8]> {
    TableDefinition::new(interned(name))
}

fn encode(record: &Record) -> StagebaseResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(record, bincode::config::standard())?)
}

fn decode(bytes: &[u8]) -> StagebaseResult<Record> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(record)
}

/// Transactional on-disk backend over redb.
pub struct RedbStore {
    db: redb::Database,
}

impl RedbStore {
    /// Create or open a redb database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StagebaseResult<Self> {
        let db = redb::Database::create(path)?;
        Ok(RedbStore { db })
    }

    fn apply_in(txn: &redb::WriteTransaction, plan: &WritePlan) -> StagebaseResult<()> {
        for op in &plan.ops {
            match op {
                WriteOp::Upsert { table, record, .. } => {
                    let mut table = txn.open_table(stage_def(table))?;
                    table.insert(record.id.0, encode(record)?.as_slice())?;
                }
                WriteOp::InsertVersion { table, record } => {
                    let mut table = txn.open_table(versions_def(table))?;
                    let version = record.version().unwrap_or(0);
                    table.insert((record.record_id().0, version), encode(record)?.as_slice())?;
                }
                WriteOp::Delete { table, id } => {
                    let mut table = txn.open_table(stage_def(table))?;
                    table.remove(id.0)?;
                }
                WriteOp::DeleteVersion {
                    table,
                    record_id,
                    version,
                } => {
                    let mut table = txn.open_table(versions_def(table))?;
                    table.remove((record_id.0, *version))?;
                }
            }
        }
        Ok(())
    }
}

/// Absent tables read as empty rather than erroring; redb only creates a
/// table on first write.
macro_rules! open_or_empty {
    ($txn:expr, $def:expr, $absent:expr) => {
        match $txn.open_table($def) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok($absent),
            Err(err) => return Err(err.into()),
        }
    };
}

impl RecordStore for RedbStore {
    fn get(&self, table: &str, id: RecordId) -> StagebaseResult<Option<Record>> {
        let txn = self.db.begin_read()?;
        let table = open_or_empty!(txn, stage_def(table), None);
        match table.get(id.0)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn rows(&self, table: &str) -> StagebaseResult<Vec<Record>> {
        let txn = self.db.begin_read()?;
        let mut rows = Vec::new();
        if is_versions_table(table) {
            let table = open_or_empty!(txn, versions_def(table), rows);
            for entry in table.iter()? {
                let (_, value) = entry?;
                rows.push(decode(value.value())?);
            }
        } else {
            let table = open_or_empty!(txn, stage_def(table), rows);
            for entry in table.iter()? {
                let (_, value) = entry?;
                rows.push(decode(value.value())?);
            }
        }
        Ok(rows)
    }

    fn upsert(&self, table: &str, record: &Record) -> StagebaseResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(stage_def(table))?;
            table.insert(record.id.0, encode(record)?.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete(&self, table: &str, id: RecordId) -> StagebaseResult<bool> {
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = match txn.open_table(stage_def(table)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(false),
                Err(err) => return Err(err.into()),
            };
            existed = table.remove(id.0)?.is_some();
        }
        txn.commit()?;
        Ok(existed)
    }

    fn max_version(&self, table: &str, record_id: RecordId) -> StagebaseResult<Option<u64>> {
        let txn = self.db.begin_read()?;
        let table = open_or_empty!(txn, versions_def(table), None);
        let mut range = table.range((record_id.0, 0)..=(record_id.0, u64::MAX))?;
        match range.next_back() {
            Some(entry) => {
                let (key, _) = entry?;
                Ok(Some(key.value().1))
            }
            None => Ok(None),
        }
    }

    fn get_version(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
    ) -> StagebaseResult<Option<Record>> {
        let txn = self.db.begin_read()?;
        let table = open_or_empty!(txn, versions_def(table), None);
        match table.get((record_id.0, version))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn versions_of(&self, table: &str, record_id: RecordId) -> StagebaseResult<Vec<Record>> {
        let txn = self.db.begin_read()?;
        let mut rows = Vec::new();
        let table = open_or_empty!(txn, versions_def(table), rows);
        for entry in table.range((record_id.0, 0)..=(record_id.0, u64::MAX))? {
            let (_, value) = entry?;
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    fn delete_version(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
    ) -> StagebaseResult<bool> {
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = match txn.open_table(versions_def(table)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(false),
                Err(err) => return Err(err.into()),
            };
            existed = table.remove((record_id.0, version))?.is_some();
        }
        txn.commit()?;
        Ok(existed)
    }

    fn stamp_version_published(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
        publisher: Option<MemberId>,
    ) -> StagebaseResult<bool> {
        let txn = self.db.begin_write()?;
        let stamped;
        {
            let mut table = match txn.open_table(versions_def(table)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(false),
                Err(err) => return Err(err.into()),
            };
            let existing = match table.get((record_id.0, version))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            match existing {
                Some(mut record) => {
                    record.set(columns::WAS_PUBLISHED, Value::Bool(true));
                    if let Some(publisher) = publisher {
                        record.set(columns::PUBLISHER_ID, Value::Id(RecordId(publisher.0)));
                    }
                    table.insert((record_id.0, version), encode(&record)?.as_slice())?;
                    stamped = true;
                }
                None => stamped = false,
            }
        }
        txn.commit()?;
        Ok(stamped)
    }

    fn apply(&self, plan: &WritePlan) -> StagebaseResult<()> {
        let txn = self.db.begin_write()?;
        Self::apply_in(&txn, plan)?;
        txn.commit()?;
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn next_row_id(&self, table: &str) -> StagebaseResult<RecordId> {
        let txn = self.db.begin_write()?;
        let next;
        {
            let mut ids = txn.open_table(ROW_IDS)?;
            let current = ids.get(table)?.map(|guard| guard.value()).unwrap_or(0);
            next = current + 1;
            ids.insert(table, next)?;
        }
        txn.commit()?;
        Ok(RecordId(next))
    }

    fn ensure_tables(&self, tables: &[String]) -> StagebaseResult<()> {
        let txn = self.db.begin_write()?;
        for table in tables {
            if is_versions_table(table) {
                txn.open_table(versions_def(table))?;
            } else {
                txn.open_table(stage_def(table))?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}
