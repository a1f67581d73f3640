//! Sled-backed store.
//!
//! One sled tree per physical table. Stage trees are keyed by the record id
//! in big-endian form; history trees by the 16-byte concatenation of
//! `RecordID` and `Version`, which keeps a record's versions contiguous and
//! ordered so `max_version` is a bounded range scan.
//!
//! Sled has no multi-tree transactions in the shape write plans need, so
//! this backend reports `supports_transactions() == false` and applies plan
//! ops one at a time. Callers that care are expected to check the flag; the
//! engine logs a warning before applying a multi-op plan here.

use crate::error::StagebaseResult;
use crate::record::{MemberId, Record, RecordId, Value, columns};
use crate::store::RecordStore;
use crate::write::{WriteOp, WritePlan};
use std::path::Path;

const ROW_IDS_TREE: &str = "__stagebase_row_ids";

fn stage_key(id: RecordId) -> [u8; 8] {
    id.0.to_be_bytes()
}

fn version_key(record_id: RecordId, version: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&record_id.0.to_be_bytes());
    key[8..].copy_from_slice(&version.to_be_bytes());
    key
}

fn version_of_key(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[8..16]);
    u64::from_be_bytes(bytes)
}

fn encode(record: &Record) -> StagebaseResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(record, bincode::config::standard())?)
}

fn decode(bytes: &[u8]) -> StagebaseResult<Record> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(record)
}

/// Non-transactional on-disk backend over sled.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Create or open a sled database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StagebaseResult<Self> {
        let db = sled::open(path)?;
        Ok(SledStore { db })
    }

    fn tree(&self, table: &str) -> StagebaseResult<sled::Tree> {
        Ok(self.db.open_tree(table)?)
    }
}

impl RecordStore for SledStore {
    fn get(&self, table: &str, id: RecordId) -> StagebaseResult<Option<Record>> {
        match self.tree(table)?.get(stage_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn rows(&self, table: &str) -> StagebaseResult<Vec<Record>> {
        let mut rows = Vec::new();
        for entry in self.tree(table)?.iter() {
            let (_, bytes) = entry?;
            rows.push(decode(&bytes)?);
        }
        Ok(rows)
    }

    fn upsert(&self, table: &str, record: &Record) -> StagebaseResult<()> {
        self.tree(table)?
            .insert(stage_key(record.id), encode(record)?)?;
        Ok(())
    }

    fn delete(&self, table: &str, id: RecordId) -> StagebaseResult<bool> {
        Ok(self.tree(table)?.remove(stage_key(id))?.is_some())
    }

    fn max_version(&self, table: &str, record_id: RecordId) -> StagebaseResult<Option<u64>> {
        let tree = self.tree(table)?;
        let range = version_key(record_id, 0)..=version_key(record_id, u64::MAX);
        match tree.range(range).next_back() {
            Some(entry) => {
                let (key, _) = entry?;
                Ok(Some(version_of_key(&key)))
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
        match self.tree(table)?.get(version_key(record_id, version))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn versions_of(&self, table: &str, record_id: RecordId) -> StagebaseResult<Vec<Record>> {
        let tree = self.tree(table)?;
        let range = version_key(record_id, 0)..=version_key(record_id, u64::MAX);
        let mut rows = Vec::new();
        for entry in tree.range(range) {
            let (_, bytes) = entry?;
            rows.push(decode(&bytes)?);
        }
        Ok(rows)
    }

    fn delete_version(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
    ) -> StagebaseResult<bool> {
        Ok(self
            .tree(table)?
            .remove(version_key(record_id, version))?
            .is_some())
    }

    fn stamp_version_published(
        &self,
        table: &str,
        record_id: RecordId,
        version: u64,
        publisher: Option<MemberId>,
    ) -> StagebaseResult<bool> {
        let tree = self.tree(table)?;
        let key = version_key(record_id, version);
        let Some(bytes) = tree.get(key)? else {
            return Ok(false);
        };
        let mut record = decode(&bytes)?;
        record.set(columns::WAS_PUBLISHED, Value::Bool(true));
        if let Some(publisher) = publisher {
            record.set(columns::PUBLISHER_ID, Value::Id(RecordId(publisher.0)));
        }
        tree.insert(key, encode(&record)?)?;
        Ok(true)
    }

    fn apply(&self, plan: &WritePlan) -> StagebaseResult<()> {
        // Sequential, non-atomic application; see the module docs.
        for op in &plan.ops {
            match op {
                WriteOp::Upsert { table, record, .. } => {
                    self.upsert(table, record)?;
                }
                WriteOp::InsertVersion { table, record } => {
                    let version = record.version().unwrap_or(0);
                    self.tree(table)?
                        .insert(version_key(record.record_id(), version), encode(record)?)?;
                }
                WriteOp::Delete { table, id } => {
                    self.delete(table, *id)?;
                }
                WriteOp::DeleteVersion {
                    table,
                    record_id,
                    version,
                } => {
                    self.delete_version(table, *record_id, *version)?;
                }
            }
        }
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        false
    }

    fn next_row_id(&self, table: &str) -> StagebaseResult<RecordId> {
        let ids = self.db.open_tree(ROW_IDS_TREE)?;
        let bytes = ids.update_and_fetch(table.as_bytes(), |old| {
            let current = old
                .map(|bytes| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(bytes);
                    u64::from_be_bytes(buf)
                })
                .unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;
        let bytes = bytes.ok_or_else(|| {
            crate::error::StagebaseError::Other("row id allocator returned nothing".into())
        })?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes);
        Ok(RecordId(u64::from_be_bytes(buf)))
    }

    fn ensure_tables(&self, tables: &[String]) -> StagebaseResult<()> {
        for table in tables {
            self.db.open_tree(table.as_str())?;
        }
        Ok(())
    }
}
