//! The manipulation model consumed by the write augmenter.
//!
//! A normal save arrives as a [`Manipulation`]: one pending [`TableWrite`]
//! per class table, keyed by table name, exactly as the outer persistence
//! pipeline hands it to the before-commit hook. The augmenter turns it into
//! a [`WritePlan`] — an ordered batch of physical operations including the
//! injected history inserts — which a backend applies atomically where it
//! can.

pub mod augment;

pub use augment::{AugmentedWrite, augment_write};

use crate::record::{Fields, Record, RecordId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCommand {
    Insert,
    Update,
}

/// One pending write against one class table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableWrite {
    pub command: WriteCommand,
    pub record_id: RecordId,
    pub fields: Fields,
}

/// The full set of pending table writes for one record save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manipulation {
    pub entries: BTreeMap<String, TableWrite>,
}

impl Manipulation {
    pub fn new() -> Self {
        Manipulation::default()
    }

    pub fn insert(mut self, table: impl Into<String>, record_id: RecordId, fields: Fields) -> Self {
        self.entries.insert(
            table.into(),
            TableWrite {
                command: WriteCommand::Insert,
                record_id,
                fields,
            },
        );
        self
    }

    pub fn update(mut self, table: impl Into<String>, record_id: RecordId, fields: Fields) -> Self {
        self.entries.insert(
            table.into(),
            TableWrite {
                command: WriteCommand::Update,
                record_id,
                fields,
            },
        );
        self
    }
}

/// Per-write control flags.
///
/// These are the explicit replacements for the negative-version sentinel and
/// the record-held "migrating version" flag: their lifetime is exactly one
/// augmented write, so a stale flag can never leak into a later unrelated
/// write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Actor recorded as `AuthorID` on the history row.
    pub actor: Option<crate::record::MemberId>,
    /// Pin the written version to this exact number instead of computing the
    /// next one; no new history row is created. Used by stage-to-stage
    /// copies that must reuse the source version number.
    pub migrate_version: Option<u64>,
    /// Raw pass-through: no history row and no version computation at all.
    pub without_version: bool,
}

impl WriteOptions {
    pub fn by(actor: crate::record::MemberId) -> Self {
        WriteOptions {
            actor: Some(actor),
            ..Default::default()
        }
    }

    pub fn migrating(version: u64) -> Self {
        WriteOptions {
            migrate_version: Some(version),
            ..Default::default()
        }
    }
}

/// One physical operation in an augmented batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Write a stage row (insert-or-update; stage tables are keyed by id).
    Upsert {
        table: String,
        record: Record,
        command: WriteCommand,
    },
    /// Append an immutable history row. `record.fields` carries `RecordID`
    /// and `Version`.
    InsertVersion { table: String, record: Record },
    /// Delete a stage row.
    Delete { table: String, id: RecordId },
    /// Delete a history row (orphan cleanup only; never part of a normal
    /// write).
    DeleteVersion {
        table: String,
        record_id: RecordId,
        version: u64,
    },
}

/// An ordered batch of physical operations.
///
/// Backends with transactions apply the whole plan or nothing; backends
/// without them (sled) apply in order with no compensating rollback, which
/// the engine checks for via
/// [`RecordStore::supports_transactions`](crate::store::RecordStore::supports_transactions).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    pub ops: Vec<WriteOp>,
}

impl WritePlan {
    pub fn new() -> Self {
        WritePlan::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
