//! Primitive model types: record identifiers, field values and row snapshots.
//!
//! Everything the store persists is a [`Record`]: a stable [`RecordId`] plus a
//! map of named [`Value`]s. Versioning metadata (`Version`, `WasPublished`,
//! `AuthorID`, ...) travels inside the field map under the well-known column
//! names in [`columns`], so that stage tables and history tables share one row
//! representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known column names shared by stage and history tables.
pub mod columns {
    /// Primary key column on stage tables.
    pub const ID: &str = "ID";
    /// The record the history row belongs to (history tables only).
    pub const RECORD_ID: &str = "RecordID";
    /// Monotonically increasing version number, base table only.
    pub const VERSION: &str = "Version";
    /// True if this specific history row was the result of a publish.
    pub const WAS_PUBLISHED: &str = "WasPublished";
    /// Member who wrote this version.
    pub const AUTHOR_ID: &str = "AuthorID";
    /// Member who published this version.
    pub const PUBLISHER_ID: &str = "PublisherID";
    /// Timestamp of the write, used by archive reads.
    pub const LAST_EDITED: &str = "LastEdited";
}

/// Stable identity of a versioned record, shared across stages and history.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
pub struct RecordId(pub u64);

/// Identity of a member (actor) for authorship and permission checks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
pub struct MemberId(pub u64);

/// Identity of a changeset aggregate.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
pub struct ChangeSetId(pub u64);

/// A single field value.
///
/// The set of variants mirrors what the versioning core itself needs to
/// inspect (ids, version numbers, timestamps, flags); everything else a
/// caller stores rides along opaquely as `Text`/`Int`/`Bool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Id(RecordId),
}

impl Value {
    /// Interpret this value as an unsigned version number, if possible.
    pub fn as_version(&self) -> Option<u64> {
        match self {
            Value::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Interpret this value as a record id (accepts `Id` and non-negative
    /// `Int` forms, since foreign keys round-trip through both).
    pub fn as_record_id(&self) -> Option<RecordId> {
        match self {
            Value::Id(id) => Some(*id),
            Value::Int(v) if *v >= 0 => Some(RecordId(*v as u64)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::Id(id)
    }
}

/// Named field values of one row.
pub type Fields = BTreeMap<String, Value>;

/// One row as read from (or written to) a physical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub fields: Fields,
}

impl Record {
    pub fn new(id: RecordId) -> Self {
        Record {
            id,
            fields: Fields::new(),
        }
    }

    pub fn with_fields(id: RecordId, fields: Fields) -> Self {
        Record { id, fields }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(column.into(), value.into());
    }

    /// The version number carried by this row, if any (base-table and
    /// history rows carry one, subclass-table rows do not).
    pub fn version(&self) -> Option<u64> {
        self.get(columns::VERSION).and_then(Value::as_version)
    }

    /// The record id a history row belongs to, falling back to the row id
    /// for stage rows.
    pub fn record_id(&self) -> RecordId {
        self.get(columns::RECORD_ID)
            .and_then(Value::as_record_id)
            .unwrap_or(self.id)
    }

    pub fn last_edited(&self) -> Option<DateTime<Utc>> {
        self.get(columns::LAST_EDITED).and_then(Value::as_datetime)
    }

    pub fn was_published(&self) -> bool {
        self.get(columns::WAS_PUBLISHED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_accessor_rejects_negative_numbers() {
        let mut record = Record::new(RecordId(1));
        record.set(columns::VERSION, Value::Int(-3));
        assert_eq!(record.version(), None);

        record.set(columns::VERSION, Value::Int(7));
        assert_eq!(record.version(), Some(7));
    }

    #[test]
    fn record_id_falls_back_to_row_id() {
        let record = Record::new(RecordId(42));
        assert_eq!(record.record_id(), RecordId(42));

        let mut history = Record::new(RecordId(9001));
        history.set(columns::RECORD_ID, RecordId(42));
        assert_eq!(history.record_id(), RecordId(42));
    }
}
