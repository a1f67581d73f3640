//! The write augmenter: turns a pending manipulation into a physical plan.
//!
//! Invoked by the outer persistence pipeline's before-commit hook. For a
//! normal save it computes the next version number, injects the history-table
//! inserts alongside the stage writes, redirects the stage writes to the
//! `_Live` tables when the target stage is Live, and strips the `Version`
//! column from subclass-table writes (only the base table carries it).

use super::{Manipulation, WriteOp, WriteOptions, WritePlan};
use crate::error::{StagebaseError, StagebaseResult};
use crate::record::{Record, RecordId, Value, columns};
use crate::schema::{SchemaRegistry, Stage, versions_table};
use crate::store::RecordStore;
use chrono::Utc;

/// Result of augmenting one manipulation.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedWrite {
    pub plan: WritePlan,
    /// The version number the base-table write carries, if the write is
    /// versioned at all (`None` for raw pass-through writes).
    pub version: Option<u64>,
}

/// Augment `manipulation` for a write against `stage`.
///
/// The next version number is `MAX(Version) + 1` over the base history
/// table, computed read-then-write with no lock; concurrent writers to the
/// same record can race to the same number. That window is inherited from
/// the design this core implements and is deliberately left open rather
/// than silently changing transaction semantics.
pub fn augment_write<S: RecordStore + ?Sized>(
    registry: &SchemaRegistry,
    store: &S,
    class: &str,
    manipulation: &Manipulation,
    stage: Stage,
    options: &WriteOptions,
) -> StagebaseResult<AugmentedWrite> {
    let spec = registry.spec(class)?;
    let now = Utc::now();

    // Discard entries for tables outside the versioned class tree; the
    // outer pipeline writes those through its normal path.
    let mut entries: Vec<(&str, &super::TableWrite)> = Vec::new();
    for (table, write) in &manipulation.entries {
        if registry.is_table_versioned(class, table)? {
            entries.push((table.as_str(), write));
        } else {
            log::debug!("write augmenter: discarding entry for non-versioned table '{table}'");
        }
    }
    if entries.is_empty() {
        return Ok(AugmentedWrite {
            plan: WritePlan::new(),
            version: None,
        });
    }

    let record_id = entries[0].1.record_id;
    if entries.iter().any(|(_, write)| write.record_id != record_id) {
        return Err(StagebaseError::config(format!(
            "manipulation for class '{class}' mixes record ids"
        )));
    }

    let base_entry = entries.iter().any(|(table, _)| *table == spec.table);

    // Version discipline for this write: pinned, skipped, or freshly
    // computed. A fresh version is the only case that appends history.
    let (version, insert_history) = if options.without_version {
        (None, false)
    } else if let Some(pinned) = options.migrate_version {
        (Some(pinned), false)
    } else if base_entry {
        let next = store
            .max_version(&versions_table(&spec.table), record_id)?
            .map_or(1, |max| max + 1);
        (Some(next), true)
    } else {
        log::debug!(
            "write augmenter: no base-table entry for '{class}' record {record_id}, \
             skipping history insert"
        );
        (None, false)
    };

    let mut plan = WritePlan::new();
    for (table, write) in &entries {
        let is_base = *table == spec.table;

        // Full-row snapshot: unchanged fields from the current stage row,
        // overlaid with the changed fields from the manipulation.
        let stage_table = registry.stage_table(class, table, stage)?;
        let mut fields = store
            .get(&stage_table, record_id)?
            .map(|existing| existing.fields)
            .unwrap_or_default();
        for (column, value) in &write.fields {
            fields.insert(column.clone(), value.clone());
        }

        if is_base {
            fields
                .entry(columns::LAST_EDITED.to_string())
                .or_insert(Value::DateTime(now));
            if let Some(version) = version {
                fields.insert(columns::VERSION.to_string(), Value::from(version));
            }
        } else {
            // Only the base table carries Version on stage rows.
            fields.remove(columns::VERSION);
        }

        if insert_history {
            let version = version.expect("history insert always has a computed version");
            let mut history = fields.clone();
            history.remove(columns::ID);
            history.insert(columns::RECORD_ID.to_string(), Value::Id(record_id));
            history.insert(columns::VERSION.to_string(), Value::from(version));
            if is_base {
                history.insert(columns::WAS_PUBLISHED.to_string(), Value::Bool(false));
                match options.actor {
                    Some(actor) => {
                        history
                            .insert(columns::AUTHOR_ID.to_string(), Value::Id(RecordId(actor.0)));
                    }
                    None => {
                        history.insert(columns::AUTHOR_ID.to_string(), Value::Null);
                    }
                }
                history
                    .entry(columns::LAST_EDITED.to_string())
                    .or_insert(Value::DateTime(now));
            }
            plan.push(WriteOp::InsertVersion {
                table: versions_table(table),
                record: Record::with_fields(record_id, history),
            });
        }

        plan.push(WriteOp::Upsert {
            table: stage_table,
            record: Record::with_fields(record_id, fields),
            command: write.command,
        });
    }

    Ok(AugmentedWrite { plan, version })
}
