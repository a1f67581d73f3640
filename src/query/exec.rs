//! Interpreter for augmented select structures.
//!
//! The outer system renders [`SelectQuery`] to SQL; this crate interprets it
//! directly against a [`RecordStore`] for its own orchestration and for the
//! test suite, so the augmenter's semantics are checkable without a SQL
//! engine. Row predicates apply first, then the aggregate version filter,
//! then ordering.

use super::{IdColumn, Direction, Predicate, SelectQuery, VersionFilter, JoinOn};
use crate::error::StagebaseResult;
use crate::record::{Record, RecordId, Value, columns};
use crate::store::RecordStore;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Run `query` and materialise the matching rows.
pub fn execute<S: RecordStore + ?Sized>(
    store: &S,
    query: &SelectQuery,
) -> StagebaseResult<Vec<Record>> {
    let mut rows = Vec::new();
    'rows: for mut row in store.rows(&query.from.table)? {
        // Merge joined class-table rows; missing join rows are tolerated
        // (subclass tables only hold rows for their own subclass).
        for join in &query.joins {
            let joined = match join.on {
                JoinOn::Id => store.get(&join.table, row.id)?,
                JoinOn::RecordVersion => match row.version() {
                    Some(version) => store.get_version(&join.table, row.record_id(), version)?,
                    None => None,
                },
            };
            if let Some(joined) = joined {
                for (column, value) in joined.fields {
                    row.fields.entry(column).or_insert(value);
                }
            }
        }

        for predicate in &query.filter {
            if !matches(store, &row, predicate)? {
                continue 'rows;
            }
        }
        rows.push(row);
    }

    if let Some(filter) = &query.version_filter {
        rows = apply_version_filter(rows, filter);
    }

    for order in query.order_by.iter().rev() {
        rows.sort_by(|a, b| {
            let ordering = cmp_values(a.get(&order.column), b.get(&order.column));
            match order.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        });
    }

    if query.id_column == IdColumn::RecordIdAliased {
        for row in &mut rows {
            let record_id = row.record_id();
            row.id = record_id;
            row.set(columns::ID, record_id);
        }
    }

    Ok(rows)
}

/// Run `query` and return the first matching row, if any.
pub fn one<S: RecordStore + ?Sized>(
    store: &S,
    query: &SelectQuery,
) -> StagebaseResult<Option<Record>> {
    Ok(execute(store, query)?.into_iter().next())
}

/// Count matching rows, honouring distinct-identity semantics.
///
/// For history queries that kept the raw `RecordID` column
/// ([`IdColumn::RecordIdRaw`]) each version row counts once; otherwise
/// distinct counting collapses to one per record identity.
pub fn count<S: RecordStore + ?Sized>(store: &S, query: &SelectQuery) -> StagebaseResult<u64> {
    let rows = execute(store, query)?;
    if query.count_distinct && query.id_column != IdColumn::RecordIdRaw {
        let distinct: std::collections::BTreeSet<RecordId> =
            rows.iter().map(Record::record_id).collect();
        Ok(distinct.len() as u64)
    } else {
        Ok(rows.len() as u64)
    }
}

fn matches<S: RecordStore + ?Sized>(
    store: &S,
    row: &Record,
    predicate: &Predicate,
) -> StagebaseResult<bool> {
    match predicate {
        Predicate::IdEquals(id) => Ok(row.record_id() == *id),
        Predicate::FieldEquals(column, value) => Ok(row.get(column) == Some(value)),
        Predicate::NotInStage { table } => Ok(store.get(table, row.record_id())?.is_none()),
    }
}

fn apply_version_filter(rows: Vec<Record>, filter: &VersionFilter) -> Vec<Record> {
    match filter {
        VersionFilter::All => rows,
        VersionFilter::Exact(version) => rows
            .into_iter()
            .filter(|row| row.version() == Some(*version))
            .collect(),
        VersionFilter::Latest => latest_per_record(rows),
        VersionFilter::LatestAt(date) => latest_per_record(
            rows.into_iter()
                .filter(|row| row.last_edited().is_some_and(|edited| edited <= *date))
                .collect(),
        ),
    }
}

/// The correlated max-version subquery, interpreted: keep the highest
/// version row per record identity.
fn latest_per_record(rows: Vec<Record>) -> Vec<Record> {
    let mut latest: BTreeMap<RecordId, Record> = BTreeMap::new();
    for row in rows {
        let key = row.record_id();
        match latest.get(&key) {
            Some(existing) if existing.version() >= row.version() => {}
            _ => {
                latest.insert(key, row);
            }
        }
    }
    latest.into_values().collect()
}

fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp_value(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_value(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
        (Value::Id(a), Value::Id(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::OrderBy;
    use crate::record::Fields;
    use crate::store::MemoryStore;
    use crate::write::{WriteOp, WritePlan};

    fn seed_versions(store: &MemoryStore, record_id: u64, versions: &[u64]) {
        let mut plan = WritePlan::new();
        for &version in versions {
            let mut row = Record::with_fields(RecordId(record_id * 1000 + version), Fields::new());
            row.set(columns::RECORD_ID, RecordId(record_id));
            row.set(columns::VERSION, version);
            plan.push(WriteOp::InsertVersion {
                table: "Page_Versions".to_string(),
                record: row,
            });
        }
        store.apply(&plan).unwrap();
    }

    #[test]
    fn latest_filter_keeps_one_row_per_record() {
        let store = MemoryStore::new();
        seed_versions(&store, 1, &[1, 2, 3]);
        seed_versions(&store, 2, &[1, 4]);

        let mut query = SelectQuery::new("Page_Versions");
        query.version_filter = Some(VersionFilter::Latest);
        query.id_column = IdColumn::RecordIdAliased;
        let rows = execute(&store, &query).unwrap();
        assert_eq!(rows.len(), 2);
        let by_id: BTreeMap<RecordId, u64> = rows
            .iter()
            .map(|r| (r.record_id(), r.version().unwrap()))
            .collect();
        assert_eq!(by_id[&RecordId(1)], 3);
        assert_eq!(by_id[&RecordId(2)], 4);
    }

    #[test]
    fn exact_version_filter() {
        let store = MemoryStore::new();
        seed_versions(&store, 1, &[1, 2, 3]);
        let mut query = SelectQuery::new("Page_Versions").by_id(RecordId(1));
        query.version_filter = Some(VersionFilter::Exact(2));
        let rows = execute(&store, &query).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version(), Some(2));
    }

    #[test]
    fn order_by_version_descending() {
        let store = MemoryStore::new();
        seed_versions(&store, 1, &[2, 1, 3]);
        let mut query = SelectQuery::new("Page_Versions");
        query.version_filter = Some(VersionFilter::All);
        query.order_by.push(OrderBy {
            column: columns::VERSION.to_string(),
            direction: Direction::Desc,
        });
        let versions: Vec<u64> = execute(&store, &query)
            .unwrap()
            .iter()
            .map(|r| r.version().unwrap())
            .collect();
        assert_eq!(versions, vec![3, 2, 1]);
    }

    #[test]
    fn not_in_stage_excludes_rows_present_in_other_table() {
        let store = MemoryStore::new();
        store.upsert("Page", &Record::new(RecordId(1))).unwrap();
        store.upsert("Page", &Record::new(RecordId(2))).unwrap();
        store.upsert("Page_Live", &Record::new(RecordId(2))).unwrap();

        let query = SelectQuery::new("Page").filtered(Predicate::NotInStage {
            table: "Page_Live".to_string(),
        });
        let rows = execute(&store, &query).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, RecordId(1));
    }

    #[test]
    fn distinct_count_collapses_versions_unless_raw() {
        let store = MemoryStore::new();
        seed_versions(&store, 1, &[1, 2, 3]);

        let mut aliased = SelectQuery::new("Page_Versions").counting_distinct();
        aliased.version_filter = Some(VersionFilter::All);
        aliased.id_column = IdColumn::RecordIdAliased;
        assert_eq!(count(&store, &aliased).unwrap(), 1);

        let mut raw = aliased.clone();
        raw.id_column = IdColumn::RecordIdRaw;
        assert_eq!(count(&store, &raw).unwrap(), 3);
    }
}
