//! The select model consumed by the query augmenter.
//!
//! This is deliberately not a SQL AST: it models exactly the structure the
//! versioning core rewrites — a from-table, id-joined subclass tables, row
//! predicates, an aggregate version filter, and ordering. An outer query
//! builder owns rendering; this crate only mutates the structure and, for its
//! own orchestration needs, interprets it against a
//! [`RecordStore`](crate::store::RecordStore).

pub mod augment;
pub mod exec;

pub use augment::{augment_from_params, augment_select};

use crate::record::{RecordId, Value};

/// The table a query selects from.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub table: String,
}

/// How a joined table relates to the from-table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOn {
    /// Stage join: shared primary key.
    Id,
    /// History join: shared `(RecordID, Version)` pair.
    RecordVersion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub on: JoinOn,
}

/// Row-level predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Match one record identity.
    IdEquals(RecordId),
    /// Match a field value exactly.
    FieldEquals(String, Value),
    /// Anti-join: exclude rows whose identity exists in `table`. Injected by
    /// the `StageUnique` rewrite against the other stage's base table.
    NotInStage { table: String },
}

/// Aggregate filter over history rows, applied after row predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionFilter {
    /// Latest version per record.
    Latest,
    /// Latest version per record whose `LastEdited` is at or before the date.
    LatestAt(chrono::DateTime<chrono::Utc>),
    /// One exact version number.
    Exact(u64),
    /// Every version row.
    All,
}

/// Which column carries record identity in the result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdColumn {
    /// Stage queries: the primary key itself.
    Id,
    /// History queries: `RecordID`, aliased back to `ID` in results.
    RecordIdAliased,
    /// History counting queries: raw `RecordID`, left unaliased so that
    /// distinct-count semantics see one row per version.
    RecordIdRaw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// A select structure over one versioned class tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filter: Vec<Predicate>,
    pub version_filter: Option<VersionFilter>,
    pub order_by: Vec<OrderBy>,
    pub id_column: IdColumn,
    /// True when the consumer is counting distinct identities rather than
    /// materialising rows.
    pub count_distinct: bool,
}

impl SelectQuery {
    /// A bare query over one table, no joins or filters.
    pub fn new(table: impl Into<String>) -> Self {
        SelectQuery {
            from: TableRef {
                table: table.into(),
            },
            joins: Vec::new(),
            filter: Vec::new(),
            version_filter: None,
            order_by: Vec::new(),
            id_column: IdColumn::Id,
            count_distinct: false,
        }
    }

    /// The standard shape for a class tree: base table plus id-joined
    /// subclass tables, the way the outer ORM builds its selects.
    pub fn for_class(
        registry: &crate::schema::SchemaRegistry,
        class: &str,
    ) -> crate::error::StagebaseResult<Self> {
        let spec = registry.spec(class)?;
        let mut query = SelectQuery::new(spec.table.clone());
        for table in &spec.subclass_tables {
            query.joins.push(Join {
                table: table.clone(),
                on: JoinOn::Id,
            });
        }
        Ok(query)
    }

    pub fn filtered(mut self, predicate: Predicate) -> Self {
        self.filter.push(predicate);
        self
    }

    pub fn by_id(self, id: RecordId) -> Self {
        self.filtered(Predicate::IdEquals(id))
    }

    pub fn counting_distinct(mut self) -> Self {
        self.count_distinct = true;
        self
    }

    /// Every table named by the query, from-table first.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.from.table.as_str()).chain(self.joins.iter().map(|j| j.table.as_str()))
    }
}
