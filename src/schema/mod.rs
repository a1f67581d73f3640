//! Class registry and the stage/version table mapper.
//!
//! A [`ClassSpec`] declares one versioned class: its primary table, the
//! primary tables of its subclasses (rows joined by shared id), whether it is
//! staged (has a `_Live` shadow table), and its ownership edges. The
//! [`SchemaRegistry`] holds all specs, validates them eagerly at build time,
//! and answers the table-mapping questions the query and write augmenters
//! ask: which physical table serves a stage, and which joined tables belong
//! to the versioned subtree at all.

use crate::error::{StagebaseError, StagebaseResult};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use typed_builder::TypedBuilder;

/// Suffix of the live shadow table.
const LIVE_SUFFIX: &str = "_Live";
/// Suffix of the immutable history table.
const VERSIONS_SUFFIX: &str = "_Versions";

/// A named snapshot slot for a record's current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Stage {
    /// The base table; always reflects the latest saved state.
    Draft,
    /// The shadow table; reflects the last explicitly published state and
    /// may lag behind draft or be absent entirely.
    Live,
}

impl Stage {
    /// The opposite stage, used by the `stage_unique` anti-join and the
    /// disown-unlinking passes.
    pub fn other(self) -> Stage {
        match self {
            Stage::Draft => Stage::Live,
            Stage::Live => Stage::Draft,
        }
    }
}

/// A statically-declared ownership edge.
///
/// The owner's publish validity depends on the publish state of everything it
/// owns. Edges are declared on the owning class; the registry inverts them
/// into `owned_by` lookups at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnsRelation {
    /// The owner row holds the child id in `field`.
    HasOne {
        relation: String,
        target: String,
        field: String,
    },
    /// Child rows hold the owner id in `foreign_key`.
    HasMany {
        relation: String,
        target: String,
        foreign_key: String,
    },
}

impl OwnsRelation {
    pub fn has_one(
        relation: impl Into<String>,
        target: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        OwnsRelation::HasOne {
            relation: relation.into(),
            target: target.into(),
            field: field.into(),
        }
    }

    pub fn has_many(
        relation: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        OwnsRelation::HasMany {
            relation: relation.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
        }
    }

    pub fn relation(&self) -> &str {
        match self {
            OwnsRelation::HasOne { relation, .. } => relation,
            OwnsRelation::HasMany { relation, .. } => relation,
        }
    }

    /// The concrete owned class this edge points at.
    pub fn target(&self) -> &str {
        match self {
            OwnsRelation::HasOne { target, .. } => target,
            OwnsRelation::HasMany { target, .. } => target,
        }
    }
}

/// Reverse edge: `owner` reaches the owned class through `relation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerEdge {
    pub owner: String,
    pub relation: String,
}

/// Declaration of one versioned class.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ClassSpec {
    /// Class name, e.g. `"Page"`.
    #[builder(setter(into))]
    pub name: String,
    /// Primary (base) table; carries `Version` on stage rows.
    #[builder(setter(into))]
    pub table: String,
    /// Primary tables of subclasses in the same inheritance tree, joined to
    /// the base table by shared id. These never carry `Version` themselves.
    #[builder(default)]
    pub subclass_tables: Vec<String>,
    /// Staged classes get a `_Live` shadow table; version-only classes do not.
    #[builder(default = true)]
    pub staged: bool,
    /// Forward ownership edges.
    #[builder(default)]
    pub owns: Vec<OwnsRelation>,
    /// True for many-many "through" records, which report a `ManyMany`
    /// change type in changesets instead of a version diff.
    #[builder(default = false)]
    pub is_join: bool,
}

impl ClassSpec {
    /// All primary tables of this class tree, base table first.
    pub fn class_tables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.table.as_str()).chain(self.subclass_tables.iter().map(String::as_str))
    }
}

/// The history table for a physical table.
pub fn versions_table(table: &str) -> String {
    format!("{table}{VERSIONS_SUFFIX}")
}

/// Whether a physical table name denotes a history table. Backends route on
/// this: history tables are keyed by `(RecordID, Version)`, everything else
/// by record id.
pub fn is_versions_table(table: &str) -> bool {
    table.ends_with(VERSIONS_SUFFIX)
}

/// Registry of all versioned classes, validated eagerly at build time.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    classes: BTreeMap<String, ClassSpec>,
    /// Inverted `owns` edges: owned class -> edges from owning classes.
    owned_by: BTreeMap<String, Vec<OwnerEdge>>,
}

impl SchemaRegistry {
    /// Build a registry from class declarations.
    ///
    /// Validation is eager: duplicate class or table names are rejected, and
    /// every ownership edge must point at a registered class. Rejecting
    /// unregistered targets here is what makes reverse (`owned_by`) lookups
    /// total later on; a relation without a concrete owned class cannot be
    /// inverted.
    pub fn build(specs: Vec<ClassSpec>) -> StagebaseResult<Self> {
        let mut classes = BTreeMap::new();
        let mut tables_seen = BTreeMap::new();
        for spec in specs {
            for table in spec.class_tables() {
                if table.ends_with(VERSIONS_SUFFIX) || table.ends_with(LIVE_SUFFIX) {
                    return Err(StagebaseError::config(format!(
                        "table '{table}' of class '{}' collides with a reserved physical-table \
                         suffix",
                        spec.name
                    )));
                }
                if let Some(prior) = tables_seen.insert(table.to_string(), spec.name.clone()) {
                    return Err(StagebaseError::config(format!(
                        "table '{table}' declared by both '{prior}' and '{}'",
                        spec.name
                    )));
                }
            }
            if classes.insert(spec.name.clone(), spec.clone()).is_some() {
                return Err(StagebaseError::config(format!(
                    "class '{}' registered twice",
                    spec.name
                )));
            }
        }

        let mut owned_by: BTreeMap<String, Vec<OwnerEdge>> = BTreeMap::new();
        for spec in classes.values() {
            for edge in &spec.owns {
                let target = edge.target();
                if !classes.contains_key(target) {
                    return Err(StagebaseError::config(format!(
                        "class '{}' owns '{}' via relation '{}', but '{}' is not a registered \
                         versioned class",
                        spec.name,
                        target,
                        edge.relation(),
                        target
                    )));
                }
                owned_by.entry(target.to_string()).or_default().push(OwnerEdge {
                    owner: spec.name.clone(),
                    relation: edge.relation().to_string(),
                });
            }
        }

        Ok(SchemaRegistry { classes, owned_by })
    }

    pub fn spec(&self, class: &str) -> StagebaseResult<&ClassSpec> {
        self.classes
            .get(class)
            .ok_or_else(|| StagebaseError::config(format!("unknown versioned class '{class}'")))
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassSpec> {
        self.classes.values()
    }

    /// Reverse ownership edges targeting `class`.
    pub fn owners_of(&self, class: &str) -> &[OwnerEdge] {
        self.owned_by.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `table` belongs to `class`'s versioned subtree: it must be a
    /// primary table of the class or one of its subclasses. This is the guard
    /// that keeps query augmentation from rewriting unrelated joined tables.
    pub fn is_table_versioned(&self, class: &str, table: &str) -> StagebaseResult<bool> {
        let spec = self.spec(class)?;
        Ok(spec.class_tables().any(|t| t == table))
    }

    /// The physical table serving `table` on `stage`.
    ///
    /// Identity for Draft and for version-only (non-staged) classes; the
    /// `_Live` shadow for Live on a staged class. Tables outside the class
    /// tree are returned unchanged.
    pub fn stage_table(&self, class: &str, table: &str, stage: Stage) -> StagebaseResult<String> {
        let spec = self.spec(class)?;
        if stage == Stage::Live && spec.staged && self.is_table_versioned(class, table)? {
            Ok(format!("{table}{LIVE_SUFFIX}"))
        } else {
            Ok(table.to_string())
        }
    }

    /// Every physical table the backend must provide for `class`: each class
    /// table, its `_Versions` history table, and (for staged classes) its
    /// `_Live` shadow.
    pub fn physical_tables(&self, class: &str) -> StagebaseResult<Vec<String>> {
        let spec = self.spec(class)?;
        let mut tables = Vec::new();
        for table in spec.class_tables() {
            tables.push(table.to_string());
            tables.push(versions_table(table));
            if spec.staged {
                tables.push(format!("{table}{LIVE_SUFFIX}"));
            }
        }
        Ok(tables)
    }

    /// Physical tables across all registered classes, for backend tree
    /// pre-creation.
    pub fn all_physical_tables(&self) -> Vec<String> {
        let mut tables = Vec::new();
        for spec in self.classes.values() {
            // spec() cannot fail for a registered class
            if let Ok(mut class_tables) = self.physical_tables(&spec.name) {
                tables.append(&mut class_tables);
            }
        }
        tables
    }
}
