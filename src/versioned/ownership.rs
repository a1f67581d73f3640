//! The ownership graph walker.
//!
//! Ownership edges are declared statically per class in the
//! [`SchemaRegistry`] and traversed here at the instance level. The graph is
//! not guaranteed acyclic at the instance level, so every traversal threads
//! an explicit visited set of `(class, id)` keys: an object already seen is
//! never re-added and never descended into again.
//!
//! Only objects that exist on the lookup stage and belong to a registered
//! versioned class are eligible; anything else is silently skipped rather
//! than treated as an error.

use crate::error::StagebaseResult;
use crate::record::{Record, RecordId};
use crate::schema::{OwnsRelation, SchemaRegistry, Stage};
use crate::store::RecordStore;
use std::collections::HashSet;

/// Stable reference to one versioned object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub class: String,
    pub id: RecordId,
}

impl ObjectRef {
    pub fn new(class: impl Into<String>, id: RecordId) -> Self {
        ObjectRef {
            class: class.into(),
            id,
        }
    }
}

/// All objects `class`/`id` owns on `stage`, one level or transitively.
pub fn find_owned<S: RecordStore + ?Sized>(
    registry: &SchemaRegistry,
    store: &S,
    class: &str,
    id: RecordId,
    stage: Stage,
    recursive: bool,
) -> StagebaseResult<Vec<ObjectRef>> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    visited.insert((class.to_string(), id));
    collect_owned(registry, store, class, id, stage, recursive, &mut visited, &mut found)?;
    Ok(found)
}

/// All objects owning `class`/`id` on `stage`, one level or transitively.
pub fn find_owners<S: RecordStore + ?Sized>(
    registry: &SchemaRegistry,
    store: &S,
    class: &str,
    id: RecordId,
    stage: Stage,
    recursive: bool,
) -> StagebaseResult<Vec<ObjectRef>> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    visited.insert((class.to_string(), id));
    collect_owners(registry, store, class, id, stage, recursive, &mut visited, &mut found)?;
    Ok(found)
}

/// One level of owned objects, resolved from an explicit row snapshot.
///
/// `HasOne` ids come out of the snapshot's own fields, so this also works
/// for history rows (rollback resolves the owned set of a historical
/// version this way); `HasMany` children are looked up on `stage`.
pub fn owned_of_record<S: RecordStore + ?Sized>(
    registry: &SchemaRegistry,
    store: &S,
    class: &str,
    record: &Record,
    stage: Stage,
) -> StagebaseResult<Vec<ObjectRef>> {
    let spec = registry.spec(class)?;
    let mut found = Vec::new();
    for edge in &spec.owns {
        match edge {
            OwnsRelation::HasOne { target, field, .. } => {
                let Some(target_id) = record.get(field).and_then(|v| v.as_record_id()) else {
                    continue;
                };
                if exists_on_stage(registry, store, target, target_id, stage)? {
                    found.push(ObjectRef::new(target.clone(), target_id));
                }
            }
            OwnsRelation::HasMany {
                target,
                foreign_key,
                ..
            } => {
                let table = stage_table_of(registry, target, stage)?;
                for row in store.rows(&table)? {
                    let owner = row.get(foreign_key).and_then(|v| v.as_record_id());
                    if owner == Some(record.id) {
                        found.push(ObjectRef::new(target.clone(), row.id));
                    }
                }
            }
        }
    }
    Ok(found)
}

#[allow(clippy::too_many_arguments)]
fn collect_owned<S: RecordStore + ?Sized>(
    registry: &SchemaRegistry,
    store: &S,
    class: &str,
    id: RecordId,
    stage: Stage,
    recursive: bool,
    visited: &mut HashSet<(String, RecordId)>,
    found: &mut Vec<ObjectRef>,
) -> StagebaseResult<()> {
    let Some(record) = load_on_stage(registry, store, class, id, stage)? else {
        // Unsaved or stage-absent root: nothing to traverse.
        return Ok(());
    };
    for owned in owned_of_record(registry, store, class, &record, stage)? {
        if !visited.insert((owned.class.clone(), owned.id)) {
            continue;
        }
        found.push(owned.clone());
        if recursive {
            collect_owned(
                registry,
                store,
                &owned.class,
                owned.id,
                stage,
                recursive,
                visited,
                found,
            )?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn collect_owners<S: RecordStore + ?Sized>(
    registry: &SchemaRegistry,
    store: &S,
    class: &str,
    id: RecordId,
    stage: Stage,
    recursive: bool,
    visited: &mut HashSet<(String, RecordId)>,
    found: &mut Vec<ObjectRef>,
) -> StagebaseResult<()> {
    let Some(record) = load_on_stage(registry, store, class, id, stage)? else {
        return Ok(());
    };
    let mut owners = Vec::new();
    for edge in registry.owners_of(class) {
        let owner_spec = registry.spec(&edge.owner)?;
        let Some(relation) = owner_spec
            .owns
            .iter()
            .find(|r| r.relation() == edge.relation)
        else {
            continue;
        };
        match relation {
            OwnsRelation::HasOne { field, .. } => {
                // Owners are rows of the owning class pointing at us.
                let table = stage_table_of(registry, &edge.owner, stage)?;
                for row in store.rows(&table)? {
                    if row.get(field).and_then(|v| v.as_record_id()) == Some(id) {
                        owners.push(ObjectRef::new(edge.owner.clone(), row.id));
                    }
                }
            }
            OwnsRelation::HasMany { foreign_key, .. } => {
                // Our own row holds the owner id.
                if let Some(owner_id) = record.get(foreign_key).and_then(|v| v.as_record_id()) {
                    if exists_on_stage(registry, store, &edge.owner, owner_id, stage)? {
                        owners.push(ObjectRef::new(edge.owner.clone(), owner_id));
                    }
                }
            }
        }
    }
    for owner in owners {
        if !visited.insert((owner.class.clone(), owner.id)) {
            continue;
        }
        found.push(owner.clone());
        if recursive {
            collect_owners(
                registry,
                store,
                &owner.class,
                owner.id,
                stage,
                recursive,
                visited,
                found,
            )?;
        }
    }
    Ok(())
}

fn stage_table_of(
    registry: &SchemaRegistry,
    class: &str,
    stage: Stage,
) -> StagebaseResult<String> {
    let spec = registry.spec(class)?;
    registry.stage_table(class, &spec.table, stage)
}

fn exists_on_stage<S: RecordStore + ?Sized>(
    registry: &SchemaRegistry,
    store: &S,
    class: &str,
    id: RecordId,
    stage: Stage,
) -> StagebaseResult<bool> {
    let table = stage_table_of(registry, class, stage)?;
    Ok(store.get(&table, id)?.is_some())
}

fn load_on_stage<S: RecordStore + ?Sized>(
    registry: &SchemaRegistry,
    store: &S,
    class: &str,
    id: RecordId,
    stage: Stage,
) -> StagebaseResult<Option<Record>> {
    let table = stage_table_of(registry, class, stage)?;
    store.get(&table, id)
}
