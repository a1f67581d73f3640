//! ChangeSets: named groupings of pending changes intended for release.
//!
//! A [`ChangeSet`] tracks explicitly-included objects (the user chose them)
//! and implicitly-included objects (pulled in because an explicit member
//! depends on them through the ownership graph). Implicit membership is
//! never authored directly: [`ChangeSets::sync`] recomputes it from the
//! graph whenever explicit membership changes, deleting rows that are no
//! longer justified and creating rows that newly are. An object is either
//! explicit or implicit within one changeset, never both — explicit wins.
//!
//! Changesets and their items persist through the same [`RecordStore`] as
//! the versioned records, in the [`CHANGESETS_TABLE`] and
//! [`CHANGESET_ITEMS_TABLE`] tables, keyed by synthetic row ids; the
//! `(ObjectID, ObjectClass, ChangeSetID)` triple is the item's natural key,
//! enforced by find-before-insert.
//!
//! Bulk `publish`/`revert` of a whole changeset is declared but deliberately
//! out of this core: both fail with
//! [`StagebaseError::Unsupported`](crate::error::StagebaseError::Unsupported).

use crate::error::{StagebaseError, StagebaseResult};
use crate::record::{ChangeSetId, Fields, MemberId, Record, RecordId, Value};
use crate::schema::Stage;
use crate::store::RecordStore;
use crate::versioned::ownership::{self, ObjectRef};
use crate::versioned::VersionedEngine;
use crate::write::{WriteOp, WritePlan};
use std::collections::BTreeSet;
use std::str::FromStr;
use strum::{Display, EnumString};

/// Physical table holding changeset aggregates.
pub const CHANGESETS_TABLE: &str = "ChangeSets";
/// Physical table holding changeset items.
pub const CHANGESET_ITEMS_TABLE: &str = "ChangeSetItems";

mod fields {
    pub const NAME: &str = "Name";
    pub const STATE: &str = "State";
    pub const OWNER_ID: &str = "OwnerID";
    pub const CHANGESET_ID: &str = "ChangeSetID";
    pub const OBJECT_CLASS: &str = "ObjectClass";
    pub const OBJECT_ID: &str = "ObjectID";
    pub const ADDED: &str = "Added";
    pub const VERSION_BEFORE: &str = "VersionBefore";
    pub const VERSION_AFTER: &str = "VersionAfter";
}

/// Lifecycle state of a changeset. Terminal once not `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ChangeSetState {
    Open,
    Published,
    Reverted,
}

/// How an object became a member of a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum AddedState {
    Explicitly,
    Implicitly,
}

/// The kind of pending change an item represents, derived from the draft
/// and live version numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// On draft, never published.
    Created,
    /// Draft and live versions differ.
    Modified,
    /// Published (or gone entirely) but no longer on draft.
    Deleted,
    /// Draft and live agree.
    None,
    /// Many-many join record; version diffing does not apply.
    ManyMany,
}

/// A named, stateful grouping of pending object changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub id: ChangeSetId,
    pub name: String,
    pub state: ChangeSetState,
    pub owner: Option<MemberId>,
}

/// One object's membership in one changeset.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSetItem {
    pub row_id: RecordId,
    pub changeset: ChangeSetId,
    pub object: ObjectRef,
    pub added: AddedState,
    /// Live version number when the item was created (diff base).
    pub version_before: Option<u64>,
    /// Draft version number, refreshed on sync (diff head).
    pub version_after: Option<u64>,
}

/// Changeset manager over one versioned engine.
pub struct ChangeSets<'a, S: RecordStore> {
    engine: &'a VersionedEngine<'a, S>,
}

impl<'a, S: RecordStore> ChangeSets<'a, S> {
    pub fn new(engine: &'a VersionedEngine<'a, S>) -> Self {
        ChangeSets { engine }
    }

    fn store(&self) -> &'a S {
        self.engine.store()
    }

    /// Create and persist an open changeset.
    pub fn create(
        &self,
        name: impl Into<String>,
        owner: Option<MemberId>,
    ) -> StagebaseResult<ChangeSet> {
        let changeset = ChangeSet {
            id: ChangeSetId(self.store().next_row_id(CHANGESETS_TABLE)?.0),
            name: name.into(),
            state: ChangeSetState::Open,
            owner,
        };
        self.store()
            .upsert(CHANGESETS_TABLE, &changeset_to_record(&changeset))?;
        Ok(changeset)
    }

    pub fn get(&self, id: ChangeSetId) -> StagebaseResult<Option<ChangeSet>> {
        Ok(self
            .store()
            .get(CHANGESETS_TABLE, RecordId(id.0))?
            .map(|record| record_to_changeset(&record))
            .transpose()?)
    }

    /// All items of one changeset, explicit and implicit.
    pub fn items(&self, id: ChangeSetId) -> StagebaseResult<Vec<ChangeSetItem>> {
        let mut items = Vec::new();
        for record in self.store().rows(CHANGESET_ITEMS_TABLE)? {
            let item = record_to_item(&record)?;
            if item.changeset == id {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn find_item(
        &self,
        id: ChangeSetId,
        object: &ObjectRef,
    ) -> StagebaseResult<Option<ChangeSetItem>> {
        Ok(self
            .items(id)?
            .into_iter()
            .find(|item| item.object == *object))
    }

    fn require_open(&self, id: ChangeSetId) -> StagebaseResult<ChangeSet> {
        let changeset = self.get(id)?.ok_or_else(|| {
            StagebaseError::RecordNotFound(format!("changeset {id} does not exist"))
        })?;
        if changeset.state != ChangeSetState::Open {
            return Err(StagebaseError::InvalidState(format!(
                "changeset {id} is {} and can no longer be edited",
                changeset.state
            )));
        }
        Ok(changeset)
    }

    /// Explicitly include an object: find-or-create its item, force it
    /// explicit, then resynchronise implicit membership.
    pub fn add_object(&self, id: ChangeSetId, object: &ObjectRef) -> StagebaseResult<()> {
        self.require_open(id)?;
        self.engine.registry().spec(&object.class)?;
        let item = match self.find_item(id, object)? {
            Some(mut item) => {
                item.added = AddedState::Explicitly;
                item
            }
            None => ChangeSetItem {
                row_id: self.store().next_row_id(CHANGESET_ITEMS_TABLE)?,
                changeset: id,
                object: object.clone(),
                added: AddedState::Explicitly,
                version_before: self.engine.version_number_by_stage(
                    &object.class,
                    object.id,
                    Stage::Live,
                )?,
                version_after: self.engine.version_number_by_stage(
                    &object.class,
                    object.id,
                    Stage::Draft,
                )?,
            },
        };
        self.store()
            .upsert(CHANGESET_ITEMS_TABLE, &item_to_record(&item))?;
        self.sync(id)
    }

    /// Remove an explicitly-included object, then resynchronise.
    ///
    /// Removing an implicitly-included member is explicitly unsupported:
    /// implicit membership is derived state and would reappear on the next
    /// sync anyway.
    pub fn remove_object(&self, id: ChangeSetId, object: &ObjectRef) -> StagebaseResult<bool> {
        self.require_open(id)?;
        let Some(item) = self.find_item(id, object)? else {
            return Ok(false);
        };
        if item.added == AddedState::Implicitly {
            return Err(StagebaseError::Unsupported(
                "cannot remove an implicitly-added changeset member; remove the explicit \
                 member(s) that justify it"
                    .to_string(),
            ));
        }
        self.store().delete(CHANGESET_ITEMS_TABLE, item.row_id)?;
        self.sync(id)?;
        Ok(true)
    }

    /// The kind of change one member represents right now.
    pub fn change_type(&self, object: &ObjectRef) -> StagebaseResult<ChangeType> {
        let spec = self.engine.registry().spec(&object.class)?;
        if spec.is_join {
            return Ok(ChangeType::ManyMany);
        }
        let draft =
            self.engine
                .version_number_by_stage(&object.class, object.id, Stage::Draft)?;
        let live = if spec.staged {
            self.engine
                .version_number_by_stage(&object.class, object.id, Stage::Live)?
        } else {
            None
        };
        Ok(match (draft, live) {
            (d, l) if d == l => ChangeType::None,
            (Some(_), None) => ChangeType::Created,
            (None, Some(_)) => ChangeType::Deleted,
            _ => ChangeType::Modified,
        })
    }

    /// Compute the implicit member set from the ownership graph.
    ///
    /// Deletions pull in their *owners* (an unchanged owner whose dependency
    /// disappears is no longer consistently publishable without it); every
    /// other change pulls in its transitively *owned* objects, but only
    /// those that currently differ between draft and live — an owned object
    /// with no stage difference needs no release.
    pub fn calculate_implicit(&self, id: ChangeSetId) -> StagebaseResult<BTreeSet<ObjectRef>> {
        let registry = self.engine.registry();
        let store = self.store();
        let mut explicit = BTreeSet::new();
        let mut implicit = BTreeSet::new();

        let items = self.items(id)?;
        for item in items.iter().filter(|i| i.added == AddedState::Explicitly) {
            explicit.insert(item.object.clone());
        }
        for item in items.iter().filter(|i| i.added == AddedState::Explicitly) {
            match self.change_type(&item.object)? {
                ChangeType::Deleted => {
                    // The draft row is gone; owners are still reachable
                    // through the live side.
                    for owner in ownership::find_owners(
                        registry,
                        store,
                        &item.object.class,
                        item.object.id,
                        Stage::Live,
                        true,
                    )? {
                        implicit.insert(owner);
                    }
                }
                _ => {
                    for owned in ownership::find_owned(
                        registry,
                        store,
                        &item.object.class,
                        item.object.id,
                        Stage::Draft,
                        true,
                    )? {
                        if self.engine.stages_differ(&owned.class, owned.id)? {
                            implicit.insert(owned);
                        }
                    }
                }
            }
        }

        Ok(implicit.difference(&explicit).cloned().collect())
    }

    /// Reconcile persisted implicit rows against the freshly computed set:
    /// stale rows are deleted, newly-justified rows created, still-justified
    /// rows left untouched, and explicit rows get their `VersionAfter`
    /// refreshed. Applied as one write plan, so backends with transactions
    /// make the reconciliation atomic. Idempotent: a second call with no
    /// intervening changes mutates nothing.
    pub fn sync(&self, id: ChangeSetId) -> StagebaseResult<()> {
        let computed = self.calculate_implicit(id)?;
        let items = self.items(id)?;

        let mut plan = WritePlan::new();
        let mut persisted_implicit = BTreeSet::new();
        for item in &items {
            match item.added {
                AddedState::Implicitly => {
                    if computed.contains(&item.object) {
                        persisted_implicit.insert(item.object.clone());
                    } else {
                        plan.push(WriteOp::Delete {
                            table: CHANGESET_ITEMS_TABLE.to_string(),
                            id: item.row_id,
                        });
                    }
                }
                AddedState::Explicitly => {
                    let head = self.engine.version_number_by_stage(
                        &item.object.class,
                        item.object.id,
                        Stage::Draft,
                    )?;
                    if head != item.version_after {
                        let mut refreshed = item.clone();
                        refreshed.version_after = head;
                        plan.push(WriteOp::Upsert {
                            table: CHANGESET_ITEMS_TABLE.to_string(),
                            record: item_to_record(&refreshed),
                            command: crate::write::WriteCommand::Update,
                        });
                    }
                }
            }
        }

        for object in computed.difference(&persisted_implicit) {
            let item = ChangeSetItem {
                row_id: self.store().next_row_id(CHANGESET_ITEMS_TABLE)?,
                changeset: id,
                object: object.clone(),
                added: AddedState::Implicitly,
                version_before: self.engine.version_number_by_stage(
                    &object.class,
                    object.id,
                    Stage::Live,
                )?,
                version_after: self.engine.version_number_by_stage(
                    &object.class,
                    object.id,
                    Stage::Draft,
                )?,
            };
            plan.push(WriteOp::Upsert {
                table: CHANGESET_ITEMS_TABLE.to_string(),
                record: item_to_record(&item),
                command: crate::write::WriteCommand::Insert,
            });
        }

        if !plan.is_empty() {
            if !self.store().supports_transactions() {
                log::warn!(
                    "backend lacks transactions; changeset {id} sync applies non-atomically"
                );
            }
            self.store().apply(&plan)?;
        }
        Ok(())
    }

    /// Read-only form of [`sync`](ChangeSets::sync)'s reconciliation:
    /// `false` if the persisted implicit set differs at all from the freshly
    /// computed one. A staleness signal, not an error.
    pub fn validate(&self, id: ChangeSetId) -> StagebaseResult<bool> {
        let computed = self.calculate_implicit(id)?;
        let persisted: BTreeSet<ObjectRef> = self
            .items(id)?
            .into_iter()
            .filter(|item| item.added == AddedState::Implicitly)
            .map(|item| item.object)
            .collect();
        Ok(computed == persisted)
    }

    /// Bulk publish of every member in dependency order. Declared for the
    /// aggregate's lifecycle but out of this core's scope; a future bulk
    /// orchestrator sequences it over the engine's copy primitive.
    pub fn publish(&self, id: ChangeSetId) -> StagebaseResult<()> {
        self.require_open(id)?;
        Err(StagebaseError::Unsupported(
            "changeset bulk publish is not implemented in this core".to_string(),
        ))
    }

    /// Bulk revert of every member. Same status as
    /// [`publish`](ChangeSets::publish).
    pub fn revert(&self, id: ChangeSetId) -> StagebaseResult<()> {
        self.require_open(id)?;
        Err(StagebaseError::Unsupported(
            "changeset bulk revert is not implemented in this core".to_string(),
        ))
    }
}

fn changeset_to_record(changeset: &ChangeSet) -> Record {
    let mut fields = Fields::new();
    fields.insert(fields::NAME.to_string(), Value::Text(changeset.name.clone()));
    fields.insert(
        fields::STATE.to_string(),
        Value::Text(changeset.state.to_string()),
    );
    fields.insert(
        fields::OWNER_ID.to_string(),
        match changeset.owner {
            Some(owner) => Value::Id(RecordId(owner.0)),
            None => Value::Null,
        },
    );
    Record::with_fields(RecordId(changeset.id.0), fields)
}

fn record_to_changeset(record: &Record) -> StagebaseResult<ChangeSet> {
    let state_raw = match record.get(fields::STATE) {
        Some(Value::Text(state)) => state.as_str(),
        _ => {
            return Err(StagebaseError::Other(format!(
                "changeset row {} has no state",
                record.id
            )));
        }
    };
    let state = ChangeSetState::from_str(state_raw).map_err(|_| {
        StagebaseError::Other(format!("changeset row {} has bad state '{state_raw}'", record.id))
    })?;
    let name = match record.get(fields::NAME) {
        Some(Value::Text(name)) => name.clone(),
        _ => String::new(),
    };
    let owner = record
        .get(fields::OWNER_ID)
        .and_then(Value::as_record_id)
        .map(|id| MemberId(id.0));
    Ok(ChangeSet {
        id: ChangeSetId(record.id.0),
        name,
        state,
        owner,
    })
}

fn item_to_record(item: &ChangeSetItem) -> Record {
    let mut fields = Fields::new();
    fields.insert(
        fields::CHANGESET_ID.to_string(),
        Value::Id(RecordId(item.changeset.0)),
    );
    fields.insert(
        fields::OBJECT_CLASS.to_string(),
        Value::Text(item.object.class.clone()),
    );
    fields.insert(fields::OBJECT_ID.to_string(), Value::Id(item.object.id));
    fields.insert(fields::ADDED.to_string(), Value::Text(item.added.to_string()));
    fields.insert(
        fields::VERSION_BEFORE.to_string(),
        item.version_before.map(Value::from).unwrap_or(Value::Null),
    );
    fields.insert(
        fields::VERSION_AFTER.to_string(),
        item.version_after.map(Value::from).unwrap_or(Value::Null),
    );
    Record::with_fields(item.row_id, fields)
}

fn record_to_item(record: &Record) -> StagebaseResult<ChangeSetItem> {
    let changeset = record
        .get(fields::CHANGESET_ID)
        .and_then(Value::as_record_id)
        .map(|id| ChangeSetId(id.0))
        .ok_or_else(|| {
            StagebaseError::Other(format!("changeset item row {} has no changeset id", record.id))
        })?;
    let class = match record.get(fields::OBJECT_CLASS) {
        Some(Value::Text(class)) => class.clone(),
        _ => {
            return Err(StagebaseError::Other(format!(
                "changeset item row {} has no object class",
                record.id
            )));
        }
    };
    let object_id = record
        .get(fields::OBJECT_ID)
        .and_then(Value::as_record_id)
        .ok_or_else(|| {
            StagebaseError::Other(format!("changeset item row {} has no object id", record.id))
        })?;
    let added_raw = match record.get(fields::ADDED) {
        Some(Value::Text(added)) => added.as_str(),
        _ => "Explicitly",
    };
    let added = AddedState::from_str(added_raw).map_err(|_| {
        StagebaseError::Other(format!(
            "changeset item row {} has bad added state '{added_raw}'",
            record.id
        ))
    })?;
    Ok(ChangeSetItem {
        row_id: record.id,
        changeset,
        object: ObjectRef::new(class, object_id),
        added,
        version_before: record.get(fields::VERSION_BEFORE).and_then(Value::as_version),
        version_after: record.get(fields::VERSION_AFTER).and_then(Value::as_version),
    })
}
