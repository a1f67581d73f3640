//! The publish/revert/archive orchestrator.
//!
//! [`VersionedEngine`] composes the query and write augmenters into the
//! cross-table record lifecycle: publish, unpublish, revert-to-live,
//! rollback and archive, with ownership-aware recursion. Every operation
//! that must temporarily read or write a different stage goes through the
//! engine's [`ReadingState`] scoped overrides, so the ambient mode never
//! leaks past the operation — including on error paths.
//!
//! Permission denials and failed preconditions (unpublishing something not
//! live, reverting something never published) come back as `Ok(false)`;
//! validation and backend errors propagate.

pub mod ownership;

pub use ownership::ObjectRef;

use crate::error::{StagebaseError, StagebaseResult};
use crate::permission::{AllowAll, Member, PermissionPolicy};
use crate::query::{SelectQuery, augment_select, exec};
use crate::reading::ReadingState;
use crate::record::{Record, RecordId, Value, columns};
use crate::schema::{OwnsRelation, SchemaRegistry, Stage, versions_table};
use crate::store::RecordStore;
use crate::write::{Manipulation, TableWrite, WriteCommand, WriteOptions, augment_write};
use std::collections::HashSet;

/// Where a stage copy reads its source row from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VersionSource {
    Stage(Stage),
    Version(u64),
}

/// Pre/post hooks around the publish and unpublish transitions.
///
/// The default implementations are no-ops; the surrounding application hangs
/// cache invalidation and similar concerns here.
pub trait LifecycleHooks {
    fn on_before_publish(&self, _object: &ObjectRef) {}
    fn on_after_publish(&self, _object: &ObjectRef) {}
    fn on_before_unpublish(&self, _object: &ObjectRef) {}
    fn on_after_unpublish(&self, _object: &ObjectRef) {}
}

/// Hook implementation that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl LifecycleHooks for NoHooks {}

static ALLOW_ALL: AllowAll = AllowAll;
static NO_HOOKS: NoHooks = NoHooks;

/// The versioning orchestrator over one store and one schema.
pub struct VersionedEngine<'a, S: RecordStore> {
    store: &'a S,
    registry: &'a SchemaRegistry,
    reading: ReadingState,
    policy: &'a dyn PermissionPolicy,
    hooks: &'a dyn LifecycleHooks,
}

impl<'a, S: RecordStore> VersionedEngine<'a, S> {
    pub fn new(store: &'a S, registry: &'a SchemaRegistry) -> Self {
        VersionedEngine {
            store,
            registry,
            reading: ReadingState::default(),
            policy: &ALLOW_ALL,
            hooks: &NO_HOOKS,
        }
    }

    pub fn with_policy(mut self, policy: &'a dyn PermissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hooks(mut self, hooks: &'a dyn LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn registry(&self) -> &'a SchemaRegistry {
        self.registry
    }

    /// The engine's reading state; callers set the request-level mode here
    /// and scoped operations save/restore through it.
    pub fn reading(&self) -> &ReadingState {
        &self.reading
    }

    /// Pre-create every physical table the schema requires.
    pub fn ensure_schema(&self) -> StagebaseResult<()> {
        self.store.ensure_tables(&self.registry.all_physical_tables())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read one record under the current reading mode.
    pub fn get(&self, class: &str, id: RecordId) -> StagebaseResult<Option<Record>> {
        let mut query = SelectQuery::for_class(self.registry, class)?.by_id(id);
        augment_select(&mut query, self.registry, class, &self.reading.mode())?;
        exec::one(self.store, &query)
    }

    /// Read all records of a class under the current reading mode.
    pub fn list(&self, class: &str) -> StagebaseResult<Vec<Record>> {
        let mut query = SelectQuery::for_class(self.registry, class)?;
        augment_select(&mut query, self.registry, class, &self.reading.mode())?;
        exec::execute(self.store, &query)
    }

    /// Read one record from an explicit stage, restoring the mode after.
    pub fn get_by_stage(
        &self,
        class: &str,
        id: RecordId,
        stage: Stage,
    ) -> StagebaseResult<Option<Record>> {
        self.reading.with_stage(stage, || self.get(class, id))
    }

    /// All history rows for a record, version ascending.
    pub fn versions_of(&self, class: &str, id: RecordId) -> StagebaseResult<Vec<Record>> {
        let spec = self.registry.spec(class)?;
        self.store.versions_of(&versions_table(&spec.table), id)
    }

    pub fn version_number_by_stage(
        &self,
        class: &str,
        id: RecordId,
        stage: Stage,
    ) -> StagebaseResult<Option<u64>> {
        let spec = self.registry.spec(class)?;
        let table = self.registry.stage_table(class, &spec.table, stage)?;
        Ok(self.store.get(&table, id)?.and_then(|row| row.version()))
    }

    pub fn is_on_draft(&self, class: &str, id: RecordId) -> StagebaseResult<bool> {
        let spec = self.registry.spec(class)?;
        Ok(self.store.get(&spec.table, id)?.is_some())
    }

    pub fn is_published(&self, class: &str, id: RecordId) -> StagebaseResult<bool> {
        let spec = self.registry.spec(class)?;
        if !spec.staged {
            return Ok(false);
        }
        let live = self.registry.stage_table(class, &spec.table, Stage::Live)?;
        Ok(self.store.get(&live, id)?.is_some())
    }

    /// Whether draft and live currently disagree for a record: differing
    /// version numbers, or presence on one stage only.
    pub fn stages_differ(&self, class: &str, id: RecordId) -> StagebaseResult<bool> {
        let draft = self.version_number_by_stage(class, id, Stage::Draft)?;
        let live = self.version_number_by_stage(class, id, Stage::Live)?;
        Ok(match (draft, live) {
            (None, None) => false,
            (Some(d), Some(l)) => d != l,
            _ => true,
        })
    }

    /// Whether the actor may read the given stage at all.
    pub fn can_view_stage(&self, stage: Stage, actor: Option<&Member>) -> bool {
        self.policy.can_view_stage(stage, actor)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Versioned write against the stage selected by the current mode.
    ///
    /// Returns the version number the write carried, if it was versioned.
    pub fn write(
        &self,
        class: &str,
        manipulation: &Manipulation,
        options: &WriteOptions,
    ) -> StagebaseResult<Option<u64>> {
        self.write_to_stage(class, manipulation, self.reading.stage(), options)
    }

    /// Versioned write against an explicit stage, mode restored after.
    pub fn write_to_stage(
        &self,
        class: &str,
        manipulation: &Manipulation,
        stage: Stage,
        options: &WriteOptions,
    ) -> StagebaseResult<Option<u64>> {
        self.reading.with_stage(stage, || {
            let augmented =
                augment_write(self.registry, self.store, class, manipulation, stage, options)?;
            if augmented.plan.ops.len() > 1 && !self.store.supports_transactions() {
                log::warn!(
                    "backend lacks transactions; applying {}-op write plan non-atomically",
                    augmented.plan.ops.len()
                );
            }
            self.store.apply(&augmented.plan)?;
            Ok(augmented.version)
        })
    }

    /// Remove a record's rows from one stage. Does not touch history.
    pub fn delete_from_stage(
        &self,
        class: &str,
        id: RecordId,
        stage: Stage,
    ) -> StagebaseResult<bool> {
        let spec = self.registry.spec(class)?;
        self.reading.with_stage(stage, || {
            let mut existed = false;
            for table in spec.class_tables() {
                let stage_table = self.registry.stage_table(class, table, stage)?;
                let removed = self.store.delete(&stage_table, id)?;
                if table == spec.table {
                    existed = removed;
                }
            }
            Ok(existed)
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// The single copy primitive every lifecycle transition builds on.
    ///
    /// Loads the source row by stage or by explicit version number, writes
    /// it to the target stage, and returns the version number the target row
    /// now carries. With `create_new_version` the copy becomes a fresh
    /// version (new history row); without it the target write reuses the
    /// exact source version number, and — when the target is Live — the
    /// already-written history row is stamped `WasPublished` by a direct
    /// update, since that row already exists and must not travel through the
    /// versioned write path again.
    pub fn copy_version_to_stage(
        &self,
        class: &str,
        id: RecordId,
        from: VersionSource,
        to: Stage,
        create_new_version: bool,
        actor: Option<&Member>,
    ) -> StagebaseResult<u64> {
        let spec = self.registry.spec(class)?;
        if to == Stage::Live && !spec.staged {
            return Err(StagebaseError::config(format!(
                "class '{class}' is version-only and has no Live stage"
            )));
        }

        let mut manipulation = Manipulation::new();
        let mut source_version = None;
        for table in spec.class_tables() {
            let source_row = match from {
                VersionSource::Stage(stage) => {
                    let source_table = self.registry.stage_table(class, table, stage)?;
                    self.store.get(&source_table, id)?
                }
                VersionSource::Version(version) => {
                    self.store.get_version(&versions_table(table), id, version)?
                }
            };
            let Some(source_row) = source_row else {
                if table == spec.table {
                    return Err(StagebaseError::RecordNotFound(format!(
                        "no source row for '{class}' record {id} in {from:?}"
                    )));
                }
                continue;
            };

            if table == spec.table {
                source_version = match from {
                    VersionSource::Version(version) => Some(version),
                    VersionSource::Stage(_) => source_row.version(),
                };
            }

            // Strip history bookkeeping; the write augmenter re-derives what
            // the target rows need.
            let mut fields = source_row.fields;
            fields.remove(columns::ID);
            fields.remove(columns::RECORD_ID);
            fields.remove(columns::WAS_PUBLISHED);
            fields.remove(columns::PUBLISHER_ID);
            fields.remove(columns::AUTHOR_ID);
            if create_new_version {
                fields.remove(columns::VERSION);
            }

            let target_table = self.registry.stage_table(class, table, to)?;
            let command = if self.store.get(&target_table, id)?.is_some() {
                WriteCommand::Update
            } else {
                WriteCommand::Insert
            };
            manipulation.entries.insert(
                table.to_string(),
                TableWrite {
                    command,
                    record_id: id,
                    fields,
                },
            );
        }

        let source_version = source_version.ok_or_else(|| {
            StagebaseError::Other(format!(
                "source row for '{class}' record {id} carries no version number"
            ))
        })?;

        let options = WriteOptions {
            actor: actor.map(|member| member.id),
            migrate_version: (!create_new_version).then_some(source_version),
            without_version: false,
        };
        let written = self
            .write_to_stage(class, &manipulation, to, &options)?
            .unwrap_or(source_version);

        if !create_new_version && to == Stage::Live {
            self.store.stamp_version_published(
                &versions_table(&spec.table),
                id,
                source_version,
                actor.map(|member| member.id),
            )?;
        }
        Ok(written)
    }

    /// Publish one record, no recursion into owned objects.
    pub fn publish_single(
        &self,
        class: &str,
        id: RecordId,
        actor: Option<&Member>,
    ) -> StagebaseResult<bool> {
        let spec = self.registry.spec(class)?;
        if !spec.staged {
            return Err(StagebaseError::config(format!(
                "class '{class}' is version-only and cannot be published"
            )));
        }
        if !self.policy.can_publish(class, id, actor) {
            return Ok(false);
        }
        if !self.is_on_draft(class, id)? {
            return Ok(false);
        }
        let object = ObjectRef::new(class, id);
        self.hooks.on_before_publish(&object);
        let version =
            self.copy_version_to_stage(class, id, VersionSource::Stage(Stage::Draft), Stage::Live, false, actor)?;
        log::debug!("published '{class}' record {id} at version {version}");
        self.hooks.on_after_publish(&object);
        Ok(true)
    }

    /// Publish a record and, one level at a time, everything it owns; then
    /// unlink has-many children that the draft no longer references from the
    /// live side.
    pub fn publish_recursive(
        &self,
        class: &str,
        id: RecordId,
        actor: Option<&Member>,
    ) -> StagebaseResult<bool> {
        let mut visited = HashSet::new();
        self.publish_recursive_inner(class, id, actor, &mut visited)
    }

    fn publish_recursive_inner(
        &self,
        class: &str,
        id: RecordId,
        actor: Option<&Member>,
        visited: &mut HashSet<ObjectRef>,
    ) -> StagebaseResult<bool> {
        if !visited.insert(ObjectRef::new(class, id)) {
            return Ok(true);
        }
        if !self.publish_single(class, id, actor)? {
            return Ok(false);
        }
        let owned =
            ownership::find_owned(self.registry, self.store, class, id, Stage::Draft, false)?;
        let mut all_ok = true;
        for object in owned {
            if !self.publish_recursive_inner(&object.class, object.id, actor, visited)? {
                all_ok = false;
            }
        }
        self.unlink_disowned(class, id, Stage::Draft, Stage::Live)?;
        Ok(all_ok)
    }

    /// Remove a record from Live, then cascade to everything that owns it:
    /// an owner's published state is treated as invalid once something it
    /// owns disappears from Live.
    pub fn unpublish(
        &self,
        class: &str,
        id: RecordId,
        actor: Option<&Member>,
    ) -> StagebaseResult<bool> {
        let spec = self.registry.spec(class)?;
        if !spec.staged {
            return Err(StagebaseError::config(format!(
                "class '{class}' is version-only and cannot be unpublished"
            )));
        }
        if !self.policy.can_unpublish(class, id, actor) {
            return Ok(false);
        }
        if !self.is_published(class, id)? {
            return Ok(false);
        }
        let object = ObjectRef::new(class, id);
        self.hooks.on_before_unpublish(&object);

        // Owners must be collected before the live rows disappear; the
        // reverse lookup reads this record's live row.
        let owners =
            ownership::find_owners(self.registry, self.store, class, id, Stage::Live, false)?;

        self.delete_from_stage(class, id, Stage::Live)?;
        self.hooks.on_after_unpublish(&object);

        for owner in owners {
            // Result deliberately ignored: an owner that is already off Live
            // (or that the actor may not unpublish) does not undo this
            // record's unpublish.
            self.unpublish(&owner.class, owner.id, actor)?;
        }
        Ok(true)
    }

    /// Overwrite Draft with the current Live content, revert everything the
    /// live version owns, then unlink children live no longer references
    /// from the draft side.
    pub fn revert_to_live(
        &self,
        class: &str,
        id: RecordId,
        actor: Option<&Member>,
    ) -> StagebaseResult<bool> {
        let mut visited = HashSet::new();
        self.revert_to_live_inner(class, id, actor, &mut visited)
    }

    fn revert_to_live_inner(
        &self,
        class: &str,
        id: RecordId,
        actor: Option<&Member>,
        visited: &mut HashSet<ObjectRef>,
    ) -> StagebaseResult<bool> {
        if !visited.insert(ObjectRef::new(class, id)) {
            return Ok(true);
        }
        if !self.policy.can_revert_to_live(class, id, actor) {
            return Ok(false);
        }
        if !self.is_published(class, id)? {
            return Ok(false);
        }
        self.copy_version_to_stage(class, id, VersionSource::Stage(Stage::Live), Stage::Draft, false, actor)?;

        let owned =
            ownership::find_owned(self.registry, self.store, class, id, Stage::Live, false)?;
        for object in owned {
            self.revert_to_live_inner(&object.class, object.id, actor, visited)?;
        }
        self.unlink_disowned(class, id, Stage::Live, Stage::Draft)?;
        Ok(true)
    }

    /// Restore an arbitrary historical version onto Draft as a new version.
    ///
    /// Owned objects of that historical version are re-written to Draft one
    /// level deep only — the non-recursive treatment is a deliberate
    /// asymmetry with publish/revert.
    pub fn rollback_to(
        &self,
        class: &str,
        id: RecordId,
        version: u64,
        actor: Option<&Member>,
    ) -> StagebaseResult<bool> {
        let spec = self.registry.spec(class)?;
        if !self.policy.can_edit(class, id, actor) {
            return Ok(false);
        }
        let Some(history) = self
            .store
            .get_version(&versions_table(&spec.table), id, version)?
        else {
            return Ok(false);
        };

        self.copy_version_to_stage(class, id, VersionSource::Version(version), Stage::Draft, true, actor)?;

        let snapshot = Record::with_fields(id, history.fields);
        let owned =
            ownership::owned_of_record(self.registry, self.store, class, &snapshot, Stage::Draft)?;
        for object in owned {
            self.copy_version_to_stage(
                &object.class,
                object.id,
                VersionSource::Stage(Stage::Draft),
                Stage::Draft,
                true,
                actor,
            )?;
        }
        Ok(true)
    }

    /// Unpublish, then hard-delete from Draft. History rows remain.
    pub fn archive(&self, class: &str, id: RecordId, actor: Option<&Member>) -> StagebaseResult<bool> {
        let spec = self.registry.spec(class)?;
        if !self.policy.can_archive(class, id, actor) {
            return Ok(false);
        }
        if !self.is_on_draft(class, id)? && !self.is_published(class, id)? {
            return Ok(false);
        }
        if spec.staged && self.is_published(class, id)? && !self.unpublish(class, id, actor)? {
            return Ok(false);
        }
        self.delete_from_stage(class, id, Stage::Draft)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    /// Objects this record owns, on the stage the current mode selects.
    pub fn find_owned(
        &self,
        class: &str,
        id: RecordId,
        recursive: bool,
    ) -> StagebaseResult<Vec<ObjectRef>> {
        ownership::find_owned(self.registry, self.store, class, id, self.reading.stage(), recursive)
    }

    /// Objects owning this record, on the stage the current mode selects.
    pub fn find_owners(
        &self,
        class: &str,
        id: RecordId,
        recursive: bool,
    ) -> StagebaseResult<Vec<ObjectRef>> {
        ownership::find_owners(self.registry, self.store, class, id, self.reading.stage(), recursive)
    }

    /// Null the foreign keys, on the `to` stage only, of has-many children
    /// that are referenced on `to` but no longer on `from`.
    ///
    /// A direct update: disowning does not create new versions.
    fn unlink_disowned(
        &self,
        class: &str,
        id: RecordId,
        from: Stage,
        to: Stage,
    ) -> StagebaseResult<()> {
        let spec = self.registry.spec(class)?;
        for edge in &spec.owns {
            let OwnsRelation::HasMany {
                target,
                foreign_key,
                ..
            } = edge
            else {
                continue;
            };
            let target_spec = self.registry.spec(target)?;
            let from_table = self.registry.stage_table(target, &target_spec.table, from)?;
            let to_table = self.registry.stage_table(target, &target_spec.table, to)?;

            let still_owned: HashSet<RecordId> = self
                .store
                .rows(&from_table)?
                .into_iter()
                .filter(|row| row.get(foreign_key).and_then(Value::as_record_id) == Some(id))
                .map(|row| row.id)
                .collect();

            for mut row in self.store.rows(&to_table)? {
                let references_me =
                    row.get(foreign_key).and_then(Value::as_record_id) == Some(id);
                if references_me && !still_owned.contains(&row.id) {
                    log::debug!(
                        "unlinking disowned '{target}' record {} from '{class}' record {id} on {to}",
                        row.id
                    );
                    row.set(foreign_key.clone(), Value::Null);
                    self.store.upsert(&to_table, &row)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Delete subclass history rows whose `(RecordID, Version)` has no
    /// matching base history row. Schema-migration-time cleanup only, never
    /// part of runtime operation.
    pub fn cleanup_orphaned_versions(&self, class: &str) -> StagebaseResult<u64> {
        let spec = self.registry.spec(class)?;
        let base_versions = versions_table(&spec.table);
        let mut removed = 0;
        for table in &spec.subclass_tables {
            let sub_versions = versions_table(table);
            for row in self.store.rows(&sub_versions)? {
                let record_id = row.record_id();
                let Some(version) = row.version() else {
                    continue;
                };
                if self
                    .store
                    .get_version(&base_versions, record_id, version)?
                    .is_none()
                {
                    self.store.delete_version(&sub_versions, record_id, version)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
