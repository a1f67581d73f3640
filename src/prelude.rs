//! Prelude module for Stagebase
//!
//! This module re-exports the most commonly used types and traits
//! to make it easier to use Stagebase.

// Error handling
pub use crate::error::{StagebaseError, StagebaseResult};

// Model primitives
pub use crate::record::{ChangeSetId, Fields, MemberId, Record, RecordId, Value, columns};

// Schema
pub use crate::schema::{ClassSpec, OwnsRelation, SchemaRegistry, Stage, versions_table};

// Reading modes
pub use crate::reading::{ReadingMode, ReadingState};

// Query model
pub use crate::query::{SelectQuery, augment_from_params, augment_select};

// Write model
pub use crate::write::{Manipulation, WriteOptions, WritePlan, augment_write};

// Stores
pub use crate::store::{MemoryStore, RecordStore};
#[cfg(feature = "redb")]
pub use crate::store::RedbStore;
#[cfg(feature = "sled")]
pub use crate::store::SledStore;

// Engine and ownership
pub use crate::versioned::{LifecycleHooks, ObjectRef, VersionSource, VersionedEngine};

// ChangeSets
pub use crate::changeset::{
    AddedState, ChangeSet, ChangeSetItem, ChangeSetState, ChangeSets, ChangeType,
};

// Permissions
pub use crate::permission::{AllowAll, DenyAll, Member, PermissionPolicy};
