//! # Stagebase Store
//!
//! A staged versioning core for record stores: every versioned record lives
//! on a Draft and a Live stage, and every write to the Draft stage is
//! snapshotted into an immutable `_Versions` history table.
//!
//! ## Features
//!
//! - **Staging**: Draft and Live stage tables per class, with publish,
//!   unpublish, revert and archive lifecycle operations
//! - **History**: append-only `_Versions` tables, version-pinned reads,
//!   rollback to any historical version
//! - **Reading modes**: Stage, StageUnique, Archive (point in time),
//!   AllVersions, LatestVersions and Version, applied to queries by a
//!   semantic augmenter
//! - **Ownership**: declarative `owns` relations drive cascading publish,
//!   unpublish and revert across object graphs, cycle-safe
//! - **ChangeSets**: explicit and implicit membership tracking with
//!   sync/validate, ready for campaign-style batch review
//! - **Backends**: in-memory, redb (transactional) and sled
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagebase_store::prelude::*;
//!
//! let registry = SchemaRegistry::build(vec![
//!     ClassSpec::builder()
//!         .name("Page")
//!         .table("Page")
//!         .owns(vec![OwnsRelation::has_one("Banner", "Image", "BannerID")])
//!         .build(),
//!     ClassSpec::builder().name("Image").table("Image").build(),
//! ])?;
//!
//! let store = MemoryStore::new();
//! let engine = VersionedEngine::new(&store, &registry);
//! engine.ensure_schema()?;
//!
//! let mut fields = Fields::new();
//! fields.insert("Title".into(), Value::from("Home"));
//! let save = Manipulation::new().insert("Page", RecordId(1), fields);
//! engine.write("Page", &save, &WriteOptions::by(MemberId(1)))?;
//!
//! let editor = Member::new(MemberId(1));
//! engine.publish_recursive("Page", RecordId(1), Some(&editor))?;
//! ```

pub mod changeset;
pub mod error;
pub mod permission;
pub mod prelude;
pub mod query;
pub mod reading;
pub mod record;
pub mod schema;
pub mod store;
pub mod versioned;
pub mod write;
