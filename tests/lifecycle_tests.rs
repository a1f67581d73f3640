//! Publish / unpublish / revert / rollback / archive round-trips against the
//! in-memory backend.

mod common;

use common::*;
use stagebase_store::error::StagebaseError;
use stagebase_store::prelude::*;

#[test]
fn publish_copies_draft_to_live_and_stamps_history() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    let version = save_titled(&engine, "Page", "Page", id, "Home");
    assert_eq!(version, 1);
    assert!(!engine.is_published("Page", id).unwrap());

    let editor = Member::new(MemberId(7));
    assert!(engine.publish_single("Page", id, Some(&editor)).unwrap());

    assert!(engine.is_published("Page", id).unwrap());
    let live = engine
        .get_by_stage("Page", id, Stage::Live)
        .unwrap()
        .expect("live row after publish");
    assert_eq!(title_of(&live), Some("Home"));
    // Publishing reuses the draft version number rather than minting one.
    assert_eq!(live.version(), Some(1));
    assert!(!engine.stages_differ("Page", id).unwrap());

    // The draft's history row is stamped, not re-inserted.
    let versions = engine.versions_of("Page", id).unwrap();
    assert_eq!(versions.len(), 1);
    assert!(versions[0].was_published());
    assert_eq!(
        versions[0].get(columns::PUBLISHER_ID),
        Some(&Value::Id(RecordId(7)))
    );
}

#[test]
fn republishing_an_unchanged_draft_changes_nothing() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "Page", "Page", id, "Home");

    assert!(engine.publish_single("Page", id, None).unwrap());
    let first = engine
        .get_by_stage("Page", id, Stage::Live)
        .unwrap()
        .expect("live row after first publish");

    assert!(engine.publish_single("Page", id, None).unwrap());
    let second = engine
        .get_by_stage("Page", id, Stage::Live)
        .unwrap()
        .expect("live row after second publish");

    // The copy is idempotent: same fields, same pinned version, and no
    // extra history row.
    assert_eq!(second, first);
    assert_eq!(
        engine.version_number_by_stage("Page", id, Stage::Live).unwrap(),
        Some(1)
    );
    assert_eq!(engine.versions_of("Page", id).unwrap().len(), 1);
}

#[test]
fn publish_without_draft_row_reports_false() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    assert!(!engine.publish_single("Page", RecordId(404), None).unwrap());
}

#[test]
fn publish_denied_by_policy_reports_false_without_erroring() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let policy = DenyAll;
    let engine = VersionedEngine::new(&store, &registry).with_policy(&policy);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "Page", "Page", id, "Home");
    assert!(!engine.publish_single("Page", id, None).unwrap());
    assert!(!engine.is_published("Page", id).unwrap());
}

#[test]
fn version_only_class_cannot_be_published() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "AuditEntry", "AuditEntry", id, "first login");
    let err = engine.publish_single("AuditEntry", id, None).unwrap_err();
    assert!(matches!(err, StagebaseError::Configuration(_)));
    let err = engine.unpublish("AuditEntry", id, None).unwrap_err();
    assert!(matches!(err, StagebaseError::Configuration(_)));
}

#[test]
fn recursive_publish_carries_the_ownership_chain() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let page = RecordId(1);
    let banner = RecordId(10);
    let thumb = RecordId(11);
    let element = RecordId(20);

    save_titled(&engine, "Image", "Image", banner, "banner.jpg");
    save_titled(&engine, "Image", "Image", thumb, "thumb.jpg");
    save(
        &engine,
        "Element",
        "Element",
        element,
        &[
            ("Title", Value::from("Body copy")),
            ("PageID", Value::from(page)),
            ("ThumbnailID", Value::from(thumb)),
        ],
    );
    save(
        &engine,
        "Page",
        "Page",
        page,
        &[("Title", Value::from("Home")), ("BannerID", Value::from(banner))],
    );

    assert!(engine.publish_recursive("Page", page, None).unwrap());

    for (class, id) in [
        ("Page", page),
        ("Image", banner),
        ("Element", element),
        ("Image", thumb),
    ] {
        assert!(
            engine.is_published(class, id).unwrap(),
            "{class} {id} should be live after recursive publish"
        );
    }
}

#[test]
fn unpublish_cascades_to_owners() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let page = RecordId(1);
    let banner = RecordId(10);
    save_titled(&engine, "Image", "Image", banner, "banner.jpg");
    save(
        &engine,
        "Page",
        "Page",
        page,
        &[("Title", Value::from("Home")), ("BannerID", Value::from(banner))],
    );
    assert!(engine.publish_recursive("Page", page, None).unwrap());

    // Pulling the image off Live invalidates the page that depends on it.
    assert!(engine.unpublish("Image", banner, None).unwrap());
    assert!(!engine.is_published("Image", banner).unwrap());
    assert!(!engine.is_published("Page", page).unwrap());

    // Draft content is untouched.
    assert!(engine.is_on_draft("Page", page).unwrap());
    assert!(engine.is_on_draft("Image", banner).unwrap());
}

#[test]
fn unpublish_something_not_live_reports_false() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "Page", "Page", id, "Draft only");
    assert!(!engine.unpublish("Page", id, None).unwrap());
}

#[test]
fn revert_to_live_discards_draft_edits() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "Page", "Page", id, "Published copy");
    assert!(engine.publish_single("Page", id, None).unwrap());
    save_titled(&engine, "Page", "Page", id, "Unreviewed edit");
    assert!(engine.stages_differ("Page", id).unwrap());

    assert!(engine.revert_to_live("Page", id, None).unwrap());

    let draft = engine
        .get_by_stage("Page", id, Stage::Draft)
        .unwrap()
        .expect("draft row after revert");
    assert_eq!(title_of(&draft), Some("Published copy"));
    assert!(!engine.stages_differ("Page", id).unwrap());
}

#[test]
fn revert_without_live_row_reports_false() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "Page", "Page", id, "Never published");
    assert!(!engine.revert_to_live("Page", id, None).unwrap());
}

#[test]
fn rollback_restores_history_content_as_a_new_version() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "Page", "Page", id, "first");
    save_titled(&engine, "Page", "Page", id, "second");
    save_titled(&engine, "Page", "Page", id, "third");

    assert!(engine.rollback_to("Page", id, 1, None).unwrap());

    let draft = engine
        .get_by_stage("Page", id, Stage::Draft)
        .unwrap()
        .expect("draft row after rollback");
    assert_eq!(title_of(&draft), Some("first"));
    // History is append-only: the rollback is version 4, not a rewrite of 1.
    assert_eq!(draft.version(), Some(4));
    assert_eq!(engine.versions_of("Page", id).unwrap().len(), 4);
}

#[test]
fn rollback_to_missing_version_reports_false() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "Page", "Page", id, "only version");
    assert!(!engine.rollback_to("Page", id, 99, None).unwrap());
}

#[test]
fn archive_removes_both_stages_but_keeps_history() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "Page", "Page", id, "Home");
    assert!(engine.publish_single("Page", id, None).unwrap());

    assert!(engine.archive("Page", id, None).unwrap());

    assert!(!engine.is_on_draft("Page", id).unwrap());
    assert!(!engine.is_published("Page", id).unwrap());
    assert_eq!(engine.versions_of("Page", id).unwrap().len(), 1);
}

#[test]
fn archive_of_a_missing_record_reports_false() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();

    assert!(!engine.archive("Page", RecordId(404), None).unwrap());
}

#[test]
fn lifecycle_hooks_fire_around_publish_and_unpublish() {
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingHooks {
        events: RefCell<Vec<String>>,
    }

    impl LifecycleHooks for RecordingHooks {
        fn on_before_publish(&self, object: &ObjectRef) {
            self.events.borrow_mut().push(format!("before_publish {object:?}"));
        }
        fn on_after_publish(&self, object: &ObjectRef) {
            self.events.borrow_mut().push(format!("after_publish {object:?}"));
        }
        fn on_before_unpublish(&self, object: &ObjectRef) {
            self.events.borrow_mut().push(format!("before_unpublish {object:?}"));
        }
        fn on_after_unpublish(&self, object: &ObjectRef) {
            self.events.borrow_mut().push(format!("after_unpublish {object:?}"));
        }
    }

    let registry = site_registry();
    let store = MemoryStore::new();
    let hooks = RecordingHooks::default();
    let engine = VersionedEngine::new(&store, &registry).with_hooks(&hooks);
    engine.ensure_schema().unwrap();

    let id = RecordId(1);
    save_titled(&engine, "Page", "Page", id, "Home");
    engine.publish_single("Page", id, None).unwrap();
    engine.unpublish("Page", id, None).unwrap();

    let events = hooks.events.borrow();
    assert_eq!(events.len(), 4);
    assert!(events[0].starts_with("before_publish"));
    assert!(events[1].starts_with("after_publish"));
    assert!(events[2].starts_with("before_unpublish"));
    assert!(events[3].starts_with("after_unpublish"));
}
