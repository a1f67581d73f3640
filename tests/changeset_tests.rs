//! ChangeSet membership: explicit adds, graph-derived implicit members,
//! sync/validate reconciliation and the unsupported bulk operations.

mod common;

use common::*;
use stagebase_store::changeset::{
    AddedState, CHANGESETS_TABLE, ChangeSetState, ChangeSets, ChangeType,
};
use stagebase_store::error::StagebaseError;
use stagebase_store::prelude::*;

fn objects(items: &[ChangeSetItem], added: AddedState) -> Vec<ObjectRef> {
    items
        .iter()
        .filter(|item| item.added == added)
        .map(|item| item.object.clone())
        .collect()
}

#[test]
fn created_changesets_start_open_and_empty() -> anyhow::Result<()> {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema()?;
    let changesets = ChangeSets::new(&engine);

    let cs = changesets.create("June release", Some(MemberId(3)))?;
    assert_eq!(cs.state, ChangeSetState::Open);

    let reloaded = changesets.get(cs.id)?.expect("persisted changeset");
    assert_eq!(reloaded.name, "June release");
    assert_eq!(reloaded.owner, Some(MemberId(3)));
    assert!(changesets.items(cs.id)?.is_empty());
    Ok(())
}

#[test]
fn explicit_add_pulls_in_changed_owned_objects_implicitly() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

    let page = RecordId(1);
    let element = RecordId(20);
    save(
        &engine,
        "Element",
        "Element",
        element,
        &[("Title", Value::from("Body")), ("PageID", Value::from(page))],
    );
    save_titled(&engine, "Page", "Page", page, "Home");
    engine.publish_recursive("Page", page, None).unwrap();

    // Only the element has unreleased edits.
    save(&engine, "Element", "Element", element, &[("Title", Value::from("Body v2"))]);

    let cs = changesets.create("release", None).unwrap();
    changesets.add_object(cs.id, &ObjectRef::new("Page", page)).unwrap();

    let items = changesets.items(cs.id).unwrap();
    assert_eq!(objects(&items, AddedState::Explicitly), vec![ObjectRef::new("Page", page)]);
    assert_eq!(
        objects(&items, AddedState::Implicitly),
        vec![ObjectRef::new("Element", element)]
    );
    assert!(changesets.validate(cs.id).unwrap());
}

#[test]
fn unchanged_owned_objects_are_not_pulled_in() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

    let page = RecordId(1);
    let element = RecordId(20);
    save(
        &engine,
        "Element",
        "Element",
        element,
        &[("PageID", Value::from(page))],
    );
    save_titled(&engine, "Page", "Page", page, "Home");
    engine.publish_recursive("Page", page, None).unwrap();

    let cs = changesets.create("release", None).unwrap();
    changesets.add_object(cs.id, &ObjectRef::new("Page", page)).unwrap();

    let items = changesets.items(cs.id).unwrap();
    assert!(objects(&items, AddedState::Implicitly).is_empty());
}

#[test]
fn removing_the_explicit_member_drops_its_implicit_dependents() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

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

    let cs = changesets.create("release", None).unwrap();
    let page_ref = ObjectRef::new("Page", page);
    changesets.add_object(cs.id, &page_ref).unwrap();
    assert_eq!(changesets.items(cs.id).unwrap().len(), 2);

    assert!(changesets.remove_object(cs.id, &page_ref).unwrap());
    assert!(changesets.items(cs.id).unwrap().is_empty());

    // Removing it again is a no-op, not an error.
    assert!(!changesets.remove_object(cs.id, &page_ref).unwrap());
}

#[test]
fn implicit_members_cannot_be_removed_directly() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

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

    let cs = changesets.create("release", None).unwrap();
    changesets.add_object(cs.id, &ObjectRef::new("Page", page)).unwrap();

    let err = changesets
        .remove_object(cs.id, &ObjectRef::new("Image", banner))
        .unwrap_err();
    assert!(matches!(err, StagebaseError::Unsupported(_)));
}

#[test]
fn explicitly_adding_an_implicit_member_promotes_it() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

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

    let cs = changesets.create("release", None).unwrap();
    let banner_ref = ObjectRef::new("Image", banner);
    changesets.add_object(cs.id, &ObjectRef::new("Page", page)).unwrap();
    changesets.add_object(cs.id, &banner_ref).unwrap();

    let items = changesets.items(cs.id).unwrap();
    assert!(objects(&items, AddedState::Explicitly).contains(&banner_ref));
    assert!(objects(&items, AddedState::Implicitly).is_empty());
    // Promotion is once per object: no duplicate rows.
    assert_eq!(items.len(), 2);
}

#[test]
fn deleted_members_pull_in_their_owners() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

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
    engine.publish_recursive("Page", page, None).unwrap();

    // Delete the image from draft; its live owner now depends on a pending
    // deletion.
    engine.delete_from_stage("Image", banner, Stage::Draft).unwrap();

    let cs = changesets.create("cleanup", None).unwrap();
    let banner_ref = ObjectRef::new("Image", banner);
    changesets.add_object(cs.id, &banner_ref).unwrap();

    assert_eq!(changesets.change_type(&banner_ref).unwrap(), ChangeType::Deleted);
    let items = changesets.items(cs.id).unwrap();
    assert_eq!(
        objects(&items, AddedState::Implicitly),
        vec![ObjectRef::new("Page", page)]
    );
}

#[test]
fn change_types_follow_the_stage_version_diff() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

    let created = RecordId(1);
    save_titled(&engine, "Page", "Page", created, "new");
    assert_eq!(
        changesets.change_type(&ObjectRef::new("Page", created)).unwrap(),
        ChangeType::Created
    );

    let unchanged = RecordId(2);
    save_titled(&engine, "Page", "Page", unchanged, "steady");
    engine.publish_single("Page", unchanged, None).unwrap();
    assert_eq!(
        changesets.change_type(&ObjectRef::new("Page", unchanged)).unwrap(),
        ChangeType::None
    );

    let modified = RecordId(3);
    save_titled(&engine, "Page", "Page", modified, "v1");
    engine.publish_single("Page", modified, None).unwrap();
    save_titled(&engine, "Page", "Page", modified, "v2");
    assert_eq!(
        changesets.change_type(&ObjectRef::new("Page", modified)).unwrap(),
        ChangeType::Modified
    );

    // A record that exists nowhere diffs as None, not Deleted.
    assert_eq!(
        changesets.change_type(&ObjectRef::new("Page", RecordId(404))).unwrap(),
        ChangeType::None
    );

    save_titled(&engine, "PageTag", "PageTag", RecordId(5), "tag join");
    assert_eq!(
        changesets.change_type(&ObjectRef::new("PageTag", RecordId(5))).unwrap(),
        ChangeType::ManyMany
    );
}

#[test]
fn explicit_items_track_before_and_after_versions() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

    let page = RecordId(1);
    save_titled(&engine, "Page", "Page", page, "v1");
    engine.publish_single("Page", page, None).unwrap();
    save_titled(&engine, "Page", "Page", page, "v2");

    let cs = changesets.create("release", None).unwrap();
    changesets.add_object(cs.id, &ObjectRef::new("Page", page)).unwrap();

    let item = &changesets.items(cs.id).unwrap()[0];
    assert_eq!(item.version_before, Some(1));
    assert_eq!(item.version_after, Some(2));

    // A later draft edit is picked up by sync.
    save_titled(&engine, "Page", "Page", page, "v3");
    changesets.sync(cs.id).unwrap();
    let item = &changesets.items(cs.id).unwrap()[0];
    assert_eq!(item.version_after, Some(3));
}

#[test]
fn sync_is_idempotent_and_validate_flags_staleness() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

    let page = RecordId(1);
    let banner = RecordId(10);
    save_titled(&engine, "Image", "Image", banner, "banner.jpg");
    save_titled(&engine, "Page", "Page", page, "Home");
    engine.publish_recursive("Page", page, None).unwrap();

    let cs = changesets.create("release", None).unwrap();
    changesets.add_object(cs.id, &ObjectRef::new("Page", page)).unwrap();
    assert!(changesets.validate(cs.id).unwrap());

    // Out-of-band edit: linking the banner creates a new implicit member the
    // persisted rows do not know about yet.
    save(&engine, "Image", "Image", banner, &[("Alt", Value::from("Banner"))]);
    save(&engine, "Page", "Page", page, &[("BannerID", Value::from(banner))]);
    assert!(!changesets.validate(cs.id).unwrap());

    changesets.sync(cs.id).unwrap();
    assert!(changesets.validate(cs.id).unwrap());
    let before = changesets.items(cs.id).unwrap();
    changesets.sync(cs.id).unwrap();
    assert_eq!(changesets.items(cs.id).unwrap(), before);
}

#[test]
fn membership_requires_a_registered_class_and_an_open_changeset() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

    let cs = changesets.create("release", None).unwrap();
    let err = changesets
        .add_object(cs.id, &ObjectRef::new("Martian", RecordId(1)))
        .unwrap_err();
    assert!(matches!(err, StagebaseError::Configuration(_)));

    // Flip the changeset to a terminal state behind the manager's back.
    let mut row = store
        .get(CHANGESETS_TABLE, RecordId(cs.id.0))
        .unwrap()
        .expect("changeset row");
    row.set("State", Value::from("Published"));
    store.upsert(CHANGESETS_TABLE, &row).unwrap();

    let err = changesets
        .add_object(cs.id, &ObjectRef::new("Page", RecordId(1)))
        .unwrap_err();
    assert!(matches!(err, StagebaseError::InvalidState(_)));

    let err = changesets.add_object(ChangeSetId(999), &ObjectRef::new("Page", RecordId(1)));
    assert!(matches!(err, Err(StagebaseError::RecordNotFound(_))));
}

#[test]
fn bulk_publish_and_revert_are_unsupported() {
    let registry = site_registry();
    let store = MemoryStore::new();
    let engine = VersionedEngine::new(&store, &registry);
    engine.ensure_schema().unwrap();
    let changesets = ChangeSets::new(&engine);

    let cs = changesets.create("release", None).unwrap();
    assert!(matches!(
        changesets.publish(cs.id),
        Err(StagebaseError::Unsupported(_))
    ));
    assert!(matches!(
        changesets.revert(cs.id),
        Err(StagebaseError::Unsupported(_))
    ));
}
