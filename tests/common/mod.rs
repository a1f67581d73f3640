// Shared schema fixture and helpers for the integration tests.
#![allow(dead_code)]

use stagebase_store::prelude::*;

/// Pipe crate logs into the test harness when `RUST_LOG` is set.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The site schema most tests run against:
///
/// - `Page` (base table `Page`, subclass table `BlogPage`) owns its banner
///   image through `BannerID` and its content elements through the
///   `Element.PageID` foreign key
/// - `Element` owns a thumbnail image, which makes `Page -> Element -> Image`
///   a two-level chain for the recursive operations
/// - `Image` owns nothing
/// - `AuditEntry` is version-only (no Live stage)
/// - `PageTag` is a many-many join record
pub fn site_registry() -> SchemaRegistry {
    init_logging();
    SchemaRegistry::build(vec![
        ClassSpec::builder()
            .name("Page")
            .table("Page")
            .subclass_tables(vec!["BlogPage".to_string()])
            .owns(vec![
                OwnsRelation::has_one("Banner", "Image", "BannerID"),
                OwnsRelation::has_many("Elements", "Element", "PageID"),
            ])
            .build(),
        ClassSpec::builder()
            .name("Element")
            .table("Element")
            .owns(vec![OwnsRelation::has_one("Thumbnail", "Image", "ThumbnailID")])
            .build(),
        ClassSpec::builder().name("Image").table("Image").build(),
        ClassSpec::builder()
            .name("AuditEntry")
            .table("AuditEntry")
            .staged(false)
            .build(),
        ClassSpec::builder()
            .name("PageTag")
            .table("PageTag")
            .is_join(true)
            .build(),
    ])
    .expect("site schema is valid")
}

/// A deliberately cyclic ownership graph: each gallery names a featured
/// widget, each widget points back at its gallery.
pub fn cyclic_registry() -> SchemaRegistry {
    init_logging();
    SchemaRegistry::build(vec![
        ClassSpec::builder()
            .name("Gallery")
            .table("Gallery")
            .owns(vec![OwnsRelation::has_one("Featured", "Widget", "FeaturedID")])
            .build(),
        ClassSpec::builder()
            .name("Widget")
            .table("Widget")
            .owns(vec![OwnsRelation::has_one("Home", "Gallery", "GalleryID")])
            .build(),
    ])
    .expect("cyclic schema is valid")
}

pub fn fields(pairs: &[(&str, Value)]) -> Fields {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

/// Save one record's base-table row on the engine's current stage and return
/// the version number the write carried.
pub fn save<S: RecordStore>(
    engine: &VersionedEngine<'_, S>,
    class: &str,
    table: &str,
    id: RecordId,
    pairs: &[(&str, Value)],
) -> u64 {
    let exists = engine
        .get_by_stage(class, id, Stage::Draft)
        .expect("draft lookup")
        .is_some();
    let manipulation = if exists {
        Manipulation::new().update(table, id, fields(pairs))
    } else {
        Manipulation::new().insert(table, id, fields(pairs))
    };
    engine
        .write(class, &manipulation, &WriteOptions::default())
        .expect("versioned write")
        .expect("base-table write is versioned")
}

/// Convenience for the most common fixture row: a titled record.
pub fn save_titled<S: RecordStore>(
    engine: &VersionedEngine<'_, S>,
    class: &str,
    table: &str,
    id: RecordId,
    title: &str,
) -> u64 {
    save(engine, class, table, id, &[("Title", Value::from(title))])
}

pub fn title_of(record: &Record) -> Option<&str> {
    match record.get("Title") {
        Some(Value::Text(title)) => Some(title.as_str()),
        _ => None,
    }
}
