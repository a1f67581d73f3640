//! The query augmenter: rewrites a select structure per reading mode.
//!
//! Invoked by the outer query builder's before-execute hook, either with a
//! typed [`ReadingMode`] or with the untyped `Versioned.*` parameter bag the
//! hook receives. Only tables that pass
//! [`SchemaRegistry::is_table_versioned`](crate::schema::SchemaRegistry::is_table_versioned)
//! are ever renamed; joined tables from outside the class tree pass through
//! untouched.

use super::{Direction, IdColumn, JoinOn, OrderBy, Predicate, SelectQuery, VersionFilter};
use crate::error::{StagebaseError, StagebaseResult};
use crate::reading::ReadingMode;
use crate::record::columns;
use crate::schema::{SchemaRegistry, Stage, versions_table};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Parameter-bag keys set by the outer query builder.
pub const PARAM_MODE: &str = "Versioned.mode";
pub const PARAM_STAGE: &str = "Versioned.stage";
pub const PARAM_DATE: &str = "Versioned.date";
pub const PARAM_VERSION: &str = "Versioned.version";

/// Rewrite `query` in place for `mode`.
pub fn augment_select(
    query: &mut SelectQuery,
    registry: &SchemaRegistry,
    class: &str,
    mode: &ReadingMode,
) -> StagebaseResult<()> {
    log::trace!("augmenting select on {class} for mode {mode}");
    match mode {
        ReadingMode::Stage(stage) => rewrite_stage(query, registry, class, *stage),
        ReadingMode::StageUnique(stage) => {
            let spec = registry.spec(class)?;
            if !spec.staged {
                return Err(StagebaseError::config(format!(
                    "StageUnique reading mode requires a staged class, '{class}' is version-only"
                )));
            }
            rewrite_stage(query, registry, class, *stage)?;
            let other = registry.stage_table(class, &spec.table, stage.other())?;
            query.filter.push(Predicate::NotInStage { table: other });
            Ok(())
        }
        ReadingMode::Archive(date) => {
            rewrite_versions(query, registry, class)?;
            query.version_filter = Some(VersionFilter::LatestAt(*date));
            Ok(())
        }
        ReadingMode::LatestVersions => {
            rewrite_versions(query, registry, class)?;
            query.version_filter = Some(VersionFilter::Latest);
            Ok(())
        }
        ReadingMode::Version(v) => {
            rewrite_versions(query, registry, class)?;
            query.version_filter = Some(VersionFilter::Exact(*v));
            Ok(())
        }
        ReadingMode::AllVersions => {
            rewrite_versions(query, registry, class)?;
            query.version_filter = Some(VersionFilter::All);
            query.order_by.push(OrderBy {
                column: columns::VERSION.to_string(),
                direction: Direction::Asc,
            });
            Ok(())
        }
    }
}

/// Entry point for the untyped hook: parse the `Versioned.*` parameter bag,
/// then augment. A missing or malformed required parameter fails here,
/// before any store access.
pub fn augment_from_params(
    query: &mut SelectQuery,
    registry: &SchemaRegistry,
    class: &str,
    params: &BTreeMap<String, String>,
) -> StagebaseResult<()> {
    let mode = mode_from_params(params)?;
    augment_select(query, registry, class, &mode)
}

fn mode_from_params(params: &BTreeMap<String, String>) -> StagebaseResult<ReadingMode> {
    let mode = params
        .get(PARAM_MODE)
        .ok_or_else(|| StagebaseError::config("missing query parameter 'Versioned.mode'"))?;
    match mode.as_str() {
        "stage" => Ok(ReadingMode::Stage(stage_param(params)?)),
        "stage_unique" => Ok(ReadingMode::StageUnique(stage_param(params)?)),
        "archive" => {
            let raw = params.get(PARAM_DATE).ok_or_else(|| {
                StagebaseError::config("archive reading mode requires 'Versioned.date'")
            })?;
            format!("Archive.{raw}").parse()
        }
        "all_versions" => Ok(ReadingMode::AllVersions),
        "latest_versions" => Ok(ReadingMode::LatestVersions),
        "version" => {
            let raw = params.get(PARAM_VERSION).ok_or_else(|| {
                StagebaseError::config("version reading mode requires 'Versioned.version'")
            })?;
            format!("Version.{raw}").parse()
        }
        other => Err(StagebaseError::config(format!(
            "unknown reading mode '{other}'"
        ))),
    }
}

fn stage_param(params: &BTreeMap<String, String>) -> StagebaseResult<Stage> {
    let raw = params
        .get(PARAM_STAGE)
        .ok_or_else(|| StagebaseError::config("stage reading mode requires 'Versioned.stage'"))?;
    Stage::from_str(raw).map_err(|_| StagebaseError::config(format!("invalid stage '{raw}'")))
}

/// `stage` rewrite: rename versioned tables to their stage form. A no-op for
/// Draft and for version-only classes.
fn rewrite_stage(
    query: &mut SelectQuery,
    registry: &SchemaRegistry,
    class: &str,
    stage: Stage,
) -> StagebaseResult<()> {
    if registry.is_table_versioned(class, &query.from.table)? {
        query.from.table = registry.stage_table(class, &query.from.table, stage)?;
    }
    for join in &mut query.joins {
        if registry.is_table_versioned(class, &join.table)? {
            join.table = registry.stage_table(class, &join.table, stage)?;
        }
    }
    Ok(())
}

/// Shared history rewrite: versioned tables move to their `_Versions` form,
/// id joins become `(RecordID, Version)` joins, and record identity is read
/// from `RecordID` — aliased back to `ID` except for distinct-count queries,
/// where the alias would collapse one row per version into one per record.
fn rewrite_versions(
    query: &mut SelectQuery,
    registry: &SchemaRegistry,
    class: &str,
) -> StagebaseResult<()> {
    if registry.is_table_versioned(class, &query.from.table)? {
        query.from.table = versions_table(&query.from.table);
    }
    for join in &mut query.joins {
        if registry.is_table_versioned(class, &join.table)? {
            join.table = versions_table(&join.table);
            join.on = JoinOn::RecordVersion;
        }
    }
    query.id_column = if query.count_distinct {
        IdColumn::RecordIdRaw
    } else {
        IdColumn::RecordIdAliased
    };
    Ok(())
}
