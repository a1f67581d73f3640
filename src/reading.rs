//! Reading modes and the scoped reading state.
//!
//! A [`ReadingMode`] selects which physical tables and which version rows a
//! query resolves against. It is carried by an explicit [`ReadingState`]
//! value owned by the engine rather than process-global state; temporary
//! stage switches go through [`ReadingState::with_mode`], which restores the
//! prior mode on scope exit even when the inner closure panics.

use crate::error::{StagebaseError, StagebaseResult};
use crate::schema::Stage;
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;

/// The ambient parameter selecting which stage/version/archive-date a query
/// resolves against.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingMode {
    /// Read one stage's current content.
    Stage(Stage),
    /// Read one stage, excluding rows that also exist on the other stage.
    /// Used to diff stages.
    StageUnique(Stage),
    /// Reconstruct content as of a date from history rows.
    Archive(DateTime<Utc>),
    /// Every history row, ordered by version. Includes soft-deleted records.
    AllVersions,
    /// The latest history row per record, regardless of stage presence.
    LatestVersions,
    /// One exact version per record.
    Version(u64),
}

impl ReadingMode {
    pub const DEFAULT: ReadingMode = ReadingMode::Stage(Stage::Draft);

    /// Source a reading mode from request parameters (`?stage=`,
    /// `?archiveDate=`), the way a session layer feeds this core.
    ///
    /// An archive date takes precedence over a stage choice. Returns
    /// `Ok(None)` when neither parameter is present; an unparseable value is
    /// a configuration error.
    pub fn from_query_params(
        stage: Option<&str>,
        archive_date: Option<&str>,
    ) -> StagebaseResult<Option<ReadingMode>> {
        if let Some(date) = archive_date {
            let date = parse_archive_date(date)?;
            return Ok(Some(ReadingMode::Archive(date)));
        }
        if let Some(stage) = stage {
            let stage = Stage::from_str(stage).map_err(|_| {
                StagebaseError::config(format!("invalid stage parameter '{stage}'"))
            })?;
            return Ok(Some(ReadingMode::Stage(stage)));
        }
        Ok(None)
    }
}

impl fmt::Display for ReadingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingMode::Stage(stage) => write!(f, "Stage.{stage}"),
            ReadingMode::StageUnique(stage) => write!(f, "StageUnique.{stage}"),
            ReadingMode::Archive(date) => write!(f, "Archive.{}", date.to_rfc3339()),
            ReadingMode::AllVersions => write!(f, "AllVersions"),
            ReadingMode::LatestVersions => write!(f, "LatestVersions"),
            ReadingMode::Version(v) => write!(f, "Version.{v}"),
        }
    }
}

fn parse_archive_date(raw: &str) -> StagebaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| StagebaseError::config(format!("invalid archive date '{raw}'")))
}

impl FromStr for ReadingMode {
    type Err = StagebaseError;

    /// Parse the dotted string form (`"Stage.Live"`, `"Archive.<rfc3339>"`,
    /// `"Version.<n>"`, ...). Unknown modes and missing mode arguments are
    /// configuration errors, raised here rather than when the mode is first
    /// used against a store.
    fn from_str(raw: &str) -> StagebaseResult<Self> {
        let (head, arg) = match raw.split_once('.') {
            Some((head, arg)) => (head, Some(arg)),
            None => (raw, None),
        };
        match (head, arg) {
            ("Stage", Some(stage)) => Stage::from_str(stage)
                .map(ReadingMode::Stage)
                .map_err(|_| StagebaseError::config(format!("invalid stage '{stage}'"))),
            ("StageUnique", Some(stage)) => Stage::from_str(stage)
                .map(ReadingMode::StageUnique)
                .map_err(|_| StagebaseError::config(format!("invalid stage '{stage}'"))),
            ("Archive", Some(date)) => Ok(ReadingMode::Archive(parse_archive_date(date)?)),
            ("Archive", None) => Err(StagebaseError::config(
                "archive reading mode requires a date (\"Archive.<rfc3339>\")",
            )),
            ("AllVersions", None) => Ok(ReadingMode::AllVersions),
            ("LatestVersions", None) => Ok(ReadingMode::LatestVersions),
            ("Version", Some(v)) => v
                .parse::<u64>()
                .map(ReadingMode::Version)
                .map_err(|_| StagebaseError::config(format!("invalid version number '{v}'"))),
            ("Version", None) => Err(StagebaseError::config(
                "version reading mode requires a number (\"Version.<n>\")",
            )),
            ("Stage", None) | ("StageUnique", None) => Err(StagebaseError::config(format!(
                "{head} reading mode requires a stage (\"{head}.Draft\" or \"{head}.Live\")"
            ))),
            _ => Err(StagebaseError::config(format!(
                "unknown reading mode '{raw}'"
            ))),
        }
    }
}

/// The current reading mode of one engine.
///
/// Not shared across threads; the engine owns one and threads it through its
/// own calls. Scoped overrides restore the prior mode on drop, which closes
/// the leak risk of manual save/restore pairs around fallible code.
#[derive(Debug)]
pub struct ReadingState {
    mode: RefCell<ReadingMode>,
}

impl Default for ReadingState {
    fn default() -> Self {
        ReadingState::new(ReadingMode::DEFAULT)
    }
}

impl ReadingState {
    pub fn new(mode: ReadingMode) -> Self {
        ReadingState {
            mode: RefCell::new(mode),
        }
    }

    pub fn mode(&self) -> ReadingMode {
        self.mode.borrow().clone()
    }

    pub fn set_mode(&self, mode: ReadingMode) {
        *self.mode.borrow_mut() = mode;
    }

    /// The stage queries currently resolve against, for operations that only
    /// make sense in stage terms (writes).
    pub fn stage(&self) -> Stage {
        match *self.mode.borrow() {
            ReadingMode::Stage(stage) | ReadingMode::StageUnique(stage) => stage,
            _ => Stage::Draft,
        }
    }

    /// Run `f` with the mode temporarily overridden.
    ///
    /// Restoration happens in a drop guard, so the prior mode is back in
    /// place on early `?` returns and on panic unwinds alike.
    pub fn with_mode<R>(&self, mode: ReadingMode, f: impl FnOnce() -> R) -> R {
        let _guard = ModeGuard::set(self, mode);
        f()
    }

    /// Shorthand for a stage-scoped override.
    pub fn with_stage<R>(&self, stage: Stage, f: impl FnOnce() -> R) -> R {
        self.with_mode(ReadingMode::Stage(stage), f)
    }
}

struct ModeGuard<'a> {
    state: &'a ReadingState,
    prior: ReadingMode,
}

impl<'a> ModeGuard<'a> {
    fn set(state: &'a ReadingState, mode: ReadingMode) -> Self {
        let prior = state.mode.replace(mode);
        ModeGuard { state, prior }
    }
}

impl Drop for ModeGuard<'_> {
    fn drop(&mut self) {
        *self.state.mode.borrow_mut() = self.prior.clone();
    }
}
