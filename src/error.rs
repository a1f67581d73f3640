//! Error types for Stagebase operations.
//!
//! All public APIs in Stagebase return `StagebaseResult<T>`, which is an alias
//! for `Result<T, StagebaseError>`.
//!
//! The error surface follows a strict taxonomy:
//!
//! - **Configuration errors** (`Configuration`): an invalid reading-mode
//!   string, a missing archive date, an ownership declaration whose target is
//!   not a registered versioned class, an unknown class or table. These are
//!   programming/config defects and are raised immediately at the point of
//!   misuse, never retried.
//! - **Permission denials and precondition failures** are *not* errors: the
//!   lifecycle operations on [`VersionedEngine`](crate::versioned::VersionedEngine)
//!   return `Ok(false)` for those, leaving it to callers to decide how to
//!   surface them.
//! - **Backend and codec failures** (`RedbError`, `SledError`, `DecodeError`,
//!   `EncodeError`) wrap the underlying store transparently and propagate.
//! - **Unsupported operations** (`Unsupported`): declared-but-out-of-scope
//!   operations such as bulk changeset publish, which fail loudly rather than
//!   guessing at behavior.
//!
//! There are no automatic retries anywhere in this crate.

use thiserror::Error;

/// Result type alias for Stagebase operations.
///
/// Most functions in this crate return `StagebaseResult<T>`, which is
/// shorthand for `Result<T, StagebaseError>`.
pub type StagebaseResult<T> = Result<T, StagebaseError>;

/// The main error type for Stagebase operations.
#[derive(Error, Debug)]
pub enum StagebaseError {
    /// Wraps errors from the redb database
    #[cfg(feature = "redb")]
    #[error(transparent)]
    RedbError(#[from] RedbError),

    /// Wraps errors from the sled database
    #[cfg(feature = "sled")]
    #[error(transparent)]
    SledError(#[from] sled::Error),

    /// Wraps deserialization errors from bincode
    #[error(transparent)]
    DecodeError(#[from] bincode::error::DecodeError),

    /// Wraps serialization errors from bincode
    #[error(transparent)]
    EncodeError(#[from] bincode::error::EncodeError),

    /// Configuration error: invalid reading mode, bad ownership declaration,
    /// unknown class or table. Indicates a defect at the call site, not
    /// transient state.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Table (physical stage/versions table) not found in the backend.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Record not found where one was required (e.g. copying a version that
    /// does not exist in the source stage or history).
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Permission denied at the storage layer.
    ///
    /// Lifecycle operations report permission failures as `Ok(false)`; this
    /// variant exists for backends and callers that need a hard error form.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The aggregate is in a state that forbids the operation, e.g. adding
    /// objects to a changeset that has already been published or reverted.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation declared by the model but deliberately not implemented in
    /// this core (changeset bulk publish/revert, removal of implicitly-added
    /// changeset members).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// I/O error from file-system backed stores.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Custom error with a message
    #[error("{0}")]
    Other(String),
}

impl StagebaseError {
    /// Shorthand used by the parsers and registry for configuration defects.
    pub fn config(msg: impl Into<String>) -> Self {
        StagebaseError::Configuration(msg.into())
    }
}

/// Errors that can occur when interacting with the redb database.
///
/// This enum wraps all possible errors from the `redb` crate, providing a
/// unified error type for database operations.
#[cfg(feature = "redb")]
#[derive(Error, Debug)]
pub enum RedbError {
    /// Errors from database creation or opening
    #[error(transparent)]
    DatabaseError(#[from] redb::DatabaseError),

    /// Errors from transaction operations
    #[error(transparent)]
    TransactionError(#[from] redb::TransactionError),

    /// Errors from table operations
    #[error(transparent)]
    TableError(#[from] redb::TableError),

    /// Errors from committing transactions
    #[error(transparent)]
    CommitError(#[from] redb::CommitError),

    /// Errors from storage operations
    #[error(transparent)]
    StorageError(#[from] redb::StorageError),
}

#[cfg(feature = "redb")]
macro_rules! impl_from_redb {
    ($($err:ty => $variant:ident),*) => {
        $(
            impl From<$err> for StagebaseError {
                fn from(err: $err) -> Self {
                    StagebaseError::RedbError(RedbError::$variant(err))
                }
            }
        )*
    };
}

#[cfg(feature = "redb")]
impl_from_redb!(
    redb::DatabaseError => DatabaseError,
    redb::TransactionError => TransactionError,
    redb::TableError => TableError,
    redb::CommitError => CommitError,
    redb::StorageError => StorageError
);
