//! # Errors
//!
//! Error types shared by every livestore subsystem.
//!
//! Storage and evaluation failures propagate to the call site or notifier
//! that caused them. The one internal condition that is never surfaced is
//! `VersionNotAvailable` seen by a notifier, which degrades to a fresh
//! initial delivery instead.

use thiserror::Error;

use crate::mvcc::SnapshotVersion;
use crate::schema::ObjKey;

/// Result type for livestore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Programmer errors.
///
/// These are reported synchronously at the offending call and are not
/// meant to be recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    /// A thread-bound handle was used from a thread other than its owner
    #[error("Realm accessed from incorrect thread")]
    IncorrectThread,

    /// A write API was called outside a write transaction
    #[error("Cannot modify objects outside of a write transaction")]
    NotInWriteTransaction,

    /// A write transaction was started while one is already open on the same realm
    #[error("The Realm is already in a write transaction")]
    AlreadyInWriteTransaction,

    /// A write was attempted on a read-only realm
    #[error("Cannot write to a read-only Realm")]
    ReadOnly,

    /// The realm was closed or its environment shut down
    #[error("Realm is closed")]
    RealmClosed,
}

/// Livestore errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    // ==================
    // Store Errors
    // ==================
    /// Another write transaction is active on the same file
    #[error("Write conflict: another write transaction is active on '{path}'")]
    WriteConflict {
        /// Path of the contended file
        path: String,
    },

    /// A historical snapshot was pruned before it could be pinned
    #[error("Snapshot version {0} is no longer available")]
    VersionNotAvailable(SnapshotVersion),

    // ==================
    // Evaluation Errors
    // ==================
    /// A filter or sort could not be evaluated
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// The object does not exist at the pinned version
    #[error("Object not found: {object_type} {key}")]
    ObjectNotFound {
        /// Object type name
        object_type: String,
        /// Row identity
        key: ObjKey,
    },

    /// Positional access past the end of a collection
    #[error("Index {index} out of bounds (len: {len})")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Collection length
        len: usize,
    },

    // ==================
    // Schema / Config Errors
    // ==================
    /// Schema definition or value validation failed
    #[error("Schema error: {0}")]
    Schema(String),

    /// A path was reopened with incompatible settings
    #[error("Mismatched config: {0}")]
    MismatchedConfig(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// The environment has been shut down
    #[error("Environment has been shut down")]
    EnvironmentClosed,

    // ==================
    // Usage Errors
    // ==================
    /// Programmer error
    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl Error {
    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create an invalid predicate error
    pub fn invalid_predicate(msg: impl Into<String>) -> Self {
        Self::InvalidPredicate(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true for programmer-error class failures
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Error::Usage(_))
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::WriteConflict { .. } => "LIVE_WRITE_CONFLICT",
            Error::VersionNotAvailable(_) => "LIVE_VERSION_NOT_AVAILABLE",
            Error::InvalidPredicate(_) => "LIVE_INVALID_PREDICATE",
            Error::ObjectNotFound { .. } => "LIVE_OBJECT_NOT_FOUND",
            Error::IndexOutOfBounds { .. } => "LIVE_INDEX_OUT_OF_BOUNDS",
            Error::Schema(_) => "LIVE_SCHEMA_INVALID",
            Error::MismatchedConfig(_) => "LIVE_MISMATCHED_CONFIG",
            Error::Config(_) => "LIVE_CONFIG_INVALID",
            Error::EnvironmentClosed => "LIVE_ENVIRONMENT_CLOSED",
            Error::Usage(UsageError::IncorrectThread) => "LIVE_INCORRECT_THREAD",
            Error::Usage(UsageError::NotInWriteTransaction) => "LIVE_NOT_IN_WRITE",
            Error::Usage(UsageError::AlreadyInWriteTransaction) => "LIVE_ALREADY_IN_WRITE",
            Error::Usage(UsageError::ReadOnly) => "LIVE_READ_ONLY",
            Error::Usage(UsageError::RealmClosed) => "LIVE_REALM_CLOSED",
        }
    }
}
