//! Observable lifecycle events
//!
//! Events are explicit and typed. Each maps to a stable name used as the
//! `event` field of the emitted log record.

use std::fmt;

/// Observable events in livestore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Environment & Realm lifecycle
    /// Environment created
    EnvironmentOpen,
    /// Environment shut down
    EnvironmentShutdown,
    /// A file was opened for the first time in the environment
    FileOpen,
    /// A realm handle was opened
    RealmOpen,
    /// A realm handle was closed
    RealmClose,
    /// Reopen rejected because of incompatible settings
    ConfigMismatch,

    // Store
    /// A new snapshot was published
    CommitPublished,
    /// A write transaction was rejected because another writer is active
    WriteConflict,
    /// A write transaction was cancelled
    WriteCancelled,
    /// A snapshot was dropped from retention
    SnapshotPruned,
    /// A notifier-pinned snapshot was evicted by the history limit
    SnapshotEvicted,

    // Notifications
    /// A collection notifier was registered
    NotifierRegistered,
    /// A collection notifier stopped delivering
    NotifierTerminated,
    /// A notifier lost its previous snapshot and restarted from an initial delivery
    NotifierReset,
    /// A notifier failed to evaluate its collection
    NotifierFailed,
    /// A scheduled delivery was folded into one already pending
    DeliveryCoalesced,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::EnvironmentOpen => "ENVIRONMENT_OPEN",
            Event::EnvironmentShutdown => "ENVIRONMENT_SHUTDOWN",
            Event::FileOpen => "FILE_OPEN",
            Event::RealmOpen => "REALM_OPEN",
            Event::RealmClose => "REALM_CLOSE",
            Event::ConfigMismatch => "CONFIG_MISMATCH",

            Event::CommitPublished => "COMMIT_PUBLISHED",
            Event::WriteConflict => "WRITE_CONFLICT",
            Event::WriteCancelled => "WRITE_CANCELLED",
            Event::SnapshotPruned => "SNAPSHOT_PRUNED",
            Event::SnapshotEvicted => "SNAPSHOT_EVICTED",

            Event::NotifierRegistered => "NOTIFIER_REGISTERED",
            Event::NotifierTerminated => "NOTIFIER_TERMINATED",
            Event::NotifierReset => "NOTIFIER_RESET",
            Event::NotifierFailed => "NOTIFIER_FAILED",
            Event::DeliveryCoalesced => "DELIVERY_COALESCED",
        }
    }

    /// Events that indicate a failure visible to the caller
    pub fn is_error(&self) -> bool {
        matches!(self, Event::NotifierFailed | Event::ConfigMismatch)
    }

    /// Events worth surfacing at info level
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Event::EnvironmentOpen
                | Event::EnvironmentShutdown
                | Event::FileOpen
                | Event::NotifierReset
                | Event::SnapshotEvicted
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
