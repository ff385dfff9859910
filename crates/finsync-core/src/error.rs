//! Error types for finsync.

use chrono::{DateTime, Utc};

use crate::ids::IdError;

/// Result type for finsync domain operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by domain validation and the status state machines.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A date range whose start lies after its end.
    #[error("invalid date range: from {from} is after to {to}")]
    InvalidRange {
        /// Requested start.
        from: DateTime<Utc>,
        /// Requested end.
        to: DateTime<Utc>,
    },

    /// A timestamp string that matches none of the accepted formats.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A required field was absent from an inbound payload.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field carrying a value outside its accepted set.
    #[error("invalid {field}: {value}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Rejected value.
        value: String,
    },

    /// A status change the state machine does not allow.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl SyncError {
    /// Whether this error stems from caller input rather than server state.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. }
                | Self::InvalidTimestamp(_)
                | Self::MissingField(_)
                | Self::InvalidValue { .. }
                | Self::InvalidId(_)
        )
    }
}

/// A rejected state-machine transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} cannot apply {event} while {from}")]
pub struct TransitionError {
    /// Which state machine rejected the event (`consent` or `data session`).
    pub entity: &'static str,
    /// Current persisted status.
    pub from: String,
    /// The event that was rejected.
    pub event: String,
}
