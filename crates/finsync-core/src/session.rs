//! Data sessions and the data-session state machine.
//!
//! ```text
//!   PENDING ──DataReady──▶ READY ──Fetched──▶ FETCHED
//!      │                     │                   ▲
//!      │                     └──Failed──▶ FAILED │
//!      ├──Failed────────────────────────▶ FAILED │
//!      └──Fetched (manual fetch) ────────────────┘
//! ```
//!
//! `READY` may be re-entered, and a refetch keeps a session `FETCHED`: a
//! `COMPLETED` that arrives after a `PARTIAL` was already fetched is handled
//! as a refetch rather than a return to `READY`. `FAILED` accepts nothing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consent::DateRange;
use crate::error::{SyncError, TransitionError};
use crate::ids::{ConsentId, DataSessionId};

/// Persisted data-session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    /// Requested from the provider, data not yet available.
    Pending,
    /// Provider reports data available.
    Ready,
    /// Data fetched and ingested.
    Fetched,
    /// Creation or fetch failed.
    Failed,
}

impl SessionStatus {
    /// Statuses that occupy a ONETIME consent's single session slot.
    pub const LIVE: [Self; 3] = [Self::Pending, Self::Ready, Self::Fetched];

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Fetched => "FETCHED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the session blocks a new ONETIME session.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Failed)
    }

    /// Apply an event, returning the next status.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` for transitions outside the table above.
    pub fn apply(self, event: SessionEvent) -> Result<Self, TransitionError> {
        use SessionEvent as E;
        match (self, event) {
            (Self::Pending | Self::Ready, E::DataReady) => Ok(Self::Ready),
            (Self::Pending | Self::Ready | Self::Fetched, E::Fetched) => Ok(Self::Fetched),
            (Self::Pending | Self::Ready, E::Failed) => Ok(Self::Failed),
            (from, event) => Err(TransitionError {
                entity: "data session",
                from: from.to_string(),
                event: event.to_string(),
            }),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "READY" => Ok(Self::Ready),
            "FETCHED" => Ok(Self::Fetched),
            "FAILED" => Ok(Self::Failed),
            other => Err(SyncError::InvalidValue {
                field: "session status",
                value: other.to_string(),
            }),
        }
    }
}

/// Something that happened to a data session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The provider has data ready.
    DataReady,
    /// Data was fetched and ingested.
    Fetched,
    /// The provider or the fetch failed.
    Failed,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DataReady => "data-ready",
            Self::Fetched => "fetched",
            Self::Failed => "failed",
        })
    }
}

/// Map a provider session status onto an event.
///
/// `COMPLETED` and `PARTIAL` mean data is ready; `FAILED` and `ERROR` fail
/// the session. Everything else (`PENDING`, `EXPIRED`, ...) is no event.
#[must_use]
pub fn provider_session_event(raw: &str) -> Option<SessionEvent> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "COMPLETED" | "PARTIAL" => Some(SessionEvent::DataReady),
        "FAILED" | "ERROR" => Some(SessionEvent::Failed),
        _ => None,
    }
}

/// A request for FI data under a consent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSession {
    /// Internal id.
    pub id: DataSessionId,
    /// Provider session id, absent until the provider accepts the request.
    pub session_id: Option<String>,
    /// Consent the session belongs to.
    pub consent_id: ConsentId,
    /// Current status.
    pub status: SessionStatus,
    /// Whether this session holds the consent's single ONETIME slot.
    pub exclusive: bool,
    /// Requested data window.
    pub date_range: DateRange,
    /// Last provider payload (session response or fetched FI data).
    pub raw: serde_json::Value,
    /// Failure detail for `FAILED` sessions.
    pub error: Option<String>,
    /// When the provider reported data ready.
    pub ready_at: Option<DateTime<Utc>>,
    /// When data was last fetched.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl DataSession {
    /// A freshly reserved session, before the provider has been called.
    #[must_use]
    pub fn reserve(consent_id: ConsentId, date_range: DateRange, exclusive: bool) -> Self {
        let now = Utc::now();
        Self {
            id: DataSessionId::generate(),
            session_id: None,
            consent_id,
            status: SessionStatus::Pending,
            exclusive,
            date_range,
            raw: serde_json::Value::Null,
            error: None,
            ready_at: None,
            fetched_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `event`, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if the current status rejects the event.
    pub fn transition(&mut self, event: SessionEvent) -> Result<(), TransitionError> {
        let next = self.status.apply(event)?;
        let now = Utc::now();
        match next {
            SessionStatus::Ready => self.ready_at = Some(now),
            SessionStatus::Fetched => self.fetched_at = Some(now),
            SessionStatus::Pending | SessionStatus::Failed => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Mark the session failed with `error`.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if the session already finished.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(SessionEvent::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }
}
