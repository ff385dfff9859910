//! Consent records and the consent state machine.
//!
//! ```text
//!   (created) ──Activated──▶ ACTIVE ──Revoked──▶ REVOKED (terminal)
//!       │                      │
//!       └──Reported(s)──▶ s ◀──┘   provider strings stored verbatim
//! ```
//!
//! `PENDING` is implied at creation; the first persisted status is whatever
//! the provider reports when the consent is created.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError, TransitionError};
use crate::ids::{ConsentId, UserId};

/// Default look-back used for consent windows and data sessions.
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 6;

/// An inclusive UTC time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Window start.
    pub from: DateTime<Utc>,
    /// Window end.
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// Build a range, rejecting `from > to`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidRange` when the bounds are inverted.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from > to {
            return Err(SyncError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Parse both bounds from strings and validate their order.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidTimestamp` or `SyncError::InvalidRange`.
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        let from =
            parse_timestamp(from).ok_or_else(|| SyncError::InvalidTimestamp(from.to_string()))?;
        let to = parse_timestamp(to).ok_or_else(|| SyncError::InvalidTimestamp(to.to_string()))?;
        Self::new(from, to)
    }

    /// The `months` leading up to `now`.
    #[must_use]
    pub fn trailing_months(now: DateTime<Utc>, months: u32) -> Self {
        Self {
            from: months_before(now, months),
            to: now,
        }
    }

    /// The consent window: `lookback_months` back from `now` through
    /// `duration_months` ahead, so later session windows always fit inside.
    #[must_use]
    pub fn consent_window(now: DateTime<Utc>, lookback_months: u32, duration_months: u32) -> Self {
        let to = now
            .checked_add_months(Months::new(duration_months))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            from: months_before(now, lookback_months),
            to,
        }
    }

    /// Clip this range into `bounds`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidRange` when nothing of the range is left
    /// inside `bounds`.
    pub fn clamp_to(&self, bounds: &DateRange) -> Result<Self> {
        Self::new(self.from.max(bounds.from), self.to.min(bounds.to))
    }

    /// Whether `instant` lies inside the range.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant <= self.to
    }
}

fn months_before(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Parse a timestamp in any of the formats seen in provider payloads.
///
/// Accepted, in order: RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]` (taken as
/// UTC), `YYYY-MM-DD`, `DD-MM-YYYY`, `DD/MM/YYYY`. Bare dates map to
/// midnight UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

/// How often the provider may fetch data under a consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FetchType {
    /// A single data session is allowed at a time.
    Onetime,
    /// Any number of data sessions.
    Periodic,
}

impl FetchType {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Onetime => "ONETIME",
            Self::Periodic => "PERIODIC",
        }
    }

    /// Whether at most one live data session may exist for the consent.
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::Onetime)
    }
}

impl fmt::Display for FetchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONETIME" => Ok(Self::Onetime),
            "PERIODIC" => Ok(Self::Periodic),
            _ => Err(SyncError::InvalidValue {
                field: "fetch_type",
                value: s.to_string(),
            }),
        }
    }
}

/// Persisted consent status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConsentStatus {
    /// Created, awaiting the user's approval.
    Pending,
    /// Approved; data sessions may be created.
    Active,
    /// Revoked by the user or provider. Terminal.
    Revoked,
    /// Any other provider status, stored verbatim (`PAUSED`, `REJECTED`, ...).
    Other(String),
}

impl ConsentStatus {
    /// Parse a provider status string. Unknown values pass through.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "ACTIVE" => Self::Active,
            "REVOKED" => Self::Revoked,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Revoked => "REVOKED",
            Self::Other(s) => s,
        }
    }

    /// Whether no further transitions are accepted.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked)
    }

    /// Apply an event, returning the next status.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` for any event on a revoked consent.
    pub fn apply(&self, event: &ConsentEvent) -> std::result::Result<Self, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                entity: "consent",
                from: self.to_string(),
                event: event.to_string(),
            });
        }
        Ok(match event {
            ConsentEvent::Activated => Self::Active,
            ConsentEvent::Revoked => Self::Revoked,
            ConsentEvent::Reported(raw) => Self::from_provider(raw),
        })
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ConsentStatus {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        if value.trim().is_empty() {
            return Err(SyncError::MissingField("status"));
        }
        Ok(Self::from_provider(&value))
    }
}

impl From<ConsentStatus> for String {
    fn from(status: ConsentStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Something that happened to a consent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentEvent {
    /// The user approved the consent.
    Activated,
    /// The consent was revoked.
    Revoked,
    /// The provider reported some other status.
    Reported(String),
}

impl ConsentEvent {
    /// Map a provider status string onto an event.
    #[must_use]
    pub fn from_status(raw: &str) -> Self {
        match ConsentStatus::from_provider(raw) {
            ConsentStatus::Active => Self::Activated,
            ConsentStatus::Revoked => Self::Revoked,
            other => Self::Reported(other.as_str().to_string()),
        }
    }
}

impl fmt::Display for ConsentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activated => f.write_str("activation"),
            Self::Revoked => f.write_str("revocation"),
            Self::Reported(s) => write!(f, "status {s}"),
        }
    }
}

/// A user's consent to share financial data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consent {
    /// Provider consent id.
    pub consent_id: ConsentId,
    /// Owning user.
    pub user_id: UserId,
    /// Current status.
    pub status: ConsentStatus,
    /// ONETIME or PERIODIC.
    pub fetch_type: FetchType,
    /// Window data may be requested for; session windows are clipped to it.
    pub date_range: DateRange,
    /// Purpose text shown to the user.
    pub purpose: String,
    /// Virtual user address used for initiation.
    pub vua: Option<String>,
    /// Approval URL returned by the provider.
    pub redirect_url: Option<String>,
    /// Last provider payload seen for this consent.
    pub raw: serde_json::Value,
    /// When the consent was created locally.
    pub created_at: DateTime<Utc>,
    /// When the consent was last written.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        let err = DateRange::new(at(2025, 2, 1), at(2025, 1, 1)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRange { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn range_clamps_end_to_consent_expiry() {
        let consent = DateRange::new(at(2024, 12, 1), at(2025, 6, 1)).unwrap();
        let requested = DateRange::new(at(2025, 1, 1), at(2025, 12, 1)).unwrap();
        let clamped = requested.clamp_to(&consent).unwrap();
        assert_eq!(clamped.from, at(2025, 1, 1));
        assert_eq!(clamped.to, at(2025, 6, 1));
    }

    #[test]
    fn range_clamp_fails_when_disjoint() {
        let consent = DateRange::new(at(2024, 1, 1), at(2024, 6, 1)).unwrap();
        let requested = DateRange::new(at(2025, 1, 1), at(2025, 2, 1)).unwrap();
        assert!(requested.clamp_to(&consent).is_err());
    }

    #[test]
    fn consent_window_spans_lookback_and_duration() {
        let window = DateRange::consent_window(at(2025, 3, 15), 6, 12);
        assert_eq!(window.from, at(2024, 9, 15));
        assert_eq!(window.to, at(2026, 3, 15));
    }

    #[test]
    fn parse_accepts_provider_formats() {
        assert_eq!(parse_timestamp("2025-01-02"), Some(at(2025, 1, 2)));
        assert_eq!(parse_timestamp("02-01-2025"), Some(at(2025, 1, 2)));
        assert_eq!(parse_timestamp("02/01/2025"), Some(at(2025, 1, 2)));
        assert_eq!(
            parse_timestamp("2025-01-02T00:00:00.000+00:00"),
            Some(at(2025, 1, 2))
        );
        assert_eq!(parse_timestamp("2025-01-02T00:00:00"), Some(at(2025, 1, 2)));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn activation_then_revocation() {
        let status = ConsentStatus::Pending;
        let status = status.apply(&ConsentEvent::Activated).unwrap();
        assert_eq!(status, ConsentStatus::Active);
        let status = status.apply(&ConsentEvent::Revoked).unwrap();
        assert_eq!(status, ConsentStatus::Revoked);
    }

    #[test]
    fn revoked_is_terminal() {
        let err = ConsentStatus::Revoked
            .apply(&ConsentEvent::Activated)
            .unwrap_err();
        assert_eq!(err.entity, "consent");
        assert_eq!(err.from, "REVOKED");
    }

    #[test]
    fn unknown_status_passes_through() {
        let next = ConsentStatus::Active
            .apply(&ConsentEvent::from_status("paused"))
            .unwrap();
        assert_eq!(next, ConsentStatus::Other("PAUSED".into()));
        assert_eq!(next.to_string(), "PAUSED");
    }

    #[test]
    fn status_strings_map_to_events() {
        assert_eq!(ConsentEvent::from_status("ACTIVE"), ConsentEvent::Activated);
        assert_eq!(ConsentEvent::from_status("revoked"), ConsentEvent::Revoked);
    }

    #[test]
    fn fetch_type_wire_format() {
        assert_eq!("onetime".parse::<FetchType>().unwrap(), FetchType::Onetime);
        assert_eq!(
            serde_json::to_string(&FetchType::Periodic).unwrap(),
            "\"PERIODIC\""
        );
        assert!(FetchType::Onetime.is_exclusive());
        assert!(!FetchType::Periodic.is_exclusive());
    }
}
