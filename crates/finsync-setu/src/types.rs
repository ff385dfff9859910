//! Setu API request and response types.
//!
//! Responses are decoded leniently: the handful of fields finsync acts on are
//! lifted out and the full body is kept as `raw` for storage.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use finsync_core::{DateRange, FetchType};

use crate::error::SetuError;

/// FI types requested on every consent.
pub const DEFAULT_FI_TYPES: &[&str] = &["DEPOSIT"];

/// Consent types requested on every consent.
pub const DEFAULT_CONSENT_TYPES: &[&str] = &["PROFILE", "SUMMARY", "TRANSACTIONS"];

/// Purpose code for personal finance management.
pub const DEFAULT_PURPOSE_CODE: &str = "101";

/// What to ask the user to consent to.
#[derive(Debug, Clone)]
pub struct ConsentInput {
    /// Virtual user address, if already known.
    pub vua: Option<String>,
    /// Window of historical data the consent covers.
    pub data_range: DateRange,
    /// Consent validity in months.
    pub duration_months: u32,
    /// ONETIME or PERIODIC.
    pub fetch_type: FetchType,
    /// Purpose text shown to the user.
    pub purpose: String,
    /// Where Setu sends the user after approval.
    pub redirect_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateConsentRequest<'a> {
    consent_duration: ConsentDuration,
    #[serde(skip_serializing_if = "Option::is_none")]
    vua: Option<&'a str>,
    data_range: WireRange,
    consent_mode: &'static str,
    fetch_type: &'static str,
    consent_types: &'static [&'static str],
    fi_types: &'static [&'static str],
    purpose: Purpose<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_url: Option<&'a str>,
}

#[derive(Serialize)]
struct ConsentDuration {
    unit: &'static str,
    value: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Purpose<'a> {
    code: &'static str,
    text: &'a str,
}

#[derive(Serialize)]
pub(crate) struct WireRange {
    from: String,
    to: String,
}

impl From<&DateRange> for WireRange {
    fn from(range: &DateRange) -> Self {
        Self {
            from: wire_timestamp(range.from),
            to: wire_timestamp(range.to),
        }
    }
}

fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl<'a> CreateConsentRequest<'a> {
    pub(crate) fn new(input: &'a ConsentInput) -> Self {
        Self {
            consent_duration: ConsentDuration {
                unit: "MONTH",
                value: input.duration_months,
            },
            vua: input.vua.as_deref(),
            data_range: WireRange::from(&input.data_range),
            consent_mode: "STORE",
            fetch_type: input.fetch_type.as_str(),
            consent_types: DEFAULT_CONSENT_TYPES,
            fi_types: DEFAULT_FI_TYPES,
            purpose: Purpose {
                code: DEFAULT_PURPOSE_CODE,
                text: &input.purpose,
            },
            redirect_url: input.redirect_url.as_deref(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateSessionRequest<'a> {
    consent_id: &'a str,
    data_range: WireRange,
    format: &'static str,
}

impl<'a> CreateSessionRequest<'a> {
    pub(crate) fn new(consent_id: &'a str, range: &DateRange) -> Self {
        Self {
            consent_id,
            data_range: WireRange::from(range),
            format: "json",
        }
    }
}

#[derive(Serialize)]
pub(crate) struct RevokeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<&'a str>,
}

/// Setu's answer to a consent request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsentResponse {
    /// Provider consent id.
    pub id: String,
    /// Approval URL to send the user to.
    pub url: Option<String>,
    /// Status as reported, usually `PENDING`.
    pub status: String,
    /// Full response body.
    pub raw: Value,
}

impl TryFrom<Value> for ConsentResponse {
    type Error = SetuError;

    fn try_from(raw: Value) -> Result<Self, Self::Error> {
        let id = string_field(&raw, &["id", "consentId"])
            .ok_or_else(|| missing("consent response", "id"))?;
        Ok(Self {
            id,
            url: string_field(&raw, &["url", "redirectUrl"]),
            status: string_field(&raw, &["status"]).unwrap_or_else(|| "PENDING".into()),
            raw,
        })
    }
}

/// Setu's answer to a data session request.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResponse {
    /// Provider session id.
    pub id: String,
    /// Status as reported.
    pub status: Option<String>,
    /// Full response body.
    pub raw: Value,
}

impl TryFrom<Value> for SessionResponse {
    type Error = SetuError;

    fn try_from(raw: Value) -> Result<Self, Self::Error> {
        let id = string_field(&raw, &["id", "sessionId", "dataSessionId"])
            .ok_or_else(|| missing("session response", "id"))?;
        Ok(Self {
            id,
            status: string_field(&raw, &["status"]),
            raw,
        })
    }
}

fn string_field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .map(String::from)
}

fn missing(what: &str, field: &str) -> SetuError {
    SetuError::MalformedResponse(format!("{what} has no {field}"))
}
